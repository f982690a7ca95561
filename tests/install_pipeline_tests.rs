// comfy-package-installer/tests/install_pipeline_tests.rs

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use comfy_package_installer::config::{InstallConfig, LaunchMode};
use comfy_package_installer::error::InstallerError;
use comfy_package_installer::package_source::PackageSource;
use comfy_package_installer::process_manager::RecordingRunner;
use comfy_package_installer::setup_manager::run_installation;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use zip::write::SimpleFileOptions;

const MANIFEST: &str = r#"{
    "name": "portrait-flow",
    "version": "1.0.0",
    "installation_order": ["custom_nodes/B", "custom_nodes/A"],
    "dependencies": ["numba"],
    "gpu_settings": {"vram_optimize": true, "precision": "fp16", "xformers": "true"}
}"#;

fn package_zip(prefix: &str) -> Vec<u8> {
    let entries: &[(&str, &str)] = &[
        ("config.json", MANIFEST),
        ("custom_nodes/A/__init__.py", "# A"),
        ("custom_nodes/A/requirements.txt", "numpy"),
        ("custom_nodes/B/__init__.py", "# B"),
        ("custom_nodes/B/requirements.txt", "scipy"),
        ("workflows/portrait.json", "{\"nodes\": []}"),
        ("models/loras/detail.safetensors", "lora weights"),
        ("models/checkpoints/sd/base.ckpt", "checkpoint"),
        ("models/README.txt", "not a model"),
    ];
    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(format!("{prefix}{name}"), SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

struct Fixture {
    _dir: TempDir,
    install_dir: PathBuf,
    scratch_root: PathBuf,
    archive: PathBuf,
}

impl Fixture {
    fn new(prefix: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let install_dir = dir.path().join("ComfyUI");
        let scratch_root = dir.path().join("scratch");
        let archive = dir.path().join("portrait-flow.zip");
        File::create(&archive)
            .unwrap()
            .write_all(&package_zip(prefix))
            .unwrap();
        Self {
            _dir: dir,
            install_dir,
            scratch_root,
            archive,
        }
    }

    fn config(&self, source: PackageSource) -> InstallConfig {
        InstallConfig {
            install_dir: self.install_dir.clone(),
            scratch_root: self.scratch_root.clone(),
            source: Some(source),
            launch: LaunchMode::Never,
            verify_only: false,
        }
    }

    fn local_config(&self) -> InstallConfig {
        self.config(PackageSource::LocalFile(self.archive.clone()))
    }
}

fn pip_lines(runner: &RecordingRunner) -> Vec<String> {
    runner
        .command_lines()
        .into_iter()
        .filter(|line| line.starts_with("pip3"))
        .collect()
}

fn requirements_line(install_dir: &Path, node: &str) -> String {
    format!(
        "pip3 install -r {}",
        install_dir.join("custom_nodes").join(node).join("requirements.txt").display()
    )
}

#[tokio::test]
async fn installs_local_package_into_existing_comfyui() {
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    let runner = RecordingRunner::new();

    let summary = run_installation(&fixture.local_config(), &runner).await.unwrap();

    assert!(!summary.comfyui_freshly_installed);
    assert_eq!(summary.package_name.as_deref(), Some("portrait-flow"));
    assert_eq!(summary.custom_nodes, vec!["B".to_string(), "A".to_string()]);
    assert_eq!(summary.assets.workflows, 1);
    assert_eq!(summary.assets.models, 2);
    assert!(!summary.external_models_downloaded);
    assert!(!summary.launched);

    let install = &fixture.install_dir;
    assert_eq!(
        pip_lines(&runner),
        vec![
            requirements_line(install, "B"),
            requirements_line(install, "A"),
            "pip3 install numba".to_string(),
            "pip3 install xformers".to_string(),
        ]
    );
    assert!(!runner.command_lines().iter().any(|line| line.starts_with("git")));

    assert!(install.join("custom_nodes/A/__init__.py").is_file());
    assert!(install.join("custom_nodes/B/__init__.py").is_file());
    assert!(install.join("user/default/workflows/portrait.json").is_file());
    assert!(install.join("models/loras/detail.safetensors").is_file());
    assert!(install.join("models/checkpoints/base.ckpt").is_file());
    assert!(!install.join("models/README.txt").exists());
    for sub in ["vae", "controlnet", "sams", "clip_vision"] {
        assert!(install.join("models").join(sub).is_dir());
    }

    assert!(!fixture.scratch_root.exists(), "scratch should be removed after success");
}

#[tokio::test]
async fn tuning_reaches_later_child_processes_only() {
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    let runner = RecordingRunner::new();

    run_installation(&fixture.local_config(), &runner).await.unwrap();

    let invocations = runner.invocations();
    let node_install = invocations
        .iter()
        .find(|spec| spec.command_line() == requirements_line(&fixture.install_dir, "B"))
        .unwrap();
    assert!(!node_install.env.contains_key("PYTORCH_CUDA_ALLOC_CONF"));

    let import_check = invocations
        .iter()
        .find(|spec| spec.command_line().contains("import torch, numpy, PIL"))
        .unwrap();
    assert_eq!(
        import_check.env.get("PYTORCH_CUDA_ALLOC_CONF").map(String::as_str),
        Some("max_split_size_mb:512")
    );
    assert_eq!(import_check.env.get("PYTHONIOENCODING").map(String::as_str), Some("utf-8"));
    assert!(std::env::var_os("PYTORCH_CUDA_ALLOC_CONF").is_none());
}

#[tokio::test]
async fn fresh_server_gets_comfyui_cloned_first() {
    let fixture = Fixture::new("portrait-flow/");
    let runner = RecordingRunner::new();

    let summary = run_installation(&fixture.local_config(), &runner).await.unwrap();

    assert!(summary.comfyui_freshly_installed);
    // Nothing was really cloned, so the core file check fails, which is only reported.
    assert!(!summary.verification_passed);
    let lines = runner.command_lines();
    assert!(lines[0].starts_with("git clone --depth 1 --branch master https://github.com/comfyanonymous/ComfyUI"));
    assert_eq!(
        lines[1],
        format!("pip3 install -r {}", fixture.install_dir.join("requirements.txt").display())
    );
    assert_eq!(lines[2], "pip3 install accelerate opencv-python-headless onnxruntime-gpu");
    assert_eq!(summary.custom_nodes, vec!["B".to_string(), "A".to_string()]);
}

#[tokio::test]
async fn failing_node_requirements_abort_and_keep_scratch() {
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    let runner = RecordingRunner::new().fail_on("custom_nodes/B/requirements.txt");

    let err = run_installation(&fixture.local_config(), &runner).await.unwrap_err();

    assert!(matches!(err, InstallerError::CommandFailed { .. }));
    assert!(fixture.install_dir.join("custom_nodes/B").is_dir());
    assert!(!fixture.install_dir.join("custom_nodes/A").exists());
    assert!(!fixture.install_dir.join("user/default/workflows/portrait.json").exists());
    assert!(fixture.scratch_root.join("package.download").is_file());
}

#[tokio::test]
async fn missing_tools_are_installed_before_anything_else() {
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    let runner = RecordingRunner::new().with_missing_tool("unzip");

    run_installation(&fixture.local_config(), &runner).await.unwrap();

    let lines = runner.command_lines();
    assert_eq!(lines[0], "apt-get update");
    assert_eq!(lines[1], "apt-get install -y unzip");
}

/// Serves `body` for every GET. HEAD is answered with `head_status`.
async fn serve_package(head_status: &'static str, body: Vec<u8>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let body = body.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let is_get = request.starts_with(b"GET");
                let status = if is_get { "200 OK" } else { head_status };
                let head = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/zip\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    if is_get { body.len() } else { 0 }
                );
                let _ = socket.write_all(head.as_bytes()).await;
                if is_get {
                    let _ = socket.write_all(&body).await;
                }
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}/portrait-flow.zip")
}

fn bypass_proxies() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    std::env::set_var("no_proxy", "127.0.0.1,localhost");
}

#[tokio::test]
async fn installs_package_from_direct_url() {
    bypass_proxies();
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    let url = serve_package("200 OK", package_zip("")).await;
    let source = PackageSource::parse(&url).unwrap();
    let runner = RecordingRunner::new();

    let summary = run_installation(&fixture.config(source), &runner).await.unwrap();

    assert_eq!(summary.custom_nodes.len(), 2);
    assert!(fixture.install_dir.join("models/loras/detail.safetensors").is_file());
}

#[tokio::test]
async fn unreachable_url_fails_before_scratch_is_touched() {
    bypass_proxies();
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let source = PackageSource::parse(&format!("http://127.0.0.1:{port}/missing.zip")).unwrap();
    let runner = RecordingRunner::new();

    let err = run_installation(&fixture.config(source), &runner).await.unwrap_err();

    assert!(matches!(err, InstallerError::UnreachablePackage { .. }), "{err:?}");
    assert!(!fixture.scratch_root.exists());
    assert!(!fixture.install_dir.join("custom_nodes").read_dir().unwrap().any(|_| true));
}

#[tokio::test]
async fn head_error_status_is_unreachable() {
    bypass_proxies();
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    let url = serve_package("404 Not Found", package_zip("")).await;
    let source = PackageSource::parse(&url).unwrap();
    let runner = RecordingRunner::new();

    let err = run_installation(&fixture.config(source), &runner).await.unwrap_err();

    match err {
        InstallerError::UnreachablePackage { reason, .. } => assert!(reason.contains("404"), "{reason}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!fixture.scratch_root.exists());
}

#[tokio::test]
async fn head_method_not_allowed_still_downloads() {
    bypass_proxies();
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    let url = serve_package("405 Method Not Allowed", package_zip("")).await;
    let source = PackageSource::parse(&url).unwrap();
    let runner = RecordingRunner::new();

    let summary = run_installation(&fixture.config(source), &runner).await.unwrap();

    assert_eq!(summary.custom_nodes, vec!["B".to_string(), "A".to_string()]);
    assert!(fixture.install_dir.join("user/default/workflows/portrait.json").is_file());
}

#[tokio::test]
async fn scratch_dir_holding_the_install_is_refused() {
    let fixture = Fixture::new("");
    fs::create_dir_all(&fixture.install_dir).unwrap();
    fs::write(fixture.install_dir.join("main.py"), "# ComfyUI").unwrap();
    let workspace = fixture.install_dir.parent().unwrap().to_path_buf();
    let config = InstallConfig {
        scratch_root: workspace,
        ..fixture.local_config()
    };
    let runner = RecordingRunner::new();

    let err = run_installation(&config, &runner).await.unwrap_err();

    assert!(matches!(err, InstallerError::ScratchOverlapsInstall { .. }), "{err:?}");
    assert!(fixture.install_dir.join("main.py").is_file());
    assert!(fixture.archive.is_file());
    assert!(runner.command_lines().is_empty());
}
