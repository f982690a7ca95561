// comfy-package-installer/src/setup_manager/package_fetcher.rs

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode, Url};
use tokio::io::AsyncWriteExt;

use crate::config::{ProcessEnv, COMMAND_LOG_DIR_NAME};
use crate::error::{InstallerError, Result};
use crate::manifest::MANIFEST_FILE_NAME;
use crate::package_source::PackageSource;
use crate::process_manager::{CommandRunner, CommandSpec};

use super::archive_utils::extract_archive;
use super::dependency_checker::GOOGLE_DRIVE_DOWNLOADER;

pub const DOWNLOAD_FILE_NAME: &str = "package.download";
pub const EXTRACT_DIR_NAME: &str = "extracted";

/// Top-level entries that mark a directory as the bundle root.
pub const BUNDLE_ENTRIES: &[&str] = &[
    "custom_nodes",
    "models",
    "workflows",
    MANIFEST_FILE_NAME,
    "civitai_config.json",
    "download_models.py",
];

const USER_AGENT: &str = concat!("comfy-package-installer/", env!("CARGO_PKG_VERSION"));
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(2);

fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(30))
        .build()?)
}

/// Fetches the package into `scratch_root`, extracts it and returns the bundle root.
pub async fn fetch_package<R: CommandRunner>(
    runner: &R,
    source: &PackageSource,
    scratch_root: &Path,
    env: &ProcessEnv,
) -> Result<PathBuf> {
    info!("[PACKAGE_FETCHER] Fetching package from {}", source);
    let download_path = scratch_root.join(DOWNLOAD_FILE_NAME);

    match source {
        PackageSource::Direct(url) => {
            let client = http_client()?;
            check_reachable(&client, url).await?;
            reset_scratch(scratch_root)?;
            download_direct(&client, url, &download_path).await?;
        }
        PackageSource::GoogleDrive { file_id, .. } => {
            reset_scratch(scratch_root)?;
            download_from_drive(runner, file_id, &download_path, env).await?;
        }
        PackageSource::LocalFile(path) => {
            reset_scratch(scratch_root)?;
            info!("[PACKAGE_FETCHER] Copying local archive {}", path.display());
            fs::copy(path, &download_path).map_err(|e| InstallerError::io(path, e))?;
        }
    }

    ensure_non_empty(&download_path)?;

    let extract_dir = scratch_root.join(EXTRACT_DIR_NAME);
    extract_archive(&download_path, &extract_dir)?;
    let bundle_root = resolve_bundle_root(&extract_dir)?;
    info!("[PACKAGE_FETCHER] Package extracted; bundle root is {}", bundle_root.display());
    Ok(bundle_root)
}

/// HEAD request against the package URL so a dead link fails before anything is written.
pub async fn check_reachable(client: &Client, url: &Url) -> Result<()> {
    debug!("[PACKAGE_FETCHER] Checking {} is reachable", url);
    let response = client
        .head(url.clone())
        .send()
        .await
        .map_err(|e| InstallerError::UnreachablePackage {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    if status.is_success() || status == StatusCode::METHOD_NOT_ALLOWED {
        Ok(())
    } else {
        Err(InstallerError::UnreachablePackage {
            url: url.to_string(),
            reason: format!("HTTP status {}", status),
        })
    }
}

/// Removes the previous run's download and extracted tree, then recreates the
/// directory. `command_logs/` is kept so failure logs from an aborted run
/// survive a retry.
pub fn reset_scratch(scratch_root: &Path) -> Result<()> {
    let entries = match fs::read_dir(scratch_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return fs::create_dir_all(scratch_root).map_err(|e| InstallerError::io(scratch_root, e));
        }
        Err(e) => return Err(InstallerError::io(scratch_root, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| InstallerError::io(scratch_root, e))?;
        if entry.file_name() == COMMAND_LOG_DIR_NAME {
            continue;
        }
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| InstallerError::io(&path, e))?;
        let removed = if file_type.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|e| InstallerError::io(&path, e))?;
    }
    debug!("[PACKAGE_FETCHER] Cleared previous scratch content in {}", scratch_root.display());
    Ok(())
}

async fn download_direct(client: &Client, url: &Url, destination: &Path) -> Result<()> {
    info!("[PACKAGE_FETCHER] Downloading {}", url);
    let response = client.get(url.clone()).send().await?.error_for_status()?;

    let total_size = response.content_length();
    debug!("[PACKAGE_FETCHER] Content length: {:?}", total_size);
    let mut file = tokio::fs::File::create(destination)
        .await
        .map_err(|e| InstallerError::io(destination, e))?;

    let started = Instant::now();
    let mut last_progress_log = started;
    let mut downloaded: u64 = 0;
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)
            .await
            .map_err(|e| InstallerError::io(destination, e))?;
        downloaded += chunk.len() as u64;

        if last_progress_log.elapsed() >= PROGRESS_LOG_INTERVAL {
            log_progress(downloaded, total_size, started.elapsed());
            last_progress_log = Instant::now();
        }
    }
    file.flush().await.map_err(|e| InstallerError::io(destination, e))?;

    info!(
        "[PACKAGE_FETCHER] Downloaded {} in {:.1}s",
        format_bytes(downloaded),
        started.elapsed().as_secs_f64()
    );
    Ok(())
}

fn log_progress(downloaded: u64, total: Option<u64>, elapsed: Duration) {
    match total.filter(|total| *total > 0) {
        Some(total) => {
            let fraction = downloaded as f64 / total as f64;
            let eta = if downloaded > 0 {
                let remaining = elapsed.as_secs_f64() * (total.saturating_sub(downloaded)) as f64 / downloaded as f64;
                format!("{:.0}s", remaining)
            } else {
                "unknown".to_string()
            };
            info!(
                "[PACKAGE_FETCHER] {} / {} ({:.1}%), ETA {}",
                format_bytes(downloaded),
                format_bytes(total),
                fraction * 100.0,
                eta
            );
        }
        None => info!("[PACKAGE_FETCHER] {} downloaded", format_bytes(downloaded)),
    }
}

fn format_bytes(bytes: u64) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    format!("{:.1} MiB", bytes as f64 / MIB)
}

async fn download_from_drive<R: CommandRunner>(
    runner: &R,
    file_id: &str,
    destination: &Path,
    env: &ProcessEnv,
) -> Result<()> {
    let url = format!("https://drive.google.com/uc?id={}", file_id);
    info!("[PACKAGE_FETCHER] Downloading Google Drive file {} with {}", file_id, GOOGLE_DRIVE_DOWNLOADER);
    let spec = CommandSpec::new(GOOGLE_DRIVE_DOWNLOADER, "Google Drive download")
        .arg(url)
        .arg("-O")
        .arg(destination)
        .envs(env);
    runner.run_checked(&spec).await?;
    Ok(())
}

fn ensure_non_empty(path: &Path) -> Result<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            debug!("[PACKAGE_FETCHER] {} holds {} bytes", path.display(), meta.len());
            Ok(())
        }
        _ => Err(InstallerError::EmptyDownload {
            path: path.to_path_buf(),
        }),
    }
}

fn is_bundle_root(dir: &Path) -> bool {
    BUNDLE_ENTRIES.iter().any(|entry| dir.join(entry).exists())
}

/// Archives sometimes wrap their content in a single folder; descend into it
/// when the extraction root has no recognised entry of its own.
pub fn resolve_bundle_root(extract_dir: &Path) -> Result<PathBuf> {
    if is_bundle_root(extract_dir) {
        return Ok(extract_dir.to_path_buf());
    }

    let mut dirs = Vec::new();
    for entry in fs::read_dir(extract_dir).map_err(|e| InstallerError::io(extract_dir, e))? {
        let entry = entry.map_err(|e| InstallerError::io(extract_dir, e))?;
        if entry.path().is_dir() {
            dirs.push(entry.path());
        }
    }

    if dirs.len() == 1 {
        let inner = dirs.remove(0);
        debug!("[PACKAGE_FETCHER] Using wrapped bundle directory {}", inner.display());
        return Ok(inner);
    }

    warn!(
        "[PACKAGE_FETCHER] No recognised package content in {}; nothing may be installed.",
        extract_dir.display()
    );
    Ok(extract_dir.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_manager::RecordingRunner;
    use std::fs::File;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn wrapped_bundle_root_is_unwrapped() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("my-package/custom_nodes")).unwrap();
        assert_eq!(resolve_bundle_root(dir.path()).unwrap(), dir.path().join("my-package"));
    }

    #[test]
    fn flat_bundle_root_is_used_directly() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join("extras")).unwrap();
        assert_eq!(resolve_bundle_root(dir.path()).unwrap(), dir.path());
    }

    #[test]
    fn reset_scratch_clears_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        fs::create_dir_all(scratch.join("extracted/old")).unwrap();
        fs::write(scratch.join("package.download"), b"stale").unwrap();
        fs::create_dir_all(scratch.join("command_logs")).unwrap();
        fs::write(scratch.join("command_logs/command_output_1.log"), "pip failed").unwrap();

        reset_scratch(&scratch).unwrap();

        assert!(!scratch.join("extracted").exists());
        assert!(!scratch.join("package.download").exists());
        assert_eq!(
            fs::read_to_string(scratch.join("command_logs/command_output_1.log")).unwrap(),
            "pip failed"
        );

        let fresh = dir.path().join("fresh");
        reset_scratch(&fresh).unwrap();
        assert!(fresh.is_dir());
    }

    #[tokio::test]
    async fn local_archive_is_copied_and_extracted() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        File::create(&archive)
            .unwrap()
            .write_all(&zip_bytes(&[("pkg/workflows/a.json", b"{}")]))
            .unwrap();

        let scratch = dir.path().join("scratch");
        let runner = RecordingRunner::new();
        let root = fetch_package(
            &runner,
            &PackageSource::LocalFile(archive),
            &scratch,
            &ProcessEnv::default(),
        )
        .await
        .unwrap();

        assert_eq!(root, scratch.join("extracted/pkg"));
        assert!(root.join("workflows/a.json").is_file());
        assert!(scratch.join(DOWNLOAD_FILE_NAME).is_file());
    }

    #[tokio::test]
    async fn drive_download_goes_through_gdown() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let runner = RecordingRunner::new();
        let source = PackageSource::GoogleDrive {
            url: "https://drive.google.com/file/d/abc123/view".to_string(),
            file_id: "abc123".to_string(),
        };

        // The recording runner writes nothing, so the transfer check trips.
        let err = fetch_package(&runner, &source, &scratch, &ProcessEnv::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InstallerError::EmptyDownload { .. }));
        assert_eq!(
            runner.command_lines(),
            vec![format!(
                "gdown https://drive.google.com/uc?id=abc123 -O {}",
                scratch.join(DOWNLOAD_FILE_NAME).display()
            )]
        );
    }

    #[tokio::test]
    async fn empty_local_file_is_a_transfer_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("empty.zip");
        File::create(&archive).unwrap();
        let err = fetch_package(
            &RecordingRunner::new(),
            &PackageSource::LocalFile(archive),
            &dir.path().join("scratch"),
            &ProcessEnv::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InstallerError::EmptyDownload { .. }));
    }
}
