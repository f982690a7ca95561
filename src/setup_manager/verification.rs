// comfy-package-installer/src/setup_manager/verification.rs

use std::fs;
use std::path::Path;

use log::{error, info, warn};

use crate::config::{workflows_dir, ProcessEnv, CUSTOM_NODES_DIR_NAME, MODELS_DIR_NAME};
use crate::error::{InstallerError, Result};
use crate::process_manager::CommandRunner;

use super::python_utils::run_python_snippet;

const CORE_FILES: &[&str] = &["main.py", "comfy/sd.py"];
const CHECKED_MODEL_DIRS: &[&str] = &["checkpoints", "loras", "vae", "controlnet", "embeddings"];
const IMPORT_CHECK: &str = "import torch, numpy, PIL";
const CUDA_CHECK: &str = "import torch; print(torch.cuda.is_available())";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Passed,
    /// Worth telling the operator, but the install still works.
    Warning,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
}

impl CheckResult {
    fn passed(name: &'static str, message: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Passed, message: message.into() }
    }

    fn warning(name: &'static str, message: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Warning, message: message.into() }
    }

    fn failed(name: &'static str, message: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Failed, message: message.into() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VerificationReport {
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    pub fn failed_count(&self) -> usize {
        self.checks
            .iter()
            .filter(|check| check.status == CheckStatus::Failed)
            .count()
    }

    pub fn all_passed(&self) -> bool {
        self.failed_count() == 0
    }

    pub fn log_summary(&self) {
        for check in &self.checks {
            match check.status {
                CheckStatus::Passed => info!("[VERIFY] PASS {}: {}", check.name, check.message),
                CheckStatus::Warning => warn!("[VERIFY] WARN {}: {}", check.name, check.message),
                CheckStatus::Failed => error!("[VERIFY] FAIL {}: {}", check.name, check.message),
            }
        }
        let failed = self.failed_count();
        if failed == 0 {
            info!("[VERIFY] All {} checks passed", self.checks.len());
        } else {
            error!("[VERIFY] {} of {} checks failed", failed, self.checks.len());
        }
    }

    pub fn into_result(self) -> Result<Self> {
        match self.failed_count() {
            0 => Ok(self),
            failed => Err(InstallerError::Verification { failed }),
        }
    }
}

/// Checks that `install_dir` holds a usable ComfyUI installation.
pub async fn verify_installation<R: CommandRunner>(
    runner: &R,
    install_dir: &Path,
    env: &ProcessEnv,
) -> VerificationReport {
    info!("[VERIFY] Verifying installation at {}", install_dir.display());
    let mut report = VerificationReport::default();

    if !install_dir.is_dir() {
        report.checks.push(CheckResult::failed(
            "install directory",
            format!("{} does not exist", install_dir.display()),
        ));
        return report;
    }
    report
        .checks
        .push(CheckResult::passed("install directory", install_dir.display().to_string()));

    report.checks.push(check_core_files(install_dir));
    report.checks.push(check_model_dirs(install_dir));
    report.checks.push(check_custom_nodes(install_dir));
    report.checks.push(check_workflows(install_dir));
    report.checks.push(check_python_imports(runner, env).await);
    report.checks.push(check_cuda(runner, env).await);
    report
}

fn check_core_files(install_dir: &Path) -> CheckResult {
    let missing: Vec<&str> = CORE_FILES
        .iter()
        .copied()
        .filter(|file| !install_dir.join(file).is_file())
        .collect();
    if missing.is_empty() {
        CheckResult::passed("core files", CORE_FILES.join(", "))
    } else {
        CheckResult::failed("core files", format!("missing {}", missing.join(", ")))
    }
}

fn check_model_dirs(install_dir: &Path) -> CheckResult {
    let models_dir = install_dir.join(MODELS_DIR_NAME);
    let unusable: Vec<&str> = CHECKED_MODEL_DIRS
        .iter()
        .copied()
        .filter(|sub| fs::read_dir(models_dir.join(sub)).is_err())
        .collect();
    if unusable.is_empty() {
        CheckResult::passed("model directories", CHECKED_MODEL_DIRS.join(", "))
    } else {
        CheckResult::failed(
            "model directories",
            format!("missing or unreadable: {}", unusable.join(", ")),
        )
    }
}

fn check_custom_nodes(install_dir: &Path) -> CheckResult {
    let nodes_dir = install_dir.join(CUSTOM_NODES_DIR_NAME);
    let Ok(entries) = fs::read_dir(&nodes_dir) else {
        return CheckResult::failed("custom nodes", format!("{} is missing", nodes_dir.display()));
    };
    let mut nodes: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.') && name != "__pycache__")
        .collect();
    nodes.sort();

    if nodes.is_empty() {
        CheckResult::warning("custom nodes", "no custom nodes installed")
    } else {
        CheckResult::passed("custom nodes", format!("{} installed: {}", nodes.len(), nodes.join(", ")))
    }
}

fn check_workflows(install_dir: &Path) -> CheckResult {
    let dir = workflows_dir(install_dir);
    if let Err(e) = fs::create_dir_all(&dir) {
        return CheckResult::failed("workflows", format!("cannot create {}: {}", dir.display(), e));
    }
    let count = fs::read_dir(&dir)
        .map(|entries| {
            entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "json"))
                .count()
        })
        .unwrap_or(0);
    CheckResult::passed("workflows", format!("{} workflow file(s) in {}", count, dir.display()))
}

async fn check_python_imports<R: CommandRunner>(runner: &R, env: &ProcessEnv) -> CheckResult {
    match run_python_snippet(runner, IMPORT_CHECK, env, "Python import check").await {
        Ok(result) if result.success() => CheckResult::passed("python packages", "torch, numpy, PIL import"),
        Ok(result) => CheckResult::failed(
            "python packages",
            format!("'{}' failed: {}", IMPORT_CHECK, result.stderr.join(" ").trim()),
        ),
        Err(e) => CheckResult::failed("python packages", e.to_string()),
    }
}

async fn check_cuda<R: CommandRunner>(runner: &R, env: &ProcessEnv) -> CheckResult {
    match run_python_snippet(runner, CUDA_CHECK, env, "CUDA availability check").await {
        Ok(result) if result.success() => {
            let available = result.stdout.iter().any(|line| line.trim() == "True");
            if available {
                CheckResult::passed("gpu", "CUDA is available")
            } else {
                CheckResult::warning("gpu", "CUDA is not available; ComfyUI will run on CPU")
            }
        }
        Ok(result) => CheckResult::warning("gpu", format!("CUDA check failed with {}", result)),
        Err(e) => CheckResult::warning("gpu", e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process_manager::{CommandResult, RecordingRunner};
    use crate::setup_manager::directories::provision_directories;

    fn fake_install(dir: &Path) {
        provision_directories(dir).unwrap();
        fs::create_dir_all(dir.join("comfy")).unwrap();
        fs::write(dir.join("main.py"), "").unwrap();
        fs::write(dir.join("comfy/sd.py"), "").unwrap();
    }

    #[tokio::test]
    async fn healthy_install_passes_with_warnings() {
        let dir = tempfile::tempdir().unwrap();
        fake_install(dir.path());
        let runner = RecordingRunner::new();

        let report = verify_installation(&runner, dir.path(), &ProcessEnv::default()).await;

        assert!(report.all_passed(), "{:?}", report.checks);
        let statuses: Vec<_> = report.checks.iter().map(|c| (c.name, c.status)).collect();
        assert!(statuses.contains(&("custom nodes", CheckStatus::Warning)));
        assert!(statuses.contains(&("gpu", CheckStatus::Warning)));
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn cuda_reported_when_available() {
        let dir = tempfile::tempdir().unwrap();
        fake_install(dir.path());
        fs::create_dir_all(dir.path().join("custom_nodes/ComfyUI-Manager")).unwrap();
        let runner = RecordingRunner::new()
            .respond_to("torch.cuda", CommandResult::succeeded().with_stdout("True"));

        let report = verify_installation(&runner, dir.path(), &ProcessEnv::default()).await;
        assert!(report
            .checks
            .iter()
            .all(|check| check.status == CheckStatus::Passed));
    }

    #[tokio::test]
    async fn missing_install_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let report =
            verify_installation(&RecordingRunner::new(), &dir.path().join("nope"), &ProcessEnv::default()).await;
        assert_eq!(report.failed_count(), 1);
        assert!(matches!(report.into_result(), Err(InstallerError::Verification { failed: 1 })));
    }

    #[tokio::test]
    async fn missing_core_files_and_imports_fail() {
        let dir = tempfile::tempdir().unwrap();
        provision_directories(dir.path()).unwrap();
        let runner = RecordingRunner::new().fail_on("import torch, numpy, PIL");

        let report = verify_installation(&runner, dir.path(), &ProcessEnv::default()).await;

        let failed: Vec<_> = report
            .checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
            .map(|c| c.name)
            .collect();
        assert_eq!(failed, vec!["core files", "python packages"]);
    }
}
