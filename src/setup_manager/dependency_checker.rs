// comfy-package-installer/src/setup_manager/dependency_checker.rs

use log::{info, warn};

use crate::config::ProcessEnv;
use crate::error::Result;
use crate::process_manager::{CommandRunner, CommandSpec};

use super::python_utils::pip_install_packages;

/// Tools the deployment relies on, including the ones the bundled downloader
/// script and manual follow-up steps on the server shell out to.
pub const REQUIRED_TOOLS: &[&str] = &["wget", "curl", "unzip", "jq", "python3", "pip3", "git"];

/// pip-installed helper for Google Drive links.
pub const GOOGLE_DRIVE_DOWNLOADER: &str = "gdown";

fn apt_package_for(tool: &str) -> &str {
    match tool {
        "pip3" => "python3-pip",
        other => other,
    }
}

pub async fn find_missing_tools<R: CommandRunner>(runner: &R, tools: &[&str]) -> Vec<String> {
    let mut missing = Vec::new();
    for tool in tools {
        if !runner.is_available(tool).await {
            missing.push(tool.to_string());
        }
    }
    missing
}

/// Installs whatever required tool is missing in one `apt-get` batch.
/// Returns the tools that had to be installed.
pub async fn ensure_required_tools<R: CommandRunner>(
    runner: &R,
    needs_drive_downloader: bool,
    env: &ProcessEnv,
) -> Result<Vec<String>> {
    info!("[DEPENDENCY_CHECK] Checking required tools: {}", REQUIRED_TOOLS.join(", "));
    let mut installed = find_missing_tools(runner, REQUIRED_TOOLS).await;

    if installed.is_empty() {
        info!("[DEPENDENCY_CHECK] All required tools are present.");
    } else {
        warn!("[DEPENDENCY_CHECK] Missing tools: {}. Installing...", installed.join(", "));
        let update = CommandSpec::new("apt-get", "Package index update")
            .arg("update")
            .envs(env);
        runner.run_checked(&update).await?;

        let packages: Vec<&str> = installed.iter().map(|tool| apt_package_for(tool)).collect();
        let install = CommandSpec::new("apt-get", "System package install")
            .args(["install", "-y"])
            .args(&packages)
            .envs(env);
        runner.run_checked(&install).await?;
        info!("[DEPENDENCY_CHECK] Installed: {}", packages.join(", "));
    }

    if needs_drive_downloader && !runner.is_available(GOOGLE_DRIVE_DOWNLOADER).await {
        info!("[DEPENDENCY_CHECK] {} not found; installing it for the Google Drive link.", GOOGLE_DRIVE_DOWNLOADER);
        pip_install_packages(runner, &[GOOGLE_DRIVE_DOWNLOADER], env, "Google Drive downloader install").await?;
        installed.push(GOOGLE_DRIVE_DOWNLOADER.to_string());
    }

    Ok(installed)
}
