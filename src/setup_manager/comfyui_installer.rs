// comfy-package-installer/src/setup_manager/comfyui_installer.rs

use std::fs;
use std::path::Path;

use log::info;

use crate::config::ProcessEnv;
use crate::error::{InstallerError, Result};
use crate::process_manager::{CommandRunner, CommandSpec};

use super::python_utils::{pip_install_packages, pip_install_requirements, REQUIREMENTS_FILE_NAME};

pub const COMFYUI_REPO_URL: &str = "https://github.com/comfyanonymous/ComfyUI";
pub const COMFYUI_BRANCH: &str = "master";

/// Installed after the base requirements on a fresh install.
pub const PERFORMANCE_PACKAGES: &[&str] = &["accelerate", "opencv-python-headless", "onnxruntime-gpu"];

/// Clones ComfyUI into `install_dir` and installs its Python dependencies.
/// An existing directory is taken as a working install and left untouched.
/// Returns whether a fresh install was performed.
pub async fn ensure_comfyui_installed<R: CommandRunner>(
    runner: &R,
    install_dir: &Path,
    env: &ProcessEnv,
) -> Result<bool> {
    info!("[COMFYUI_INSTALLER] Checking for ComfyUI at {}", install_dir.display());

    if install_dir.exists() {
        info!("[COMFYUI_INSTALLER] ComfyUI directory already exists at {}. Skipping clone.", install_dir.display());
        return Ok(false);
    }

    if let Some(parent) = install_dir.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| InstallerError::io(parent, e))?;
            info!("[COMFYUI_INSTALLER] Created parent directory {}", parent.display());
        }
    }

    info!(
        "[COMFYUI_INSTALLER] ComfyUI not found. Cloning from {} (branch: {}) into {}",
        COMFYUI_REPO_URL,
        COMFYUI_BRANCH,
        install_dir.display()
    );
    let clone = CommandSpec::new("git", "ComfyUI clone")
        .args(["clone", "--depth", "1", "--branch", COMFYUI_BRANCH, COMFYUI_REPO_URL])
        .arg(install_dir)
        .envs(env);
    runner.run_checked(&clone).await?;
    info!("[COMFYUI_INSTALLER] Successfully cloned ComfyUI.");

    pip_install_requirements(
        runner,
        &install_dir.join(REQUIREMENTS_FILE_NAME),
        Some(install_dir),
        env,
        "ComfyUI base dependencies",
    )
    .await?;

    pip_install_packages(runner, PERFORMANCE_PACKAGES, env, "ComfyUI performance packages").await?;

    info!("[COMFYUI_INSTALLER] ComfyUI installed at {}", install_dir.display());
    Ok(true)
}
