// comfy-package-installer/src/setup_manager/external_models.rs

use std::fs;
use std::path::Path;

use log::{info, warn};

use crate::config::ProcessEnv;
use crate::error::{InstallerError, Result};
use crate::manifest::{Manifest, MANIFEST_FILE_NAME};
use crate::process_manager::{CommandRunner, CommandSpec};

use super::python_utils::{pip_install_packages, PYTHON_PROGRAM};

pub const CIVITAI_CONFIG_FILE_NAME: &str = "civitai_config.json";
pub const DOWNLOADER_SCRIPT_NAME: &str = "download_models.py";

/// Hands external model acquisition to the package's own downloader script.
/// Returns whether the script was run.
pub async fn handle_external_models<R: CommandRunner>(
    runner: &R,
    bundle_root: &Path,
    manifest: &Manifest,
    install_dir: &Path,
    env: &ProcessEnv,
) -> Result<bool> {
    let civitai_config = bundle_root.join(CIVITAI_CONFIG_FILE_NAME);
    if civitai_config.is_file() {
        copy_into(&civitai_config, install_dir)?;
        info!("[EXTERNAL_MODELS] Copied {} to {}", CIVITAI_CONFIG_FILE_NAME, install_dir.display());
    }

    let script = bundle_root.join(DOWNLOADER_SCRIPT_NAME);
    if !script.is_file() {
        if manifest.declares_external_models() {
            let names = manifest.external_model_names();
            warn!(
                "[EXTERNAL_MODELS] The package declares external models but ships no {}; they must be downloaded manually.",
                DOWNLOADER_SCRIPT_NAME
            );
            if !names.is_empty() {
                warn!("[EXTERNAL_MODELS] Not downloaded: {}", names.join(", "));
            }
        }
        return Ok(false);
    }

    let installed_script = copy_into(&script, install_dir)?;
    let manifest_file = bundle_root.join(MANIFEST_FILE_NAME);
    let installed_manifest = if manifest_file.is_file() {
        Some(copy_into(&manifest_file, install_dir)?)
    } else {
        None
    };

    pip_install_packages(runner, &["requests"], env, "Downloader script dependencies").await?;

    info!("[EXTERNAL_MODELS] Running {}", installed_script.display());
    let mut spec = CommandSpec::new(PYTHON_PROGRAM, "External model download")
        .arg(&installed_script)
        .arg("--comfyui-dir")
        .arg(install_dir)
        .current_dir(install_dir)
        .envs(env);
    if let Some(config) = &installed_manifest {
        spec = spec.arg("--config").arg(config);
    }
    runner.run_checked(&spec).await?;
    info!("[EXTERNAL_MODELS] External model download finished");
    Ok(true)
}

fn copy_into(file: &Path, dir: &Path) -> Result<std::path::PathBuf> {
    let file_name = file
        .file_name()
        .ok_or_else(|| InstallerError::io(file, std::io::ErrorKind::InvalidInput.into()))?;
    let destination = dir.join(file_name);
    fs::copy(file, &destination).map_err(|e| InstallerError::io(&destination, e))?;
    Ok(destination)
}
