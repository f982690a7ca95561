// comfy-package-installer/src/setup_manager/launch.rs

use std::fs;
use std::io::{ErrorKind, IsTerminal};
use std::path::Path;

use dialoguer::Confirm;
use log::{info, warn};

use crate::config::{LaunchMode, ProcessEnv};
use crate::error::{InstallerError, Result};
use crate::process_manager::{CommandRunner, CommandSpec};

use super::python_utils::PYTHON_PROGRAM;

pub const LAUNCH_ARGS: &[&str] = &["main.py", "--listen", "0.0.0.0", "--port", "8188"];

/// Removes the scratch directory. Only called once the installation succeeded.
pub fn cleanup_scratch(scratch_root: &Path) -> Result<()> {
    match fs::remove_dir_all(scratch_root) {
        Ok(()) => {
            info!("[LAUNCH] Removed scratch directory {}", scratch_root.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(InstallerError::io(scratch_root, e)),
    }
}

pub fn launch_command(install_dir: &Path, env: &ProcessEnv) -> CommandSpec {
    CommandSpec::new(PYTHON_PROGRAM, "ComfyUI")
        .args(LAUNCH_ARGS)
        .current_dir(install_dir)
        .envs(env)
}

/// The shell line an operator can paste to start ComfyUI with the same tuning.
pub fn manual_launch_command(install_dir: &Path, env: &ProcessEnv) -> String {
    format!(
        "cd {} && {}{} {}",
        install_dir.display(),
        env.tuning_prefix(),
        PYTHON_PROGRAM,
        LAUNCH_ARGS.join(" ")
    )
}

/// Launches ComfyUI or prints how to. Returns whether ComfyUI was started.
pub async fn offer_launch<R: CommandRunner>(
    runner: &R,
    mode: LaunchMode,
    install_dir: &Path,
    env: &ProcessEnv,
) -> Result<bool> {
    let launch = match mode {
        LaunchMode::Always => true,
        LaunchMode::Never => false,
        LaunchMode::Ask if std::io::stdin().is_terminal() => Confirm::new()
            .with_prompt("Launch ComfyUI now?")
            .default(false)
            .interact()?,
        LaunchMode::Ask => {
            info!("[LAUNCH] stdin is not a terminal; not launching");
            false
        }
    };

    if !launch {
        println!("To start ComfyUI run:\n  {}", manual_launch_command(install_dir, env));
        return Ok(false);
    }

    info!("[LAUNCH] Starting ComfyUI on port 8188");
    let result = runner.run_attached(&launch_command(install_dir, env)).await?;
    if !result.success() {
        warn!("[LAUNCH] ComfyUI exited with {}", result);
    }
    Ok(true)
}
