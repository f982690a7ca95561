// comfy-package-installer/src/setup_manager/python_utils.rs

use std::path::Path;

use log::info;

use crate::config::ProcessEnv;
use crate::error::Result;
use crate::process_manager::{CommandRunner, CommandSpec};

pub const PYTHON_PROGRAM: &str = "python3";
pub const PIP_PROGRAM: &str = "pip3";
pub const REQUIREMENTS_FILE_NAME: &str = "requirements.txt";

/// `pip3 install -r <requirements>`, optionally from inside `working_dir`.
pub async fn pip_install_requirements<R: CommandRunner>(
    runner: &R,
    requirements: &Path,
    working_dir: Option<&Path>,
    env: &ProcessEnv,
    description: &str,
) -> Result<()> {
    info!("Installing requirements from {}", requirements.display());
    let mut spec = CommandSpec::new(PIP_PROGRAM, description)
        .args(["install", "-r"])
        .arg(requirements)
        .envs(env);
    if let Some(dir) = working_dir {
        spec = spec.current_dir(dir);
    }
    runner.run_checked(&spec).await?;
    Ok(())
}

/// `pip3 install <packages...>` as a single invocation.
pub async fn pip_install_packages<R: CommandRunner>(
    runner: &R,
    packages: &[&str],
    env: &ProcessEnv,
    description: &str,
) -> Result<()> {
    info!("Installing Python packages: {}", packages.join(", "));
    let spec = CommandSpec::new(PIP_PROGRAM, description)
        .arg("install")
        .args(packages)
        .envs(env);
    runner.run_checked(&spec).await?;
    Ok(())
}

/// Runs `python3 -c <code>` and returns the result without failing on a non-zero exit.
pub async fn run_python_snippet<R: CommandRunner>(
    runner: &R,
    code: &str,
    env: &ProcessEnv,
    description: &str,
) -> Result<crate::process_manager::CommandResult> {
    let spec = CommandSpec::new(PYTHON_PROGRAM, description)
        .arg("-c")
        .arg(code)
        .envs(env);
    runner.run(&spec).await
}
