// comfy-package-installer/src/lib.rs

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod manifest;
pub mod package_source;
pub mod process_manager;
pub mod setup_manager;

use log::info;

use crate::cli::Cli;
use crate::config::{InstallConfig, ProcessEnv};
use crate::error::Result;
use crate::process_manager::SystemRunner;
use crate::setup_manager::{run_installation, verify_installation};

/// Runs the installer for parsed command-line arguments.
pub async fn run(cli: Cli) -> Result<()> {
    let run_start = std::time::Instant::now();
    let config = InstallConfig::from_cli(&cli)?;
    let runner = SystemRunner::new(config.command_log_dir());

    if config.verify_only {
        let report = verify_installation(&runner, &config.install_dir, &ProcessEnv::default()).await;
        report.log_summary();
        report.into_result()?;
        return Ok(());
    }

    let summary = run_installation(&config, &runner).await?;
    info!(
        "[STARTUP] Installation finished in {:.1}s (ComfyUI {}, {} tool(s) installed)",
        run_start.elapsed().as_secs_f64(),
        if summary.comfyui_freshly_installed { "freshly installed" } else { "already present" },
        summary.tools_installed.len()
    );
    Ok(())
}
