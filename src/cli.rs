// comfy-package-installer/src/cli.rs

use std::path::PathBuf;

use clap::Parser;

use crate::config::{LaunchMode, DEFAULT_INSTALL_DIR};

/// Install a ComfyUI workflow package (custom nodes, models, workflows) on a GPU server.
#[derive(Parser, Debug)]
#[command(name = "comfy-package-installer", version, about)]
pub struct Cli {
    /// Package URL: a direct download link, a Google Drive share link, or a local archive
    #[arg(short = 'p', long = "package", value_name = "URL", required_unless_present = "verify_only")]
    pub package: Option<String>,

    /// ComfyUI installation directory
    #[arg(
        short = 'd',
        long = "dir",
        value_name = "DIR",
        env = "COMFYUI_DIR",
        default_value = DEFAULT_INSTALL_DIR
    )]
    pub dir: PathBuf,

    /// Scratch directory for download and extraction [default: <temp>/comfy-package-installer]
    #[arg(long, value_name = "DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Whether to start ComfyUI after installation
    #[arg(long, value_enum, value_name = "MODE", default_value_t = LaunchMode::Ask)]
    pub launch: LaunchMode,

    /// Only check an existing installation, do not install anything
    #[arg(long)]
    pub verify_only: bool,

    /// log4rs YAML configuration file
    #[arg(long, value_name = "FILE")]
    pub log_config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}
