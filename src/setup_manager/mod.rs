// comfy-package-installer/src/setup_manager/mod.rs

pub mod archive_utils;
pub mod asset_copier;
pub mod comfyui_installer;
pub mod custom_node_installer;
pub mod dependency_checker;
pub mod directories;
pub mod disk_utils;
pub mod external_models;
pub mod gpu_tuning;
pub mod launch;
pub mod orchestration;
pub mod package_fetcher;
pub mod python_utils;
pub mod verification;

// Re-export the entry points used by the binary and the integration tests
pub use orchestration::{run_installation, InstallationSummary};

pub use verification::{verify_installation, CheckResult, CheckStatus, VerificationReport};
