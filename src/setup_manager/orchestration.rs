// comfy-package-installer/src/setup_manager/orchestration.rs

use log::{info, warn};

use crate::config::{InstallConfig, ProcessEnv};
use crate::error::{InstallerError, Result};
use crate::manifest::Manifest;
use crate::process_manager::CommandRunner;

use super::asset_copier::{copy_assets, AssetCopyReport};
use super::comfyui_installer::ensure_comfyui_installed;
use super::custom_node_installer::install_custom_nodes;
use super::dependency_checker::ensure_required_tools;
use super::directories::provision_directories;
use super::disk_utils::warn_if_low_disk_space;
use super::external_models::handle_external_models;
use super::gpu_tuning::apply_gpu_settings;
use super::launch::{cleanup_scratch, offer_launch};
use super::package_fetcher::fetch_package;
use super::verification::verify_installation;

/// What a successful run did.
#[derive(Debug, Clone, Default)]
pub struct InstallationSummary {
    pub tools_installed: Vec<String>,
    pub comfyui_freshly_installed: bool,
    pub package_name: Option<String>,
    pub custom_nodes: Vec<String>,
    pub assets: AssetCopyReport,
    pub external_models_downloaded: bool,
    pub verification_passed: bool,
    pub launched: bool,
}

/// Runs every installation step in order. The first failing step aborts the
/// run and leaves everything done so far, scratch directory included, in place.
pub async fn run_installation<R: CommandRunner>(
    config: &InstallConfig,
    runner: &R,
) -> Result<InstallationSummary> {
    config.ensure_scratch_isolated()?;
    let source = config
        .source
        .as_ref()
        .ok_or_else(|| InstallerError::invalid_reference("", "no package reference given"))?;
    info!("[SETUP_ORCHESTRATION] Installing package {} into {}", source, config.install_dir.display());

    let mut env = ProcessEnv::default();
    let mut summary = InstallationSummary::default();

    warn_if_low_disk_space(&config.install_dir);

    info!("[SETUP_ORCHESTRATION] Step 1/9: checking required tools");
    summary.tools_installed = ensure_required_tools(runner, source.is_google_drive(), &env).await?;

    info!("[SETUP_ORCHESTRATION] Step 2/9: ComfyUI installation");
    summary.comfyui_freshly_installed = ensure_comfyui_installed(runner, &config.install_dir, &env).await?;

    info!("[SETUP_ORCHESTRATION] Step 3/9: directory layout");
    provision_directories(&config.install_dir)?;

    info!("[SETUP_ORCHESTRATION] Step 4/9: fetching package");
    let bundle_root = fetch_package(runner, source, &config.scratch_root, &env).await?;
    let manifest = Manifest::load(&bundle_root)?;
    manifest.log_summary();
    summary.package_name = manifest.name();

    info!("[SETUP_ORCHESTRATION] Step 5/9: custom nodes");
    summary.custom_nodes =
        install_custom_nodes(runner, &bundle_root, &manifest, &config.custom_nodes_dir(), &env).await?;

    info!("[SETUP_ORCHESTRATION] Step 6/9: workflows and models");
    summary.assets = copy_assets(&bundle_root, &config.install_dir)?;

    info!("[SETUP_ORCHESTRATION] Step 7/9: external models");
    summary.external_models_downloaded =
        handle_external_models(runner, &bundle_root, &manifest, &config.install_dir, &env).await?;

    info!("[SETUP_ORCHESTRATION] Step 8/9: GPU settings");
    apply_gpu_settings(runner, &manifest.gpu_settings, &mut env).await?;

    let report = verify_installation(runner, &config.install_dir, &env).await;
    report.log_summary();
    summary.verification_passed = report.all_passed();
    if !summary.verification_passed {
        warn!("[SETUP_ORCHESTRATION] Installation finished but some checks failed; see above.");
    }

    info!("[SETUP_ORCHESTRATION] Step 9/9: cleanup");
    cleanup_scratch(&config.scratch_root)?;
    log_summary(&summary);

    summary.launched = offer_launch(runner, config.launch, &config.install_dir, &env).await?;
    Ok(summary)
}

fn log_summary(summary: &InstallationSummary) {
    info!(
        "[SETUP_ORCHESTRATION] Installed {}: {} custom node(s), {} workflow(s), {} model file(s)",
        summary.package_name.as_deref().unwrap_or("package"),
        summary.custom_nodes.len(),
        summary.assets.workflows,
        summary.assets.models
    );
}
