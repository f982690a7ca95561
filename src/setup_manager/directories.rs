// comfy-package-installer/src/setup_manager/directories.rs

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::config::{workflows_dir, CUSTOM_NODES_DIR_NAME, MODELS_DIR_NAME};
use crate::error::{InstallerError, Result};

/// Model categories ComfyUI and the common node packs look in.
pub const MODEL_SUBDIRECTORIES: &[&str] = &[
    "checkpoints",
    "loras",
    "vae",
    "controlnet",
    "embeddings",
    "insightface",
    "ultralytics",
    "clip",
    "clip_vision",
    "upscale_models",
    "facerestore_models",
    "hypernetworks",
    "sams",
];

/// Creates the model, custom node and workflow directories. Safe to call repeatedly.
pub fn provision_directories(install_dir: &Path) -> Result<()> {
    info!("[DIRECTORIES] Provisioning directory layout under {}", install_dir.display());

    let models_dir = install_dir.join(MODELS_DIR_NAME);
    let mut targets: Vec<_> = MODEL_SUBDIRECTORIES.iter().map(|sub| models_dir.join(sub)).collect();
    targets.push(install_dir.join(CUSTOM_NODES_DIR_NAME));
    targets.push(workflows_dir(install_dir));

    for dir in targets {
        fs::create_dir_all(&dir).map_err(|e| InstallerError::io(&dir, e))?;
        debug!("[DIRECTORIES] Ensured {}", dir.display());
    }
    Ok(())
}
