// comfy-package-installer/src/setup_manager/asset_copier.rs

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::config::{workflows_dir, MODELS_DIR_NAME};
use crate::error::{InstallerError, Result};

pub const WORKFLOWS_BUNDLE_DIR: &str = "workflows";

/// Extensions that mark a file under the bundle's `models/` as a model.
pub const MODEL_EXTENSIONS: &[&str] = &["safetensors", "ckpt", "pt", "bin", "pth", "onnx"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetCopyReport {
    pub workflows: usize,
    pub models: usize,
}

/// Copies bundled workflows and model files into the install directory.
pub fn copy_assets(bundle_root: &Path, install_dir: &Path) -> Result<AssetCopyReport> {
    let report = AssetCopyReport {
        workflows: copy_workflows(&bundle_root.join(WORKFLOWS_BUNDLE_DIR), &workflows_dir(install_dir))?,
        models: copy_models(&bundle_root.join(MODELS_DIR_NAME), &install_dir.join(MODELS_DIR_NAME))?,
    };
    info!(
        "[ASSET_COPY] Copied {} workflow(s) and {} model file(s)",
        report.workflows, report.models
    );
    Ok(report)
}

/// Regular files directly under `source` (no recursion), overwriting by name.
pub fn copy_workflows(source: &Path, target: &Path) -> Result<usize> {
    if !source.is_dir() {
        debug!("[ASSET_COPY] No workflows in package");
        return Ok(0);
    }
    fs::create_dir_all(target).map_err(|e| InstallerError::io(target, e))?;

    let mut copied = 0;
    for entry in fs::read_dir(source).map_err(|e| InstallerError::io(source, e))? {
        let entry = entry.map_err(|e| InstallerError::io(source, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let destination = target.join(entry.file_name());
        fs::copy(&path, &destination).map_err(|e| InstallerError::io(&destination, e))?;
        info!("[ASSET_COPY] Workflow {}", entry.file_name().to_string_lossy());
        copied += 1;
    }
    Ok(copied)
}

/// Every recognised model file under `source`, placed by category and file name.
pub fn copy_models(source: &Path, target_models_dir: &Path) -> Result<usize> {
    if !source.is_dir() {
        debug!("[ASSET_COPY] No models in package");
        return Ok(0);
    }

    let content = fs_extra::dir::get_dir_content(source).map_err(|e| InstallerError::Copy {
        from: source.to_path_buf(),
        to: target_models_dir.to_path_buf(),
        source: e,
    })?;
    let mut files: Vec<PathBuf> = content.files.into_iter().map(PathBuf::from).collect();
    files.sort();

    let mut copied = 0;
    for file in files {
        if !is_model_file(&file) {
            continue;
        }
        let Ok(relative) = file.strip_prefix(source) else {
            continue;
        };
        let Some(file_name) = file.file_name() else {
            continue;
        };

        let category_dir = match model_category(relative) {
            Some(category) => target_models_dir.join(category),
            None => target_models_dir.to_path_buf(),
        };
        fs::create_dir_all(&category_dir).map_err(|e| InstallerError::io(&category_dir, e))?;

        let destination = category_dir.join(file_name);
        fs::copy(&file, &destination).map_err(|e| InstallerError::io(&destination, e))?;
        info!("[ASSET_COPY] Model {} -> {}", relative.display(), destination.display());
        copied += 1;
    }
    Ok(copied)
}

pub fn is_model_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| MODEL_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
}

/// First segment of a path relative to `models/`, or `None` for a loose file.
pub fn model_category(relative: &Path) -> Option<String> {
    let mut components = relative.components();
    let first = components.next()?;
    components.next()?;
    Some(first.as_os_str().to_string_lossy().into_owned())
}
