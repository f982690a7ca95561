// comfy-package-installer/src/setup_manager/disk_utils.rs

use std::path::Path;

use fs2::available_space;
use log::{info, warn};

// Estimated space for ComfyUI, its Python dependencies and a typical package (20 GB)
pub const RECOMMENDED_FREE_SPACE: u64 = 20 * 1024 * 1024 * 1024; // in bytes

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Logs a warning when the filesystem holding `install_dir` is short on space.
/// The directory may not exist yet, so the nearest existing ancestor is measured.
/// Returns the available bytes when they could be determined.
pub fn warn_if_low_disk_space(install_dir: &Path) -> Option<u64> {
    let existing = install_dir.ancestors().find(|dir| dir.exists())?;

    match available_space(existing) {
        Ok(available) => {
            info!("[DISK_CHECK] Available disk space at {}: {:.2} GB", existing.display(), available as f64 / GIB);
            if available < RECOMMENDED_FREE_SPACE {
                warn!(
                    "[DISK_CHECK] Low disk space. Recommended: {:.2} GB, Available: {:.2} GB.",
                    RECOMMENDED_FREE_SPACE as f64 / GIB,
                    available as f64 / GIB
                );
            }
            Some(available)
        }
        Err(e) => {
            warn!("[DISK_CHECK] Failed to check disk space at {}: {}", existing.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_nearest_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let not_yet_created = dir.path().join("workspace/ComfyUI");
        assert!(warn_if_low_disk_space(&not_yet_created).is_some());
    }
}
