// comfy-package-installer/src/setup_manager/custom_node_installer.rs

use std::fs;
use std::path::{Component, Path, PathBuf};

use fs_extra::dir::{copy as fs_extra_copy, CopyOptions};
use log::{info, warn};

use crate::config::{ProcessEnv, CUSTOM_NODES_DIR_NAME};
use crate::error::{InstallerError, Result};
use crate::manifest::Manifest;
use crate::process_manager::{CommandRunner, CommandSpec};

use super::python_utils::{pip_install_requirements, PIP_PROGRAM, REQUIREMENTS_FILE_NAME};

/// A custom node directory in the bundle and the name it gets under `custom_nodes/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSource {
    pub name: String,
    pub path: PathBuf,
}

/// Installs the bundle's custom nodes, then the manifest's bundle-wide
/// dependencies. Returns the installed node names in installation order.
pub async fn install_custom_nodes<R: CommandRunner>(
    runner: &R,
    bundle_root: &Path,
    manifest: &Manifest,
    target_nodes_dir: &Path,
    env: &ProcessEnv,
) -> Result<Vec<String>> {
    let bundle_nodes_dir = bundle_root.join(CUSTOM_NODES_DIR_NAME);
    let mut installed = Vec::new();

    if bundle_nodes_dir.is_dir() {
        let sources = match &manifest.installation_order {
            Some(order) => {
                info!("[NODE_INSTALL] Installing custom nodes in manifest order ({} entries)", order.len());
                ordered_node_sources(bundle_root, order)
            }
            None => {
                info!("[NODE_INSTALL] No installation order; installing custom nodes alphabetically");
                discover_node_sources(&bundle_nodes_dir)?
            }
        };

        fs::create_dir_all(target_nodes_dir).map_err(|e| InstallerError::io(target_nodes_dir, e))?;
        for source in sources {
            install_node(runner, &source, target_nodes_dir, env).await?;
            installed.push(source.name);
        }
        info!("[NODE_INSTALL] Installed {} custom node(s)", installed.len());
    } else {
        info!("[NODE_INSTALL] Package has no {} directory; skipping.", CUSTOM_NODES_DIR_NAME);
    }

    install_bundle_dependencies(runner, manifest.dependencies(), env).await?;
    Ok(installed)
}

/// Resolves the manifest's `installation_order` against the bundle. Entries
/// outside `custom_nodes/` and entries missing from the bundle are skipped.
pub fn ordered_node_sources(bundle_root: &Path, order: &[String]) -> Vec<NodeSource> {
    let mut sources = Vec::new();
    for entry in order {
        let Some((name, relative)) = parse_order_entry(entry) else {
            warn!("[NODE_INSTALL] Skipping '{}': not a path under {}/", entry, CUSTOM_NODES_DIR_NAME);
            continue;
        };
        let path = bundle_root.join(relative);
        if !path.is_dir() {
            warn!("[NODE_INSTALL] Skipping '{}': not present in the package", entry);
            continue;
        }
        sources.push(NodeSource { name, path });
    }
    sources
}

/// `custom_nodes/<...>/<name>` to `(<name>, normalised relative path)`.
/// Nested entries install under their last component.
fn parse_order_entry(entry: &str) -> Option<(String, PathBuf)> {
    let mut relative = PathBuf::new();
    for component in Path::new(entry.trim()).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    let mut parts = relative.components();
    match parts.next() {
        Some(Component::Normal(dir)) if dir == CUSTOM_NODES_DIR_NAME => {}
        _ => return None,
    }
    parts.next()?;
    let name = relative.file_name()?.to_string_lossy().into_owned();
    Some((name, relative))
}

/// Every directory directly under the bundle's `custom_nodes/`, sorted by name.
pub fn discover_node_sources(bundle_nodes_dir: &Path) -> Result<Vec<NodeSource>> {
    let mut sources = Vec::new();
    for entry in fs::read_dir(bundle_nodes_dir).map_err(|e| InstallerError::io(bundle_nodes_dir, e))? {
        let entry = entry.map_err(|e| InstallerError::io(bundle_nodes_dir, e))?;
        let path = entry.path();
        if path.is_dir() {
            sources.push(NodeSource {
                name: entry.file_name().to_string_lossy().into_owned(),
                path,
            });
        }
    }
    sources.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(sources)
}

async fn install_node<R: CommandRunner>(
    runner: &R,
    source: &NodeSource,
    target_nodes_dir: &Path,
    env: &ProcessEnv,
) -> Result<()> {
    let target = target_nodes_dir.join(&source.name);
    if target.exists() {
        warn!("[NODE_INSTALL] {} already exists; overwriting files", source.name);
    }
    info!("[NODE_INSTALL] Copying {} to {}", source.name, target.display());

    let mut options = CopyOptions::new();
    options.overwrite = true;
    options.content_only = true;
    fs_extra_copy(&source.path, &target, &options).map_err(|e| InstallerError::Copy {
        from: source.path.clone(),
        to: target.clone(),
        source: e,
    })?;

    let requirements = target.join(REQUIREMENTS_FILE_NAME);
    if requirements.is_file() {
        pip_install_requirements(
            runner,
            &requirements,
            None,
            env,
            &format!("Dependencies for {}", source.name),
        )
        .await?;
        info!("[NODE_INSTALL] Dependencies for {} installed", source.name);
    } else {
        info!("[NODE_INSTALL] No {} for {}", REQUIREMENTS_FILE_NAME, source.name);
    }
    Ok(())
}

async fn install_bundle_dependencies<R: CommandRunner>(
    runner: &R,
    dependencies: &[String],
    env: &ProcessEnv,
) -> Result<()> {
    if dependencies.is_empty() {
        return Ok(());
    }
    info!("[NODE_INSTALL] Installing {} package dependencies", dependencies.len());
    for dependency in dependencies {
        let spec = CommandSpec::new(PIP_PROGRAM, format!("Package dependency {}", dependency))
            .arg("install")
            .arg(dependency)
            .envs(env);
        runner.run_checked(&spec).await?;
    }
    Ok(())
}
