// comfy-package-installer/src/config.rs

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use clap::ValueEnum;

use crate::cli::Cli;
use crate::error::{InstallerError, Result};
use crate::package_source::PackageSource;

pub const DEFAULT_INSTALL_DIR: &str = "/workspace/ComfyUI";
pub const SCRATCH_DIR_NAME: &str = "comfy-package-installer";
pub const COMMAND_LOG_DIR_NAME: &str = "command_logs";

/// Layout of the ComfyUI install directory.
pub const CUSTOM_NODES_DIR_NAME: &str = "custom_nodes";
pub const MODELS_DIR_NAME: &str = "models";
pub const WORKFLOWS_RELATIVE_DIR: &str = "user/default/workflows";

/// What to do once the package is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LaunchMode {
    /// Ask on the terminal; behaves like `never` when stdin is not a terminal
    Ask,
    /// Start ComfyUI without asking
    Always,
    /// Only print the launch command
    Never,
}

/// Validated settings for one installer run.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    pub install_dir: PathBuf,
    pub scratch_root: PathBuf,
    /// `None` only in verify-only mode.
    pub source: Option<PackageSource>,
    pub launch: LaunchMode,
    pub verify_only: bool,
}

impl InstallConfig {
    /// Resolves the package reference up front so malformed references fail
    /// before anything on the machine is touched.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let source = match (&cli.package, cli.verify_only) {
            (Some(reference), false) => Some(PackageSource::parse(reference)?),
            _ => None,
        };
        let scratch_root = cli
            .scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(SCRATCH_DIR_NAME));

        let config = Self {
            install_dir: cli.dir.clone(),
            scratch_root,
            source,
            launch: cli.launch,
            verify_only: cli.verify_only,
        };
        config.ensure_scratch_isolated()?;
        Ok(config)
    }

    /// The scratch directory is wiped on every run, so it must neither be,
    /// contain, nor sit inside the install directory.
    pub fn ensure_scratch_isolated(&self) -> Result<()> {
        let scratch = normalize(&self.scratch_root)?;
        let install = normalize(&self.install_dir)?;
        if scratch.starts_with(&install) || install.starts_with(&scratch) {
            return Err(InstallerError::ScratchOverlapsInstall {
                scratch: self.scratch_root.clone(),
                install: self.install_dir.clone(),
            });
        }
        Ok(())
    }

    pub fn custom_nodes_dir(&self) -> PathBuf {
        self.install_dir.join(CUSTOM_NODES_DIR_NAME)
    }

    pub fn models_dir(&self) -> PathBuf {
        self.install_dir.join(MODELS_DIR_NAME)
    }

    pub fn workflows_dir(&self) -> PathBuf {
        workflows_dir(&self.install_dir)
    }

    pub fn command_log_dir(&self) -> PathBuf {
        self.scratch_root.join(COMMAND_LOG_DIR_NAME)
    }
}

/// Absolute form of `path` with `.` and `..` folded away. Symlinks are
/// resolved when the path already exists.
fn normalize(path: &Path) -> Result<PathBuf> {
    if let Ok(resolved) = std::fs::canonicalize(path) {
        return Ok(resolved);
    }
    let absolute = std::path::absolute(path).map_err(|e| InstallerError::io(path, e))?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

pub fn workflows_dir(install_dir: &Path) -> PathBuf {
    install_dir.join(WORKFLOWS_RELATIVE_DIR)
}

/// Environment applied to every process the installer starts.
///
/// The installer never mutates its own environment; tuning flags from the
/// manifest land here and only reach child processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEnv {
    base: BTreeMap<String, String>,
    tuning: BTreeMap<String, String>,
}

impl Default for ProcessEnv {
    fn default() -> Self {
        let base = [
            ("LANG", "C.UTF-8"),
            ("LC_ALL", "C.UTF-8"),
            ("PYTHONIOENCODING", "utf-8"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            base,
            tuning: BTreeMap::new(),
        }
    }
}

impl ProcessEnv {
    pub fn set_tuning(&mut self, key: &str, value: &str) {
        self.tuning.insert(key.to_string(), value.to_string());
    }

    pub fn tuning(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tuning.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.tuning
            .get(key)
            .or_else(|| self.base.get(key))
            .map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.base
            .iter()
            .chain(self.tuning.iter())
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// `KEY=value KEY2=value2 ` for the tuning variables, to prefix a manual command.
    pub fn tuning_prefix(&self) -> String {
        self.tuning()
            .map(|(k, v)| format!("{}={} ", k, v))
            .collect()
    }
}
