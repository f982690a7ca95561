// comfy-package-installer/src/error.rs

use std::path::PathBuf;

/// Result type for installer operations
pub type Result<T> = std::result::Result<T, InstallerError>;

/// Everything that can abort an installation run.
#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    #[error("Invalid package reference '{reference}': {reason}")]
    InvalidPackageReference { reference: String, reason: String },

    #[error("Could not extract a Google Drive file id from '{0}'")]
    UnresolvedDriveLink(String),

    #[error("Scratch directory {scratch} overlaps the install directory {install}")]
    ScratchOverlapsInstall { scratch: PathBuf, install: PathBuf },

    #[error("Package URL {url} is not reachable: {reason}")]
    UnreachablePackage { url: String, reason: String },

    #[error("Downloaded package at {path} is missing or empty")]
    EmptyDownload { path: PathBuf },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unsupported archive format: {path}")]
    UnsupportedArchive { path: PathBuf },

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Failed to parse manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: fs_extra::error::Error,
    },

    #[error("Failed to start '{program}': {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{description} failed with {status}. Command: {command}. Stderr: {stderr}")]
    CommandFailed {
        description: String,
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Interactive prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),

    #[error("Installation verification failed: {failed} check(s) did not pass")]
    Verification { failed: usize },
}

impl InstallerError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_reference(reference: &str, reason: impl Into<String>) -> Self {
        Self::InvalidPackageReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}
