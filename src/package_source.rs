// comfy-package-installer/src/package_source.rs

use std::fmt;
use std::path::{Path, PathBuf};

use log::debug;
use reqwest::Url;

use crate::error::{InstallerError, Result};

const GOOGLE_DRIVE_HOSTS: &[&str] = &["drive.google.com", "docs.google.com"];

/// Where the package archive comes from, resolved once from the `--package` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageSource {
    /// A Google Drive share link, downloaded through `gdown`.
    GoogleDrive { url: String, file_id: String },
    /// Any other http(s) URL, downloaded directly.
    Direct(Url),
    /// An archive already on this machine (`file://` URL or plain path).
    LocalFile(PathBuf),
}

impl PackageSource {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(InstallerError::invalid_reference(reference, "reference is empty"));
        }

        // An existing file wins, so names like `pkg:v2.zip` are not read as URL schemes.
        let path = Path::new(reference);
        if path.is_file() {
            return Ok(Self::LocalFile(path.to_path_buf()));
        }

        let url = match Url::parse(reference) {
            Ok(url) => url,
            Err(e) => {
                debug!("'{}' is not a URL ({}) and not an existing file", reference, e);
                return Err(InstallerError::invalid_reference(
                    reference,
                    "not a URL and not an existing file",
                ));
            }
        };

        match url.scheme() {
            "http" | "https" => {
                if is_google_drive_host(&url) {
                    let file_id = extract_drive_file_id(&url)
                        .ok_or_else(|| InstallerError::UnresolvedDriveLink(reference.to_string()))?;
                    Ok(Self::GoogleDrive {
                        url: reference.to_string(),
                        file_id,
                    })
                } else {
                    Ok(Self::Direct(url))
                }
            }
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| InstallerError::invalid_reference(reference, "malformed file URL"))?;
                if !path.is_file() {
                    return Err(InstallerError::invalid_reference(reference, "file does not exist"));
                }
                Ok(Self::LocalFile(path))
            }
            other => Err(InstallerError::invalid_reference(
                reference,
                format!("unsupported URL scheme '{}'", other),
            )),
        }
    }

    pub fn is_google_drive(&self) -> bool {
        matches!(self, Self::GoogleDrive { .. })
    }
}

impl fmt::Display for PackageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoogleDrive { file_id, .. } => write!(f, "Google Drive file {}", file_id),
            Self::Direct(url) => write!(f, "{}", url),
            Self::LocalFile(path) => write!(f, "{}", path.display()),
        }
    }
}

fn is_google_drive_host(url: &Url) -> bool {
    url.host_str()
        .is_some_and(|host| GOOGLE_DRIVE_HOSTS.contains(&host.to_ascii_lowercase().as_str()))
}

/// Pulls the file id out of the two share-link shapes Drive hands out:
/// `.../file/d/<id>/view` and `...?id=<id>`.
pub fn extract_drive_file_id(url: &Url) -> Option<String> {
    if let Some(segments) = url.path_segments() {
        let segments: Vec<&str> = segments.collect();
        if let Some(pos) = segments.windows(2).position(|pair| pair == ["file", "d"]) {
            if let Some(id) = segments.get(pos + 2).filter(|id| is_valid_file_id(id)) {
                return Some((*id).to_string());
            }
        }
    }

    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|id| is_valid_file_id(id))
}

fn is_valid_file_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
