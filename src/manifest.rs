// comfy-package-installer/src/manifest.rs

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{InstallerError, Result};

pub const MANIFEST_FILE_NAME: &str = "config.json";

/// The package's `config.json`. Every field is optional; a missing field means
/// the corresponding step does nothing.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct Manifest {
    /// Metadata is only logged, so any JSON value is accepted.
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub version: Option<Value>,
    #[serde(default)]
    pub author: Option<Value>,
    /// Plugin-relative paths such as `custom_nodes/ComfyUI-Impact-Pack`.
    #[serde(default)]
    pub installation_order: Option<Vec<String>>,
    /// Bundle-wide pip requirement specifiers.
    #[serde(default)]
    pub dependencies: Option<Vec<String>>,
    /// Only its presence matters here; the bundled downloader script reads the content.
    #[serde(default)]
    pub external_models: Option<Value>,
    #[serde(default)]
    pub included_models: Option<Value>,
    #[serde(default, deserialize_with = "deserialize_gpu_settings")]
    pub gpu_settings: GpuSettings,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GpuSettings {
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub vram_optimize: bool,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub xformers: bool,
    #[serde(default)]
    pub precision: Option<Value>,
}

/// `null` or a non-object section means no settings.
fn deserialize_gpu_settings<'de, D>(deserializer: D) -> std::result::Result<GpuSettings, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        value @ Value::Object(_) => serde_json::from_value(value).map_err(serde::de::Error::custom),
        Value::Null => Ok(GpuSettings::default()),
        other => {
            warn!("[MANIFEST] Ignoring gpu_settings that is not an object: {}", other);
            Ok(GpuSettings::default())
        }
    }
}

/// Renders a metadata value for logging. `null` and empty strings count as absent.
fn display_value(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Accepts `true`, `"true"` (any case) and treats everything else as false.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(flag) => flag,
        Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

impl Manifest {
    /// Loads `config.json` from the bundle root. A missing file is an empty manifest.
    pub fn load(bundle_root: &Path) -> Result<Self> {
        let path = bundle_root.join(MANIFEST_FILE_NAME);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("[MANIFEST] No {} in package; using defaults.", MANIFEST_FILE_NAME);
                return Ok(Self::default());
            }
            Err(e) => return Err(InstallerError::io(&path, e)),
        };
        serde_json::from_str(&content).map_err(|source| InstallerError::Manifest { path, source })
    }

    pub fn name(&self) -> Option<String> {
        display_value(&self.name)
    }

    pub fn version(&self) -> Option<String> {
        display_value(&self.version)
    }

    pub fn author(&self) -> Option<String> {
        display_value(&self.author)
    }

    pub fn description(&self) -> Option<String> {
        display_value(&self.description)
    }

    pub fn dependencies(&self) -> &[String] {
        self.dependencies.as_deref().unwrap_or_default()
    }

    /// True when `external_models` is present and not null, empty or false.
    pub fn declares_external_models(&self) -> bool {
        match &self.external_models {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::Array(models)) => !models.is_empty(),
            Some(Value::Object(models)) => !models.is_empty(),
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(_) => true,
        }
    }

    /// Names of declared external models, as written by the package creator.
    pub fn external_model_names(&self) -> Vec<String> {
        let Some(Value::Array(models)) = &self.external_models else {
            return Vec::new();
        };
        models
            .iter()
            .filter_map(|model| model.get("name").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn log_summary(&self) {
        let name = self.name().unwrap_or_else(|| "unnamed package".to_string());
        let version = self.version().unwrap_or_else(|| "unknown version".to_string());
        info!("[MANIFEST] Package: {} ({})", name, version);
        if let Some(author) = self.author() {
            info!("[MANIFEST] Author: {}", author);
        }
        if let Some(description) = self.description() {
            info!("[MANIFEST] {}", description);
        }
        if let Some(order) = &self.installation_order {
            info!("[MANIFEST] Installation order declares {} custom node(s)", order.len());
        }
        if !self.dependencies().is_empty() {
            info!("[MANIFEST] {} bundle-wide dependencies", self.dependencies().len());
        }
        if let Some(Value::Object(included)) = &self.included_models {
            for (category, models) in included {
                let count = models.as_array().map_or(0, Vec::len);
                if count > 0 {
                    info!("[MANIFEST] Included {}: {}", category, count);
                }
            }
        }
        if let Some(precision) = display_value(&self.gpu_settings.precision) {
            warn!("[MANIFEST] gpu_settings.precision = {} is informational only; pass it to ComfyUI yourself.", precision);
        }
    }
}
