//! TOML configuration file loading
//!
//! Supports `~/.config/opendxl/epo/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::Result;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct EpoConfigFile {
    /// ePO server settings
    #[serde(default)]
    pub epo: EpoFileConfig,

    /// Event subscription settings
    #[serde(default)]
    pub events: EventsFileConfig,
}

/// ePO server selection
#[derive(Debug, Default, Deserialize)]
pub struct EpoFileConfig {
    /// Unique identifier of the ePO server to talk to
    pub unique_id: Option<String>,

    /// When to resolve the server ("lazy" or "eager")
    pub resolution: Option<String>,
}

/// Event subscription configuration
#[derive(Debug, Default, Deserialize)]
pub struct EventsFileConfig {
    /// Topic threat events are published on
    pub threat_topic: Option<String>,
}

/// Parse the config file at `path`
///
/// # Errors
///
/// Returns error if the file cannot be read or is not valid TOML
pub fn read_config_file(path: &Path) -> Result<EpoConfigFile> {
    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)?;
    tracing::debug!(path = %path.display(), "loaded config file");
    Ok(config)
}

/// Load the TOML config file from the standard path
///
/// Returns `EpoConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file() -> EpoConfigFile {
    let Some(path) = config_file_path() else {
        return EpoConfigFile::default();
    };

    if !path.exists() {
        return EpoConfigFile::default();
    }

    match read_config_file(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to load config file, using defaults"
            );
            EpoConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/opendxl/epo/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| {
        d.config_dir()
            .join("opendxl")
            .join("epo")
            .join("config.toml")
    })
}
