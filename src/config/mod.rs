//! Configuration for the ePO client
//!
//! Values are layered: built-in defaults, then the TOML config file, then
//! environment variables:
//! - `EPO_UNIQUE_ID`: unique identifier of the ePO server
//! - `EPO_RESOLUTION`: `lazy` (default) or `eager`
//! - `EPO_THREAT_TOPIC`: threat event topic

pub mod file;

use std::path::Path;
use std::str::FromStr;

use crate::client::DEFAULT_THREAT_EVENT_TOPIC;
use crate::{Error, Result};

use self::file::EpoConfigFile;

/// When the client resolves its target ePO server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResolutionMode {
    /// On the first command
    #[default]
    Lazy,
    /// While the client is constructed
    Eager,
}

impl FromStr for ResolutionMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lazy" => Ok(Self::Lazy),
            "eager" => Ok(Self::Eager),
            other => Err(Error::Config(format!(
                "unknown resolution mode '{other}' (expected lazy or eager)"
            ))),
        }
    }
}

/// ePO client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpoClientConfig {
    /// ePO server to talk to; discovered automatically when `None`
    pub unique_id: Option<String>,

    /// When to resolve the target server
    pub resolution: ResolutionMode,

    /// Topic threat events are published on
    pub threat_event_topic: String,
}

impl Default for EpoClientConfig {
    fn default() -> Self {
        Self {
            unique_id: None,
            resolution: ResolutionMode::default(),
            threat_event_topic: DEFAULT_THREAT_EVENT_TOPIC.to_string(),
        }
    }
}

impl EpoClientConfig {
    /// Configuration targeting the ePO server `unique_id`
    #[must_use]
    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }

    /// Set the resolution mode
    #[must_use]
    pub const fn with_resolution(mut self, resolution: ResolutionMode) -> Self {
        self.resolution = resolution;
        self
    }

    /// Load from the standard config file and the environment
    ///
    /// # Errors
    ///
    /// Returns error if a configured resolution mode is not recognized
    pub fn load() -> Result<Self> {
        Self::default()
            .merge_file(file::load_config_file())?
            .merge_env(|key| std::env::var(key).ok())
    }

    /// Load from the config file at `path` and the environment
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, or a resolution
    /// mode is not recognized
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::default()
            .merge_file(file::read_config_file(path)?)?
            .merge_env(|key| std::env::var(key).ok())
    }

    /// Load from environment variables only
    ///
    /// # Errors
    ///
    /// Returns error if `EPO_RESOLUTION` is not recognized
    pub fn from_env() -> Result<Self> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    /// Overlay values present in a config file
    ///
    /// # Errors
    ///
    /// Returns error if the file's resolution mode is not recognized
    pub fn merge_file(mut self, file: EpoConfigFile) -> Result<Self> {
        if let Some(unique_id) = file.epo.unique_id {
            self.unique_id = Some(unique_id);
        }
        if let Some(resolution) = file.epo.resolution {
            self.resolution = resolution.parse()?;
        }
        if let Some(topic) = file.events.threat_topic {
            self.threat_event_topic = topic;
        }
        Ok(self)
    }

    /// Overlay values from environment variables read through `var`
    ///
    /// Empty values are ignored.
    ///
    /// # Errors
    ///
    /// Returns error if `EPO_RESOLUTION` is not recognized
    pub fn merge_env(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| var(key).filter(|v| !v.trim().is_empty());

        if let Some(unique_id) = var("EPO_UNIQUE_ID") {
            self.unique_id = Some(unique_id);
        }
        if let Some(resolution) = var("EPO_RESOLUTION") {
            self.resolution = resolution.parse()?;
        }
        if let Some(topic) = var("EPO_THREAT_TOPIC") {
            self.threat_event_topic = topic;
        }
        Ok(self)
    }
}
