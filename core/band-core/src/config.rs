//! Runtime configuration (`~/.smartband/config.toml`).
//!
//! Every section is optional; a missing file yields defaults.
//!
//! ```toml
//! [shadow]
//! quiescence_ms = 3000
//! deadline_margin_ms = 5000
//!
//! [session]
//! on_reidentify = "clear_selection"
//! idle_ttl_secs = 900
//!
//! [speech]
//! locale = "es"
//! ```

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::messages::Locale;
use crate::session::ReidentifyPolicy;

pub const CONFIG_ENV: &str = "SMARTBAND_CONFIG";

const DEFAULT_QUIESCENCE_MS: u64 = 3000;
const DEFAULT_DEADLINE_MARGIN_MS: u64 = 5000;
const DEFAULT_IDLE_TTL_SECS: u64 = 15 * 60;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct BandConfig {
    #[serde(default)]
    pub shadow: ShadowConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ShadowConfig {
    #[serde(default = "default_quiescence_ms")]
    pub quiescence_ms: u64,
    #[serde(default = "default_deadline_margin_ms")]
    pub deadline_margin_ms: u64,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            quiescence_ms: DEFAULT_QUIESCENCE_MS,
            deadline_margin_ms: DEFAULT_DEADLINE_MARGIN_MS,
        }
    }
}

impl ShadowConfig {
    pub fn quiescence(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms)
    }

    /// Hard ceiling on one command: the wait plus the margin.
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.quiescence_ms.saturating_add(self.deadline_margin_ms))
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default)]
    pub on_reidentify: ReidentifyPolicy,
    #[serde(default = "default_idle_ttl_secs")]
    pub idle_ttl_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            on_reidentify: ReidentifyPolicy::default(),
            idle_ttl_secs: DEFAULT_IDLE_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SpeechConfig {
    #[serde(default)]
    pub locale: Locale,
}

fn default_quiescence_ms() -> u64 {
    DEFAULT_QUIESCENCE_MS
}

fn default_deadline_margin_ms() -> u64 {
    DEFAULT_DEADLINE_MARGIN_MS
}

fn default_idle_ttl_secs() -> u64 {
    DEFAULT_IDLE_TTL_SECS
}

/// Returns the SmartBand state directory (~/.smartband).
pub fn smartband_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".smartband"))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    smartband_dir()
        .map(|dir| dir.join("config.toml"))
        .ok_or(ConfigError::NoHomeDir)
}

/// Loads config from `path` (or the default location). Missing file means defaults.
pub fn load_config(path: Option<PathBuf>) -> Result<BandConfig, ConfigError> {
    let path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !path.exists() {
        return Ok(BandConfig::default());
    }

    let content = fs_err::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })
}
