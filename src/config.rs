// ⚙️ Configuration - tracker.toml
//
// [import]
// staging_batch_size = 100
// confirm_new_records = true
//
// Every key is optional; a missing file means all defaults.

use crate::error::ImportError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "tracker.toml";
pub const DEFAULT_STAGING_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrackerConfig {
    pub database_path: PathBuf,
    /// off, error, warn, info, debug, trace
    pub log_level: String,
    pub import: ImportConfig,
    pub server: ServerConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            database_path: PathBuf::from("pipeline_tracker.db"),
            log_level: "info".to_string(),
            import: ImportConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImportConfig {
    /// Rows per staging insert
    pub staging_batch_size: usize,

    /// List freshly inserted records in the difference set for confirmation
    pub confirm_new_records: bool,
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            staging_batch_size: DEFAULT_STAGING_BATCH_SIZE,
            confirm_new_records: true,
        }
    }
}

impl ImportConfig {
    pub fn validate(&self) -> Result<(), ImportError> {
        if self.staging_batch_size == 0 {
            return Err(ImportError::Config(
                "import.staging_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

impl TrackerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ImportError> {
        let config: TrackerConfig =
            toml::from_str(text).map_err(|e| ImportError::Config(e.to_string()))?;
        config.import.validate()?;
        Ok(config)
    }

    /// Load a config file; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ImportError> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(TrackerConfig::default());
        }

        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}
