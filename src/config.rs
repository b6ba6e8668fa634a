//! Application configuration
//!
//! Pipeline and server settings stored together in one JSON file, by default
//! `digitizers.json` in the working directory.

use digitizers_core::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "digitizers.json";

fn default_port() -> u16 {
    8920
}

fn default_bind_addr() -> String {
    "0.0.0.0".to_string()
}

/// Persistent application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Acquisition pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Diagnostic server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Diagnostic server bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            port: default_port(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl AppConfig {
    /// Config file path used when none is given
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Load config from disk, falling back to defaults on any error
    ///
    /// A file that parses but describes an unusable pipeline also falls back
    /// to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => match config.pipeline.validate() {
                    Ok(()) => {
                        tracing::info!(path = %path.display(), "Loaded config from disk");
                        config
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Invalid pipeline config, using defaults");
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}
