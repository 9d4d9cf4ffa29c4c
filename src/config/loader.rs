use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use std::path::Path;
use thiserror::Error;

use super::types::ClusterConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cluster name cannot be empty")]
    EmptyClusterName,

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid write_batch_size for map {0}: must be at least 1")]
    InvalidBatchSize(String),

    #[error("Invalid join_timeout_ms: must be positive")]
    InvalidJoinTimeout,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. The TOML file, when given
    /// 3. `MAPSTORE_*` environment variables
    pub fn load(path: Option<&Path>) -> Result<ClusterConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(ClusterConfig::default()));
        if let Some(path) = path {
            if !path.exists() {
                anyhow::bail!("Config file {} does not exist", path.display());
            }
            figment = figment.merge(Toml::file(path));
        }

        let config: ClusterConfig = figment
            .merge(Env::prefixed("MAPSTORE_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Parse configuration from a TOML string, without environment overrides.
    pub fn from_toml(source: &str) -> Result<ClusterConfig> {
        let config: ClusterConfig = Figment::new()
            .merge(Serialized::defaults(ClusterConfig::default()))
            .merge(Toml::string(source))
            .extract()
            .context("Failed to parse TOML configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    pub fn validate(config: &ClusterConfig) -> Result<(), ConfigError> {
        if config.name.trim().is_empty() {
            return Err(ConfigError::EmptyClusterName);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.join_timeout_ms == 0 {
            return Err(ConfigError::InvalidJoinTimeout);
        }

        for (name, map) in &config.maps {
            if let Some(store) = &map.store
                && store.write_batch_size == 0
            {
                return Err(ConfigError::InvalidBatchSize(name.clone()));
            }
        }

        Ok(())
    }
}
