//! Serializable backtest configuration and its TOML loader.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use regimelab_core::config::EngineConfig;
use regimelab_core::error::ConfigError;
use regimelab_core::fingerprint::ConfigHash;

/// Errors from reading a configuration file.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(#[from] ConfigError),
}

/// Everything needed to reproduce one backtest over one bar stream.
///
/// The engine section lives under `[engine]`; every field of it has a
/// default, so a config file only spells out what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Human-readable run label, also used as the batch job key.
    pub name: String,
    pub symbol: String,
    /// Bars per year, used to annualise Sharpe and Sortino.
    pub periods_per_year: f64,
    pub engine: EngineConfig,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            symbol: "UNKNOWN".into(),
            periods_per_year: 252.0,
            engine: EngineConfig::default(),
        }
    }
}

impl BacktestConfig {
    pub fn new(name: impl Into<String>, symbol: impl Into<String>, engine: EngineConfig) -> Self {
        Self {
            name: name.into(),
            symbol: symbol.into(),
            engine,
            ..Self::default()
        }
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid("name", "must not be empty"));
        }
        if !(self.periods_per_year.is_finite() && self.periods_per_year > 0.0) {
            return Err(ConfigError::invalid("periods_per_year", "must be positive"));
        }
        self.engine.validate()
    }

    /// Content hash of the engine section. Labels don't change a run's
    /// behaviour, so they are left out.
    pub fn config_hash(&self) -> Result<ConfigHash, ConfigError> {
        ConfigHash::of(&self.engine)
    }
}

/// Read, parse and validate a backtest config file.
pub fn load_config(path: impl AsRef<Path>) -> Result<BacktestConfig, LoadError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BacktestConfig::from_toml_str(&text)?)
}
