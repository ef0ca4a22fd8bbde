//! Configuration for the kasse.
//!
//! Sources, later overriding earlier:
//! 1. Built-in defaults
//! 2. JSON file named by `KASSE_CONFIG` (if set)
//! 3. `KASSE_DATA_DIR`, `KASSE_REMOTE_URL` and `KASSE_CREDIT_LIMIT`

use crate::connectivity::ConnectivityConfig;
use crate::ledger::LedgerConfig;
use crate::remote::RemoteConfig;
use crate::sync::ReconcilerConfig;

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const CONFIG_ENV_VAR: &str = "KASSE_CONFIG";
pub const DATA_DIR_ENV_VAR: &str = "KASSE_DATA_DIR";
pub const REMOTE_URL_ENV_VAR: &str = "KASSE_REMOTE_URL";
pub const CREDIT_LIMIT_ENV_VAR: &str = "KASSE_CREDIT_LIMIT";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}

/// Root configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KasseConfig {
    /// Directory for the ledger state, the operation journal and the sync cursor
    pub data_dir: PathBuf,
    pub ledger: LedgerConfig,
    pub connectivity: ConnectivityConfig,
    pub sync: ReconcilerConfig,
    /// Without a URL the kasse runs in local-only mode.
    pub remote: RemoteConfig,
}

impl Default for KasseConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            ledger: LedgerConfig::default(),
            connectivity: ConnectivityConfig::default(),
            sync: ReconcilerConfig::default(),
            remote: RemoteConfig::default(),
        }
    }
}

impl KasseConfig {
    /// Load configuration from the file named by `KASSE_CONFIG` and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_json::from_slice(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(DATA_DIR_ENV_VAR) {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(REMOTE_URL_ENV_VAR) {
            self.remote.url = if url.trim().is_empty() {
                None
            } else {
                Some(url)
            };
        }
        if let Some(limit) = lookup(CREDIT_LIMIT_ENV_VAR) {
            self.ledger.credit_limit =
                limit
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidEnv {
                        var: CREDIT_LIMIT_ENV_VAR,
                        value: limit.clone(),
                    })?;
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            ..Self::default()
        }
    }
}
