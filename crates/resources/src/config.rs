//! Runtime configuration loaded from an optional TOML file.
//!
//! # Example
//!
//! ```toml
//! [database]
//! path = "tether.db"
//!
//! [transactions]
//! timeout_ms = 30000
//! max_retries = 2
//!
//! [errors]
//! log_capacity = 100
//!
//! [log]
//! filter = "tether=info"
//! ```
//!
//! Every section and key is optional.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transaction::{TransactionOptions, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ── Types ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    pub database: DatabaseConfig,
    pub transactions: TransactionConfig,
    pub errors: ErrorLogConfig,
    pub log: LogConfig,
}

/// `[database]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("tether.db"),
        }
    }
}

/// `[transactions]`, the defaults for every `execute_transaction` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl TransactionConfig {
    pub fn options(&self) -> TransactionOptions {
        TransactionOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            max_retries: self.max_retries,
            ..TransactionOptions::default()
        }
    }
}

/// `[errors]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorLogConfig {
    pub log_capacity: usize,
}

impl Default for ErrorLogConfig {
    fn default() -> Self {
        ErrorLogConfig { log_capacity: 100 }
    }
}

/// `[log]`. `None` defers to `RUST_LOG`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: Option<String>,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TetherConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Read and parse `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}
