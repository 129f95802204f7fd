//! Runtime configuration for ember-tier.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All staleness knobs (curve bounds, step budget, ceilings) live here.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::staleness::curve::CurveFn;
use crate::tier::keyspace::Scheme;

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Staleness curve tuning.
    pub cache: CurveConfig,

    /// Physical key layout in the backend.
    pub scheme: Scheme,

    /// Namespace prefix isolating this tier's keys. Generated at
    /// construction when absent.
    pub namespace: Option<String>,

    /// Record compression settings.
    pub compression: CompressionConfig,

    /// Backend connection settings.
    pub backend: BackendConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CurveConfig::default(),
            scheme: Scheme::default(),
            namespace: None,
            compression: CompressionConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

/// Staleness curve tuning.
///
/// A record's TTL starts at `base_ms` and is re-evaluated on every read:
/// each read advances the record one step along the curve toward
/// `limit_ms`, so frequently read records stay cached longer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CurveConfig {
    /// TTL granted to a record that has never been re-read, in milliseconds.
    pub base_ms: u64,

    /// Upper bound on any record's TTL, in milliseconds.
    pub limit_ms: u64,

    /// Number of read-driven refreshes a record may accumulate before it
    /// is forcibly evicted.
    pub steps: u32,

    /// Hard ceiling on a record's effective TTL regardless of accumulated
    /// steps, in milliseconds.
    pub absolute_limit_ms: Option<u64>,

    /// Custom curve shape; `None` selects quadratic ease-in.
    #[serde(skip)]
    pub curve: Option<CurveFn>,
}

impl Default for CurveConfig {
    fn default() -> Self {
        Self {
            base_ms: 5_000,    // 5 s
            limit_ms: 60_000,  // 1 min
            steps: 5,
            absolute_limit_ms: None,
            curve: None,
        }
    }
}

/// Record compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress encoded records at or above this size in bytes
    /// (None = never compress).
    pub threshold_bytes: Option<usize>,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: None,
            zstd_level: 3,
        }
    }
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend connection URL.
    pub url: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for
    /// missing fields.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
