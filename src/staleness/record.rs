//! Cache record envelope and wire codec.
//!
//! Every stored value travels inside an envelope carrying the two control
//! fields the staleness policy reads back: the creation timestamp and the
//! accumulated read step. The wire form is a JSON object, optionally
//! zstd-compressed once the encoded size crosses a configured threshold.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CompressionConfig;

/// Leading bytes of a zstd frame. A JSON envelope always starts with
/// `{`, so the first byte alone distinguishes the two wire forms.
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("record compression failed: {0}")]
    Compress(#[from] std::io::Error),
}

/// One cached entry as stored in the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheRecord<V> {
    /// The cached payload, structure preserved exactly.
    pub value: V,

    /// Creation instant in unix milliseconds. Never rewritten after the
    /// record is first stored; step bumps carry it forward unchanged.
    pub timestamp: u64,

    /// Accumulated read steps. Only ever incremented.
    pub step: u32,
}

impl<V> CacheRecord<V> {
    pub fn new(value: V, timestamp: u64, step: u32) -> Self {
        Self {
            value,
            timestamp,
            step,
        }
    }
}

/// Encodes records for storage and decodes what the backend hands back.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    config: CompressionConfig,
}

impl RecordCodec {
    pub fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Serialize a record to its wire form, compressing when the encoded
    /// size reaches the configured threshold.
    pub fn encode<V: Serialize>(&self, record: &CacheRecord<V>) -> Result<Vec<u8>, CodecError> {
        let raw = serde_json::to_vec(record)?;
        if let Some(threshold) = self.config.threshold_bytes {
            if raw.len() >= threshold {
                return Ok(zstd::encode_all(raw.as_slice(), self.config.zstd_level)?);
            }
        }
        Ok(raw)
    }

    /// Decode a wire value fetched from the backend.
    ///
    /// Returns `None` for anything malformed: a record that cannot be
    /// decoded is indistinguishable from a cold key at the policy layer,
    /// and its physical copy is left behind for TTL reclamation.
    pub fn decode<V: DeserializeOwned>(&self, raw: &[u8]) -> Option<CacheRecord<V>> {
        if raw.starts_with(&ZSTD_MAGIC) {
            let inflated = zstd::decode_all(raw).ok()?;
            return serde_json::from_slice(&inflated).ok();
        }
        serde_json::from_slice(raw).ok()
    }
}
