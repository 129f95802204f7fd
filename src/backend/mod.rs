//! Key-value backend abstraction.
//!
//! The tier talks to its storage engine through [`Backend`], an
//! object-safe async trait over the primitives the two key layouts need:
//! - pipelined multi-key reads and writes with expiry-on-write
//! - prefix deletion and an engine-wide entry count
//! - hash-container reads/writes with whole-container expiry
//!
//! Every multi-key method is a single round trip; a logical batch is
//! never split across the wire. Two implementations ship with the crate:
//! [`RedisBackend`] for production and [`MemoryBackend`] for tests and
//! embedded use.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Backend failure taxonomy.
///
/// `Clone` so the fault event and the failing caller can both carry the
/// original error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The connection has been released. A tier whose backend is closed
    /// must be reconstructed; nothing here reconnects.
    #[error("backend connection closed")]
    Closed,

    /// Transport-level failure (reset, refused, timed out).
    #[error("backend i/o failure: {0}")]
    Io(String),

    /// The engine answered with something the adapter cannot interpret.
    #[error("backend protocol error: {0}")]
    Protocol(String),
}

/// One entry of a batched write.
#[derive(Debug, Clone)]
pub struct KvWrite {
    pub key: String,
    pub value: Vec<u8>,
    /// Expiry applied on write; `None` leaves the key persistent.
    pub ttl: Option<Duration>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Fetch many keys in one round trip, reply order matching `keys`.
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, BackendError>;

    /// Write many keys in one round trip, each with its own expiry.
    async fn put_many(&self, entries: &[KvWrite]) -> Result<(), BackendError>;

    /// Delete many keys in one round trip; returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, BackendError>;

    /// Delete every key starting with `prefix`; returns how many went.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError>;

    /// Engine-wide entry count. Implementations report 0 when the engine
    /// cannot produce a meaningful count for the active logical database.
    async fn count(&self) -> Result<u64, BackendError>;

    /// Fetch many fields of one container in one round trip, reply order
    /// matching `fields`.
    async fn hash_get_many(
        &self,
        container: &str,
        fields: &[String],
    ) -> Result<Vec<Option<Vec<u8>>>, BackendError>;

    /// Write many fields of one container and refresh its outer expiry,
    /// all in one round trip.
    async fn hash_put_many(
        &self,
        container: &str,
        entries: &[(String, Vec<u8>)],
        outer_ttl: Duration,
    ) -> Result<(), BackendError>;

    /// Remove many fields of one container in one round trip; returns how
    /// many existed.
    async fn hash_delete_many(&self, container: &str, fields: &[String])
        -> Result<u64, BackendError>;

    /// Number of fields in a container (0 for a missing container).
    async fn hash_len(&self, container: &str) -> Result<u64, BackendError>;

    /// Release the underlying connection. Every subsequent operation
    /// fails with [`BackendError::Closed`].
    async fn close(&self);
}
