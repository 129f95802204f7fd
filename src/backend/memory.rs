//! In-process backend emulation.
//!
//! Mirrors the engine semantics the redis adapter relies on: string keys
//! with expiry-on-write, hash containers with whole-container expiry that
//! auto-delete when their last field goes, and lazy reclamation of lapsed
//! entries. Lets the tier run integration tests (and small embedded
//! deployments) without a server. A fault-injection switch simulates a
//! dropped connection for failure-handler tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::backend::{Backend, BackendError, KvWrite};

#[derive(Debug, Clone)]
enum Slot {
    Str(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    slot: Slot,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory [`Backend`] with redis-like expiry semantics.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Entry>>,
    broken: AtomicBool,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a dropped connection: every subsequent operation fails
    /// with an i/o error. There is no way back, matching a real peer
    /// reset on a backend that never reconnects.
    pub fn break_connection(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    fn guard(&self) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(BackendError::Io("connection reset by peer".to_string()));
        }
        Ok(())
    }

    fn purge_lapsed(entries: &mut HashMap<String, Entry>, now: Instant) {
        entries.retain(|_, entry| entry.live(now));
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, BackendError> {
        self.guard()?;
        let entries = self.entries.lock().await;
        let now = Instant::now();
        let replies = keys
            .iter()
            .map(|key| {
                entries
                    .get(key)
                    .filter(|entry| entry.live(now))
                    .and_then(|entry| match &entry.slot {
                        Slot::Str(data) => Some(data.clone()),
                        Slot::Hash(_) => None,
                    })
            })
            .collect();
        Ok(replies)
    }

    async fn put_many(&self, writes: &[KvWrite]) -> Result<(), BackendError> {
        self.guard()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Self::purge_lapsed(&mut entries, now);
        for write in writes {
            entries.insert(
                write.key.clone(),
                Entry {
                    slot: Slot::Str(write.value.clone()),
                    expires_at: write.ttl.map(|ttl| now + ttl),
                },
            );
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, BackendError> {
        self.guard()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = entries.remove(key) {
                if entry.live(now) {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, BackendError> {
        self.guard()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let mut removed = 0;
        entries.retain(|key, entry| {
            if key.starts_with(prefix) {
                if entry.live(now) {
                    removed += 1;
                }
                return false;
            }
            true
        });
        Ok(removed)
    }

    async fn count(&self) -> Result<u64, BackendError> {
        self.guard()?;
        let entries = self.entries.lock().await;
        let now = Instant::now();
        Ok(entries.values().filter(|entry| entry.live(now)).count() as u64)
    }

    async fn hash_get_many(
        &self,
        container: &str,
        fields: &[String],
    ) -> Result<Vec<Option<Vec<u8>>>, BackendError> {
        self.guard()?;
        let entries = self.entries.lock().await;
        let now = Instant::now();
        let hash = entries
            .get(container)
            .filter(|entry| entry.live(now))
            .and_then(|entry| match &entry.slot {
                Slot::Hash(fields) => Some(fields),
                Slot::Str(_) => None,
            });
        let replies = fields
            .iter()
            .map(|field| hash.and_then(|hash| hash.get(field).cloned()))
            .collect();
        Ok(replies)
    }

    async fn hash_put_many(
        &self,
        container: &str,
        writes: &[(String, Vec<u8>)],
        outer_ttl: Duration,
    ) -> Result<(), BackendError> {
        self.guard()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        Self::purge_lapsed(&mut entries, now);

        let entry = entries.entry(container.to_string()).or_insert_with(|| Entry {
            slot: Slot::Hash(HashMap::new()),
            expires_at: None,
        });
        if !matches!(entry.slot, Slot::Hash(_)) {
            entry.slot = Slot::Hash(HashMap::new());
        }
        if let Slot::Hash(fields) = &mut entry.slot {
            for (field, value) in writes {
                fields.insert(field.clone(), value.clone());
            }
        }
        // Whole-container expiry is refreshed on every write.
        entry.expires_at = Some(now + outer_ttl);
        Ok(())
    }

    async fn hash_delete_many(
        &self,
        container: &str,
        fields: &[String],
    ) -> Result<u64, BackendError> {
        self.guard()?;
        let mut entries = self.entries.lock().await;
        let now = Instant::now();

        let Some(entry) = entries.get_mut(container).filter(|entry| entry.live(now)) else {
            return Ok(0);
        };
        let Slot::Hash(hash) = &mut entry.slot else {
            return Ok(0);
        };
        let mut removed = 0;
        for field in fields {
            if hash.remove(field).is_some() {
                removed += 1;
            }
        }
        // A hash with no fields left does not exist, same as redis.
        if hash.is_empty() {
            entries.remove(container);
        }
        Ok(removed)
    }

    async fn hash_len(&self, container: &str) -> Result<u64, BackendError> {
        self.guard()?;
        let entries = self.entries.lock().await;
        let now = Instant::now();
        let len = entries
            .get(container)
            .filter(|entry| entry.live(now))
            .map_or(0, |entry| match &entry.slot {
                Slot::Hash(fields) => fields.len() as u64,
                Slot::Str(_) => 0,
            });
        Ok(len)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
