//! The cache tier facade.
//!
//! [`CacheTier`] is what the owning batching/caching framework talks to:
//! point reads, order-preserving batched reads, batched writes, flushes
//! and a size probe. Every read runs the staleness policy; hits bump the
//! record's step and write the wider window back off the read path.
//! Backend failures route through the fault path once, after which the
//! tier refuses work until reconstructed.

pub mod keyspace;

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backend::{Backend, BackendError, KvWrite, RedisBackend};
use crate::config::Config;
use crate::staleness::policy::{StalenessPolicy, Verdict};
use crate::staleness::record::{CacheRecord, CodecError, RecordCodec};
use crate::tier::keyspace::{Keyspace, Scheme};

/// Errors surfaced by tier operations.
#[derive(Error, Debug)]
pub enum TierError {
    /// The backend failed mid-operation. The fault path has already run;
    /// a [`TierEvent::Fault`] carries the same error.
    #[error("backend fault: {0}")]
    Backend(#[from] BackendError),

    /// The tier faulted earlier and must be reconstructed.
    #[error("tier is faulted and awaiting reconstruction")]
    Faulted,

    /// A value could not be serialized for writing.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Observability events pushed to the owning framework.
#[derive(Debug, Clone)]
pub enum TierEvent {
    /// The backend failed; the tier is now unusable. Emitted at most once
    /// per tier lifetime.
    Fault { error: BackendError },

    /// A cache hit bumped a record's step, extending its window.
    Refreshed {
        key: String,
        timestamp_ms: u64,
        step: u32,
        expires_at_ms: u64,
    },
}

/// Write options for [`CacheTier::set_many`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Step granted to the written records; 0 starts them cold.
    pub step: u32,
}

/// Point-in-time counter snapshot.
#[derive(Debug, Clone, Default)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub refreshes: u64,
    pub evictions: u64,
    pub decode_faults: u64,
    pub writes: u64,
}

impl TierStats {
    /// Hit rate over all reads (0.0 before any read).
    pub fn hit_rate(&self) -> f64 {
        let reads = self.hits + self.misses;
        if reads == 0 {
            return 0.0;
        }
        self.hits as f64 / reads as f64
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    refreshes: AtomicU64,
    evictions: AtomicU64,
    decode_faults: AtomicU64,
    writes: AtomicU64,
}

/// A record encoded and ready to store, expiry included.
struct PendingWrite {
    key: String,
    bytes: Vec<u8>,
    ttl: Duration,
}

/// Outcome of assessing one fetched record.
enum Resolution<V> {
    Miss,
    Evict,
    Hit {
        value: V,
        write: Option<PendingWrite>,
    },
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Store a batch of encoded records under the active scheme.
///
/// Free-standing so the fire-and-forget write-back task can run it after
/// the borrowing operation has already returned.
async fn persist(
    backend: &dyn Backend,
    keyspace: &Keyspace,
    container_ttl: Duration,
    records: Vec<PendingWrite>,
) -> Result<(), BackendError> {
    match keyspace.scheme() {
        Scheme::Flat => {
            let writes: Vec<KvWrite> = records
                .into_iter()
                .map(|record| KvWrite {
                    key: keyspace.physical(&record.key),
                    value: record.bytes,
                    ttl: Some(record.ttl),
                })
                .collect();
            backend.put_many(&writes).await
        }
        Scheme::Container => {
            let fields: Vec<(String, Vec<u8>)> = records
                .into_iter()
                .map(|record| (record.key, record.bytes))
                .collect();
            backend
                .hash_put_many(keyspace.container(), &fields, container_ttl)
                .await
        }
    }
}

/// A remote cache tier applying the staleness policy to every read.
pub struct CacheTier<V> {
    backend: Arc<dyn Backend>,
    keyspace: Keyspace,
    policy: StalenessPolicy,
    codec: RecordCodec,
    events: mpsc::UnboundedSender<TierEvent>,
    faulted: AtomicBool,
    counters: Counters,
    _value: PhantomData<fn() -> V>,
}

impl<V> CacheTier<V>
where
    V: Serialize + DeserializeOwned + Send + Sync,
{
    /// Build a tier over an injected backend.
    ///
    /// Returns the tier and the receiving end of its event channel. The
    /// namespace comes from the config or is generated fresh, so two
    /// tiers over one backend never see each other's records.
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> (Self, mpsc::UnboundedReceiver<TierEvent>) {
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().simple().to_string());
        let keyspace = Keyspace::new(namespace, config.scheme);
        let policy = StalenessPolicy::new(config.cache.clone());
        let codec = RecordCodec::new(config.compression.clone());
        let (events, receiver) = mpsc::unbounded_channel();

        info!(
            namespace = keyspace.namespace(),
            scheme = ?keyspace.scheme(),
            steps = policy.curve().steps(),
            "Cache tier ready"
        );

        let tier = Self {
            backend,
            keyspace,
            policy,
            codec,
            events,
            faulted: AtomicBool::new(false),
            counters: Counters::default(),
            _value: PhantomData,
        };
        (tier, receiver)
    }

    /// Connect the production redis backend from `config.backend.url` and
    /// build a tier over it.
    pub async fn connect(
        config: Config,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TierEvent>), TierError> {
        let backend = RedisBackend::connect(&config.backend.url).await?;
        Ok(Self::new(config, Arc::new(backend)))
    }

    /// Point read with staleness assessment.
    ///
    /// Misses (absent, lapsed, undecodable) resolve to `Ok(None)`. A hit
    /// returns the value immediately and persists the bumped step off the
    /// read path. Two concurrent reads of one key may bump from the same
    /// base step; last writer wins.
    pub async fn get(&self, key: &str) -> Result<Option<V>, TierError> {
        self.ensure_live()?;
        let fetched = self.fetch_raw(&[key.to_string()]).await;
        let mut replies = self.guarded(fetched).await?;

        let Some(raw) = replies.pop().flatten() else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            debug!(key, "Cache miss");
            return Ok(None);
        };

        match self.resolve(key, &raw, now_ms()) {
            Resolution::Miss => Ok(None),
            Resolution::Evict => {
                let evicted = self.evict_raw(&[key.to_string()]).await;
                self.guarded(evicted).await?;
                Ok(None)
            }
            Resolution::Hit { value, write } => {
                if let Some(write) = write {
                    self.spawn_write_back(vec![write]);
                }
                Ok(Some(value))
            }
        }
    }

    /// Batched read preserving input order and gaps.
    ///
    /// `record_key` maps an id to its record key (the owning framework
    /// folds request parameters in there). `None` slots are passthrough
    /// gaps: they never reach the backend and come back as `None`. The
    /// whole fetch is one round trip, as is the eviction of whatever
    /// records it exposed as lapsed.
    pub async fn get_many<F>(
        &self,
        record_key: F,
        ids: &[Option<String>],
    ) -> Result<Vec<Option<V>>, TierError>
    where
        F: Fn(&str) -> String,
    {
        self.ensure_live()?;
        let keys: Vec<String> = ids
            .iter()
            .flatten()
            .map(|id| record_key(id))
            .collect();
        if keys.is_empty() {
            return Ok(ids.iter().map(|_| None).collect());
        }

        let fetched = self.fetch_raw(&keys).await;
        let replies = self.guarded(fetched).await?;
        let mut replies = replies.into_iter();

        let now = now_ms();
        let mut results = Vec::with_capacity(ids.len());
        let mut write_backs = Vec::new();
        let mut evictions: Vec<String> = Vec::new();
        let mut slot = 0usize;

        for id in ids {
            if id.is_none() {
                results.push(None);
                continue;
            }
            let key = &keys[slot];
            slot += 1;
            let Some(raw) = replies.next().flatten() else {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = key.as_str(), "Cache miss");
                results.push(None);
                continue;
            };
            match self.resolve(key, &raw, now) {
                Resolution::Miss => results.push(None),
                Resolution::Evict => {
                    evictions.push(key.clone());
                    results.push(None);
                }
                Resolution::Hit { value, write } => {
                    if let Some(write) = write {
                        write_backs.push(write);
                    }
                    results.push(Some(value));
                }
            }
        }

        if !evictions.is_empty() {
            let evicted = self.evict_raw(&evictions).await;
            self.guarded(evicted).await?;
        }
        if !write_backs.is_empty() {
            self.spawn_write_back(write_backs);
        }
        Ok(results)
    }

    /// Write every id that has a value in `values`; ids without one are
    /// skipped. Existing records are overwritten unconditionally and the
    /// written records start fresh at `opts.step` with a new timestamp.
    pub async fn set_many<F>(
        &self,
        record_key: F,
        ids: &[String],
        values: &HashMap<String, V>,
        opts: &SetOptions,
    ) -> Result<(), TierError>
    where
        F: Fn(&str) -> String,
    {
        self.ensure_live()?;
        let timestamp = now_ms();
        let ttl = self.policy.write_ttl(opts.step);

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(value) = values.get(id) else { continue };
            let record = CacheRecord::new(value, timestamp, opts.step);
            records.push(PendingWrite {
                key: record_key(id),
                bytes: self.codec.encode(&record)?,
                ttl,
            });
        }
        if records.is_empty() {
            return Ok(());
        }

        let written = records.len() as u64;
        let stored = persist(
            self.backend.as_ref(),
            &self.keyspace,
            self.policy.curve().container_ttl(),
            records,
        )
        .await;
        self.guarded(stored).await?;

        self.counters.writes.fetch_add(written, Ordering::Relaxed);
        debug!(count = written, step = opts.step, "Stored batch");
        Ok(())
    }

    /// Force a key absent; `"*"` flushes the whole namespace.
    ///
    /// Returns whether anything was actually removed.
    pub async fn clear(&self, key: &str) -> Result<bool, TierError> {
        self.ensure_live()?;
        if key == "*" {
            let flushed = self.flush_namespace().await;
            let removed = self.guarded(flushed).await?;
            info!(
                namespace = self.keyspace.namespace(),
                removed, "Namespace flushed"
            );
            return Ok(removed > 0);
        }
        let removed = self.evict_raw(&[key.to_string()]).await;
        Ok(self.guarded(removed).await? > 0)
    }

    /// Best-effort entry count: exact under the container scheme, the
    /// engine's own count under the flat scheme (0 when the engine cannot
    /// report one for the shared database).
    pub async fn size(&self) -> Result<u64, TierError> {
        self.ensure_live()?;
        let counted = match self.keyspace.scheme() {
            Scheme::Flat => self.backend.count().await,
            Scheme::Container => self.backend.hash_len(self.keyspace.container()).await,
        };
        self.guarded(counted).await
    }

    /// Counter snapshot.
    pub fn stats(&self) -> TierStats {
        TierStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            refreshes: self.counters.refreshes.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            decode_faults: self.counters.decode_faults.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }

    /// Namespace scoping this tier's keys.
    pub fn namespace(&self) -> &str {
        self.keyspace.namespace()
    }

    fn ensure_live(&self) -> Result<(), TierError> {
        if self.faulted.load(Ordering::SeqCst) {
            return Err(TierError::Faulted);
        }
        Ok(())
    }

    /// Assess one fetched record: decode it, run the policy, and turn the
    /// verdict into counters, events, and a pending write-back.
    fn resolve(&self, key: &str, raw: &[u8], now_ms: u64) -> Resolution<V> {
        let Some(record) = self.codec.decode::<V>(raw) else {
            self.counters.decode_faults.fetch_add(1, Ordering::Relaxed);
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            warn!(key, "Discarding undecodable record");
            return Resolution::Miss;
        };

        match self.policy.assess(record.timestamp, record.step, now_ms) {
            Verdict::Evict => {
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, step = record.step, "Record lapsed; evicting");
                Resolution::Evict
            }
            Verdict::Refresh {
                next_step,
                expires_at_ms,
            } => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                self.counters.refreshes.fetch_add(1, Ordering::Relaxed);
                debug!(key, step = next_step, "Cache hit");

                let refreshed =
                    CacheRecord::new(&record.value, record.timestamp, next_step);
                // An unencodable refresh only costs the extension; the hit
                // itself still stands.
                let write = match self.codec.encode(&refreshed) {
                    Ok(bytes) => Some(PendingWrite {
                        key: key.to_string(),
                        bytes,
                        ttl: self.policy.write_ttl(next_step),
                    }),
                    Err(err) => {
                        warn!(key, error = %err, "Skipping write-back");
                        None
                    }
                };

                let _ = self.events.send(TierEvent::Refreshed {
                    key: key.to_string(),
                    timestamp_ms: record.timestamp,
                    step: next_step,
                    expires_at_ms,
                });
                Resolution::Hit {
                    value: record.value,
                    write,
                }
            }
        }
    }

    async fn fetch_raw(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, BackendError> {
        match self.keyspace.scheme() {
            Scheme::Flat => {
                let physical: Vec<String> =
                    keys.iter().map(|key| self.keyspace.physical(key)).collect();
                self.backend.get_many(&physical).await
            }
            Scheme::Container => {
                self.backend
                    .hash_get_many(self.keyspace.container(), keys)
                    .await
            }
        }
    }

    async fn evict_raw(&self, keys: &[String]) -> Result<u64, BackendError> {
        match self.keyspace.scheme() {
            Scheme::Flat => {
                let physical: Vec<String> =
                    keys.iter().map(|key| self.keyspace.physical(key)).collect();
                self.backend.delete_many(&physical).await
            }
            Scheme::Container => {
                self.backend
                    .hash_delete_many(self.keyspace.container(), keys)
                    .await
            }
        }
    }

    async fn flush_namespace(&self) -> Result<u64, BackendError> {
        match self.keyspace.scheme() {
            Scheme::Flat => self.backend.delete_prefix(&self.keyspace.prefix()).await,
            Scheme::Container => {
                self.backend
                    .delete_many(&[self.keyspace.container().to_string()])
                    .await
            }
        }
    }

    /// Persist refreshed records off the read path. Failures are logged
    /// and swallowed; the reads that scheduled them have already returned.
    fn spawn_write_back(&self, records: Vec<PendingWrite>) {
        let backend = Arc::clone(&self.backend);
        let keyspace = self.keyspace.clone();
        let container_ttl = self.policy.curve().container_ttl();
        tokio::spawn(async move {
            if let Err(error) =
                persist(backend.as_ref(), &keyspace, container_ttl, records).await
            {
                warn!(%error, "Write-back dropped");
            }
        });
    }

    /// Pass a backend result through the fault path.
    async fn guarded<T>(&self, result: Result<T, BackendError>) -> Result<T, TierError> {
        match result {
            Ok(value) => Ok(value),
            Err(error) => {
                self.raise_fault(&error).await;
                Err(TierError::Backend(error))
            }
        }
    }

    /// Handle a backend failure: best-effort namespace flush, connection
    /// release, one fault event. Runs at most once per tier lifetime.
    async fn raise_fault(&self, error: &BackendError) {
        if self.faulted.swap(true, Ordering::SeqCst) {
            return;
        }
        error!(
            %error,
            namespace = self.keyspace.namespace(),
            "Backend fault; releasing tier"
        );

        // Advisory cleanup; the connection is usually already gone.
        if let Err(cleanup) = self.flush_namespace().await {
            debug!(%cleanup, "Namespace flush during fault handling failed");
        }
        self.backend.close().await;
        let _ = self.events.send(TierEvent::Fault {
            error: error.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[test]
    fn test_hit_rate() {
        let stats = TierStats {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(TierStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_generated_namespaces_are_unique() {
        let backend = Arc::new(MemoryBackend::new());
        let (a, _rx_a) = CacheTier::<String>::new(Config::default(), backend.clone());
        let (b, _rx_b) = CacheTier::<String>::new(Config::default(), backend);
        assert_ne!(a.namespace(), b.namespace());
        assert_eq!(a.namespace().len(), 32); // uuid v4, simple format
    }

    #[test]
    fn test_pinned_namespace_is_kept() {
        let mut config = Config::default();
        config.namespace = Some("pinned".to_string());
        let backend = Arc::new(MemoryBackend::new());
        let (tier, _rx) = CacheTier::<String>::new(config, backend);
        assert_eq!(tier.namespace(), "pinned");
    }
}
