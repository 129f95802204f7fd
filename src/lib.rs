//! ember-tier: a remote cache tier with read-adaptive staleness.
//!
//! A pluggable storage tier for batching/caching frontends. Records are
//! persisted in a remote key-value engine and live longer the more they
//! are read: every hit advances a record one step along a configured
//! curve between a base TTL and a hard limit, and the widened window is
//! written back off the read path. Once reads stop, the record falls
//! back to expiry and the engine reclaims it.
//!
//! Module map:
//! - [`staleness`]: the TTL curve, the record envelope, and the policy
//! - [`backend`]: pipelined key-value adapters (redis, in-memory)
//! - [`tier`]: the [`CacheTier`] facade the owning framework drives
//! - [`config`]: knobs for all of the above
//!
//! # Example
//!
//! ```
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use ember_tier::{CacheTier, Config, MemoryBackend, SetOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ember_tier::TierError> {
//!     let (tier, _events) =
//!         CacheTier::<String>::new(Config::default(), Arc::new(MemoryBackend::new()));
//!
//!     let ids = vec!["greeting".to_string()];
//!     let mut values = HashMap::new();
//!     values.insert("greeting".to_string(), "hello".to_string());
//!     tier.set_many(|id| id.to_string(), &ids, &values, &SetOptions::default())
//!         .await?;
//!
//!     assert_eq!(tier.get("greeting").await?.as_deref(), Some("hello"));
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod staleness;
pub mod tier;

pub use backend::{Backend, BackendError, KvWrite, MemoryBackend, RedisBackend};
pub use config::{BackendConfig, CompressionConfig, Config, ConfigError, CurveConfig};
pub use staleness::curve::{ease_in, CurveFn, TtlCurve};
pub use staleness::policy::{StalenessPolicy, Verdict};
pub use staleness::record::{CacheRecord, CodecError, RecordCodec};
pub use tier::keyspace::{Keyspace, Scheme};
pub use tier::{CacheTier, SetOptions, TierError, TierEvent, TierStats};
