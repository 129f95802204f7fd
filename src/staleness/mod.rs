//! The staleness engine.
//!
//! Three layers, each testable on its own:
//! - [`curve`]: maps accumulated read steps to a TTL between `base` and `limit`
//! - [`record`]: the stored envelope (value + timestamp + step) and its wire codec
//! - [`policy`]: per-record hit/evict verdicts computed from the two above

pub mod curve;
pub mod policy;
pub mod record;
