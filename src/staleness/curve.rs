//! Staleness curve: maps a record's accumulated read steps to a TTL.
//!
//! A fresh record gets `base`; every read advances it one step toward
//! `limit`. The default shape is quadratic ease-in, so early steps extend
//! the window only slightly and the bulk of the extension is reserved for
//! records that keep proving themselves hot.

use std::time::Duration;

use crate::config::CurveConfig;

/// Signature of a curve shape: normalized progress in `[0, 1]` plus the
/// configured bounds (milliseconds) in, TTL in milliseconds out.
pub type CurveFn = fn(progress: f64, base_ms: f64, limit_ms: f64) -> f64;

/// Quadratic ease-in between `base_ms` and `limit_ms`.
pub fn ease_in(progress: f64, base_ms: f64, limit_ms: f64) -> f64 {
    base_ms + (limit_ms - base_ms) * (progress * progress)
}

/// Outer TTLs derived for the container scheme carry this safety margin
/// so a container never lapses before the widest step window it holds.
const CONTAINER_TTL_MARGIN: f64 = 1.2;

/// Evaluates the configured staleness curve.
#[derive(Debug, Clone)]
pub struct TtlCurve {
    config: CurveConfig,
}

impl TtlCurve {
    pub fn new(config: CurveConfig) -> Self {
        Self { config }
    }

    /// TTL granted to a record at the given read step.
    ///
    /// Progress is clamped to `[0, 1]`, so steps past the budget saturate
    /// at `limit` and a zero step budget degenerates to `limit` outright.
    pub fn ttl_for_step(&self, step: u32) -> Duration {
        let progress = if self.config.steps == 0 {
            1.0
        } else {
            (f64::from(step) / f64::from(self.config.steps)).min(1.0)
        };
        let shape = self.config.curve.unwrap_or(ease_in);
        let ttl_ms = shape(progress, self.config.base_ms as f64, self.config.limit_ms as f64);
        Duration::from_millis(ttl_ms.max(0.0).round() as u64)
    }

    /// Outer TTL for a container holding many records: the widest gap
    /// between two consecutive step windows, floored at `base`, padded by
    /// the safety margin. Refreshed on every batched write, so a container
    /// only lapses once writes stop long enough for its hottest record to
    /// have gone stale anyway.
    pub fn container_ttl(&self) -> Duration {
        let base = Duration::from_millis(self.config.base_ms);
        let widest_gap = if self.config.steps >= 2 {
            self.ttl_for_step(self.config.steps - 1)
                .saturating_sub(self.ttl_for_step(self.config.steps - 2))
        } else {
            Duration::ZERO
        };
        widest_gap.max(base).mul_f64(CONTAINER_TTL_MARGIN)
    }

    /// Configured step budget.
    pub fn steps(&self) -> u32 {
        self.config.steps
    }
}
