//! Staleness policy: per-record hit/evict verdicts.
//!
//! The policy owns the freshness decision the backend cannot make on its
//! own: a record is served only while `now` is inside its current step
//! window and it still has step budget left. Everything here is pure in
//! `now`, so callers (and tests) control the clock.

use std::time::Duration;

use crate::config::CurveConfig;
use crate::staleness::curve::TtlCurve;

/// What to do with a record that came back from the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Window lapsed or step budget exhausted: delete and report a miss.
    Evict,
    /// Still fresh: serve it, bump the step, write the wider window back.
    Refresh {
        next_step: u32,
        /// Expiry of the refreshed window, unix milliseconds.
        expires_at_ms: u64,
    },
}

#[derive(Debug, Clone)]
pub struct StalenessPolicy {
    curve: TtlCurve,
    steps: u32,
    absolute_limit_ms: Option<u64>,
}

impl StalenessPolicy {
    pub fn new(config: CurveConfig) -> Self {
        Self {
            steps: config.steps,
            absolute_limit_ms: config.absolute_limit_ms,
            curve: TtlCurve::new(config),
        }
    }

    pub fn curve(&self) -> &TtlCurve {
        &self.curve
    }

    /// Effective expiry instant for a record, unix milliseconds.
    ///
    /// The curve window is clamped by the absolute ceiling when one is
    /// configured; accumulated steps never push a record past it.
    pub fn expires_at_ms(&self, timestamp_ms: u64, step: u32) -> u64 {
        let mut ttl_ms = self.curve.ttl_for_step(step).as_millis() as u64;
        if let Some(ceiling) = self.absolute_limit_ms {
            ttl_ms = ttl_ms.min(ceiling);
        }
        timestamp_ms.saturating_add(ttl_ms)
    }

    /// Assess a decoded record against the given clock reading.
    ///
    /// The saturating bump keeps a corrupted on-wire step from wrapping;
    /// anything at or past the budget evicts, including records whose
    /// window is still open. A step budget of zero or one therefore
    /// disables read caching entirely: the first read back always evicts.
    pub fn assess(&self, timestamp_ms: u64, step: u32, now_ms: u64) -> Verdict {
        let expired = now_ms > self.expires_at_ms(timestamp_ms, step);
        let budget_spent = step.saturating_add(1) >= self.steps;
        if expired || budget_spent {
            return Verdict::Evict;
        }
        let next_step = step + 1;
        Verdict::Refresh {
            next_step,
            expires_at_ms: self.expires_at_ms(timestamp_ms, next_step),
        }
    }

    /// Physical TTL to attach when persisting a record at the given step.
    ///
    /// Matches the policy window (ceiling included), so the engine
    /// reclaims a key no later than the moment a read would evict it.
    pub fn write_ttl(&self, step: u32) -> Duration {
        let ttl = self.curve.ttl_for_step(step);
        match self.absolute_limit_ms {
            Some(ceiling) => ttl.min(Duration::from_millis(ceiling)),
            None => ttl,
        }
    }
}
