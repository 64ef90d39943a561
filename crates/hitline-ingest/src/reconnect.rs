//! Telemetry resubscription backoff.
//!
//! Pure state machine: the subscription task reports failures and receipts,
//! and gets back how long to wait before resubscribing. No clock access.

use serde::{Deserialize, Serialize};

// ─── Policy ──────────────────────────────────────────────────────

/// Exponential backoff for telemetry resubscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// First retry delay in milliseconds (default 1000).
    pub initial_backoff_ms: u64,
    /// Backoff multiplier per consecutive failure (default 1.6).
    pub multiplier: f64,
    /// Upper bound on the delay in milliseconds (default 10000).
    pub max_backoff_ms: u64,
    /// Consecutive failures before the stream is reported degraded (default 3).
    pub degraded_after: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            multiplier: 1.6,
            max_backoff_ms: 10_000,
            degraded_after: 3,
        }
    }
}

// ─── Tracker ─────────────────────────────────────────────────────

/// What the subscription task should do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectDecision {
    /// Delay before the next subscribe attempt.
    pub after_ms: u64,
    /// True exactly once: on the failure that crossed `degraded_after`.
    pub became_degraded: bool,
}

#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    consecutive_failures: u32,
    degraded: bool,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            degraded: false,
        }
    }

    /// Record a subscribe failure or a dropped stream.
    pub fn record_failure(&mut self) -> ReconnectDecision {
        let attempt = self.consecutive_failures;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        #[expect(clippy::cast_precision_loss)]
        let initial = self.policy.initial_backoff_ms as f64;
        #[expect(clippy::cast_possible_wrap)]
        let exponent = attempt.min(64) as i32;
        let raw = initial * self.policy.multiplier.powi(exponent);
        #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let after_ms = (raw as u64).min(self.policy.max_backoff_ms);

        let became_degraded = !self.degraded
            && self.policy.degraded_after > 0
            && self.consecutive_failures >= self.policy.degraded_after;
        if became_degraded {
            self.degraded = true;
        }

        ReconnectDecision {
            after_ms,
            became_degraded,
        }
    }

    /// Record a successful receipt. Returns true if this recovers a
    /// previously degraded stream.
    pub fn record_success(&mut self) -> bool {
        self.consecutive_failures = 0;
        std::mem::replace(&mut self.degraded, false)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
