//! Activation tracking: command-issued time vs. telemetry-confirmed time.
//!
//! The operator-visible timer runs from `confirmed_at`, the moment a device
//! proved through its own telemetry that it began the session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CanonicalTelemetryEvent, TelemetryKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRecord {
    pub triggered_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Holds at most one [`ActivationRecord`] per session attempt.
#[derive(Debug, Clone, Default)]
pub struct ActivationTracker {
    record: Option<ActivationRecord>,
}

impl ActivationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new attempt. Replaces any previous record, clearing `confirmed_at`.
    pub fn mark_triggered(&mut self, now: DateTime<Utc>) {
        self.record = Some(ActivationRecord {
            triggered_at: now,
            confirmed_at: None,
        });
    }

    /// Confirm activation. Only the first call after a trigger has any
    /// effect; returns `true` when this call confirmed the session.
    pub fn mark_confirmed(&mut self, now: DateTime<Utc>) -> bool {
        match self.record.as_mut() {
            Some(record) if record.confirmed_at.is_none() => {
                record.confirmed_at = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Confirm from a telemetry event if it qualifies: a `Started`, `Hit` or
    /// `Info` event received at or after the trigger.
    pub fn observe(&mut self, event: &CanonicalTelemetryEvent) -> bool {
        let Some(record) = self.record else {
            return false;
        };
        let qualifies = matches!(
            event.kind,
            TelemetryKind::Started | TelemetryKind::Hit | TelemetryKind::Info
        ) && event.received_at >= record.triggered_at;
        qualifies && self.mark_confirmed(event.received_at)
    }

    pub fn is_confirmed(&self) -> bool {
        self.record.is_some_and(|r| r.confirmed_at.is_some())
    }

    pub fn record(&self) -> Option<ActivationRecord> {
        self.record
    }

    /// Drop the record at session teardown.
    pub fn clear(&mut self) {
        self.record = None;
    }
}
