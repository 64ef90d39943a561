//! Collaborator traits the session engine talks to.
//!
//! Device RPC, telemetry streaming, roster listing and summary storage are
//! all external. Each is an `async_trait` object so the runner can hold them
//! as `Arc<dyn _>` and tests can swap in in-memory fakes.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use hitline_core::classify::RawDeviceStatus;
use hitline_core::types::{SessionParams, SessionSummary};
use hitline_ingest::translate::RawTelemetryEvent;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

/// Acknowledgement from a collaborator, with optional free-form detail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub detail: String,
}

impl Ack {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

// ─── Errors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transport itself reported an RPC timeout.
    #[error("rpc timed out: {0}")]
    Timeout(String),

    #[error("device rejected command: {0}")]
    Rejected(String),

    #[error("device unreachable: {0}")]
    Unreachable(String),

    #[error("telemetry stream closed")]
    StreamClosed,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    #[error("persistence io error: {0}")]
    Io(String),

    #[error("summary serialization failed: {0}")]
    Serialize(String),

    #[error("persistence backend rejected summary: {0}")]
    Rejected(String),
}

// ─── Ports ───────────────────────────────────────────────────────

/// Device RPC. Deadlines are applied by the caller.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn send_start(
        &self,
        device_id: &str,
        params: &SessionParams,
    ) -> Result<Ack, TransportError>;

    async fn send_stop(&self, device_id: &str) -> Result<Ack, TransportError>;
}

pub type TelemetryStream = mpsc::Receiver<Result<RawTelemetryEvent, TransportError>>;

/// Live telemetry for a set of devices. The stream ends when the
/// connection drops; the caller resubscribes.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn subscribe(&self, device_ids: &[String]) -> Result<TelemetryStream, TransportError>;

    async fn unsubscribe(&self);
}

/// One roster row before classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub device_id: String,
    pub display_name: String,
    #[serde(flatten)]
    pub raw: RawDeviceStatus,
}

#[async_trait]
pub trait Roster: Send + Sync {
    async fn list(&self) -> Result<Vec<RosterEntry>, TransportError>;
}

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_session_summary(&self, summary: &SessionSummary) -> Result<Ack, PersistError>;
}

// ─── Clock ───────────────────────────────────────────────────────

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = to;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
