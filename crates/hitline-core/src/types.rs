use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Per-device hit goals: `device_id -> required hit count`.
///
/// Absence of a device means "no goal". A `BTreeMap` keeps iteration
/// deterministic for summaries and tests.
pub type GoalMap = BTreeMap<String, u32>;

// ─── Device ───────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Standby,
    #[default]
    Offline,
}

impl DeviceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Standby => "standby",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub display_name: String,
    pub status: DeviceStatus,
}

// ─── Commands ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCommand {
    Start,
    Stop,
}

impl DeviceCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Success,
    Failed,
    TimedOut,
}

impl CommandOutcome {
    /// `Failed` and `TimedOut` are both eligible for manual retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceCommandResult {
    pub device_id: String,
    pub outcome: CommandOutcome,
    pub detail: String,
}

/// Results of one dispatch (or retry) keyed by device id.
pub type CommandResults = BTreeMap<String, DeviceCommandResult>;

/// Parameters sent to each device with the start command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionParams {
    pub session_id: String,
    pub duration_secs: Option<u64>,
    /// Goal for the receiving device, if any. Filled per device by the orchestrator.
    pub goal: Option<u32>,
}

// ─── Telemetry ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Hit,
    Info,
    Started,
    Stopped,
    Timeout,
}

impl TelemetryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Info => "info",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TelemetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TelemetryKind {
    type Err = HitlineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hit" => Ok(Self::Hit),
            "info" => Ok(Self::Info),
            "started" => Ok(Self::Started),
            "stopped" => Ok(Self::Stopped),
            "timeout" => Ok(Self::Timeout),
            _ => Err(HitlineError::UnknownTelemetryKind(s.to_string())),
        }
    }
}

/// Normalized telemetry event. `device_timestamp` drives every temporal
/// computation; `received_at` is local wall-clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTelemetryEvent {
    pub device_id: String,
    pub kind: TelemetryKind,
    pub device_timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    /// Cumulative hit count reported by the device (0 when absent).
    pub sequence_or_count: u64,
}

// ─── Hits, Splits, Transitions ────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitRecord {
    pub device_id: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub device_id: String,
    pub split_number: u32,
    /// Seconds since the previous hit on the same device.
    pub time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from_device: String,
    pub to_device: String,
    pub transition_number: u32,
    /// Seconds between the last hit on `from_device` and this hit.
    pub time: f64,
}

/// Signed gap in seconds, at millisecond resolution.
pub(crate) fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    #[expect(clippy::cast_precision_loss)]
    let millis = later.signed_duration_since(earlier).num_milliseconds() as f64;
    millis / 1000.0
}

// ─── Summary ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Manual,
    Duration,
    GoalsMet,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Duration => "duration",
            Self::GoalsMet => "goals_met",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryTarget {
    pub device_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub device_id: String,
    pub device_name: String,
    pub hit_count: u64,
    pub split_count: u32,
    pub average_split: Option<f64>,
    pub fastest_split: Option<f64>,
    pub goal: Option<u32>,
    pub goal_met: bool,
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionStats {
    pub from_device: String,
    pub to_device: String,
    pub count: u32,
    pub average_time: f64,
}

/// Immutable record of one finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub targets: Vec<SummaryTarget>,
    pub total_hits: u64,
    pub per_device_stats: Vec<DeviceStats>,
    pub splits: Vec<SplitRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub transition_stats: Vec<TransitionStats>,
    pub goals: GoalMap,
    pub stopped_devices: Vec<String>,
    pub score: f64,
    /// Percentage of the goal sum reached; `None` when no goals were set.
    pub accuracy: Option<f64>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_seconds: f64,
    /// `false` means "Did Not Finish": goals were set and not all were met.
    pub is_valid: bool,
    pub end_reason: EndReason,
}

// ─── Error ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HitlineError {
    #[error("unknown telemetry kind: {0}")]
    UnknownTelemetryKind(String),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("empty device selection")]
    EmptySelection,
}

// ─── Tests ────────────────────────────────────────────────────────
