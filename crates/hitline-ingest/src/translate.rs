//! Event translation from raw vendor telemetry to [`CanonicalTelemetryEvent`].

use chrono::{DateTime, Utc};
use hitline_core::types::{CanonicalTelemetryEvent, TelemetryKind};
use serde::{Deserialize, Serialize};

/// Keys under `data` that may carry the device's cumulative hit count.
const COUNT_KEYS: [&str; 4] = ["hits", "hit_count", "count", "seq"];

/// Raw telemetry event as delivered by a device transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTelemetryEvent {
    pub device_id: String,
    /// Vendor event name: "hit", "game_start", "status", ...
    #[serde(default, alias = "event", alias = "type")]
    pub kind: Option<String>,
    /// Epoch milliseconds (number or numeric string) or RFC 3339.
    #[serde(default, alias = "ts")]
    pub timestamp: Option<serde_json::Value>,
    /// Vendor-specific payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Translate a raw event. Returns `None` when the kind is missing or not
/// recognized; such events are dropped, never surfaced as errors.
pub fn translate(
    raw: &RawTelemetryEvent,
    received_at: DateTime<Utc>,
) -> Option<CanonicalTelemetryEvent> {
    let Some(kind) = raw.kind.as_deref().and_then(normalize_kind) else {
        tracing::debug!(
            device_id = %raw.device_id,
            kind = ?raw.kind,
            "dropping telemetry event with unrecognized kind"
        );
        return None;
    };

    let device_timestamp = match raw.timestamp.as_ref().and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            tracing::debug!(
                device_id = %raw.device_id,
                "telemetry event without usable timestamp, using receipt time"
            );
            received_at
        }
    };

    Some(CanonicalTelemetryEvent {
        device_id: raw.device_id.clone(),
        kind,
        device_timestamp,
        received_at,
        sequence_or_count: cumulative_count(&raw.data),
    })
}

/// Map vendor event names to [`TelemetryKind`]. Canonical names parse
/// directly; the rest are vendor aliases.
fn normalize_kind(kind: &str) -> Option<TelemetryKind> {
    if let Ok(canonical) = kind.parse::<TelemetryKind>() {
        return Some(canonical);
    }
    match kind.trim().to_ascii_lowercase().as_str() {
        "shot" | "impact" => Some(TelemetryKind::Hit),
        "status" | "telemetry" => Some(TelemetryKind::Info),
        "start" | "game_start" => Some(TelemetryKind::Started),
        "stop" | "game_stop" => Some(TelemetryKind::Stopped),
        "game_timeout" => Some(TelemetryKind::Timeout),
        _ => None,
    }
}

fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        serde_json::Value::String(s) => s
            .parse::<i64>()
            .ok()
            .and_then(DateTime::from_timestamp_millis)
            .or_else(|| {
                DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc))
            }),
        _ => None,
    }
}

/// First count-like field under `data`, or 0 when none is present.
fn cumulative_count(data: &serde_json::Value) -> u64 {
    COUNT_KEYS
        .iter()
        .find_map(|key| match data.get(key)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse::<u64>().ok(),
            _ => None,
        })
        .unwrap_or(0)
}
