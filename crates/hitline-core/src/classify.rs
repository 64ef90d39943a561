//! Device status classification.
//!
//! Derives the three-state [`DeviceStatus`] from the raw roster fields a
//! vendor reports. Pure and side-effect free: the caller supplies `now` and
//! must call [`classify_device_status`] fresh on every roster poll.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::DeviceStatus;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Window within which a device counts as recently active (hours).
pub const RECENT_ACTIVITY_WINDOW_HOURS: i64 = 12;

/// Game-status values that mean the device is currently running a game.
const ACTIVE_GAME_STATUSES: [&str; 3] = ["start", "busy", "active"];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw status fields for a single device, as reported by the roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDeviceStatus {
    /// Vendor connection string. Informational only: a connected device can
    /// still be idle, so this never yields `Online` on its own.
    pub raw_connection_status: String,
    /// Vendor game status, e.g. `"start"`, `"idle"`.
    pub game_status: Option<String>,
    /// Tri-state active flag (`None` = unknown).
    pub is_active: Option<bool>,
    pub last_activity: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify a device. First match wins:
///
/// 1. active game status → `Online`
/// 2. otherwise `Standby` when active within the last 12 hours, else `Offline`,
///    regardless of the active flag.
#[must_use]
pub fn classify_device_status(raw: &RawDeviceStatus, now: DateTime<Utc>) -> DeviceStatus {
    if raw.game_status.as_deref().is_some_and(is_active_game) {
        return DeviceStatus::Online;
    }

    let recently_active = raw.last_activity.is_some_and(|last| {
        now.signed_duration_since(last) <= TimeDelta::hours(RECENT_ACTIVITY_WINDOW_HOURS)
    });

    // Every value of `is_active` (true, false, unknown) resolves through
    // recency: connected-but-idle is never Online.
    if recently_active {
        DeviceStatus::Standby
    } else {
        DeviceStatus::Offline
    }
}

fn is_active_game(status: &str) -> bool {
    let status = status.trim();
    ACTIVE_GAME_STATUSES
        .iter()
        .any(|active| status.eq_ignore_ascii_case(active))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
