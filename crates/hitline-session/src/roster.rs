//! Roster refresh: list devices and classify each one fresh.

use hitline_core::classify::classify_device_status;
use hitline_core::types::Device;

use crate::ports::{Clock, Roster, TransportError};

/// Fetch the roster and derive every device's status at the clock's `now`.
pub async fn refresh_roster(
    roster: &dyn Roster,
    clock: &dyn Clock,
) -> Result<Vec<Device>, TransportError> {
    let now = clock.now();
    let entries = roster.list().await?;
    let devices: Vec<Device> = entries
        .into_iter()
        .map(|entry| Device {
            status: classify_device_status(&entry.raw, now),
            device_id: entry.device_id,
            display_name: entry.display_name,
        })
        .collect();
    tracing::debug!(count = devices.len(), "roster refreshed");
    Ok(devices)
}
