//! Device-time reordering of accepted hits.
//!
//! Telemetry from independent devices arrives interleaved and slightly out of
//! order. Accepted hits are held until the watermark (latest device timestamp
//! seen minus the hold window) passes them, then released sorted by
//! `(device_timestamp, arrival)`. Equal timestamps keep arrival order.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use hitline_core::types::HitRecord;

pub const DEFAULT_HOLD_MS: u64 = 250;

#[derive(Debug, Clone)]
pub struct ReorderBuffer {
    hold: TimeDelta,
    pending: BTreeMap<(DateTime<Utc>, u64), HitRecord>,
    next_arrival: u64,
    high_water: Option<DateTime<Utc>>,
}

impl ReorderBuffer {
    pub fn new(hold_ms: u64) -> Self {
        Self {
            hold: TimeDelta::milliseconds(i64::try_from(hold_ms).unwrap_or(i64::MAX)),
            pending: BTreeMap::new(),
            next_arrival: 0,
            high_water: None,
        }
    }

    pub fn push(&mut self, hit: HitRecord) {
        let ts = hit.timestamp;
        self.high_water = Some(self.high_water.map_or(ts, |hw| hw.max(ts)));
        self.pending.insert((ts, self.next_arrival), hit);
        self.next_arrival += 1;
    }

    /// Release every hit at or before the current watermark, in order.
    pub fn drain_ready(&mut self) -> Vec<HitRecord> {
        let Some(watermark) = self.watermark() else {
            return Vec::new();
        };
        let held = self.pending.split_off(&(watermark, u64::MAX));
        std::mem::replace(&mut self.pending, held)
            .into_values()
            .collect()
    }

    /// Release everything still held, in order.
    pub fn flush(&mut self) -> Vec<HitRecord> {
        std::mem::take(&mut self.pending).into_values().collect()
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.high_water.map(|hw| hw - self.hold)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_arrival = 0;
        self.high_water = None;
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s)
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn hit(device: &str, at: &str) -> HitRecord {
        HitRecord {
            device_id: device.to_string(),
            device_name: device.to_string(),
            timestamp: ts(at),
        }
    }

    fn devices(hits: &[HitRecord]) -> Vec<&str> {
        hits.iter().map(|h| h.device_id.as_str()).collect()
    }

    #[test]
    fn holds_until_watermark_passes() {
        let mut buf = ReorderBuffer::new(250);
        buf.push(hit("A", "2026-03-01T12:00:00.000Z"));
        assert!(buf.drain_ready().is_empty());

        buf.push(hit("B", "2026-03-01T12:00:00.200Z"));
        assert!(buf.drain_ready().is_empty());

        buf.push(hit("A", "2026-03-01T12:00:00.300Z"));
        let ready = buf.drain_ready();
        assert_eq!(devices(&ready), vec!["A"]);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn late_arrival_within_hold_is_reordered() {
        let mut buf = ReorderBuffer::new(250);
        buf.push(hit("B", "2026-03-01T12:00:01.100Z"));
        buf.push(hit("A", "2026-03-01T12:00:01.000Z"));
        buf.push(hit("C", "2026-03-01T12:00:02.000Z"));
        let ready = buf.drain_ready();
        assert_eq!(devices(&ready), vec!["A", "B"]);
        assert_eq!(devices(&buf.flush()), vec!["C"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn equal_timestamps_keep_arrival_order() {
        let mut buf = ReorderBuffer::new(0);
        buf.push(hit("B", "2026-03-01T12:00:01Z"));
        buf.push(hit("A", "2026-03-01T12:00:01Z"));
        assert_eq!(devices(&buf.drain_ready()), vec!["B", "A"]);
    }

    #[test]
    fn reset_forgets_watermark() {
        let mut buf = ReorderBuffer::default();
        buf.push(hit("A", "2026-03-01T12:00:05Z"));
        buf.reset();
        assert!(buf.watermark().is_none());
        assert!(buf.flush().is_empty());
    }
}
