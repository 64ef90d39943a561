//! Counter-based hit deduplication.
//!
//! Hit acceptance follows each device's own cumulative counter, not arrival
//! order: a hit is new only if its reported count exceeds the highest count
//! accepted in the device's current counter epoch. Re-delivered and late
//! events are therefore no-ops.
//!
//! A lower count only starts a new epoch when the drop is unambiguous: the
//! device reports 0, or it announced a restart (`Started`) since its last
//! accepted hit. The session counter keeps every hit already accepted.
//!
//! Counters and the hit list only grow during a session and are cleared by
//! [`TelemetryPipeline::reset`] when the next session starts.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use hitline_core::types::{CanonicalTelemetryEvent, Device, HitRecord, HitlineError, TelemetryKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// New hit accepted; `added` is how far the session counter advanced.
    Hit { record: HitRecord, added: u64 },
    /// Count at or below the epoch's high-water mark: re-delivery.
    Duplicate { reported: u64, baseline: u64 },
    /// Device counter restarted at zero; a new epoch begins.
    Rebased { from: u64, to: u64 },
    /// Device was frozen (soft-stopped); hit not counted.
    Frozen,
    /// Non-hit event, passed through for lifecycle handling.
    Status(TelemetryKind),
}

#[derive(Debug, Clone, Copy, Default)]
struct DeviceCounter {
    /// Highest cumulative count accepted in the current epoch.
    baseline: u64,
    /// Hits accepted this session. Never decreases.
    accepted: u64,
    /// Device announced a restart since its last accepted hit.
    restarted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct TelemetryPipeline {
    device_names: HashMap<String, String>,
    counters: BTreeMap<String, DeviceCounter>,
    frozen: BTreeSet<String>,
    hits: Vec<HitRecord>,
}

impl TelemetryPipeline {
    pub fn new(devices: &[Device]) -> Self {
        let mut pipeline = Self::default();
        pipeline.reset(devices);
        pipeline
    }

    /// Start a new session over `devices`, discarding all previous state.
    pub fn reset(&mut self, devices: &[Device]) {
        self.device_names = devices
            .iter()
            .map(|d| (d.device_id.clone(), d.display_name.clone()))
            .collect();
        self.counters = devices
            .iter()
            .map(|d| (d.device_id.clone(), DeviceCounter::default()))
            .collect();
        self.frozen.clear();
        self.hits.clear();
    }

    /// Ingest one canonical event for a subscribed device.
    pub fn ingest(
        &mut self,
        event: &CanonicalTelemetryEvent,
    ) -> Result<IngestOutcome, HitlineError> {
        let Some(counter) = self.counters.get_mut(&event.device_id) else {
            return Err(HitlineError::UnknownDevice(event.device_id.clone()));
        };

        if event.kind != TelemetryKind::Hit {
            if event.kind == TelemetryKind::Started {
                counter.restarted = true;
            }
            return Ok(IngestOutcome::Status(event.kind));
        }
        if self.frozen.contains(&event.device_id) {
            return Ok(IngestOutcome::Frozen);
        }

        let reported = event.sequence_or_count;
        if reported < counter.baseline {
            if reported > 0 && !counter.restarted {
                tracing::debug!(
                    device_id = %event.device_id,
                    reported,
                    baseline = counter.baseline,
                    "late hit re-delivery"
                );
                return Ok(IngestOutcome::Duplicate {
                    reported,
                    baseline: counter.baseline,
                });
            }
            let from = counter.baseline;
            counter.baseline = 0;
            counter.restarted = false;
            tracing::warn!(
                device_id = %event.device_id,
                from,
                to = reported,
                "device hit counter restarted, rebasing"
            );
            if reported == 0 {
                return Ok(IngestOutcome::Rebased { from, to: 0 });
            }
        }
        if reported == counter.baseline {
            tracing::debug!(device_id = %event.device_id, reported, "duplicate hit delivery");
            return Ok(IngestOutcome::Duplicate {
                reported,
                baseline: counter.baseline,
            });
        }

        let added = reported - counter.baseline;
        counter.baseline = reported;
        counter.restarted = false;
        counter.accepted = counter.accepted.saturating_add(added);

        let record = HitRecord {
            device_id: event.device_id.clone(),
            device_name: self
                .device_names
                .get(&event.device_id)
                .cloned()
                .unwrap_or_else(|| event.device_id.clone()),
            timestamp: event.device_timestamp,
        };
        self.hits.push(record.clone());
        Ok(IngestOutcome::Hit { record, added })
    }

    /// Stop counting hits for a device. Permanent until the next reset.
    pub fn freeze(&mut self, device_id: &str) {
        self.frozen.insert(device_id.to_string());
    }

    pub fn hit_count(&self, device_id: &str) -> u64 {
        self.counters.get(device_id).map_or(0, |c| c.accepted)
    }

    /// Snapshot of accepted hit counts per device.
    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters
            .iter()
            .map(|(id, c)| (id.clone(), c.accepted))
            .collect()
    }

    /// Accepted hits in arrival order.
    pub fn hits(&self) -> &[HitRecord] {
        &self.hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};
    use hitline_core::types::DeviceStatus;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn devices() -> Vec<Device> {
        ["A", "B"]
            .iter()
            .map(|id| Device {
                device_id: (*id).to_string(),
                display_name: format!("Target {id}"),
                status: DeviceStatus::Online,
            })
            .collect()
    }

    fn event(device: &str, kind: TelemetryKind, count: u64, secs: i64) -> CanonicalTelemetryEvent {
        let at = t0() + TimeDelta::seconds(secs);
        CanonicalTelemetryEvent {
            device_id: device.to_string(),
            kind,
            device_timestamp: at,
            received_at: at,
            sequence_or_count: count,
        }
    }

    fn hit(device: &str, count: u64, secs: i64) -> CanonicalTelemetryEvent {
        event(device, TelemetryKind::Hit, count, secs)
    }

    #[test]
    fn accepts_increasing_counts() {
        let mut p = TelemetryPipeline::new(&devices());
        let outcome = p.ingest(&hit("A", 1, 0)).expect("known device");
        match outcome {
            IngestOutcome::Hit { record, added } => {
                assert_eq!(record.device_name, "Target A");
                assert_eq!(added, 1);
            }
            other => panic!("expected hit, got {other:?}"),
        }
        p.ingest(&hit("A", 2, 1)).expect("known device");
        assert_eq!(p.hit_count("A"), 2);
        assert_eq!(p.hits().len(), 2);
    }

    #[test]
    fn replay_is_a_noop() {
        let mut p = TelemetryPipeline::new(&devices());
        p.ingest(&hit("A", 1, 0)).expect("known device");
        let again = p.ingest(&hit("A", 1, 0)).expect("known device");
        assert_eq!(
            again,
            IngestOutcome::Duplicate {
                reported: 1,
                baseline: 1,
            }
        );
        assert_eq!(p.hits().len(), 1);
        assert_eq!(p.hit_count("A"), 1);
    }

    #[test]
    fn counter_gap_advances_by_difference() {
        let mut p = TelemetryPipeline::new(&devices());
        p.ingest(&hit("A", 1, 0)).expect("known device");
        let outcome = p.ingest(&hit("A", 4, 1)).expect("known device");
        assert!(matches!(outcome, IngestOutcome::Hit { added: 3, .. }));
        assert_eq!(p.hit_count("A"), 4);
        assert_eq!(p.hits().len(), 2);
    }

    #[test]
    fn late_redelivery_does_not_rebase() {
        let mut p = TelemetryPipeline::new(&devices());
        for (count, secs) in [(1, 0), (2, 1), (3, 2)] {
            p.ingest(&hit("A", count, secs)).expect("known device");
        }
        assert_eq!(
            p.ingest(&hit("A", 2, 1)).expect("known device"),
            IngestOutcome::Duplicate {
                reported: 2,
                baseline: 3,
            }
        );
        assert_eq!(
            p.ingest(&hit("A", 3, 2)).expect("known device"),
            IngestOutcome::Duplicate {
                reported: 3,
                baseline: 3,
            }
        );
        assert_eq!(p.hits().len(), 3);
        assert_eq!(p.hit_count("A"), 3);
    }

    #[test]
    fn zero_count_rebases_without_negative_hits() {
        let mut p = TelemetryPipeline::new(&devices());
        p.ingest(&hit("A", 5, 0)).expect("known device");
        let outcome = p.ingest(&hit("A", 0, 1)).expect("known device");
        assert_eq!(outcome, IngestOutcome::Rebased { from: 5, to: 0 });
        assert_eq!(p.hit_count("A"), 5);

        p.ingest(&hit("A", 1, 2)).expect("known device");
        assert_eq!(p.hit_count("A"), 6);
    }

    #[test]
    fn restart_announcement_opens_new_epoch() {
        let mut p = TelemetryPipeline::new(&devices());
        p.ingest(&hit("A", 5, 0)).expect("known device");
        p.ingest(&event("A", TelemetryKind::Started, 0, 1))
            .expect("known device");

        let outcome = p.ingest(&hit("A", 2, 2)).expect("known device");
        assert!(matches!(outcome, IngestOutcome::Hit { added: 2, .. }));
        assert_eq!(p.hit_count("A"), 7);

        // The new epoch is closed again: a stale lower count is a duplicate.
        let stale = p.ingest(&hit("A", 1, 1)).expect("known device");
        assert!(matches!(stale, IngestOutcome::Duplicate { .. }));
        assert_eq!(p.hit_count("A"), 7);
    }

    #[test]
    fn frozen_device_stops_counting_others_unaffected() {
        let mut p = TelemetryPipeline::new(&devices());
        p.ingest(&hit("A", 1, 0)).expect("known device");
        p.freeze("A");
        let outcome = p.ingest(&hit("A", 2, 1)).expect("known device");
        assert_eq!(outcome, IngestOutcome::Frozen);
        p.ingest(&hit("B", 1, 2)).expect("known device");
        assert_eq!(p.hit_count("A"), 1);
        assert_eq!(p.hit_count("B"), 1);
    }

    #[test]
    fn non_hit_events_pass_through() {
        let mut p = TelemetryPipeline::new(&devices());
        let outcome = p
            .ingest(&event("B", TelemetryKind::Started, 0, 0))
            .expect("known device");
        assert_eq!(outcome, IngestOutcome::Status(TelemetryKind::Started));
        assert!(p.hits().is_empty());
    }

    #[test]
    fn unknown_device_is_an_error() {
        let mut p = TelemetryPipeline::new(&devices());
        let err = p.ingest(&hit("Z", 1, 0)).expect_err("unknown device");
        assert_eq!(err, HitlineError::UnknownDevice("Z".into()));
    }

    #[test]
    fn reset_clears_state() {
        let mut p = TelemetryPipeline::new(&devices());
        p.ingest(&hit("A", 3, 0)).expect("known device");
        p.freeze("A");
        p.reset(&devices());
        assert_eq!(p.hit_count("A"), 0);
        let outcome = p.ingest(&hit("A", 1, 0)).expect("known device");
        assert!(matches!(outcome, IngestOutcome::Hit { .. }));
    }

    proptest! {
        /// Without device resets the counter equals the max count seen and
        /// never decreases, whatever the duplication or reordering.
        #[test]
        fn counter_is_monotonic_and_tracks_max(
            counts in proptest::collection::vec(1u64..50, 1..60),
        ) {
            let mut p = TelemetryPipeline::new(&devices());
            let mut previous = 0;
            for (i, count) in counts.iter().enumerate() {
                #[expect(clippy::cast_possible_wrap)]
                let secs = i as i64;
                p.ingest(&hit("A", *count, secs)).expect("known device");
                // Re-deliver every event a second time.
                p.ingest(&hit("A", *count, secs)).expect("known device");
                let now = p.hit_count("A");
                prop_assert!(now >= previous);
                previous = now;
            }
            prop_assert_eq!(p.hit_count("A"), *counts.iter().max().unwrap_or(&0));
        }

        /// Arbitrary order (including resets) never lowers the counter.
        #[test]
        fn counter_never_decreases(counts in proptest::collection::vec(0u64..20, 1..60)) {
            let mut p = TelemetryPipeline::new(&devices());
            let mut previous = 0;
            for count in counts {
                p.ingest(&hit("A", count, 0)).expect("known device");
                let now = p.hit_count("A");
                prop_assert!(now >= previous);
                previous = now;
            }
        }

        /// Replaying already-ingested events, in any order, adds no hit
        /// record and leaves the counter alone.
        #[test]
        fn replay_never_appends(
            counts in proptest::collection::vec(1u64..20, 1..30),
            replay in proptest::collection::vec(any::<proptest::sample::Index>(), 1..30),
        ) {
            let mut p = TelemetryPipeline::new(&devices());
            for count in &counts {
                p.ingest(&hit("B", *count, 0)).expect("known device");
            }
            let before = p.hits().len();
            let counter = p.hit_count("B");
            for index in replay {
                let count = counts[index.index(counts.len())];
                p.ingest(&hit("B", count, 0)).expect("known device");
            }
            prop_assert_eq!(p.hits().len(), before);
            prop_assert_eq!(p.hit_count("B"), counter);
        }
    }
}
