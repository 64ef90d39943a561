//! Incremental split and transition computation.
//!
//! - **Split**: gap between two consecutive hits on the same device. A
//!   device's baseline is always its own previous hit, whatever other
//!   devices did in between.
//! - **Transition**: gap between the globally most recent hit and the next
//!   hit when that next hit lands on a different device.
//!
//! Each accepted hit is processed in O(1). Input must arrive ordered by
//! device timestamp (ties in arrival order); a hit older than the last
//! processed one is reported as [`SplitUpdate::Late`] and changes nothing,
//! which keeps both output lists append-only and time-ordered.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::types::{HitRecord, SplitRecord, TransitionRecord, seconds_between};

/// What a single hit produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SplitUpdate {
    /// Hit processed. Either record may be absent (first hit on a device,
    /// or same device as the previous hit).
    Applied {
        split: Option<SplitRecord>,
        transition: Option<TransitionRecord>,
    },
    /// Hit predates the last processed hit; ignored.
    Late { last_processed: DateTime<Utc> },
}

#[derive(Debug, Clone)]
struct DeviceCursor {
    last_timestamp: DateTime<Utc>,
    splits_emitted: u32,
}

#[derive(Debug, Clone, Default)]
pub struct SplitTransitionComputer {
    per_device: HashMap<String, DeviceCursor>,
    last_hit: Option<(String, DateTime<Utc>)>,
    transitions_emitted: u32,
    splits: Vec<SplitRecord>,
    transitions: Vec<TransitionRecord>,
}

impl SplitTransitionComputer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next hit in timestamp order.
    pub fn push(&mut self, hit: &HitRecord) -> SplitUpdate {
        if let Some((_, last_ts)) = &self.last_hit
            && hit.timestamp < *last_ts
        {
            return SplitUpdate::Late {
                last_processed: *last_ts,
            };
        }

        let split = match self.per_device.get_mut(&hit.device_id) {
            Some(cursor) => {
                cursor.splits_emitted += 1;
                let record = SplitRecord {
                    device_id: hit.device_id.clone(),
                    split_number: cursor.splits_emitted,
                    time: seconds_between(cursor.last_timestamp, hit.timestamp),
                };
                cursor.last_timestamp = hit.timestamp;
                Some(record)
            }
            None => {
                self.per_device.insert(
                    hit.device_id.clone(),
                    DeviceCursor {
                        last_timestamp: hit.timestamp,
                        splits_emitted: 0,
                    },
                );
                None
            }
        };

        let transition = match &self.last_hit {
            Some((last_device, last_ts)) if *last_device != hit.device_id => {
                self.transitions_emitted += 1;
                Some(TransitionRecord {
                    from_device: last_device.clone(),
                    to_device: hit.device_id.clone(),
                    transition_number: self.transitions_emitted,
                    time: seconds_between(*last_ts, hit.timestamp),
                })
            }
            _ => None,
        };
        self.last_hit = Some((hit.device_id.clone(), hit.timestamp));

        if let Some(record) = &split {
            self.splits.push(record.clone());
        }
        if let Some(record) = &transition {
            self.transitions.push(record.clone());
        }

        SplitUpdate::Applied { split, transition }
    }

    pub fn splits(&self) -> &[SplitRecord] {
        &self.splits
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// ─── Tests ────────────────────────────────────────────────────────
