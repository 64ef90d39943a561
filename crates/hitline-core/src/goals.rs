//! Per-device hit goals and soft-stop tracking.
//!
//! A device that reaches its goal is soft-stopped: it joins the stopped set
//! and stops counting, while every other device keeps running. The session
//! as a whole ends from goals only once every participating device is in the
//! stopped set, so a single goal-less participant keeps the session open
//! until a manual or duration stop.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::GoalMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoalDecision {
    /// Nothing changed.
    Continue,
    /// `device_id` just reached its goal and must be stopped individually.
    /// `all_stopped` is set when this completed the participant set.
    SoftStop {
        device_id: String,
        all_stopped: bool,
    },
}

#[derive(Debug, Clone, Default)]
pub struct GoalTerminationPolicy {
    goals: GoalMap,
    stopped: BTreeSet<String>,
}

impl GoalTerminationPolicy {
    pub fn new(goals: GoalMap) -> Self {
        Self {
            goals,
            stopped: BTreeSet::new(),
        }
    }

    /// Re-evaluate `device_id` after its counter changed. Idempotent for
    /// devices already stopped.
    pub fn evaluate(
        &mut self,
        device_id: &str,
        hit_count: u64,
        participants: &BTreeSet<String>,
    ) -> GoalDecision {
        if self.stopped.contains(device_id) {
            return GoalDecision::Continue;
        }
        let Some(&goal) = self.goals.get(device_id) else {
            return GoalDecision::Continue;
        };
        if hit_count < u64::from(goal) {
            return GoalDecision::Continue;
        }

        self.stopped.insert(device_id.to_string());
        GoalDecision::SoftStop {
            device_id: device_id.to_string(),
            all_stopped: self.all_stopped(participants),
        }
    }

    /// Every participant is soft-stopped (false for an empty set).
    pub fn all_stopped(&self, participants: &BTreeSet<String>) -> bool {
        !participants.is_empty() && participants.iter().all(|d| self.stopped.contains(d))
    }

    pub fn is_stopped(&self, device_id: &str) -> bool {
        self.stopped.contains(device_id)
    }

    pub fn goal_for(&self, device_id: &str) -> Option<u32> {
        self.goals.get(device_id).copied()
    }

    pub fn has_goals(&self) -> bool {
        !self.goals.is_empty()
    }

    /// Whether every configured goal is met by `counters`.
    pub fn all_goals_met(&self, counters: &BTreeMap<String, u64>) -> bool {
        self.goals
            .iter()
            .all(|(device, &goal)| {
                counters.get(device).copied().unwrap_or(0) >= u64::from(goal)
            })
    }

    pub fn goals(&self) -> &GoalMap {
        &self.goals
    }

    pub fn stopped(&self) -> &BTreeSet<String> {
        &self.stopped
    }
}
