//! Session summary assembly.
//!
//! Scoring:
//! - goals configured: `score = Σ min(hits, goal)`,
//!   `accuracy = score / Σ goals × 100`
//! - no goals: `score = last hit − first hit` in seconds (lower is better),
//!   `accuracy = None`
//!
//! `is_valid` is false ("Did Not Finish") when goals were set and not all met.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::goals::GoalTerminationPolicy;
use crate::types::{
    DeviceStats, EndReason, HitRecord, SessionSummary, SplitRecord, SummaryTarget,
    TransitionRecord, TransitionStats, seconds_between,
};

/// Everything the finalizer has gathered by the time the session ends.
#[derive(Debug, Clone, Copy)]
pub struct SummaryInput<'a> {
    pub session_id: &'a str,
    pub targets: &'a [SummaryTarget],
    pub counters: &'a BTreeMap<String, u64>,
    pub hits: &'a [HitRecord],
    pub splits: &'a [SplitRecord],
    pub transitions: &'a [TransitionRecord],
    pub goals: &'a GoalTerminationPolicy,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub end_reason: EndReason,
}

#[must_use]
pub fn build_summary(input: SummaryInput<'_>) -> SessionSummary {
    let total_hits: u64 = input.counters.values().sum();

    let per_device_stats = input
        .targets
        .iter()
        .map(|target| device_stats(target, &input))
        .collect();

    let (score, accuracy) = if input.goals.has_goals() {
        goal_score(&input)
    } else {
        (hit_span_secs(input.hits), None)
    };

    SessionSummary {
        session_id: input.session_id.to_string(),
        targets: input.targets.to_vec(),
        total_hits,
        per_device_stats,
        splits: input.splits.to_vec(),
        transitions: input.transitions.to_vec(),
        transition_stats: transition_stats(input.transitions),
        goals: input.goals.goals().clone(),
        stopped_devices: input.goals.stopped().iter().cloned().collect(),
        score,
        accuracy,
        started_at: input.started_at,
        ended_at: input.ended_at,
        duration_seconds: seconds_between(input.started_at, input.ended_at).max(0.0),
        is_valid: !input.goals.has_goals() || input.goals.all_goals_met(input.counters),
        end_reason: input.end_reason,
    }
}

fn device_stats(target: &SummaryTarget, input: &SummaryInput<'_>) -> DeviceStats {
    let hit_count = input.counters.get(&target.device_id).copied().unwrap_or(0);
    let times: Vec<f64> = input
        .splits
        .iter()
        .filter(|s| s.device_id == target.device_id)
        .map(|s| s.time)
        .collect();
    let goal = input.goals.goal_for(&target.device_id);

    #[expect(clippy::cast_possible_truncation)]
    let split_count = times.len() as u32;

    DeviceStats {
        device_id: target.device_id.clone(),
        device_name: target.display_name.clone(),
        hit_count,
        split_count,
        average_split: mean(&times),
        fastest_split: times.iter().copied().reduce(f64::min),
        goal,
        goal_met: goal.is_some_and(|g| hit_count >= u64::from(g)),
        stopped: input.goals.is_stopped(&target.device_id),
    }
}

fn goal_score(input: &SummaryInput<'_>) -> (f64, Option<f64>) {
    let mut expected: u64 = 0;
    let mut achieved: u64 = 0;
    for (device, &goal) in input.goals.goals() {
        let goal = u64::from(goal);
        expected += goal;
        achieved += input.counters.get(device).copied().unwrap_or(0).min(goal);
    }
    #[expect(clippy::cast_precision_loss)]
    let score = achieved as f64;
    #[expect(clippy::cast_precision_loss)]
    let accuracy = (expected > 0).then(|| score / expected as f64 * 100.0);
    (score, accuracy)
}

fn hit_span_secs(hits: &[HitRecord]) -> f64 {
    let first = hits.iter().map(|h| h.timestamp).min();
    let last = hits.iter().map(|h| h.timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => seconds_between(first, last),
        _ => 0.0,
    }
}

fn transition_stats(transitions: &[TransitionRecord]) -> Vec<TransitionStats> {
    let mut grouped: BTreeMap<(&str, &str), (u32, f64)> = BTreeMap::new();
    for t in transitions {
        let entry = grouped
            .entry((t.from_device.as_str(), t.to_device.as_str()))
            .or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += t.time;
    }
    grouped
        .into_iter()
        .map(|((from, to), (count, total))| TransitionStats {
            from_device: from.to_string(),
            to_device: to.to_string(),
            count,
            average_time: total / f64::from(count),
        })
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    #[expect(clippy::cast_precision_loss)]
    let n = values.len() as f64;
    Some(values.iter().sum::<f64>() / n)
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GoalMap;
    use chrono::TimeDelta;
    use std::collections::BTreeSet;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn targets() -> Vec<SummaryTarget> {
        ["A", "B"]
            .iter()
            .map(|id| SummaryTarget {
                device_id: (*id).to_string(),
                display_name: format!("Target {id}"),
            })
            .collect()
    }

    fn hit(device: &str, secs: i64) -> HitRecord {
        HitRecord {
            device_id: device.to_string(),
            device_name: format!("Target {device}"),
            timestamp: t0() + TimeDelta::seconds(secs),
        }
    }

    fn split(device: &str, split_number: u32, time: f64) -> SplitRecord {
        SplitRecord {
            device_id: device.to_string(),
            split_number,
            time,
        }
    }

    fn transition(from: &str, to: &str, transition_number: u32, time: f64) -> TransitionRecord {
        TransitionRecord {
            from_device: from.to_string(),
            to_device: to.to_string(),
            transition_number,
            time,
        }
    }

    fn counters(pairs: &[(&str, u64)]) -> BTreeMap<String, u64> {
        pairs.iter().map(|(d, n)| ((*d).to_string(), *n)).collect()
    }

    fn input<'a>(
        targets: &'a [SummaryTarget],
        counters: &'a BTreeMap<String, u64>,
        hits: &'a [HitRecord],
        splits: &'a [SplitRecord],
        transitions: &'a [TransitionRecord],
        goals: &'a GoalTerminationPolicy,
    ) -> SummaryInput<'a> {
        SummaryInput {
            session_id: "sess-1",
            targets,
            counters,
            hits,
            splits,
            transitions,
            goals,
            started_at: t0(),
            ended_at: t0() + TimeDelta::seconds(30),
            end_reason: EndReason::Manual,
        }
    }

    #[test]
    fn goals_met_session_is_valid_with_full_accuracy() {
        let goal_map: GoalMap = [("A".to_string(), 2), ("B".to_string(), 1)].into();
        let mut goals = GoalTerminationPolicy::new(goal_map);
        let p: BTreeSet<String> = ["A".to_string(), "B".to_string()].into();
        goals.evaluate("A", 2, &p);
        goals.evaluate("B", 1, &p);

        let t = targets();
        let c = counters(&[("A", 2), ("B", 1)]);
        let hits = [hit("A", 1), hit("B", 2), hit("A", 4)];
        let summary = build_summary(input(&t, &c, &hits, &[], &[], &goals));

        assert!(summary.is_valid);
        assert_eq!(summary.total_hits, 3);
        assert!((summary.score - 3.0).abs() < f64::EPSILON);
        assert_eq!(summary.accuracy, Some(100.0));
        assert_eq!(
            summary.stopped_devices,
            vec!["A".to_string(), "B".to_string()]
        );
        assert!((summary.duration_seconds - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unmet_goal_is_dnf() {
        let goal_map: GoalMap = [("A".to_string(), 2), ("B".to_string(), 1)].into();
        let goals = GoalTerminationPolicy::new(goal_map);
        let t = targets();
        let c = counters(&[("A", 1)]);
        let hits = [hit("A", 1)];
        let summary = build_summary(input(&t, &c, &hits, &[], &[], &goals));

        assert!(!summary.is_valid);
        assert_eq!(summary.total_hits, 1);
        let accuracy = summary.accuracy.expect("accuracy with goals");
        assert!((accuracy - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn no_goals_scores_hit_span() {
        let goals = GoalTerminationPolicy::new(GoalMap::new());
        let t = targets();
        let c = counters(&[("A", 2), ("B", 1)]);
        let hits = [hit("A", 3), hit("B", 5), hit("A", 11)];
        let summary = build_summary(input(&t, &c, &hits, &[], &[], &goals));

        assert!(summary.is_valid);
        assert!((summary.score - 8.0).abs() < f64::EPSILON);
        assert!(summary.accuracy.is_none());
    }

    #[test]
    fn per_device_split_stats() {
        let goals = GoalTerminationPolicy::new(GoalMap::new());
        let t = targets();
        let c = counters(&[("A", 3)]);
        let splits = [
            split("A", 1, 2.0),
            split("A", 2, 1.0),
        ];
        let summary = build_summary(input(&t, &c, &[], &splits, &[], &goals));

        let a = &summary.per_device_stats[0];
        assert_eq!(a.split_count, 2);
        assert_eq!(a.average_split, Some(1.5));
        assert_eq!(a.fastest_split, Some(1.0));
        let b = &summary.per_device_stats[1];
        assert_eq!(b.hit_count, 0);
        assert!(b.average_split.is_none());
        assert!(b.fastest_split.is_none());
    }

    #[test]
    fn transitions_grouped_by_direction() {
        let goals = GoalTerminationPolicy::new(GoalMap::new());
        let t = targets();
        let c = BTreeMap::new();
        let transitions = [
            transition("A", "B", 1, 1.0),
            transition("B", "A", 2, 3.0),
            transition("A", "B", 3, 2.0),
        ];
        let summary = build_summary(input(&t, &c, &[], &[], &transitions, &goals));

        assert_eq!(summary.transition_stats.len(), 2);
        let ab = &summary.transition_stats[0];
        assert_eq!(ab.from_device, "A");
        assert_eq!(ab.to_device, "B");
        assert_eq!(ab.count, 2);
        assert!((ab.average_time - 1.5).abs() < f64::EPSILON);
    }
}
