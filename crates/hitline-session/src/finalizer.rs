//! Session finalization: drain what is still buffered and assemble the
//! summary from the run's counters, hits, splits and goals.

use chrono::{DateTime, Utc};
use hitline_core::summary::{SummaryInput, build_summary};
use hitline_core::types::{EndReason, SessionSummary, SummaryTarget};

use crate::engine::SessionRun;

/// Build the summary for a run that has entered `Finalizing`.
///
/// Hits still held for reordering are released first so the split and
/// transition lists are complete. `started_at` is the confirmed activation
/// time, falling back to when start was triggered; `ended_at` is when the
/// session began stopping.
pub(crate) fn finalize(run: &mut SessionRun, now: DateTime<Utc>) -> SessionSummary {
    let held = run.reorder.flush();
    run.release_hits(held);

    let targets: Vec<SummaryTarget> = run
        .devices
        .iter()
        .map(|d| SummaryTarget {
            device_id: d.device_id.clone(),
            display_name: d.display_name.clone(),
        })
        .collect();
    let counters = run.pipeline.counters();

    let started_at = run
        .activation
        .record()
        .map_or(now, |r| r.confirmed_at.unwrap_or(r.triggered_at));
    let (ended_at, end_reason) = run.ended.unwrap_or((now, EndReason::Manual));

    build_summary(SummaryInput {
        session_id: &run.session_id,
        targets: &targets,
        counters: &counters,
        hits: run.pipeline.hits(),
        splits: run.splits.splits(),
        transitions: run.splits.transitions(),
        goals: &run.goals,
        started_at,
        ended_at,
        end_reason,
    })
}
