//! Sans-IO session engine.
//!
//! [`SessionEngine`] owns every piece of mutable session state: lifecycle,
//! activation, ingestion counters, splits, goals and the recent summary.
//! Operator commands and runtime events go in together with the current time;
//! [`EngineAction`]s come out for the runner to perform (dispatch a batch,
//! open or close telemetry, arm a timer, persist a summary). The engine never
//! awaits, spawns or reads a clock, which keeps every lifecycle rule testable
//! with plain function calls.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use hitline_core::activation::{ActivationRecord, ActivationTracker};
use hitline_core::goals::{GoalDecision, GoalTerminationPolicy};
use hitline_core::lifecycle::{Lifecycle, LifecycleError, LifecycleStep, SessionLifecycleState};
use hitline_core::splits::{SplitTransitionComputer, SplitUpdate};
use hitline_core::types::{
    CanonicalTelemetryEvent, CommandOutcome, CommandResults, Device, DeviceCommand, EndReason,
    GoalMap, HitRecord, HitlineError, SessionParams, SessionSummary, SplitRecord, TelemetryKind,
    TransitionRecord,
};
use hitline_ingest::pipeline::{IngestOutcome, TelemetryPipeline};
use hitline_ingest::reorder::ReorderBuffer;

use crate::config::SessionConfig;
use crate::finalizer;

use SessionLifecycleState::{Finalizing, Idle, Launching, Running, Selecting, Stopping};

// ─── Public types ────────────────────────────────────────────────

/// What the operator picked before launching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSetup {
    pub devices: Vec<Device>,
    #[serde(default)]
    pub goals: GoalMap,
    /// Overrides the configured default duration.
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

/// Why a command batch was sent. Determines how its results are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Launch,
    Retry,
    SoftStop,
    FinalStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionTimer {
    LaunchGrace,
    Duration,
}

/// Operator-facing events. Delivered on a broadcast channel by the runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionNotice {
    LaunchFailed { session_id: String },
    DeviceSoftStopped {
        session_id: String,
        device_id: String,
    },
    TelemetryDegraded { consecutive_failures: u32 },
    TelemetryRecovered,
    SummaryReady { summary: Box<SessionSummary> },
    PersistFailed { session_id: String, error: String },
}

/// Side effects requested by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineAction {
    Dispatch {
        batch: BatchKind,
        command: DeviceCommand,
        device_ids: Vec<String>,
        params: SessionParams,
        goals: GoalMap,
    },
    RetryFailed {
        last: CommandResults,
        command: DeviceCommand,
        params: SessionParams,
        goals: GoalMap,
    },
    Subscribe { device_ids: Vec<String> },
    Unsubscribe,
    ArmTimer {
        timer: SessionTimer,
        after: Duration,
    },
    CancelTimer(SessionTimer),
    Persist(Box<SessionSummary>),
    Notify(SessionNotice),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Invalid(#[from] HitlineError),

    #[error("selection is locked while {0}")]
    Locked(SessionLifecycleState),

    #[error("no device selection")]
    NoSelection,

    #[error("goal for {0} must be at least 1")]
    InvalidGoal(String),

    #[error("session duration must be at least one second")]
    InvalidDuration,

    #[error("retry is only available while launching or running, not {0}")]
    RetryNotAllowed(SessionLifecycleState),

    #[error("a start batch is still in flight")]
    BatchInFlight,

    #[error("no failed or timed-out devices to retry")]
    NothingToRetry,

    #[error("manual retry limit reached ({max})")]
    RetryLimit { max: u32 },

    #[error("session runner has stopped")]
    RunnerStopped,
}

/// Read-only view published after every engine step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub state: SessionLifecycleState,
    pub session_id: Option<String>,
    pub selection: Option<SessionSetup>,
    pub activation: Option<ActivationRecord>,
    pub launch_results: CommandResults,
    pub retries_used: u32,
    pub participants: Vec<String>,
    pub counters: BTreeMap<String, u64>,
    pub stopped_devices: Vec<String>,
    pub splits: Vec<SplitRecord>,
    pub transitions: Vec<TransitionRecord>,
    pub telemetry_degraded: bool,
    pub recent_summary: Option<SessionSummary>,
    pub history: Vec<LifecycleStep>,
}

// ─── Per-session state ───────────────────────────────────────────

/// Everything that exists only between launch and finalization.
#[derive(Debug)]
pub(crate) struct SessionRun {
    pub(crate) session_id: String,
    pub(crate) devices: Vec<Device>,
    pub(crate) params: SessionParams,
    pub(crate) goals: GoalTerminationPolicy,
    pub(crate) activation: ActivationTracker,
    pub(crate) pipeline: TelemetryPipeline,
    pub(crate) reorder: ReorderBuffer,
    pub(crate) splits: SplitTransitionComputer,
    launch_results: Option<CommandResults>,
    grace_expired: bool,
    retry_in_flight: bool,
    retries_used: u32,
    telemetry_seen: BTreeSet<String>,
    pub(crate) ended: Option<(DateTime<Utc>, EndReason)>,
}

impl SessionRun {
    fn device_ids(&self) -> Vec<String> {
        self.devices.iter().map(|d| d.device_id.clone()).collect()
    }

    /// Selected devices that are taking part: launch not settled yet,
    /// started successfully, or proved alive through telemetry.
    fn participants(&self) -> BTreeSet<String> {
        self.devices
            .iter()
            .map(|d| &d.device_id)
            .filter(|id| match &self.launch_results {
                None => true,
                Some(results) => {
                    results
                        .get(*id)
                        .is_none_or(|r| r.outcome == CommandOutcome::Success)
                        || self.telemetry_seen.contains(*id)
                }
            })
            .cloned()
            .collect()
    }

    fn launch_successes(&self) -> usize {
        self.launch_results.as_ref().map_or(0, |results| {
            results
                .values()
                .filter(|r| r.outcome == CommandOutcome::Success)
                .count()
        })
    }

    /// Move every hit past the reorder watermark into the split computer.
    pub(crate) fn release_hits(&mut self, hits: Vec<HitRecord>) {
        for hit in hits {
            if let SplitUpdate::Late { last_processed } = self.splits.push(&hit) {
                tracing::warn!(
                    device_id = %hit.device_id,
                    hit_at = %hit.timestamp,
                    %last_processed,
                    "late hit counted without split"
                );
            }
        }
    }
}

// ─── Engine ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct SessionEngine {
    config: SessionConfig,
    lifecycle: Lifecycle,
    selection: Option<SessionSetup>,
    run: Option<SessionRun>,
    recent_summary: Option<SessionSummary>,
    telemetry_degraded: bool,
    /// Launches so far; keeps session ids unique within one clock tick.
    launches: u64,
}

impl SessionEngine {
    pub fn new(config: SessionConfig) -> Self {
        let lifecycle = Lifecycle::with_history_len(config.history_len);
        Self {
            config,
            lifecycle,
            selection: None,
            run: None,
            recent_summary: None,
            telemetry_degraded: false,
            launches: 0,
        }
    }

    pub fn state(&self) -> SessionLifecycleState {
        self.lifecycle.state()
    }

    pub fn recent_summary(&self) -> Option<&SessionSummary> {
        self.recent_summary.as_ref()
    }

    // ─── Operator commands ───────────────────────────────────────

    /// Choose devices, goals and duration. Enters `Selecting` from `Idle`;
    /// replaces the selection while already selecting.
    pub fn select(
        &mut self,
        setup: SessionSetup,
        now: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, SessionError> {
        let state = self.state();
        if state.is_locked() {
            return Err(SessionError::Locked(state));
        }
        validate_setup(&setup)?;
        if state == Idle {
            self.transition(Selecting, now)?;
        }
        self.selection = Some(setup);
        Ok(Vec::new())
    }

    /// Abandon the selection (`Selecting → Idle`).
    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<Vec<EngineAction>, SessionError> {
        self.transition(Idle, now)?;
        self.selection = None;
        Ok(Vec::new())
    }

    /// `Selecting → Launching`: open telemetry, send start to every selected
    /// device and start the grace window.
    pub fn launch(&mut self, now: DateTime<Utc>) -> Result<Vec<EngineAction>, SessionError> {
        let Some(setup) = self.selection.clone() else {
            return Err(SessionError::NoSelection);
        };
        self.transition(Launching, now)?;

        self.launches += 1;
        let session_id = format!(
            "session-{}-{}",
            now.format("%Y%m%dT%H%M%S%3fZ"),
            self.launches
        );
        let params = SessionParams {
            session_id: session_id.clone(),
            duration_secs: setup.duration_secs.or(self.config.default_duration_secs),
            goal: None,
        };
        let mut activation = ActivationTracker::new();
        activation.mark_triggered(now);

        let run = SessionRun {
            session_id: session_id.clone(),
            pipeline: TelemetryPipeline::new(&setup.devices),
            devices: setup.devices,
            params: params.clone(),
            goals: GoalTerminationPolicy::new(setup.goals.clone()),
            activation,
            reorder: ReorderBuffer::new(self.config.reorder_hold_ms),
            splits: SplitTransitionComputer::new(),
            launch_results: None,
            grace_expired: false,
            retry_in_flight: false,
            retries_used: 0,
            telemetry_seen: BTreeSet::new(),
            ended: None,
        };
        let device_ids = run.device_ids();
        tracing::info!(session_id = %session_id, devices = ?device_ids, "launching session");
        self.run = Some(run);

        Ok(vec![
            EngineAction::Subscribe {
                device_ids: device_ids.clone(),
            },
            EngineAction::Dispatch {
                batch: BatchKind::Launch,
                command: DeviceCommand::Start,
                device_ids,
                params,
                goals: setup.goals,
            },
            EngineAction::ArmTimer {
                timer: SessionTimer::LaunchGrace,
                after: self.config.launch_grace(),
            },
        ])
    }

    /// Manual stop. Only valid while `Running`.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<Vec<EngineAction>, SessionError> {
        self.begin_stop(EndReason::Manual, now)
    }

    /// Re-send start to the devices whose last start failed or timed out.
    pub fn retry_failed(&mut self) -> Result<Vec<EngineAction>, SessionError> {
        let state = self.state();
        if !matches!(state, Launching | Running) {
            return Err(SessionError::RetryNotAllowed(state));
        }
        let max = self.config.max_manual_retries;
        let Some(run) = self.run.as_mut() else {
            return Err(SessionError::RetryNotAllowed(state));
        };
        let Some(last) = run.launch_results.as_ref() else {
            return Err(SessionError::BatchInFlight);
        };
        if run.retry_in_flight {
            return Err(SessionError::BatchInFlight);
        }
        if !last.values().any(|r| r.outcome.is_retryable()) {
            return Err(SessionError::NothingToRetry);
        }
        if let Some(max) = max
            && run.retries_used >= max
        {
            return Err(SessionError::RetryLimit { max });
        }

        run.retries_used += 1;
        run.retry_in_flight = true;
        tracing::info!(
            session_id = %run.session_id,
            attempt = run.retries_used,
            max = ?max,
            "manual retry of failed devices"
        );
        Ok(vec![EngineAction::RetryFailed {
            last: last.clone(),
            command: DeviceCommand::Start,
            params: run.params.clone(),
            goals: run.goals.goals().clone(),
        }])
    }

    // ─── Runtime events ──────────────────────────────────────────

    /// A dispatched batch settled. Results from another session are ignored.
    pub fn on_batch_settled(
        &mut self,
        session_id: &str,
        batch: BatchKind,
        results: CommandResults,
        now: DateTime<Utc>,
    ) -> Vec<EngineAction> {
        let state = self.state();
        let Some(run) = self.run.as_mut().filter(|r| r.session_id == session_id) else {
            tracing::debug!(session_id, ?batch, "ignoring batch from a finished session");
            return Vec::new();
        };

        match batch {
            BatchKind::Launch | BatchKind::Retry => {
                let successes = results
                    .values()
                    .filter(|r| r.outcome == CommandOutcome::Success)
                    .count();
                tracing::info!(
                    session_id,
                    ?batch,
                    successes,
                    total = results.len(),
                    "start batch settled"
                );
                if batch == BatchKind::Retry {
                    run.retry_in_flight = false;
                }
                run.launch_results = Some(results);

                if state == Launching && run.grace_expired {
                    return self.decide_launch(now);
                }
                if state == Running {
                    return self.stop_if_all_goals_met(now);
                }
                Vec::new()
            }
            BatchKind::SoftStop => {
                for r in results.values().filter(|r| r.outcome.is_retryable()) {
                    tracing::warn!(
                        device_id = %r.device_id,
                        detail = %r.detail,
                        "soft stop not confirmed"
                    );
                }
                Vec::new()
            }
            BatchKind::FinalStop => {
                if state != Stopping {
                    return Vec::new();
                }
                let failed = results
                    .values()
                    .filter(|r| r.outcome != CommandOutcome::Success)
                    .count();
                if failed > 0 {
                    tracing::warn!(
                        session_id,
                        failed,
                        "final stop incomplete, finalizing anyway"
                    );
                }
                self.finalize(now)
            }
        }
    }

    pub fn on_timer(&mut self, timer: SessionTimer, now: DateTime<Utc>) -> Vec<EngineAction> {
        match timer {
            SessionTimer::LaunchGrace => self.on_grace_expired(now),
            SessionTimer::Duration => {
                if self.state() != Running {
                    return Vec::new();
                }
                tracing::info!("session duration elapsed");
                match self.begin_stop(EndReason::Duration, now) {
                    Ok(actions) => actions,
                    Err(e) => {
                        tracing::warn!("duration stop rejected: {e}");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// One canonical telemetry event. Confirms activation while launching,
    /// then counts it. Ignored outside a live session.
    pub fn on_telemetry(
        &mut self,
        event: &CanonicalTelemetryEvent,
        now: DateTime<Utc>,
    ) -> Vec<EngineAction> {
        let state = self.state();
        if !matches!(state, Launching | Running | Stopping) {
            tracing::trace!(
                device_id = %event.device_id,
                %state,
                "telemetry outside live session ignored"
            );
            return Vec::new();
        }
        let Some(run) = self.run.as_mut() else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        let known = run.devices.iter().any(|d| d.device_id == event.device_id);
        if known {
            run.telemetry_seen.insert(event.device_id.clone());
        }
        if state == Launching && run.activation.observe(event) {
            tracing::info!(
                session_id = %run.session_id,
                device_id = %event.device_id,
                kind = %event.kind,
                "activation confirmed by telemetry"
            );
            actions.extend(self.enter_running(now));
        }
        actions.extend(self.count(event, now));
        actions
    }

    pub fn on_telemetry_degraded(&mut self, consecutive_failures: u32) -> Vec<EngineAction> {
        self.telemetry_degraded = true;
        vec![EngineAction::Notify(SessionNotice::TelemetryDegraded {
            consecutive_failures,
        })]
    }

    pub fn on_telemetry_recovered(&mut self) -> Vec<EngineAction> {
        self.telemetry_degraded = false;
        vec![EngineAction::Notify(SessionNotice::TelemetryRecovered)]
    }

    // ─── Snapshot ────────────────────────────────────────────────

    pub fn snapshot(&self) -> EngineSnapshot {
        let mut snapshot = EngineSnapshot {
            state: self.state(),
            selection: self.selection.clone(),
            telemetry_degraded: self.telemetry_degraded,
            recent_summary: self.recent_summary.clone(),
            history: self.lifecycle.history().cloned().collect(),
            ..EngineSnapshot::default()
        };
        if let Some(run) = &self.run {
            snapshot.session_id = Some(run.session_id.clone());
            snapshot.activation = run.activation.record();
            snapshot.launch_results = run.launch_results.clone().unwrap_or_default();
            snapshot.retries_used = run.retries_used;
            snapshot.participants = run.participants().into_iter().collect();
            snapshot.counters = run.pipeline.counters();
            snapshot.stopped_devices = run.goals.stopped().iter().cloned().collect();
            snapshot.splits = run.splits.splits().to_vec();
            snapshot.transitions = run.splits.transitions().to_vec();
        }
        snapshot
    }

    // ─── Internals ───────────────────────────────────────────────

    fn transition(
        &mut self,
        to: SessionLifecycleState,
        now: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        let step = self.lifecycle.transition(to, now)?;
        tracing::info!(from = %step.from, to = %step.to, "session lifecycle transition");
        Ok(())
    }

    fn on_grace_expired(&mut self, now: DateTime<Utc>) -> Vec<EngineAction> {
        if self.state() != Launching {
            return Vec::new();
        }
        let Some(run) = self.run.as_mut() else {
            return Vec::new();
        };
        run.grace_expired = true;
        if run.launch_results.is_none() {
            tracing::debug!("launch grace expired before start batch settled; deferring");
            return Vec::new();
        }
        self.decide_launch(now)
    }

    /// Grace is over and the launch batch has settled: run if any device
    /// started, otherwise give up.
    fn decide_launch(&mut self, now: DateTime<Utc>) -> Vec<EngineAction> {
        let Some(run) = self.run.as_ref() else {
            return Vec::new();
        };
        if run.launch_successes() > 0 {
            tracing::info!(
                session_id = %run.session_id,
                "launch grace expired without telemetry; running on acknowledged starts"
            );
            return self.enter_running(now);
        }

        let session_id = run.session_id.clone();
        if let Err(e) = self.transition(Idle, now) {
            tracing::error!("launch failure transition rejected: {e}");
            return Vec::new();
        }
        tracing::error!(
            session_id = %session_id,
            "launch failed: no device started or confirmed"
        );
        self.run = None;
        vec![
            EngineAction::Unsubscribe,
            EngineAction::Notify(SessionNotice::LaunchFailed { session_id }),
        ]
    }

    fn enter_running(&mut self, now: DateTime<Utc>) -> Vec<EngineAction> {
        if let Err(e) = self.transition(Running, now) {
            tracing::error!("cannot enter running: {e}");
            return Vec::new();
        }
        let mut actions = vec![EngineAction::CancelTimer(SessionTimer::LaunchGrace)];
        if let Some(secs) = self.run.as_ref().and_then(|r| r.params.duration_secs) {
            actions.push(EngineAction::ArmTimer {
                timer: SessionTimer::Duration,
                after: Duration::from_secs(secs),
            });
        }
        actions
    }

    /// Dedup, reorder, split and goal-check one event.
    fn count(&mut self, event: &CanonicalTelemetryEvent, now: DateTime<Utc>) -> Vec<EngineAction> {
        let state = self.state();
        let Some(run) = self.run.as_mut() else {
            return Vec::new();
        };
        if state == Stopping
            && event.kind == TelemetryKind::Hit
            && let Some((ended_at, _)) = run.ended
            && event.device_timestamp > ended_at
        {
            tracing::debug!(
                device_id = %event.device_id,
                device_timestamp = %event.device_timestamp,
                "hit after session end ignored"
            );
            return Vec::new();
        }

        match run.pipeline.ingest(event) {
            Ok(IngestOutcome::Hit { record, .. }) => {
                run.reorder.push(record);
                let ready = run.reorder.drain_ready();
                run.release_hits(ready);
            }
            Ok(IngestOutcome::Frozen) => {
                tracing::debug!(
                    device_id = %event.device_id,
                    "hit from soft-stopped device ignored"
                );
                return Vec::new();
            }
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::debug!("telemetry ignored: {e}");
                return Vec::new();
            }
        }

        if state != Running {
            return Vec::new();
        }
        let participants = run.participants();
        let device = event.device_id.as_str();
        let hit_count = run.pipeline.hit_count(device);
        let GoalDecision::SoftStop {
            device_id,
            all_stopped,
        } = run.goals.evaluate(device, hit_count, &participants)
        else {
            return Vec::new();
        };

        tracing::info!(
            device_id = %device_id,
            hit_count,
            "device reached goal, soft-stopping"
        );
        run.pipeline.freeze(&device_id);
        let session_id = run.session_id.clone();
        let mut actions = vec![
            EngineAction::Dispatch {
                batch: BatchKind::SoftStop,
                command: DeviceCommand::Stop,
                device_ids: vec![device_id.clone()],
                params: run.params.clone(),
                goals: GoalMap::new(),
            },
            EngineAction::Notify(SessionNotice::DeviceSoftStopped {
                session_id,
                device_id,
            }),
        ];
        if all_stopped {
            actions.extend(self.stop_for_goals(now));
        }
        actions
    }

    /// Participants can shrink when a start batch settles, which may
    /// complete the stopped set without a new hit.
    fn stop_if_all_goals_met(&mut self, now: DateTime<Utc>) -> Vec<EngineAction> {
        let all_stopped = self
            .run
            .as_ref()
            .is_some_and(|run| run.goals.all_stopped(&run.participants()));
        if all_stopped {
            self.stop_for_goals(now)
        } else {
            Vec::new()
        }
    }

    fn stop_for_goals(&mut self, now: DateTime<Utc>) -> Vec<EngineAction> {
        tracing::info!("all participating devices reached their goals");
        match self.begin_stop(EndReason::GoalsMet, now) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::warn!("goal stop rejected: {e}");
                Vec::new()
            }
        }
    }

    /// `Running → Stopping`: record the end, stop every device not already
    /// soft-stopped, and finalize once that batch settles.
    fn begin_stop(
        &mut self,
        reason: EndReason,
        now: DateTime<Utc>,
    ) -> Result<Vec<EngineAction>, SessionError> {
        self.transition(Stopping, now)?;
        let Some(run) = self.run.as_mut() else {
            return Ok(Vec::new());
        };
        run.ended = Some((now, reason));
        tracing::info!(session_id = %run.session_id, reason = %reason, "stopping session");

        let targets: Vec<String> = run
            .devices
            .iter()
            .map(|d| &d.device_id)
            .filter(|id| !run.goals.is_stopped(id))
            .cloned()
            .collect();

        let mut actions = vec![
            EngineAction::CancelTimer(SessionTimer::LaunchGrace),
            EngineAction::CancelTimer(SessionTimer::Duration),
        ];
        if targets.is_empty() {
            actions.extend(self.finalize(now));
        } else {
            actions.push(EngineAction::Dispatch {
                batch: BatchKind::FinalStop,
                command: DeviceCommand::Stop,
                device_ids: targets,
                params: run.params.clone(),
                goals: GoalMap::new(),
            });
        }
        Ok(actions)
    }

    /// `Stopping → Finalizing → Idle`: build the summary, hand it off, and
    /// close telemetry.
    fn finalize(&mut self, now: DateTime<Utc>) -> Vec<EngineAction> {
        if let Err(e) = self.transition(Finalizing, now) {
            tracing::error!("cannot finalize: {e}");
            return Vec::new();
        }
        let Some(mut run) = self.run.take() else {
            return Vec::new();
        };
        let summary = finalizer::finalize(&mut run, now);
        tracing::info!(
            session_id = %summary.session_id,
            total_hits = summary.total_hits,
            is_valid = summary.is_valid,
            "session summary ready"
        );
        self.recent_summary = Some(summary.clone());
        self.selection = None;
        if let Err(e) = self.transition(Idle, now) {
            tracing::error!("cannot return to idle: {e}");
        }
        vec![
            EngineAction::Unsubscribe,
            EngineAction::Persist(Box::new(summary.clone())),
            EngineAction::Notify(SessionNotice::SummaryReady {
                summary: Box::new(summary),
            }),
        ]
    }
}

fn validate_setup(setup: &SessionSetup) -> Result<(), SessionError> {
    if setup.devices.is_empty() {
        return Err(HitlineError::EmptySelection.into());
    }
    if setup.duration_secs == Some(0) {
        return Err(SessionError::InvalidDuration);
    }
    for (device_id, &goal) in &setup.goals {
        if !setup.devices.iter().any(|d| &d.device_id == device_id) {
            return Err(HitlineError::UnknownDevice(device_id.clone()).into());
        }
        if goal == 0 {
            return Err(SessionError::InvalidGoal(device_id.clone()));
        }
    }
    Ok(())
}

// ─── Tests ────────────────────────────────────────────────────────
