//! `hitline simulate`: one full session against the simulated fleet.

use std::sync::Arc;

use anyhow::Context;
use hitline_core::lifecycle::SessionLifecycleState;
use hitline_core::types::{DeviceStatus, SessionSummary};
use hitline_session::{
    Clock, SessionHandle, SessionNotice, SessionPorts, SessionRunner, SessionSetup, SystemClock,
    refresh_roster,
};
use tokio::sync::broadcast::error::RecvError;

use crate::cli::SimulateOpts;
use crate::persistence::{JsonlPersistence, read_summaries};
use crate::sim::SimulatedFleet;

pub async fn cmd_simulate(opts: SimulateOpts) -> anyhow::Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let fleet = Arc::new(SimulatedFleet::new(opts.fleet_spec(), Arc::clone(&clock)));
    let store = Arc::new(JsonlPersistence::new(&opts.out));

    let ports = SessionPorts {
        transport: fleet.clone(),
        telemetry: fleet.clone(),
        persistence: store.clone(),
        clock: Arc::clone(&clock),
    };
    let (handle, runner) = SessionRunner::spawn(opts.session_config(), ports)
        .context("invalid session config")?;

    let roster = refresh_roster(fleet.as_ref(), clock.as_ref())
        .await
        .context("roster unavailable")?;
    let devices = match opts.target_filter() {
        Some(wanted) => roster
            .into_iter()
            .filter(|d| wanted.contains(&d.device_id))
            .collect(),
        None => roster
            .into_iter()
            .filter(|d| d.status != DeviceStatus::Offline)
            .collect(),
    };
    let setup = SessionSetup {
        devices,
        goals: opts.goal_map(),
        duration_secs: opts.duration_secs,
    };

    let mut notices = handle.subscribe_notices();
    handle.select(setup).await.context("selection rejected")?;
    handle.launch().await.context("launch rejected")?;
    tracing::info!(session_id = ?handle.snapshot().session_id, "session launched");

    let summary = drive(&handle, &mut notices, opts.retry_failed).await;

    handle.shutdown();
    runner.await.context("session runner panicked")?;
    fleet.shutdown().await;

    let Some(summary) = summary? else {
        anyhow::bail!("session ended without a summary");
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match read_summaries(store.path()).await {
        Ok(history) => tracing::info!(
            path = %store.path().display(),
            sessions = history.len(),
            "summary stored"
        ),
        Err(e) => tracing::warn!("cannot read summary history: {e}"),
    }
    Ok(())
}

/// Follow the session until it produces a summary or fails to launch.
/// A shutdown signal stops a running session; before it runs, the session
/// is abandoned.
async fn drive(
    handle: &SessionHandle,
    notices: &mut tokio::sync::broadcast::Receiver<SessionNotice>,
    mut auto_retry: bool,
) -> anyhow::Result<Option<SessionSummary>> {
    let mut snapshots = handle.watch_snapshots();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut stopping = false;

    loop {
        tokio::select! {
            () = &mut shutdown, if !stopping => {
                stopping = true;
                if let Err(e) = handle.stop().await {
                    tracing::warn!("cannot stop session cleanly: {e}");
                    return Ok(None);
                }
            }
            changed = snapshots.changed(), if auto_retry => {
                changed.context("session runner stopped")?;
                let snapshot = snapshots.borrow_and_update().clone();
                let has_failures = snapshot
                    .launch_results
                    .values()
                    .any(|r| r.outcome.is_retryable());
                if snapshot.state == SessionLifecycleState::Running && has_failures {
                    auto_retry = false;
                    match handle.retry_failed().await {
                        Ok(()) => tracing::info!("retrying failed starts"),
                        Err(e) => tracing::warn!("retry rejected: {e}"),
                    }
                }
            }
            notice = notices.recv() => match notice {
                Ok(SessionNotice::SummaryReady { summary }) => return Ok(Some(*summary)),
                Ok(SessionNotice::LaunchFailed { session_id }) => {
                    anyhow::bail!("launch failed for {session_id}: no target started");
                }
                Ok(SessionNotice::DeviceSoftStopped { device_id, .. }) => {
                    tracing::info!(device_id = %device_id, "target reached its goal");
                }
                Ok(SessionNotice::TelemetryDegraded {
                    consecutive_failures,
                }) => {
                    tracing::warn!(consecutive_failures, "telemetry degraded");
                }
                Ok(SessionNotice::TelemetryRecovered) => tracing::info!("telemetry recovered"),
                Ok(SessionNotice::PersistFailed { error, .. }) => {
                    tracing::error!("summary not stored: {error}");
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "missed session notices");
                }
                Err(RecvError::Closed) => anyhow::bail!("session runner stopped"),
            }
        }
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("received ctrl-c, stopping session"),
                    _ = sigterm.recv() => tracing::info!("received SIGTERM, stopping session"),
                }
            }
            Err(e) => {
                tracing::warn!("cannot register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                tracing::info!("received ctrl-c, stopping session");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        tracing::info!("received ctrl-c, stopping session");
    }
}
