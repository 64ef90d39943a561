//! In-process simulated fleet.
//!
//! One [`SimulatedFleet`] plays every collaborator a real deployment talks
//! to: it accepts start/stop RPCs, streams vendor-shaped telemetry, and
//! answers roster queries. Started targets emit a `game_start` event and then
//! a cumulative `hit` count on a fixed cadence until stopped.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use hitline_core::classify::RawDeviceStatus;
use hitline_core::types::SessionParams;
use hitline_ingest::RawTelemetryEvent;
use hitline_session::{
    Ack, Clock, DeviceTransport, Roster, RosterEntry, TelemetrySource, TelemetryStream,
    TransportError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const STREAM_CAPACITY: usize = 256;

type EventTx = mpsc::Sender<Result<RawTelemetryEvent, TransportError>>;

/// Shape and failure injection of a simulated fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FleetSpec {
    pub devices: usize,
    pub hit_interval: Duration,
    /// Targets that reject their first start command.
    pub fail_start: BTreeSet<String>,
    /// Targets that never answer and report as long inactive.
    pub offline: BTreeSet<String>,
    /// Drop every Nth hit event across the fleet.
    pub drop_every: Option<u64>,
    /// Subscription attempts that fail before one succeeds.
    pub stream_failures: u32,
}

impl Default for FleetSpec {
    fn default() -> Self {
        Self {
            devices: 3,
            hit_interval: Duration::from_millis(800),
            fail_start: BTreeSet::new(),
            offline: BTreeSet::new(),
            drop_every: None,
            stream_failures: 0,
        }
    }
}

impl FleetSpec {
    pub fn device_ids(&self) -> Vec<String> {
        (1..=self.devices).map(|n| format!("target-{n}")).collect()
    }
}

#[derive(Debug, Default)]
struct FleetState {
    stream: Option<EventTx>,
    stream_failures_left: u32,
    /// Start rejections still owed per target.
    start_failures_left: BTreeSet<String>,
    playing: BTreeMap<String, CancellationToken>,
    hits_seen: u64,
}

/// Timer-driven stand-in for the device RPC service, telemetry broker and
/// roster service.
pub struct SimulatedFleet {
    spec: FleetSpec,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<FleetState>>,
    tasks: TaskTracker,
}

impl SimulatedFleet {
    pub fn new(spec: FleetSpec, clock: Arc<dyn Clock>) -> Self {
        let state = FleetState {
            stream_failures_left: spec.stream_failures,
            start_failures_left: spec.fail_start.clone(),
            ..FleetState::default()
        };
        Self {
            spec,
            clock,
            state: Arc::new(Mutex::new(state)),
            tasks: TaskTracker::new(),
        }
    }

    /// Stop every playing target and wait for their tasks.
    pub async fn shutdown(&self) {
        let playing = std::mem::take(&mut lock(&self.state).playing);
        for cancel in playing.into_values() {
            cancel.cancel();
        }
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn ensure_known(&self, device_id: &str) -> Result<(), TransportError> {
        if self.spec.device_ids().iter().any(|id| id == device_id) {
            Ok(())
        } else {
            let reason = format!("no such target: {device_id}");
            Err(TransportError::Unreachable(reason))
        }
    }

    fn is_playing(&self, device_id: &str) -> bool {
        lock(&self.state).playing.contains_key(device_id)
    }

    /// Slot of `device_id` among the fleet, used to stagger hit cadences.
    fn slot(&self, device_id: &str) -> usize {
        self.spec
            .device_ids()
            .iter()
            .position(|id| id == device_id)
            .unwrap_or(0)
    }
}

fn lock(state: &Mutex<FleetState>) -> MutexGuard<'_, FleetState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─── Device play ─────────────────────────────────────────────────

struct Player {
    device_id: String,
    interval: Duration,
    offset: Duration,
    drop_every: Option<u64>,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<FleetState>>,
}

impl Player {
    async fn run(self, cancel: CancellationToken) {
        self.emit("game_start", 0).await;
        let mut hits = 0_u64;
        let first = tokio::time::Instant::now() + self.interval + self.offset;
        let mut ticker = tokio::time::interval_at(first, self.interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    hits += 1;
                    self.emit("hit", hits).await;
                }
            }
        }
        self.emit("game_stop", hits).await;
        tracing::debug!(device_id = %self.device_id, hits, "simulated target stopped");
    }

    async fn emit(&self, kind: &str, hits: u64) {
        let tx = {
            let mut state = lock(&self.state);
            if kind == "hit" {
                state.hits_seen += 1;
                if let Some(n) = self.drop_every
                    && n > 0
                    && state.hits_seen % n == 0
                {
                    tracing::debug!(device_id = %self.device_id, hits, "dropping simulated hit");
                    return;
                }
            }
            state.stream.clone()
        };
        let Some(tx) = tx else {
            return;
        };
        let event = RawTelemetryEvent {
            device_id: self.device_id.clone(),
            kind: Some(kind.to_string()),
            timestamp: Some(serde_json::json!(self.clock.now().timestamp_millis())),
            data: serde_json::json!({ "hits": hits }),
        };
        if tx.send(Ok(event)).await.is_err() {
            tracing::trace!(device_id = %self.device_id, "telemetry stream closed");
        }
    }
}

// ─── Ports ───────────────────────────────────────────────────────

#[async_trait]
impl DeviceTransport for SimulatedFleet {
    async fn send_start(
        &self,
        device_id: &str,
        params: &SessionParams,
    ) -> Result<Ack, TransportError> {
        self.ensure_known(device_id)?;
        if self.spec.offline.contains(device_id) {
            // Never answers; the caller's deadline decides.
            std::future::pending::<()>().await;
        }
        let cancel = {
            let mut state = lock(&self.state);
            if state.start_failures_left.remove(device_id) {
                return Err(TransportError::Rejected(format!("{device_id} is busy")));
            }
            let cancel = CancellationToken::new();
            if let Some(previous) = state.playing.insert(device_id.to_string(), cancel.clone()) {
                previous.cancel();
            }
            cancel
        };

        let slot = u32::try_from(self.slot(device_id)).unwrap_or(0);
        let devices = u32::try_from(self.spec.devices.max(1)).unwrap_or(1);
        let player = Player {
            device_id: device_id.to_string(),
            interval: self.spec.hit_interval,
            offset: self.spec.hit_interval * slot / devices,
            drop_every: self.spec.drop_every,
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
        };
        self.tasks.spawn(player.run(cancel));
        tracing::debug!(
            device_id,
            session_id = %params.session_id,
            goal = ?params.goal,
            "simulated target started"
        );
        let detail = format!("{device_id} armed for {}", params.session_id);
        Ok(Ack::new(detail))
    }

    async fn send_stop(&self, device_id: &str) -> Result<Ack, TransportError> {
        self.ensure_known(device_id)?;
        if self.spec.offline.contains(device_id) {
            std::future::pending::<()>().await;
        }
        if let Some(cancel) = lock(&self.state).playing.remove(device_id) {
            cancel.cancel();
        }
        Ok(Ack::new(format!("{device_id} stopped")))
    }
}

#[async_trait]
impl TelemetrySource for SimulatedFleet {
    async fn subscribe(&self, device_ids: &[String]) -> Result<TelemetryStream, TransportError> {
        let mut state = lock(&self.state);
        if state.stream_failures_left > 0 {
            state.stream_failures_left -= 1;
            let refused = "telemetry broker refused connection".to_string();
            return Err(TransportError::Unreachable(refused));
        }
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        state.stream = Some(tx);
        tracing::debug!(devices = device_ids.len(), "simulated telemetry subscribed");
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        lock(&self.state).stream = None;
    }
}

#[async_trait]
impl Roster for SimulatedFleet {
    async fn list(&self) -> Result<Vec<RosterEntry>, TransportError> {
        let now = self.clock.now();
        let entries = self
            .spec
            .device_ids()
            .into_iter()
            .enumerate()
            .map(|(i, device_id)| {
                let raw = if self.spec.offline.contains(&device_id) {
                    RawDeviceStatus {
                        raw_connection_status: "disconnected".into(),
                        game_status: None,
                        is_active: Some(false),
                        last_activity: Some(now - TimeDelta::days(2)),
                    }
                } else {
                    let playing = self.is_playing(&device_id);
                    RawDeviceStatus {
                        raw_connection_status: "connected".into(),
                        game_status: Some(if playing { "start" } else { "idle" }.into()),
                        is_active: Some(true),
                        last_activity: Some(now - TimeDelta::minutes(5)),
                    }
                };
                RosterEntry {
                    display_name: format!("Target {}", i + 1),
                    device_id,
                    raw,
                }
            })
            .collect();
        Ok(entries)
    }
}
