//! Async session runner: the single owner of the [`SessionEngine`].
//!
//! One `tokio::select!` loop receives operator commands, telemetry, settled
//! command batches and timer deadlines, feeds them to the engine, and performs
//! the actions it returns. Device batches, telemetry and persistence run as
//! spawned tasks and report back over channels, so the loop never blocks on
//! a device.

use std::sync::Arc;
use std::time::Duration;

use hitline_core::types::CommandResults;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::{ConfigError, SessionConfig};
use crate::engine::{
    BatchKind, EngineAction, EngineSnapshot, SessionEngine, SessionError, SessionNotice,
    SessionSetup, SessionTimer,
};
use crate::orchestrator::CommandOrchestrator;
use crate::ports::{Clock, DeviceTransport, Persistence, TelemetrySource};
use crate::telemetry::{TelemetryMessage, TelemetrySubscription};

/// Collaborators the runner performs IO through.
#[derive(Clone)]
pub struct SessionPorts {
    pub transport: Arc<dyn DeviceTransport>,
    pub telemetry: Arc<dyn TelemetrySource>,
    pub persistence: Arc<dyn Persistence>,
    pub clock: Arc<dyn Clock>,
}

// ─── Handle ──────────────────────────────────────────────────────

enum Request {
    Select(SessionSetup),
    Cancel,
    Launch,
    Stop,
    RetryFailed,
}

impl Request {
    fn name(&self) -> &'static str {
        match self {
            Self::Select(_) => "select",
            Self::Cancel => "cancel",
            Self::Launch => "launch",
            Self::Stop => "stop",
            Self::RetryFailed => "retry_failed",
        }
    }
}

struct Command {
    request: Request,
    reply: oneshot::Sender<Result<(), SessionError>>,
}

/// Operator-side handle. Cheap to clone.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<EngineSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
    results: watch::Receiver<CommandResults>,
    shutdown: CancellationToken,
}

impl SessionHandle {
    pub async fn select(&self, setup: SessionSetup) -> Result<(), SessionError> {
        self.request(Request::Select(setup)).await
    }

    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.request(Request::Cancel).await
    }

    pub async fn launch(&self) -> Result<(), SessionError> {
        self.request(Request::Launch).await
    }

    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(Request::Stop).await
    }

    pub async fn retry_failed(&self) -> Result<(), SessionError> {
        self.request(Request::RetryFailed).await
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn watch_snapshots(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SessionNotice> {
        self.notices.subscribe()
    }

    /// Per-device results of the latest dispatch or retry.
    pub fn command_results(&self) -> watch::Receiver<CommandResults> {
        self.results.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&EngineSnapshot) -> bool,
    ) -> Result<EngineSnapshot, SessionError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::RunnerStopped)?
            .clone();
        Ok(snapshot)
    }

    /// Stop the runner. Pending persistence finishes before it exits.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    async fn request(&self, request: Request) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command { request, reply })
            .await
            .map_err(|_| SessionError::RunnerStopped)?;
        rx.await.map_err(|_| SessionError::RunnerStopped)?
    }
}

// ─── Runner ──────────────────────────────────────────────────────

struct BatchSettled {
    session_id: String,
    batch: BatchKind,
    results: CommandResults,
}

pub struct SessionRunner {
    engine: SessionEngine,
    ports: SessionPorts,
    config: SessionConfig,
    orchestrator: CommandOrchestrator,
    commands: mpsc::Receiver<Command>,
    telemetry_tx: mpsc::Sender<TelemetryMessage>,
    telemetry_rx: mpsc::Receiver<TelemetryMessage>,
    batch_tx: mpsc::Sender<BatchSettled>,
    batch_rx: mpsc::Receiver<BatchSettled>,
    snapshot_tx: watch::Sender<EngineSnapshot>,
    notices: broadcast::Sender<SessionNotice>,
    shutdown: CancellationToken,
    telemetry_cancel: CancellationToken,
    tasks: TaskTracker,
    grace_deadline: Option<Instant>,
    duration_deadline: Option<Instant>,
}

impl SessionRunner {
    /// Validate `config`, start the runner task and return its handle.
    pub fn spawn(
        config: SessionConfig,
        ports: SessionPorts,
    ) -> Result<(SessionHandle, JoinHandle<()>), ConfigError> {
        config.validate()?;
        let capacity = config.channel_capacity;

        let (commands_tx, commands) = mpsc::channel(capacity);
        let (telemetry_tx, telemetry_rx) = mpsc::channel(capacity);
        let (batch_tx, batch_rx) = mpsc::channel(capacity);
        let (notices, _) = broadcast::channel(capacity);

        let engine = SessionEngine::new(config.clone());
        let (snapshot_tx, snapshot) = watch::channel(engine.snapshot());
        let orchestrator =
            CommandOrchestrator::new(Arc::clone(&ports.transport), config.command_timeout());
        let shutdown = CancellationToken::new();

        let handle = SessionHandle {
            commands: commands_tx,
            snapshot,
            notices: notices.clone(),
            results: orchestrator.subscribe(),
            shutdown: shutdown.clone(),
        };
        let runner = Self {
            engine,
            ports,
            config,
            orchestrator,
            commands,
            telemetry_tx,
            telemetry_rx,
            batch_tx,
            batch_rx,
            snapshot_tx,
            notices,
            telemetry_cancel: shutdown.child_token(),
            shutdown,
            tasks: TaskTracker::new(),
            grace_deadline: None,
            duration_deadline: None,
        };
        Ok((handle, tokio::spawn(runner.run())))
    }

    async fn run(mut self) {
        tracing::info!("session runner started");
        loop {
            let idle = Instant::now() + Duration::from_secs(86_400);
            let grace_at = self.grace_deadline.unwrap_or(idle);
            let duration_at = self.duration_deadline.unwrap_or(idle);

            tokio::select! {
                () = self.shutdown.cancelled() => break,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(message) = self.telemetry_rx.recv() => self.handle_telemetry(message),
                Some(done) = self.batch_rx.recv() => {
                    let now = self.ports.clock.now();
                    let actions = self
                        .engine
                        .on_batch_settled(&done.session_id, done.batch, done.results, now);
                    self.perform(actions);
                }
                () = sleep_until(grace_at), if self.grace_deadline.is_some() => {
                    self.grace_deadline = None;
                    self.fire(SessionTimer::LaunchGrace);
                }
                () = sleep_until(duration_at), if self.duration_deadline.is_some() => {
                    self.duration_deadline = None;
                    self.fire(SessionTimer::Duration);
                }
            }
            self.publish();
        }

        self.telemetry_cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        tracing::info!("session runner stopped");
    }

    fn handle_command(&mut self, command: Command) {
        let now = self.ports.clock.now();
        let request = command.request.name();
        let outcome = match command.request {
            Request::Select(setup) => self.engine.select(setup, now),
            Request::Cancel => self.engine.cancel(now),
            Request::Launch => self.engine.launch(now),
            Request::Stop => self.engine.stop(now),
            Request::RetryFailed => self.engine.retry_failed(),
        };
        let reply = match outcome {
            Ok(actions) => {
                self.perform(actions);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(request, "operator command rejected: {e}");
                Err(e)
            }
        };
        // Caller may have stopped waiting.
        let _ = command.reply.send(reply);
    }

    fn handle_telemetry(&mut self, message: TelemetryMessage) {
        let actions = match message {
            TelemetryMessage::Event(event) => {
                let now = self.ports.clock.now();
                self.engine.on_telemetry(&event, now)
            }
            TelemetryMessage::Degraded {
                consecutive_failures,
            } => self.engine.on_telemetry_degraded(consecutive_failures),
            TelemetryMessage::Recovered => self.engine.on_telemetry_recovered(),
        };
        self.perform(actions);
    }

    fn fire(&mut self, timer: SessionTimer) {
        let now = self.ports.clock.now();
        let actions = self.engine.on_timer(timer, now);
        self.perform(actions);
    }

    fn publish(&self) {
        let next = self.engine.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn perform(&mut self, actions: Vec<EngineAction>) {
        for action in actions {
            match action {
                EngineAction::Dispatch {
                    batch,
                    command,
                    device_ids,
                    params,
                    goals,
                } => {
                    let orchestrator = self.orchestrator.clone();
                    let tx = self.batch_tx.clone();
                    self.tasks.spawn(async move {
                        let results = orchestrator
                            .dispatch(&device_ids, command, &params, &goals)
                            .await;
                        let settled = BatchSettled {
                            session_id: params.session_id,
                            batch,
                            results,
                        };
                        let _ = tx.send(settled).await;
                    });
                }
                EngineAction::RetryFailed {
                    last,
                    command,
                    params,
                    goals,
                } => {
                    let orchestrator = self.orchestrator.clone();
                    let tx = self.batch_tx.clone();
                    self.tasks.spawn(async move {
                        let results = orchestrator
                            .retry_failed(&last, command, &params, &goals)
                            .await;
                        let settled = BatchSettled {
                            session_id: params.session_id,
                            batch: BatchKind::Retry,
                            results,
                        };
                        let _ = tx.send(settled).await;
                    });
                }
                EngineAction::Subscribe { device_ids } => {
                    self.telemetry_cancel.cancel();
                    self.telemetry_cancel = self.shutdown.child_token();
                    let subscription = TelemetrySubscription {
                        source: Arc::clone(&self.ports.telemetry),
                        clock: Arc::clone(&self.ports.clock),
                        device_ids,
                        policy: self.config.reconnect.clone(),
                    };
                    subscription.spawn(self.telemetry_tx.clone(), self.telemetry_cancel.clone());
                }
                EngineAction::Unsubscribe => self.telemetry_cancel.cancel(),
                EngineAction::ArmTimer { timer, after } => {
                    let deadline = Some(Instant::now() + after);
                    match timer {
                        SessionTimer::LaunchGrace => self.grace_deadline = deadline,
                        SessionTimer::Duration => self.duration_deadline = deadline,
                    }
                }
                EngineAction::CancelTimer(timer) => match timer {
                    SessionTimer::LaunchGrace => self.grace_deadline = None,
                    SessionTimer::Duration => self.duration_deadline = None,
                },
                EngineAction::Persist(summary) => {
                    let persistence = Arc::clone(&self.ports.persistence);
                    let notices = self.notices.clone();
                    self.tasks.spawn(async move {
                        match persistence.save_session_summary(&summary).await {
                            Ok(ack) => {
                                tracing::info!(
                                    session_id = %summary.session_id,
                                    detail = %ack.detail,
                                    "session summary persisted"
                                );
                            }
                            Err(e) => {
                                tracing::error!(
                                    session_id = %summary.session_id,
                                    "failed to persist session summary: {e}"
                                );
                                let _ = notices.send(SessionNotice::PersistFailed {
                                    session_id: summary.session_id.clone(),
                                    error: e.to_string(),
                                });
                            }
                        }
                    });
                }
                EngineAction::Notify(notice) => {
                    // No subscribers is fine.
                    let _ = self.notices.send(notice);
                }
            }
        }
    }
}
