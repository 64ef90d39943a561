//! Concurrent start/stop fan-out with per-device outcome tracking.
//!
//! Every device call runs as its own task under a per-device deadline, so one
//! slow or dead target never holds up the rest. A batch settles once every
//! call has either answered, failed or hit its deadline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hitline_core::types::{
    CommandOutcome, CommandResults, DeviceCommand, DeviceCommandResult, GoalMap, SessionParams,
};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::ports::{Ack, DeviceTransport, TransportError};

/// Cheap to clone; clones share the transport and the results channel.
#[derive(Clone)]
pub struct CommandOrchestrator {
    transport: Arc<dyn DeviceTransport>,
    timeout: Duration,
    results_tx: Arc<watch::Sender<CommandResults>>,
}

impl CommandOrchestrator {
    pub fn new(transport: Arc<dyn DeviceTransport>, timeout: Duration) -> Self {
        let (results_tx, _) = watch::channel(CommandResults::new());
        Self {
            transport,
            timeout,
            results_tx: Arc::new(results_tx),
        }
    }

    /// Latest results map, updated after every dispatch and retry.
    pub fn subscribe(&self) -> watch::Receiver<CommandResults> {
        self.results_tx.subscribe()
    }

    /// Send `command` to every device concurrently. `goals` fills each
    /// device's `SessionParams::goal` for start commands.
    pub async fn dispatch(
        &self,
        device_ids: &[String],
        command: DeviceCommand,
        params: &SessionParams,
        goals: &GoalMap,
    ) -> CommandResults {
        let results = self.fan_out(device_ids, command, params, goals).await;
        self.results_tx.send_replace(results.clone());
        results
    }

    /// Re-dispatch only the `Failed`/`TimedOut` entries of `last`. Successful
    /// entries are carried over unchanged.
    pub async fn retry_failed(
        &self,
        last: &CommandResults,
        command: DeviceCommand,
        params: &SessionParams,
        goals: &GoalMap,
    ) -> CommandResults {
        let retry_ids: Vec<String> = last
            .values()
            .filter(|r| r.outcome.is_retryable())
            .map(|r| r.device_id.clone())
            .collect();
        tracing::info!(command = %command, devices = ?retry_ids, "retrying failed devices");

        let mut merged = last.clone();
        merged.extend(self.fan_out(&retry_ids, command, params, goals).await);
        self.results_tx.send_replace(merged.clone());
        merged
    }

    async fn fan_out(
        &self,
        device_ids: &[String],
        command: DeviceCommand,
        params: &SessionParams,
        goals: &GoalMap,
    ) -> CommandResults {
        let mut set = JoinSet::new();
        for device_id in device_ids {
            let transport = Arc::clone(&self.transport);
            let device_id = device_id.clone();
            let params = SessionParams {
                goal: goals.get(&device_id).copied(),
                ..params.clone()
            };
            let deadline = self.timeout;
            set.spawn(async move {
                let call = async {
                    match command {
                        DeviceCommand::Start => transport.send_start(&device_id, &params).await,
                        DeviceCommand::Stop => transport.send_stop(&device_id).await,
                    }
                };
                let outcome = tokio::time::timeout(deadline, call).await;
                settle(device_id, command, deadline, outcome)
            });
        }

        let mut results = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(result) => {
                    results.insert(result.device_id.clone(), result);
                }
                Err(e) => tracing::error!("device command task failed: {e}"),
            }
        }

        // A panicked task loses its device id; record those as failed.
        for device_id in device_ids {
            results
                .entry(device_id.clone())
                .or_insert_with(|| DeviceCommandResult {
                    device_id: device_id.clone(),
                    outcome: CommandOutcome::Failed,
                    detail: "command task aborted".to_string(),
                });
        }
        results
    }
}

fn settle(
    device_id: String,
    command: DeviceCommand,
    deadline: Duration,
    outcome: Result<Result<Ack, TransportError>, tokio::time::error::Elapsed>,
) -> DeviceCommandResult {
    let (outcome, detail) = match outcome {
        Ok(Ok(ack)) => {
            tracing::debug!(device_id = %device_id, command = %command, "device acknowledged");
            (CommandOutcome::Success, ack.detail)
        }
        Ok(Err(e)) if e.is_timeout() => {
            tracing::warn!(device_id = %device_id, command = %command, "device rpc timed out: {e}");
            (CommandOutcome::TimedOut, e.to_string())
        }
        Ok(Err(e)) => {
            tracing::error!(
                device_id = %device_id,
                command = %command,
                "device command failed: {e}"
            );
            (CommandOutcome::Failed, e.to_string())
        }
        Err(_) => {
            tracing::warn!(
                device_id = %device_id,
                command = %command,
                "device command deadline elapsed after {}ms",
                deadline.as_millis()
            );
            (
                CommandOutcome::TimedOut,
                format!("no response within {}ms", deadline.as_millis()),
            )
        }
    };
    DeviceCommandResult {
        device_id,
        outcome,
        detail,
    }
}
