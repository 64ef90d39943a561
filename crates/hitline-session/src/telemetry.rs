//! Long-lived telemetry subscription with resubscription backoff.
//!
//! The task translates raw vendor events into canonical events and forwards
//! them to the session runner. A dropped or failed subscription is retried
//! with exponential backoff; after repeated failures the runner is told the
//! stream is degraded, and told again when events flow. Nothing here ever
//! ends a session.

use std::sync::Arc;
use std::time::Duration;

use hitline_core::types::CanonicalTelemetryEvent;
use hitline_ingest::reconnect::{ReconnectPolicy, ReconnectTracker};
use hitline_ingest::translate::translate;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ports::{Clock, TelemetrySource, TransportError};

/// What the subscription task reports to the runner.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryMessage {
    Event(CanonicalTelemetryEvent),
    Degraded { consecutive_failures: u32 },
    Recovered,
}

pub struct TelemetrySubscription {
    pub source: Arc<dyn TelemetrySource>,
    pub clock: Arc<dyn Clock>,
    pub device_ids: Vec<String>,
    pub policy: ReconnectPolicy,
}

impl TelemetrySubscription {
    /// Run until `cancel` fires or the runner goes away. Unsubscribes on exit.
    pub fn spawn(
        self,
        tx: mpsc::Sender<TelemetryMessage>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run(tx, cancel).await;
        })
    }

    async fn run(self, tx: mpsc::Sender<TelemetryMessage>, cancel: CancellationToken) {
        let mut tracker = ReconnectTracker::new(self.policy.clone());

        loop {
            let failure = tokio::select! {
                () = cancel.cancelled() => break,
                failure = self.pump(&tx, &mut tracker) => failure,
            };
            let Some(failure) = failure else {
                // Runner dropped its receiver.
                break;
            };

            let decision = tracker.record_failure();
            tracing::warn!(
                attempt = tracker.consecutive_failures(),
                retry_in_ms = decision.after_ms,
                "telemetry subscription lost: {failure}"
            );
            if decision.became_degraded {
                let msg = TelemetryMessage::Degraded {
                    consecutive_failures: tracker.consecutive_failures(),
                };
                if tx.send(msg).await.is_err() {
                    break;
                }
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(Duration::from_millis(decision.after_ms)) => {}
            }
        }

        self.source.unsubscribe().await;
        tracing::debug!("telemetry subscription closed");
    }

    /// Subscribe and forward events until the stream fails. Returns the
    /// failure, or `None` if the runner's receiver is gone.
    async fn pump(
        &self,
        tx: &mpsc::Sender<TelemetryMessage>,
        tracker: &mut ReconnectTracker,
    ) -> Option<TransportError> {
        let mut stream = match self.source.subscribe(&self.device_ids).await {
            Ok(stream) => stream,
            Err(e) => return Some(e),
        };
        tracing::debug!(devices = ?self.device_ids, "telemetry subscribed");

        loop {
            let raw = match stream.recv().await {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => return Some(e),
                None => return Some(TransportError::StreamClosed),
            };

            if tracker.record_success() {
                tracing::info!("telemetry stream recovered");
                tx.send(TelemetryMessage::Recovered).await.ok()?;
            }
            if let Some(event) = translate(&raw, self.clock.now()) {
                tx.send(TelemetryMessage::Event(event)).await.ok()?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{ManualClock, TelemetryStream};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use hitline_core::types::TelemetryKind;
    use hitline_ingest::translate::RawTelemetryEvent;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Each subscribe pops the next scripted outcome: a list of events to
    /// deliver before the stream closes, or a subscribe error.
    struct ScriptedSource {
        script: Mutex<VecDeque<Result<Vec<RawTelemetryEvent>, TransportError>>>,
        subscribes: AtomicUsize,
        unsubscribes: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Vec<RawTelemetryEvent>, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                subscribes: AtomicUsize::new(0),
                unsubscribes: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn subscribe(
            &self,
            _device_ids: &[String],
        ) -> Result<TelemetryStream, TransportError> {
            self.subscribes.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().expect("lock").pop_front();
            let (tx, rx) = mpsc::channel(16);
            match next {
                Some(Ok(events)) => {
                    for event in events {
                        tx.send(Ok(event)).await.expect("buffered");
                    }
                    Ok(rx)
                }
                Some(Err(e)) => Err(e),
                None => {
                    // Script exhausted: keep the stream open forever.
                    std::mem::forget(tx);
                    Ok(rx)
                }
            }
        }

        async fn unsubscribe(&self) {
            self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T12:00:00Z")
            .expect("valid RFC3339")
            .with_timezone(&Utc)
    }

    fn raw_hit(device: &str, count: u64) -> RawTelemetryEvent {
        RawTelemetryEvent {
            device_id: device.to_string(),
            kind: Some("hit".into()),
            timestamp: None,
            data: serde_json::json!({ "hits": count }),
        }
    }

    fn subscription(source: Arc<ScriptedSource>) -> TelemetrySubscription {
        TelemetrySubscription {
            source,
            clock: Arc::new(ManualClock::new(now())),
            device_ids: vec!["A".into()],
            policy: ReconnectPolicy::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_translated_events_and_resubscribes() {
        let source = ScriptedSource::new(vec![
            Ok(vec![raw_hit("A", 1)]),
            Ok(vec![raw_hit("A", 2)]),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = subscription(source.clone()).spawn(tx, cancel.clone());

        for expected in [1, 2] {
            match rx.recv().await.expect("message") {
                TelemetryMessage::Event(ev) => {
                    assert_eq!(ev.kind, TelemetryKind::Hit);
                    assert_eq!(ev.sequence_or_count, expected);
                    assert_eq!(ev.received_at, now());
                }
                other => panic!("expected event, got {other:?}"),
            }
        }
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 2);

        cancel.cancel();
        handle.await.expect("task joins");
        assert_eq!(source.unsubscribes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_after_repeated_failures_then_recovered() {
        let down = || Err(TransportError::Unreachable("broker".into()));
        let source = ScriptedSource::new(vec![down(), down(), down(), Ok(vec![raw_hit("A", 1)])]);
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = subscription(source.clone()).spawn(tx, cancel.clone());

        assert_eq!(
            rx.recv().await.expect("message"),
            TelemetryMessage::Degraded {
                consecutive_failures: 3,
            }
        );
        let message = rx.recv().await.expect("message");
        assert_eq!(message, TelemetryMessage::Recovered);
        assert!(matches!(rx.recv().await, Some(TelemetryMessage::Event(_))));

        cancel.cancel();
        handle.await.expect("task joins");
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_resubscribe() {
        let down = || Err(TransportError::Unreachable("broker".into()));
        let source = ScriptedSource::new(vec![down(), down()]);
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = subscription(source.clone()).spawn(tx, cancel.clone());

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 2);
        tokio::time::sleep(Duration::from_millis(1_700)).await;
        assert_eq!(source.subscribes.load(Ordering::SeqCst), 3);

        cancel.cancel();
        handle.await.expect("task joins");
    }
}
