//! The delivery loop: receive, hold, decode, emit.
//!
//! One loop per source, running on its own task. Receipt, decoding and
//! emission are strictly serialized, so records reach the sink in broker
//! delivery order, exactly once. The loop owns the subscription; lifecycle
//! commands arrive over watch channels and are honored between messages,
//! never in the middle of one.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::broker::RawMessage;
use crate::decode::RecordDecoder;
use crate::error::{ReceiveError, SourceError};
use crate::events::{EventSender, SourceEvent};
use crate::metrics::SourceMetrics;
use crate::sink::EmissionSink;
use crate::state::{ConnectorState, StateCell};
use crate::subscription::{ActiveSubscription, SubscriptionManager};

use super::reconnect::ReconnectPolicy;

pub(crate) struct DeliveryLoop {
    pub(crate) name: String,
    pub(crate) manager: SubscriptionManager,
    pub(crate) decoder: Box<dyn RecordDecoder>,
    pub(crate) sink: Arc<dyn EmissionSink>,
    pub(crate) state: Arc<StateCell>,
    pub(crate) pause_rx: watch::Receiver<bool>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
    pub(crate) done_tx: Arc<watch::Sender<bool>>,
    pub(crate) events: EventSender,
    pub(crate) metrics: Arc<SourceMetrics>,
    pub(crate) policy: ReconnectPolicy,
}

enum Outcome {
    Shutdown,
    Failed,
}

enum Step {
    Continue,
    Shutdown,
}

enum Reconnect {
    Resumed(ActiveSubscription),
    Shutdown,
    GaveUp,
}

impl DeliveryLoop {
    pub(crate) async fn run(mut self, subscription: ActiveSubscription) {
        let (remaining, outcome) = self.drive(subscription).await;
        if let Some(active) = remaining {
            self.manager.close(active).await;
        }
        // The terminal transition is claimed exactly once, here or by a
        // concurrent `stop` call; only the winner announces it.
        if matches!(outcome, Outcome::Shutdown)
            && self.state.enter_terminal(ConnectorState::Stopped)
        {
            self.events.send(SourceEvent::Stopped);
            info!(stream = %self.name, "source stopped");
        }
        self.done_tx.send_replace(true);
    }

    async fn drive(
        &mut self,
        mut active: ActiveSubscription,
    ) -> (Option<ActiveSubscription>, Outcome) {
        loop {
            let paused = *self.pause_rx.borrow_and_update();
            if paused && !self.park_while_paused().await {
                return (Some(active), Outcome::Shutdown);
            }
            if *self.shutdown_rx.borrow_and_update() {
                return (Some(active), Outcome::Shutdown);
            }

            let received = tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => return (Some(active), Outcome::Shutdown),
                _ = self.pause_rx.changed() => continue,
                result = active.consumer.receive() => result,
            };

            match received {
                Ok(message) => match self.process(message).await {
                    Step::Continue => {}
                    Step::Shutdown => return (Some(active), Outcome::Shutdown),
                },
                Err(e) => {
                    warn!(stream = %self.name, error = %e, "broker connection lost");
                    self.state.set(ConnectorState::Reconnecting);
                    self.manager.close(active).await;
                    match self.reconnect(e.to_string()).await {
                        Reconnect::Resumed(next) => active = next,
                        Reconnect::Shutdown => return (None, Outcome::Shutdown),
                        Reconnect::GaveUp => return (None, Outcome::Failed),
                    }
                }
            }
        }
    }

    /// Handles one received message end to end.
    ///
    /// A pause that lands after the message left the broker holds it here,
    /// undecoded, until resume; it is deliberately discarded (and counted)
    /// only when shutdown arrives during the hold.
    async fn process(&mut self, message: RawMessage) -> Step {
        self.metrics.record_received();

        let paused = *self.pause_rx.borrow_and_update();
        if paused && !self.park_while_paused().await {
            warn!(
                stream = %self.name,
                message_id = %message.message_id,
                "in-flight message discarded at shutdown"
            );
            self.metrics.record_discarded();
            return Step::Shutdown;
        }

        match self.decoder.decode(&message) {
            Ok(records) => {
                for record in records {
                    self.sink.emit(record).await;
                    self.metrics.record_emitted();
                }
            }
            Err(e) => {
                warn!(
                    stream = %self.name,
                    message_id = %message.message_id,
                    error = %e,
                    "message failed to decode; skipping"
                );
                self.metrics.record_decode_failure();
                self.events.send(SourceEvent::DecodeFailed {
                    message_id: message.message_id,
                    error: e.to_string(),
                });
            }
        }
        Step::Continue
    }

    /// Parks until resume or shutdown. Returns `false` on shutdown.
    async fn park_while_paused(&mut self) -> bool {
        self.state.set(ConnectorState::Paused);
        self.events.send(SourceEvent::Paused);
        info!(stream = %self.name, "source paused");
        loop {
            tokio::select! {
                biased;
                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                changed = self.pause_rx.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
            if *self.shutdown_rx.borrow_and_update() {
                return false;
            }
            if !*self.pause_rx.borrow_and_update() {
                self.state.set(ConnectorState::Running);
                self.events.send(SourceEvent::Resumed);
                info!(stream = %self.name, "source resumed");
                return true;
            }
        }
    }

    /// Re-establishes the subscription after a mid-stream drop.
    async fn reconnect(&mut self, mut last_error: String) -> Reconnect {
        loop {
            let Some(delay) = self.policy.next_backoff() else {
                let error = if self.policy.max_retries_exceeded() {
                    SourceError::ReconnectExhausted {
                        attempts: self.policy.attempt(),
                        last_error,
                    }
                } else {
                    SourceError::Receive(ReceiveError::Disconnected(last_error))
                };
                if self.state.enter_terminal(ConnectorState::Failed) {
                    error!(stream = %self.name, error = %error, "source failed");
                    self.events.send(SourceEvent::Failed {
                        error: error.to_string(),
                    });
                }
                return Reconnect::GaveUp;
            };

            self.events.send(SourceEvent::Reconnecting {
                attempt: self.policy.attempt(),
            });
            debug!(
                stream = %self.name,
                attempt = self.policy.attempt(),
                delay = ?delay,
                "reconnect backoff"
            );

            tokio::select! {
                biased;
                _ = self.shutdown_rx.changed() => return Reconnect::Shutdown,
                () = sleep(delay) => {}
            }
            if *self.shutdown_rx.borrow_and_update() {
                return Reconnect::Shutdown;
            }

            match self.manager.open().await {
                Ok(active) => {
                    let attempts = self.policy.attempt();
                    self.policy.reset();
                    self.metrics.record_reconnect();
                    self.state.set(ConnectorState::Running);
                    self.events.send(SourceEvent::Reconnected { attempts });
                    info!(stream = %self.name, attempts, "subscription re-established");
                    return Reconnect::Resumed(active);
                }
                Err(e) => {
                    warn!(
                        stream = %self.name,
                        attempt = self.policy.attempt(),
                        error = %e,
                        "reconnect attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }
    }
}
