//! Broker source: the host-facing lifecycle handle.
//!
//! An [`MqSource`] is created once, started once, and driven through
//! pause/resume/stop while a background task does the actual work. All
//! handle methods are cheap; the delivery loop in [`delivery`] owns the
//! subscription and reacts to lifecycle commands over watch channels.

mod delivery;
mod reconnect;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::broker::ProviderRegistry;
use crate::config::MqSourceConfig;
use crate::decode::DecoderRegistry;
use crate::error::{SourceError, SourceResult};
use crate::events::{EventSender, SourceEvent};
use crate::metrics::{SourceMetrics, SourceMetricsSnapshot};
use crate::record::StreamSchema;
use crate::sink::EmissionSink;
use crate::state::{ConnectorState, StateCell};
use crate::subscription::{CLOSE_TIMEOUT, SubscriptionManager};

use self::delivery::DeliveryLoop;
use self::reconnect::ReconnectPolicy;

/// Upper bound on how long `stop` waits for the delivery loop to finish.
/// Exceeds [`CLOSE_TIMEOUT`] so a full-budget session close still completes
/// inside the join window.
const STOP_TIMEOUT: Duration = CLOSE_TIMEOUT.saturating_add(Duration::from_secs(1));

/// A message-broker ingestion source.
///
/// Bridges one broker destination into the internal event stream: messages
/// are received serially, decoded with the configured format, and emitted
/// as schema-typed records. The handle is shareable (`Arc`) and all
/// lifecycle operations may be called from any task.
pub struct MqSource {
    name: String,
    config: MqSourceConfig,
    schema: Arc<StreamSchema>,
    providers: Arc<ProviderRegistry>,
    decoders: Arc<DecoderRegistry>,
    sink: Arc<dyn EmissionSink>,
    state: Arc<StateCell>,
    pause_tx: watch::Sender<bool>,
    pause_rx: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    done_tx: Arc<watch::Sender<bool>>,
    done_rx: watch::Receiver<bool>,
    events: EventSender,
    events_rx: Mutex<Option<mpsc::Receiver<SourceEvent>>>,
    metrics: Arc<SourceMetrics>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MqSource {
    /// Creates a source in the `Created` state. Nothing connects until
    /// [`start`](Self::start).
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        config: MqSourceConfig,
        schema: Arc<StreamSchema>,
        providers: Arc<ProviderRegistry>,
        decoders: Arc<DecoderRegistry>,
        sink: Arc<dyn EmissionSink>,
    ) -> Self {
        let (pause_tx, pause_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let metrics = Arc::new(SourceMetrics::new());
        let (events, events_rx) = EventSender::channel(Arc::clone(&metrics));
        Self {
            name: name.into(),
            config,
            schema,
            providers,
            decoders,
            sink,
            state: Arc::new(StateCell::new()),
            pause_tx,
            pause_rx,
            shutdown_tx,
            shutdown_rx,
            done_tx: Arc::new(done_tx),
            done_rx,
            events,
            events_rx: Mutex::new(Some(events_rx)),
            metrics,
            task: Mutex::new(None),
        }
    }

    /// Opens the subscription and spawns the delivery loop.
    ///
    /// On any failure the source lands in `Failed`, exactly one error is
    /// logged for the stream, one `Failed` event is published, and the
    /// error is returned.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::InvalidState`] unless the source is in
    /// `Created`, or the validation, decoder, or connection error that
    /// prevented startup.
    pub async fn start(&self) -> SourceResult<()> {
        self.state
            .transition(ConnectorState::Created, ConnectorState::Starting)
            .map_err(|actual| SourceError::InvalidState {
                expected: ConnectorState::Created,
                actual,
            })?;

        match self.try_start().await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(stream = %self.name, error = %e, "could not start the receiver for stream");
                if self.state.enter_terminal(ConnectorState::Failed) {
                    self.events.send(SourceEvent::Failed {
                        error: e.to_string(),
                    });
                }
                self.done_tx.send_replace(true);
                Err(e)
            }
        }
    }

    async fn try_start(&self) -> SourceResult<()> {
        let decoder = self
            .decoders
            .instantiate(&self.config.format, Arc::clone(&self.schema))?;
        let manager = SubscriptionManager::new(Arc::clone(&self.providers), self.config.clone());
        let subscription = manager.open().await?;

        let delivery = DeliveryLoop {
            name: self.name.clone(),
            manager,
            decoder,
            sink: Arc::clone(&self.sink),
            state: Arc::clone(&self.state),
            pause_rx: self.pause_rx.clone(),
            shutdown_rx: self.shutdown_rx.clone(),
            done_tx: Arc::clone(&self.done_tx),
            events: self.events.clone(),
            metrics: Arc::clone(&self.metrics),
            policy: ReconnectPolicy::new(self.config.reconnect.clone()),
        };

        self.state.set(ConnectorState::Running);
        self.events.send(SourceEvent::Started);
        info!(
            stream = %self.name,
            destination = %self.config.destination,
            kind = %self.config.kind,
            format = %self.config.format,
            "source started"
        );

        let handle = tokio::spawn(delivery.run(subscription));
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Suspends delivery. Undecoded messages stay at the broker; an
    /// in-flight message is held and processed on resume. Idempotent, and
    /// latches even before `start` or during reconnection.
    pub fn pause(&self) {
        self.pause_tx.send_if_modified(|paused| {
            if *paused {
                false
            } else {
                *paused = true;
                true
            }
        });
    }

    /// Resumes delivery after a pause. Idempotent.
    pub fn resume(&self) {
        self.pause_tx.send_if_modified(|paused| {
            if *paused {
                *paused = false;
                true
            } else {
                false
            }
        });
    }

    /// Stops the source and waits for the delivery loop to wind down.
    ///
    /// No-op on an already terminal source. A source that never started
    /// goes straight to `Stopped`. Safe to call from several tasks at
    /// once: one caller joins the loop while the rest wait out the same
    /// wind-down, and `Stopped` is published exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Internal`] when the delivery task panicked.
    pub async fn stop(&self) -> SourceResult<()> {
        if self.state.get().is_terminal() {
            return Ok(());
        }
        if self
            .state
            .transition(ConnectorState::Created, ConnectorState::Stopped)
            .is_ok()
        {
            self.events.send(SourceEvent::Stopped);
            info!(stream = %self.name, "source stopped before start");
            self.done_tx.send_replace(true);
            return Ok(());
        }

        self.shutdown_tx.send_if_modified(|stop| {
            if *stop {
                false
            } else {
                *stop = true;
                true
            }
        });

        let handle = self.task.lock().take();
        match handle {
            Some(handle) => {
                let abort = handle.abort_handle();
                match timeout(STOP_TIMEOUT, handle).await {
                    Ok(Ok(())) => {}
                    Ok(Err(join)) => {
                        if self.state.enter_terminal(ConnectorState::Stopped) {
                            self.events.send(SourceEvent::Stopped);
                        }
                        self.done_tx.send_replace(true);
                        return Err(SourceError::Internal(format!(
                            "delivery task did not finish cleanly: {join}"
                        )));
                    }
                    Err(_) => {
                        warn!(stream = %self.name, "delivery loop did not stop in time; aborting");
                        abort.abort();
                    }
                }
            }
            None => self.wait_for_wind_down().await,
        }

        if self.state.enter_terminal(ConnectorState::Stopped) {
            self.events.send(SourceEvent::Stopped);
        }
        self.done_tx.send_replace(true);
        Ok(())
    }

    /// Waits for whoever claimed the task handle to finish winding down.
    /// The delivery loop flips the completion flag as its last act; `stop`
    /// flips it on the paths where no loop ever runs.
    async fn wait_for_wind_down(&self) {
        let mut done = self.done_rx.clone();
        let settled = async {
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        };
        if timeout(STOP_TIMEOUT, settled).await.is_err() {
            warn!(stream = %self.name, "wind-down wait timed out");
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectorState {
        self.state.get()
    }

    /// Point-in-time delivery counters.
    #[must_use]
    pub fn metrics(&self) -> SourceMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Takes the lifecycle event receiver. Yields `Some` exactly once.
    #[must_use]
    pub fn take_events(&self) -> Option<mpsc::Receiver<SourceEvent>> {
        self.events_rx.lock().take()
    }

    /// Source name, used in log, metrics and event context.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The validated config this source runs with.
    #[must_use]
    pub fn config(&self) -> &MqSourceConfig {
        &self.config
    }

    /// Schema of the emitted records.
    #[must_use]
    pub fn schema(&self) -> &StreamSchema {
        &self.schema
    }
}

impl fmt::Debug for MqSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MqSource")
            .field("name", &self.name)
            .field("destination", &self.config.destination)
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}
