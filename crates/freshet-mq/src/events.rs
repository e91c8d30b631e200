//! Lifecycle event channel.
//!
//! Every observable transition of a source is mirrored onto a bounded
//! channel so hosts and tests can follow the lifecycle without polling
//! state or scraping logs. Delivery is best-effort: a full channel drops
//! the event rather than stalling the delivery loop, and each drop is
//! counted on the source metrics.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::metrics::SourceMetrics;

/// Capacity of the per-source event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// An observable source lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceEvent {
    /// The subscription is open and the delivery loop is running.
    Started,
    /// Delivery is suspended; messages stay queued at the broker.
    Paused,
    /// Delivery resumed after a pause.
    Resumed,
    /// A reconnection attempt is about to run.
    Reconnecting {
        /// 1-based attempt number within the current outage.
        attempt: u32,
    },
    /// The subscription was re-established after an outage.
    Reconnected {
        /// Number of attempts the outage took.
        attempts: u32,
    },
    /// A received message could not be decoded and was skipped.
    DecodeFailed {
        /// Broker-assigned identifier of the offending message.
        message_id: String,
        /// Rendered decode error.
        error: String,
    },
    /// The source gave up: startup failed or the reconnect budget ran out.
    Failed {
        /// Rendered terminal error.
        error: String,
    },
    /// The source shut down cleanly.
    Stopped,
}

/// Sending half of the event channel, shared by the source handle and the
/// delivery loop.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<SourceEvent>,
    metrics: Arc<SourceMetrics>,
}

impl EventSender {
    /// Creates the channel, returning the sender and the receiving half
    /// handed out through `take_events`. Dropped events are counted on
    /// `metrics`.
    #[must_use]
    pub fn channel(metrics: Arc<SourceMetrics>) -> (Self, mpsc::Receiver<SourceEvent>) {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (Self { tx, metrics }, rx)
    }

    /// Publishes an event without blocking. Dropped (counted, with a debug
    /// log) when the channel is full or the receiver is gone.
    pub fn send(&self, event: SourceEvent) {
        if let Err(err) = self.tx.try_send(event) {
            self.metrics.record_event_dropped();
            debug!(error = %err, "source event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (tx, mut rx) = EventSender::channel(Arc::new(SourceMetrics::new()));
        tx.send(SourceEvent::Started);
        tx.send(SourceEvent::Paused);
        tx.send(SourceEvent::Resumed);

        assert_eq!(rx.recv().await, Some(SourceEvent::Started));
        assert_eq!(rx.recv().await, Some(SourceEvent::Paused));
        assert_eq!(rx.recv().await, Some(SourceEvent::Resumed));
    }

    #[tokio::test]
    async fn test_overflow_drops_and_counts_instead_of_blocking() {
        let metrics = Arc::new(SourceMetrics::new());
        let (tx, mut rx) = EventSender::channel(Arc::clone(&metrics));
        for _ in 0..(EVENT_CHANNEL_CAPACITY + 8) {
            tx.send(SourceEvent::Stopped);
        }

        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, EVENT_CHANNEL_CAPACITY);
        assert_eq!(metrics.snapshot().events_dropped, 8);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_is_counted() {
        let metrics = Arc::new(SourceMetrics::new());
        let (tx, rx) = EventSender::channel(Arc::clone(&metrics));
        drop(rx);
        tx.send(SourceEvent::Stopped);
        assert_eq!(metrics.snapshot().events_dropped, 1);
    }
}
