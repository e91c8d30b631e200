//! Per-source delivery counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the delivery loop.
///
/// Shared between the loop and the source handle; reads are lock-free.
#[derive(Debug, Default)]
pub struct SourceMetrics {
    messages_received: AtomicU64,
    records_emitted: AtomicU64,
    decode_failures: AtomicU64,
    reconnects: AtomicU64,
    messages_discarded: AtomicU64,
    events_dropped: AtomicU64,
}

impl SourceMetrics {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a message handed over by the broker.
    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a record emitted downstream.
    pub fn record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a message skipped because it failed to decode.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a successfully re-established subscription.
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a received message dropped during shutdown.
    pub fn record_discarded(&self) {
        self.messages_discarded.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a lifecycle event dropped by the bounded event channel.
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> SourceMetricsSnapshot {
        SourceMetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            messages_discarded: self.messages_discarded.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A consistent-enough view of the counters at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceMetricsSnapshot {
    /// Messages handed over by the broker.
    pub messages_received: u64,
    /// Records emitted downstream.
    pub records_emitted: u64,
    /// Messages skipped because they failed to decode.
    pub decode_failures: u64,
    /// Successfully re-established subscriptions.
    pub reconnects: u64,
    /// Received messages dropped during shutdown.
    pub messages_discarded: u64,
    /// Lifecycle events dropped because the channel was full or the
    /// receiver was gone.
    pub events_dropped: u64,
}
