//! Downstream record emission.
//!
//! The delivery loop hands every decoded record to an [`EmissionSink`].
//! Emission is awaited record by record, so a slow sink backpressures the
//! source instead of piling up memory.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::record::Record;

/// Receives decoded records, in broker delivery order.
#[async_trait]
pub trait EmissionSink: Send + Sync {
    /// Accepts one record. May suspend to apply backpressure.
    async fn emit(&self, record: Record);
}

const _: () = {
    fn _assert_sink_object_safe(_: &dyn EmissionSink) {}
};

/// Sink that forwards records onto a bounded channel.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<Record>,
}

impl ChannelSink {
    /// Creates the sink and the receiving half.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EmissionSink for ChannelSink {
    async fn emit(&self, record: Record) {
        if self.tx.send(record).await.is_err() {
            debug!("record dropped: receiver is gone");
        }
    }
}
