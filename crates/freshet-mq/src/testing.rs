//! Test support: publishing into in-memory brokers and collecting what a
//! source emits.
//!
//! These helpers are what the integration tests are written against; they
//! are public so host crates can exercise their own pipelines the same
//! way.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::{sleep, Instant};

use crate::broker::memory::{MemoryBroker, MemoryBrokerProvider};
use crate::broker::Payload;
use crate::config::DestinationKind;
use crate::record::{Record, Value};
use crate::sink::EmissionSink;

/// Publishes messages into a named in-memory broker.
#[derive(Debug)]
pub struct TestPublisher {
    broker: Arc<MemoryBroker>,
}

impl TestPublisher {
    /// Attaches to the broker behind `url`, creating it if needed.
    #[must_use]
    pub fn connect(provider: &MemoryBrokerProvider, url: &str) -> Self {
        Self {
            broker: provider.broker(url),
        }
    }

    /// Publishes a text message, returning its message id.
    pub fn publish_text(&self, destination: &str, kind: DestinationKind, body: &str) -> String {
        self.broker
            .publish(destination, kind, Payload::Text(body.to_string()))
    }

    /// Publishes a byte message, returning its message id.
    pub fn publish_bytes(&self, destination: &str, kind: DestinationKind, body: &[u8]) -> String {
        self.broker
            .publish(destination, kind, Payload::Bytes(Bytes::copy_from_slice(body)))
    }

    /// Publishes a map message, returning its message id.
    pub fn publish_map(
        &self,
        destination: &str,
        kind: DestinationKind,
        pairs: &[(&str, Value)],
    ) -> String {
        let pairs = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect();
        self.broker.publish(destination, kind, Payload::Map(pairs))
    }

    /// The underlying broker, for fault injection.
    #[must_use]
    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }
}

/// Sink that remembers every emitted record.
#[derive(Debug, Default)]
pub struct CollectingSink {
    records: Mutex<Vec<Record>>,
}

impl CollectingSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the records collected so far, in emission order.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().clone()
    }

    /// Number of records collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Whether nothing has been collected yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Polls until at least `count` records arrived or the wait elapses.
    /// Returns whether the count was reached.
    pub async fn wait_for(&self, count: usize, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            if self.records.lock().len() >= count {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl EmissionSink for CollectingSink {
    async fn emit(&self, record: Record) {
        self.records.lock().push(record);
    }
}

#[cfg(test)]
mod tests {
    use crate::record::{FieldType, StreamField, StreamSchema};

    use super::*;

    #[tokio::test]
    async fn test_collecting_sink_remembers_order() {
        let schema = Arc::new(StreamSchema::new(vec![StreamField::new(
            "n",
            FieldType::Int,
        )]));
        let sink = CollectingSink::new();
        sink.emit(Record::new(Arc::clone(&schema), vec![Value::Int(1)]))
            .await;
        sink.emit(Record::new(schema, vec![Value::Int(2)])).await;

        assert!(sink.wait_for(2, Duration::from_millis(100)).await);
        let records = sink.records();
        assert_eq!(records[0].value("n"), Some(&Value::Int(1)));
        assert_eq!(records[1].value("n"), Some(&Value::Int(2)));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let sink = CollectingSink::new();
        assert!(!sink.wait_for(1, Duration::from_millis(20)).await);
    }

    #[test]
    fn test_publisher_creates_broker_on_demand() {
        let provider = MemoryBrokerProvider::new();
        let publisher = TestPublisher::connect(&provider, "vm://ondemand");
        let id = publisher.publish_text("orders", DestinationKind::Queue, "x");
        assert_eq!(id, "mem-1");
        assert_eq!(publisher.broker().url(), "vm://ondemand");
    }
}
