//! # Freshet MQ Connector
//!
//! Message-broker ingestion for Freshet: bridges topic and queue brokers,
//! with durable and non-durable subscriptions, into the internal event
//! stream as schema-typed records.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

/// Broker abstraction - providers, sessions, consumers, and the in-memory broker
pub mod broker;

/// Source configuration - the flat property map and its validated form
pub mod config;

/// Payload decoders - json, xml and keyvalue built-ins plus the registry
pub mod decode;

/// Error taxonomy for validation, connection, decoding and delivery
pub mod error;

/// Lifecycle event channel
pub mod events;

/// Per-source delivery counters
pub mod metrics;

/// Typed records and stream schemas
pub mod record;

/// Downstream record emission
pub mod sink;

/// The broker source and its delivery loop
pub mod source;

/// Connector lifecycle states
pub mod state;

/// Subscription lifecycle - validate, resolve, connect, subscribe
pub mod subscription;

/// Test support - in-memory publishing and record collection
pub mod testing;

pub use config::{ConnectorConfig, MqSourceConfig};
pub use error::{SourceError, SourceResult};
pub use events::SourceEvent;
pub use record::{Record, StreamSchema};
pub use source::MqSource;
pub use state::ConnectorState;
