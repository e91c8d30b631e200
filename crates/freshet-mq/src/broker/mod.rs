//! Broker abstraction: providers, sessions, and consumers.
//!
//! The delivery loop never talks to a concrete broker. It resolves a
//! [`BrokerProvider`] by name, opens a [`BrokerSession`] against an
//! endpoint, and pulls messages from a [`MessageConsumer`]. Swapping the
//! transport means registering a different provider; nothing above this
//! seam changes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::config::{DestinationKind, MqSourceConfig};
use crate::error::{ConnectError, ReceiveError};
use crate::record::Value;

pub mod memory;

// ── Messages ──────────────────────────────────────────────────────────────

/// Body of a broker message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// A text body.
    Text(String),
    /// An opaque byte body.
    Bytes(Bytes),
    /// A structured name/value body.
    Map(Vec<(String, Value)>),
}

impl Payload {
    /// Returns the payload kind as a short tag, used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::Map(_) => "map",
        }
    }
}

/// One message as handed over by a broker, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Broker-assigned message identifier.
    pub message_id: String,
    /// Destination the message was consumed from.
    pub destination: String,
    /// Message body.
    pub payload: Payload,
    /// Broker enqueue timestamp, milliseconds since the epoch.
    pub timestamp_ms: i64,
}

// ── Connection parameters ─────────────────────────────────────────────────

/// Where and how to connect: derived from config, stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    /// Broker URL (`provider.url`).
    pub url: String,
    /// Connection-factory name to look up at the broker.
    pub connection_factory: String,
    /// Optional username.
    pub username: Option<String>,
    /// Optional password.
    pub password: Option<String>,
}

impl BrokerEndpoint {
    /// Builds the endpoint for a source config, resolving the
    /// connection-factory default for the destination kind.
    #[must_use]
    pub fn from_source_config(config: &MqSourceConfig) -> Self {
        Self {
            url: config.provider_url.clone(),
            connection_factory: config.resolved_connection_factory().to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

/// What to subscribe to within a session.
///
/// For durable subscriptions the `client_id` is the subscription identity:
/// reconnecting with the same identity resumes the same subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSpec {
    /// Topic or queue name.
    pub destination: String,
    /// Destination semantics.
    pub kind: DestinationKind,
    /// Whether the subscription survives disconnection.
    pub durable: bool,
    /// Durable subscriber identity. Always `Some` when `durable` is set.
    pub client_id: Option<String>,
}

impl SubscriptionSpec {
    /// Builds the subscription spec for a source config.
    #[must_use]
    pub fn from_source_config(config: &MqSourceConfig) -> Self {
        Self {
            destination: config.destination.clone(),
            kind: config.kind,
            durable: config.durable,
            client_id: config.client_id.clone(),
        }
    }
}

// ── Traits ────────────────────────────────────────────────────────────────

/// A broker implementation, registered under a context-factory name.
#[async_trait]
pub trait BrokerProvider: Send + Sync {
    /// Opens a session against the endpoint.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] classifying the failure: endpoint
    /// unreachable, credentials rejected, or connection-factory name
    /// unknown.
    async fn connect(&self, endpoint: &BrokerEndpoint)
        -> Result<Box<dyn BrokerSession>, ConnectError>;
}

impl fmt::Debug for dyn BrokerProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("dyn BrokerProvider")
    }
}

/// An open connection to a broker.
#[async_trait]
pub trait BrokerSession: Send + Sync {
    /// Attaches a consumer to a destination.
    ///
    /// # Errors
    ///
    /// Returns a [`ConnectError`] when the destination cannot be resolved
    /// or the subscription cannot be established.
    async fn subscribe(&self, spec: &SubscriptionSpec)
        -> Result<Box<dyn MessageConsumer>, ConnectError>;

    /// Closes the session and detaches its consumers.
    ///
    /// Idempotent. Durable subscriptions keep accumulating messages at the
    /// broker after the session is gone.
    async fn close(&self);
}

/// A single-destination message stream.
#[async_trait]
pub trait MessageConsumer: Send {
    /// Waits for the next message.
    ///
    /// Must be cancel-safe: when the future is dropped before completion,
    /// no message may be lost. Implementations must not take a message off
    /// the broker until they are about to return it.
    ///
    /// # Errors
    ///
    /// Returns [`ReceiveError::Disconnected`] when the connection is lost
    /// and [`ReceiveError::Closed`] when the consumer was shut down.
    async fn receive(&mut self) -> Result<RawMessage, ReceiveError>;
}

// Compile-time checks that the broker traits are object-safe.
const _: () = {
    fn _assert_provider_object_safe(_: &dyn BrokerProvider) {}
    fn _assert_session_object_safe(_: &dyn BrokerSession) {}
    fn _assert_consumer_object_safe(_: &dyn MessageConsumer) {}
};

// ── Provider registry ─────────────────────────────────────────────────────

/// Maps context-factory names to broker providers.
///
/// The `factory.initial` option selects the provider at subscription time;
/// an unknown name surfaces as a lookup failure, not a panic.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn BrokerProvider>>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider under a context-factory name, replacing any
    /// previous registration.
    pub fn register(&self, name: impl Into<String>, provider: Arc<dyn BrokerProvider>) {
        self.providers.write().insert(name.into(), provider);
    }

    /// Looks up a provider by context-factory name.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::LookupFailed`] when no provider is
    /// registered under the name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn BrokerProvider>, ConnectError> {
        self.providers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ConnectError::LookupFailed {
                name: name.to_string(),
                reason: "no broker provider registered under this context factory".to_string(),
            })
    }

    /// Returns the registered context-factory names, unordered.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.providers.read().keys().cloned().collect()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
