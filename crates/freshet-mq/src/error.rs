//! Error types for the broker source.
//!
//! The taxonomy separates four failure classes with different blast radii:
//!
//! - [`ValidationError`]: rejected configuration, surfaced before any
//!   connection attempt
//! - [`ConnectError`]: the broker could not be reached, authenticated
//!   against, or looked up; fatal to the start attempt
//! - [`DecodeError`]: one message's payload is unusable; the message is
//!   skipped, the connector keeps running
//! - [`ReceiveError`]: the connection dropped mid-stream; triggers
//!   supervised reconnection
//!
//! [`SourceError`] aggregates them for the lifecycle surface.

use thiserror::Error;

use crate::record::FieldType;
use crate::state::ConnectorState;

/// Result alias for connector operations.
pub type SourceResult<T> = Result<T, SourceError>;

// ── ValidationError ────────────────────────────────────────────────

/// Malformed or incomplete source configuration.
///
/// Raised at construction/deployment time, before any network activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required option is absent.
    #[error("missing required option '{0}'")]
    MissingOption(String),

    /// An option value could not be interpreted.
    #[error("invalid value '{value}' for option '{key}': expected {expected}")]
    InvalidOption {
        /// Option key.
        key: String,
        /// The rejected value.
        value: String,
        /// What the option accepts.
        expected: String,
    },

    /// A durable topic subscription is missing one of its mandatory options.
    #[error("durable subscription on topic '{destination}' requires option '{key}'")]
    DurableRequires {
        /// Destination name.
        destination: String,
        /// The absent option key.
        key: String,
    },

    /// Durability was requested for a point-to-point destination.
    #[error("durable subscriptions require a topic destination, but '{destination}' is a queue")]
    DurableQueue {
        /// Destination name.
        destination: String,
    },
}

// ── ConnectError ───────────────────────────────────────────────────

/// Failure to establish a broker connection or resolve its factories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The broker endpoint did not accept a connection.
    #[error("broker unreachable at '{url}': {reason}")]
    Unreachable {
        /// Broker endpoint.
        url: String,
        /// Transport-level detail.
        reason: String,
    },

    /// The broker rejected the supplied credentials.
    #[error("broker at '{url}' rejected the connection credentials")]
    Auth {
        /// Broker endpoint.
        url: String,
    },

    /// A provider or connection-factory lookup failed.
    #[error("lookup failed for '{name}': {reason}")]
    LookupFailed {
        /// The name that failed to resolve.
        name: String,
        /// Why resolution failed.
        reason: String,
    },
}

impl ConnectError {
    /// Returns a stable label for the failure kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreachable { .. } => "unreachable",
            Self::Auth { .. } => "auth",
            Self::LookupFailed { .. } => "lookup-failed",
        }
    }
}

// ── DecodeError ────────────────────────────────────────────────────

/// A single message's payload could not be decoded against the schema.
///
/// Never escalates past the message that caused it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The payload is not parseable in the declared format.
    #[error("malformed {format} payload: {reason}")]
    Malformed {
        /// Format tag of the decoder.
        format: String,
        /// Parser detail.
        reason: String,
    },

    /// A schema field is absent from the payload.
    #[error("missing field '{0}' in payload")]
    MissingField(String),

    /// A payload value does not fit the schema field type.
    #[error("field '{field}' expects {expected}, got '{value}'")]
    TypeMismatch {
        /// Schema field name.
        field: String,
        /// Declared field type.
        expected: FieldType,
        /// The offending value, rendered as text.
        value: String,
    },

    /// No decoder is registered under the requested format tag.
    #[error("no decoder registered for format '{0}'")]
    UnknownFormat(String),

    /// The decoder cannot interpret this payload kind at all.
    #[error("{kind} payloads are not supported by the {format} decoder")]
    UnsupportedPayload {
        /// Format tag of the decoder.
        format: String,
        /// Payload kind label (`text`, `bytes`, `map`).
        kind: &'static str,
    },
}

// ── ReceiveError ───────────────────────────────────────────────────

/// A transient receive-side failure: the subscription is no longer usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// The broker connection dropped underneath the consumer.
    #[error("connection to broker lost: {0}")]
    Disconnected(String),

    /// The consumer was closed while a receive was outstanding.
    #[error("consumer closed")]
    Closed,
}

// ── SourceError ────────────────────────────────────────────────────

/// Top-level connector error surfaced by the lifecycle operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    /// Configuration rejected before any connection attempt.
    #[error("configuration invalid: {0}")]
    Validation(#[from] ValidationError),

    /// The broker connection could not be established.
    #[error("connection failed: {0}")]
    Connect(#[from] ConnectError),

    /// Decoder setup or use failed (e.g., an unknown format tag).
    #[error("decoder error: {0}")]
    Decode(#[from] DecodeError),

    /// A transient receive failure escaped the supervision loop.
    #[error("receive failed: {0}")]
    Receive(#[from] ReceiveError),

    /// The reconnect budget ran out without re-establishing the session.
    #[error("reconnect budget exhausted after {attempts} attempts: {last_error}")]
    ReconnectExhausted {
        /// Attempts made before giving up.
        attempts: u32,
        /// The final connection error, rendered as text.
        last_error: String,
    },

    /// A lifecycle command arrived in a state that does not accept it.
    #[error("invalid connector state: expected {expected}, found {actual}")]
    InvalidState {
        /// The state the command requires.
        expected: ConnectorState,
        /// The state that was observed.
        actual: ConnectorState,
    },

    /// An unexpected internal failure (task join, poisoned handle).
    #[error("internal connector error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::MissingOption("provider.url".into());
        assert_eq!(err.to_string(), "missing required option 'provider.url'");

        let err = ValidationError::DurableRequires {
            destination: "orders".into(),
            key: "connection.factory.jndi.name".into(),
        };
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("connection.factory.jndi.name"));
    }

    #[test]
    fn test_connect_error_kinds() {
        let unreachable = ConnectError::Unreachable {
            url: "vm://x".into(),
            reason: "offline".into(),
        };
        let auth = ConnectError::Auth { url: "vm://x".into() };
        let lookup = ConnectError::LookupFailed {
            name: "BogusFactory".into(),
            reason: "not registered".into(),
        };
        assert_eq!(unreachable.kind(), "unreachable");
        assert_eq!(auth.kind(), "auth");
        assert_eq!(lookup.kind(), "lookup-failed");
    }

    #[test]
    fn test_decode_error_display() {
        let err = DecodeError::TypeMismatch {
            field: "age".into(),
            expected: FieldType::Int,
            value: "twenty".into(),
        };
        assert_eq!(err.to_string(), "field 'age' expects int, got 'twenty'");

        let err = DecodeError::UnknownFormat("csv".into());
        assert_eq!(err.to_string(), "no decoder registered for format 'csv'");
    }

    #[test]
    fn test_source_error_from_conversions() {
        let err: SourceError = ValidationError::MissingOption("destination".into()).into();
        assert!(matches!(err, SourceError::Validation(_)));

        let err: SourceError = ConnectError::Auth { url: "vm://x".into() }.into();
        assert!(matches!(err, SourceError::Connect(_)));

        let err: SourceError = DecodeError::UnknownFormat("yaml".into()).into();
        assert!(matches!(err, SourceError::Decode(_)));

        let err: SourceError = ReceiveError::Closed.into();
        assert!(matches!(err, SourceError::Receive(_)));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = SourceError::InvalidState {
            expected: ConnectorState::Created,
            actual: ConnectorState::Stopped,
        };
        assert_eq!(
            err.to_string(),
            "invalid connector state: expected created, found stopped"
        );
    }
}
