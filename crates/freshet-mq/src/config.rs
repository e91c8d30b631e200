//! Source configuration: the flat property map handed in by the host and
//! its typed, validated form.
//!
//! Hosts describe a source as `option -> value` string pairs. [`ConnectorConfig`]
//! carries that map verbatim; [`MqSourceConfig::from_config`] applies defaults,
//! parses typed values, and runs the pre-connection validation rules, so a
//! malformed declaration is rejected at deployment time rather than at runtime.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SourceResult, ValidationError};

/// Connection-factory name used for topic destinations when none is given.
pub const DEFAULT_TOPIC_CONNECTION_FACTORY: &str = "TopicConnectionFactory";

/// Connection-factory name used for queue destinations when none is given.
pub const DEFAULT_QUEUE_CONNECTION_FACTORY: &str = "QueueConnectionFactory";

/// Decoder format tag applied when the `format` option is absent.
pub const DEFAULT_FORMAT: &str = "json";

// ---------------------------------------------------------------------------
// ConnectorConfig
// ---------------------------------------------------------------------------

/// A flat, untyped source declaration: named options mapped to string values.
///
/// Unknown keys are carried but ignored (forward compatibility).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    connector_type: String,
    properties: HashMap<String, String>,
}

impl ConnectorConfig {
    /// Creates an empty config for the given connector type.
    #[must_use]
    pub fn new(connector_type: impl Into<String>) -> Self {
        Self {
            connector_type: connector_type.into(),
            properties: HashMap::new(),
        }
    }

    /// Creates a config from an existing property map.
    #[must_use]
    pub fn with_properties(
        connector_type: impl Into<String>,
        properties: HashMap<String, String>,
    ) -> Self {
        Self {
            connector_type: connector_type.into(),
            properties,
        }
    }

    /// Returns the connector type identifier.
    #[must_use]
    pub fn connector_type(&self) -> &str {
        &self.connector_type
    }

    /// Sets an option, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Returns an option value, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// Returns an option parsed into `T`, or `None` if the key is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidOption`] when the value does not
    /// parse as `T`.
    pub fn get_parsed<T: FromStr>(&self, key: &str) -> SourceResult<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(raw) => raw.parse::<T>().map(Some).map_err(|_| {
                ValidationError::InvalidOption {
                    key: key.to_string(),
                    value: raw.to_string(),
                    expected: std::any::type_name::<T>().to_string(),
                }
                .into()
            }),
        }
    }

    /// Returns an option value, failing if it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingOption`] when the key is absent.
    pub fn require(&self, key: &str) -> SourceResult<&str> {
        self.get(key)
            .ok_or_else(|| ValidationError::MissingOption(key.to_string()).into())
    }

    /// Returns the full property map.
    #[must_use]
    pub fn properties(&self) -> &HashMap<String, String> {
        &self.properties
    }
}

// ---------------------------------------------------------------------------
// DestinationKind
// ---------------------------------------------------------------------------

/// Destination semantics: publish-subscribe or point-to-point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationKind {
    /// Publish-subscribe: every attached subscription sees every message.
    Topic,
    /// Point-to-point: each message is consumed once.
    Queue,
}

impl std::fmt::Display for DestinationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic => write!(f, "topic"),
            Self::Queue => write!(f, "queue"),
        }
    }
}

// ---------------------------------------------------------------------------
// ReconnectConfig
// ---------------------------------------------------------------------------

/// Helpers for serializing `Duration` as integer milliseconds.
mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}

const fn default_true() -> bool {
    true
}

const fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

const fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

const fn default_backoff_multiplier() -> f64 {
    2.0
}

/// Mid-stream reconnection policy.
///
/// Governs the `Reconnecting` state: how long to back off between attempts
/// and when, if ever, to give up.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Whether to reconnect at all after a mid-stream drop.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Delay before the first retry.
    #[serde(with = "duration_millis", default = "default_initial_delay")]
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay.
    #[serde(with = "duration_millis", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Attempt budget. `None` retries indefinitely.
    #[serde(default)]
    pub max_retries: Option<u32>,

    /// Apply deterministic jitter to each delay.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            max_retries: None,
            jitter: true,
        }
    }
}

// ---------------------------------------------------------------------------
// MqSourceConfig
// ---------------------------------------------------------------------------

/// Immutable, validated configuration of one broker source.
///
/// Built once by [`from_config`](Self::from_config) and never mutated; the
/// delivery loop reuses it verbatim for every reconnection so durable
/// subscription identity stays stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqSourceConfig {
    /// Broker provider identifier (`factory.initial`).
    pub context_factory: String,

    /// Broker endpoint (`provider.url`).
    pub provider_url: String,

    /// Topic or queue name (`destination`).
    pub destination: String,

    /// Destination semantics (`connection.factory.type`).
    pub kind: DestinationKind,

    /// Explicit connection-factory lookup name
    /// (`connection.factory.jndi.name`), if given.
    pub connection_factory: Option<String>,

    /// Durable subscription flag (`transport.mq.SubscriptionDurable`).
    pub durable: bool,

    /// Durable subscriber identity
    /// (`transport.mq.DurableSubscriberClientID`).
    pub client_id: Option<String>,

    /// Optional broker username (`connection.username`).
    pub username: Option<String>,

    /// Optional broker password (`connection.password`).
    pub password: Option<String>,

    /// Decoder format tag (`format`).
    pub format: String,

    /// Mid-stream reconnection policy (`reconnect.*`).
    pub reconnect: ReconnectConfig,
}

impl MqSourceConfig {
    /// Parses and validates a typed source config from the flat option map.
    ///
    /// Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] (wrapped in `SourceError`) when a
    /// required option is absent, a value does not parse, or the durable
    /// subscription rules of [`validate`](Self::validate) are violated.
    pub fn from_config(config: &ConnectorConfig) -> SourceResult<Self> {
        let context_factory = config.require("factory.initial")?.to_string();
        let provider_url = config.require("provider.url")?.to_string();
        let destination = config.require("destination")?.to_string();
        let kind = Self::parse_kind(config)?;

        let connection_factory = config
            .get("connection.factory.jndi.name")
            .map(ToString::to_string);
        let durable: bool = config
            .get_parsed("transport.mq.SubscriptionDurable")?
            .unwrap_or(false);
        let client_id = config
            .get("transport.mq.DurableSubscriberClientID")
            .map(ToString::to_string);

        let username = config.get("connection.username").map(ToString::to_string);
        let password = config.get("connection.password").map(ToString::to_string);

        let format = config
            .get("format")
            .unwrap_or(DEFAULT_FORMAT)
            .to_lowercase();

        let reconnect = Self::parse_reconnect(config)?;

        let parsed = Self {
            context_factory,
            provider_url,
            destination,
            kind,
            connection_factory,
            durable,
            client_id,
            username,
            password,
            format,
            reconnect,
        };
        parsed.validate()?;
        Ok(parsed)
    }

    /// Checks the durable-subscription rules without touching the network.
    ///
    /// Runs at construction and again in the subscription manager before
    /// every connection attempt.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] when durability is requested for a
    /// queue, or a durable topic subscription lacks an explicit
    /// connection-factory name or client identity.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.durable {
            return Ok(());
        }
        if self.kind == DestinationKind::Queue {
            return Err(ValidationError::DurableQueue {
                destination: self.destination.clone(),
            });
        }
        if self.connection_factory.is_none() {
            return Err(ValidationError::DurableRequires {
                destination: self.destination.clone(),
                key: "connection.factory.jndi.name".to_string(),
            });
        }
        if self.client_id.is_none() {
            return Err(ValidationError::DurableRequires {
                destination: self.destination.clone(),
                key: "transport.mq.DurableSubscriberClientID".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the connection-factory name to look up: the explicit value,
    /// or the conventional default for the destination kind.
    #[must_use]
    pub fn resolved_connection_factory(&self) -> &str {
        self.connection_factory
            .as_deref()
            .unwrap_or(match self.kind {
                DestinationKind::Topic => DEFAULT_TOPIC_CONNECTION_FACTORY,
                DestinationKind::Queue => DEFAULT_QUEUE_CONNECTION_FACTORY,
            })
    }

    /// Parses the `connection.factory.type` property.
    fn parse_kind(config: &ConnectorConfig) -> SourceResult<DestinationKind> {
        match config.get("connection.factory.type").map(str::to_lowercase) {
            Some(ref s) if s == "topic" => Ok(DestinationKind::Topic),
            Some(ref s) if s == "queue" => Ok(DestinationKind::Queue),
            Some(other) => Err(ValidationError::InvalidOption {
                key: "connection.factory.type".to_string(),
                value: other,
                expected: "'topic' or 'queue'".to_string(),
            }
            .into()),
            None => Ok(DestinationKind::Queue),
        }
    }

    /// Parses the `reconnect.*` properties.
    fn parse_reconnect(config: &ConnectorConfig) -> SourceResult<ReconnectConfig> {
        let enabled: bool = config.get_parsed("reconnect.enabled")?.unwrap_or(true);
        let initial_delay_ms: u64 = config
            .get_parsed("reconnect.initial.delay.ms")?
            .unwrap_or_else(|| {
                u64::try_from(default_initial_delay().as_millis()).unwrap_or(u64::MAX)
            });
        let max_delay_ms: u64 = config.get_parsed("reconnect.max.delay.ms")?.unwrap_or_else(
            || u64::try_from(default_max_delay().as_millis()).unwrap_or(u64::MAX),
        );
        let backoff_multiplier: f64 = config
            .get_parsed("reconnect.backoff.multiplier")?
            .unwrap_or_else(default_backoff_multiplier);
        let max_retries: Option<u32> = config.get_parsed("reconnect.max.retries")?;
        let jitter: bool = config.get_parsed("reconnect.jitter")?.unwrap_or(true);

        Ok(ReconnectConfig {
            enabled,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            backoff_multiplier,
            max_retries,
            jitter,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic_config() -> ConnectorConfig {
        ConnectorConfig::new("mq")
            .with("factory.initial", "memory")
            .with("provider.url", "vm://ingest")
            .with("destination", "orders")
            .with("connection.factory.type", "topic")
    }

    // ── ConnectorConfig ──

    #[test]
    fn test_get_set_require() {
        let mut config = ConnectorConfig::new("mq");
        config.set("destination", "orders");
        assert_eq!(config.connector_type(), "mq");
        assert_eq!(config.get("destination"), Some("orders"));
        assert_eq!(config.get("missing"), None);
        assert_eq!(config.require("destination").unwrap(), "orders");
        assert!(config.require("missing").is_err());
    }

    #[test]
    fn test_get_parsed() {
        let config = ConnectorConfig::new("mq").with("reconnect.max.retries", "5");
        let parsed: Option<u32> = config.get_parsed("reconnect.max.retries").unwrap();
        assert_eq!(parsed, Some(5));
        let absent: Option<u32> = config.get_parsed("missing").unwrap();
        assert_eq!(absent, None);
    }

    #[test]
    fn test_get_parsed_rejects_garbage() {
        let config = ConnectorConfig::new("mq").with("reconnect.max.retries", "lots");
        let result: SourceResult<Option<u32>> = config.get_parsed("reconnect.max.retries");
        assert!(result.is_err());
    }

    #[test]
    fn test_with_properties() {
        let mut props = HashMap::new();
        props.insert("destination".to_string(), "orders".to_string());
        let config = ConnectorConfig::with_properties("mq", props);
        assert_eq!(config.get("destination"), Some("orders"));
        assert_eq!(config.properties().len(), 1);
    }

    // ── ReconnectConfig ──

    #[test]
    fn test_reconnect_defaults() {
        let cfg = ReconnectConfig::default();
        assert!(cfg.enabled);
        assert_eq!(cfg.initial_delay, Duration::from_millis(100));
        assert_eq!(cfg.max_delay, Duration::from_secs(30));
        assert!((cfg.backoff_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(cfg.max_retries, None);
        assert!(cfg.jitter);
    }

    #[test]
    fn test_reconnect_serde_round_trip() {
        let cfg = ReconnectConfig {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(250),
            ..ReconnectConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(json.contains("\"initial_delay\":250"));
        let back: ReconnectConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
    }

    // ── MqSourceConfig::from_config ──

    #[test]
    fn test_from_config_durable_topic() {
        let config = topic_config()
            .with("connection.factory.jndi.name", "TopicConnectionFactory")
            .with("transport.mq.SubscriptionDurable", "true")
            .with("transport.mq.DurableSubscriberClientID", "ingest-1");
        let parsed = MqSourceConfig::from_config(&config).unwrap();

        assert_eq!(parsed.context_factory, "memory");
        assert_eq!(parsed.provider_url, "vm://ingest");
        assert_eq!(parsed.destination, "orders");
        assert_eq!(parsed.kind, DestinationKind::Topic);
        assert!(parsed.durable);
        assert_eq!(parsed.client_id.as_deref(), Some("ingest-1"));
        assert_eq!(parsed.resolved_connection_factory(), "TopicConnectionFactory");
    }

    #[test]
    fn test_from_config_queue_defaults() {
        let config = ConnectorConfig::new("mq")
            .with("factory.initial", "memory")
            .with("provider.url", "vm://ingest")
            .with("destination", "orders");
        let parsed = MqSourceConfig::from_config(&config).unwrap();

        assert_eq!(parsed.kind, DestinationKind::Queue);
        assert!(!parsed.durable);
        assert_eq!(parsed.format, "json");
        assert_eq!(
            parsed.resolved_connection_factory(),
            DEFAULT_QUEUE_CONNECTION_FACTORY
        );
        assert_eq!(parsed.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn test_from_config_missing_provider_url_errors() {
        let config = ConnectorConfig::new("mq")
            .with("factory.initial", "memory")
            .with("destination", "orders");
        let err = MqSourceConfig::from_config(&config).unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration invalid: missing required option 'provider.url'"
        );
    }

    #[test]
    fn test_from_config_missing_context_factory_errors() {
        let config = ConnectorConfig::new("mq")
            .with("provider.url", "vm://ingest")
            .with("destination", "orders");
        assert!(MqSourceConfig::from_config(&config).is_err());
    }

    #[test]
    fn test_from_config_invalid_kind_errors() {
        let config = topic_config().with("connection.factory.type", "fanout");
        let err = MqSourceConfig::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("fanout"));
    }

    #[test]
    fn test_durable_topic_without_factory_name_fails_validation() {
        let config = topic_config()
            .with("transport.mq.SubscriptionDurable", "true")
            .with("transport.mq.DurableSubscriberClientID", "ingest-1");
        let err = MqSourceConfig::from_config(&config).unwrap_err();
        assert!(err
            .to_string()
            .contains("requires option 'connection.factory.jndi.name'"));
    }

    #[test]
    fn test_durable_topic_without_client_id_fails_validation() {
        let config = topic_config()
            .with("connection.factory.jndi.name", "TopicConnectionFactory")
            .with("transport.mq.SubscriptionDurable", "true");
        let err = MqSourceConfig::from_config(&config).unwrap_err();
        assert!(err
            .to_string()
            .contains("transport.mq.DurableSubscriberClientID"));
    }

    #[test]
    fn test_durable_queue_fails_validation() {
        let config = ConnectorConfig::new("mq")
            .with("factory.initial", "memory")
            .with("provider.url", "vm://ingest")
            .with("destination", "orders")
            .with("transport.mq.SubscriptionDurable", "true")
            .with("transport.mq.DurableSubscriberClientID", "ingest-1");
        let err = MqSourceConfig::from_config(&config).unwrap_err();
        assert!(err.to_string().contains("queue"));
    }

    #[test]
    fn test_format_is_lowercased() {
        let config = topic_config().with("format", "XML");
        let parsed = MqSourceConfig::from_config(&config).unwrap();
        assert_eq!(parsed.format, "xml");
    }

    #[test]
    fn test_reconnect_keys_parsed() {
        let config = topic_config()
            .with("reconnect.enabled", "true")
            .with("reconnect.initial.delay.ms", "50")
            .with("reconnect.max.delay.ms", "5000")
            .with("reconnect.backoff.multiplier", "3.0")
            .with("reconnect.max.retries", "4")
            .with("reconnect.jitter", "false");
        let parsed = MqSourceConfig::from_config(&config).unwrap();

        assert_eq!(parsed.reconnect.initial_delay, Duration::from_millis(50));
        assert_eq!(parsed.reconnect.max_delay, Duration::from_millis(5000));
        assert!((parsed.reconnect.backoff_multiplier - 3.0).abs() < f64::EPSILON);
        assert_eq!(parsed.reconnect.max_retries, Some(4));
        assert!(!parsed.reconnect.jitter);
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let config = topic_config().with("some.future.option", "whatever");
        assert!(MqSourceConfig::from_config(&config).is_ok());
    }

    #[test]
    fn test_topic_without_durability_uses_default_factory() {
        let parsed = MqSourceConfig::from_config(&topic_config()).unwrap();
        assert_eq!(
            parsed.resolved_connection_factory(),
            DEFAULT_TOPIC_CONNECTION_FACTORY
        );
    }
}
