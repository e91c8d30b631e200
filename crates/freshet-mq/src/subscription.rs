//! Subscription lifecycle: validate, resolve, connect, subscribe.
//!
//! [`SubscriptionManager`] owns the path from a validated config to a live
//! [`ActiveSubscription`]. The same manager is reused for every
//! reconnection attempt, so a durable subscriber always comes back with
//! the same client identity.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};

use crate::broker::{
    BrokerEndpoint, BrokerSession, MessageConsumer, ProviderRegistry, SubscriptionSpec,
};
use crate::config::MqSourceConfig;
use crate::error::SourceResult;

/// Upper bound on how long a broker session close may take.
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens and closes broker subscriptions for one source config.
pub struct SubscriptionManager {
    registry: Arc<ProviderRegistry>,
    config: MqSourceConfig,
}

impl SubscriptionManager {
    /// Creates a manager for the given config.
    #[must_use]
    pub fn new(registry: Arc<ProviderRegistry>, config: MqSourceConfig) -> Self {
        Self { registry, config }
    }

    /// Returns the config this manager connects with.
    #[must_use]
    pub fn config(&self) -> &MqSourceConfig {
        &self.config
    }

    /// Validates the config, then resolves the provider, connects, and
    /// subscribes. No network activity happens when validation fails.
    ///
    /// # Errors
    ///
    /// Returns the validation error, or the [`ConnectError`] from provider
    /// lookup, connection, or subscription.
    ///
    /// [`ConnectError`]: crate::error::ConnectError
    pub async fn open(&self) -> SourceResult<ActiveSubscription> {
        self.config.validate()?;

        let provider = self.registry.resolve(&self.config.context_factory)?;
        let endpoint = BrokerEndpoint::from_source_config(&self.config);
        let session = provider.connect(&endpoint).await?;

        let spec = SubscriptionSpec::from_source_config(&self.config);
        let consumer = session.subscribe(&spec).await?;
        debug!(
            destination = %spec.destination,
            kind = %spec.kind,
            durable = spec.durable,
            "subscription open"
        );

        Ok(ActiveSubscription {
            session,
            consumer,
            destination: self.config.destination.clone(),
        })
    }

    /// Closes a subscription, bounding how long the broker may take.
    pub async fn close(&self, subscription: ActiveSubscription) {
        if timeout(CLOSE_TIMEOUT, subscription.session.close())
            .await
            .is_err()
        {
            warn!(
                destination = %subscription.destination,
                "broker session close timed out"
            );
        }
    }
}

impl fmt::Debug for SubscriptionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionManager")
            .field("destination", &self.config.destination)
            .field("kind", &self.config.kind)
            .field("durable", &self.config.durable)
            .finish_non_exhaustive()
    }
}

/// A live session with an attached consumer.
pub struct ActiveSubscription {
    pub(crate) session: Box<dyn BrokerSession>,
    pub(crate) consumer: Box<dyn MessageConsumer>,
    destination: String,
}

impl ActiveSubscription {
    /// Destination this subscription consumes from.
    #[must_use]
    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl fmt::Debug for ActiveSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveSubscription")
            .field("destination", &self.destination)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::broker::memory::MemoryBrokerProvider;
    use crate::broker::Payload;
    use crate::config::{ConnectorConfig, DestinationKind};
    use crate::error::SourceError;

    use super::*;

    fn registry_with_memory() -> (Arc<ProviderRegistry>, Arc<MemoryBrokerProvider>) {
        let provider = Arc::new(MemoryBrokerProvider::new());
        let registry = Arc::new(ProviderRegistry::new());
        registry.register("memory", Arc::clone(&provider) as _);
        (registry, provider)
    }

    fn queue_config(url: &str) -> MqSourceConfig {
        let config = ConnectorConfig::new("mq")
            .with("factory.initial", "memory")
            .with("provider.url", url)
            .with("destination", "orders");
        MqSourceConfig::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn test_open_receives_published_message() {
        let (registry, provider) = registry_with_memory();
        let broker = provider.broker("vm://sub");
        broker.publish("orders", DestinationKind::Queue, Payload::Text("hi".into()));

        let manager = SubscriptionManager::new(registry, queue_config("vm://sub"));
        let mut subscription = manager.open().await.unwrap();
        let message = subscription.consumer.receive().await.unwrap();
        assert_eq!(message.payload, Payload::Text("hi".into()));
        manager.close(subscription).await;
    }

    #[tokio::test]
    async fn test_validation_failure_never_connects() {
        let (registry, provider) = registry_with_memory();
        let broker = provider.broker("vm://noconnect");

        let mut bad = queue_config("vm://noconnect");
        bad.durable = true;
        let manager = SubscriptionManager::new(registry, bad);
        let err = manager.open().await.unwrap_err();
        assert!(matches!(err, SourceError::Validation(_)));
        assert_eq!(broker.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_connect_error() {
        let registry = Arc::new(ProviderRegistry::new());
        let manager = SubscriptionManager::new(registry, queue_config("vm://nowhere"));
        let err = manager.open().await.unwrap_err();
        match err {
            SourceError::Connect(connect) => assert_eq!(connect.kind(), "lookup-failed"),
            other => panic!("expected connect error, got {other}"),
        }
    }
}
