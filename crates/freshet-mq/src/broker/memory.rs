//! In-process broker.
//!
//! Brokers are named by URL and shared within the process: every session
//! connecting to `vm://ingest` sees the same destinations, so a publisher
//! and a source in the same test talk through one broker without any
//! network. Queues retain messages until consumed; topics fan out to the
//! attached subscriptions, durable ones keeping their mailbox across
//! disconnects under the subscriber's client identity.
//!
//! Fault injection ([`set_online`](MemoryBroker::set_online),
//! [`drop_connections`](MemoryBroker::drop_connections),
//! [`set_credentials`](MemoryBroker::set_credentials)) drives the
//! reconnect and failure paths in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::config::{
    DestinationKind, DEFAULT_QUEUE_CONNECTION_FACTORY, DEFAULT_TOPIC_CONNECTION_FACTORY,
};
use crate::error::{ConnectError, ReceiveError};

use super::{
    BrokerEndpoint, BrokerProvider, BrokerSession, MessageConsumer, Payload, RawMessage,
    SubscriptionSpec,
};

/// Connection-factory names every in-memory broker exposes.
pub const KNOWN_CONNECTION_FACTORIES: [&str; 3] = [
    "ConnectionFactory",
    DEFAULT_TOPIC_CONNECTION_FACTORY,
    DEFAULT_QUEUE_CONNECTION_FACTORY,
];

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

// ── Mailboxes and gates ───────────────────────────────────────────────────

/// A per-subscription message buffer.
#[derive(Debug, Default)]
struct Mailbox {
    queue: Mutex<VecDeque<RawMessage>>,
    notify: Notify,
}

impl Mailbox {
    fn push(&self, message: RawMessage) {
        self.queue.lock().push_back(message);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<RawMessage> {
        self.queue.lock().pop_front()
    }
}

const GATE_LIVE: u8 = 0;
const GATE_CLOSED: u8 = 1;
const GATE_DROPPED: u8 = 2;

/// Revocation handle for one consumer. First revocation wins.
#[derive(Debug)]
struct ConsumerGate {
    state: AtomicU8,
    notify: Notify,
}

impl ConsumerGate {
    fn live() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(GATE_LIVE),
            notify: Notify::new(),
        })
    }

    fn state(&self) -> u8 {
        self.state.load(Ordering::Acquire)
    }

    fn revoke(&self, next: u8) {
        if self
            .state
            .compare_exchange(GATE_LIVE, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.notify.notify_one();
        }
    }
}

// ── Broker state ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DurableSub {
    mailbox: Arc<Mailbox>,
    gate: Option<Arc<ConsumerGate>>,
}

#[derive(Debug, Default)]
struct TopicState {
    live: HashMap<u64, Arc<Mailbox>>,
    durable: HashMap<String, DurableSub>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    queues: HashMap<String, Arc<Mailbox>>,
    topics: HashMap<String, TopicState>,
    credentials: Option<(String, String)>,
    gates: Vec<Arc<ConsumerGate>>,
}

/// One named in-process broker.
#[derive(Debug)]
pub struct MemoryBroker {
    url: String,
    inner: Mutex<BrokerInner>,
    online: AtomicBool,
    message_seq: AtomicU64,
    subscriber_seq: AtomicU64,
    connections: AtomicU64,
}

impl MemoryBroker {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            inner: Mutex::new(BrokerInner::default()),
            online: AtomicBool::new(true),
            message_seq: AtomicU64::new(0),
            subscriber_seq: AtomicU64::new(0),
            connections: AtomicU64::new(0),
        }
    }

    /// Returns the broker URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Publishes a message, returning the broker-assigned message id.
    ///
    /// Queue messages are retained until consumed. Topic messages fan out
    /// to the currently attached live subscriptions and every durable
    /// mailbox; with no subscription at all they are discarded.
    pub fn publish(&self, destination: &str, kind: DestinationKind, payload: Payload) -> String {
        let seq = self.message_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let message_id = format!("mem-{seq}");
        let message = RawMessage {
            message_id: message_id.clone(),
            destination: destination.to_string(),
            payload,
            timestamp_ms: now_millis(),
        };

        match kind {
            DestinationKind::Queue => {
                self.queue_mailbox(destination).push(message);
            }
            DestinationKind::Topic => {
                let targets: Vec<Arc<Mailbox>> = {
                    let inner = self.inner.lock();
                    match inner.topics.get(destination) {
                        Some(topic) => topic
                            .live
                            .values()
                            .cloned()
                            .chain(topic.durable.values().map(|sub| Arc::clone(&sub.mailbox)))
                            .collect(),
                        None => Vec::new(),
                    }
                };
                for mailbox in targets {
                    mailbox.push(message.clone());
                }
            }
        }
        message_id
    }

    /// Takes the broker offline (or back online). Offline brokers reject
    /// new connections; existing sessions are unaffected until dropped.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Requires the given credentials on future connections.
    pub fn set_credentials(&self, username: impl Into<String>, password: impl Into<String>) {
        self.inner.lock().credentials = Some((username.into(), password.into()));
    }

    /// Forcibly severs every active consumer, as a broker restart would.
    ///
    /// Non-durable topic subscriptions are discarded. Durable mailboxes and
    /// queues keep their contents and keep accumulating published messages.
    pub fn drop_connections(&self) {
        let mut inner = self.inner.lock();
        for gate in inner.gates.drain(..) {
            gate.revoke(GATE_DROPPED);
        }
        for topic in inner.topics.values_mut() {
            topic.live.clear();
            for sub in topic.durable.values_mut() {
                sub.gate = None;
            }
        }
    }

    /// Number of connections accepted since the broker was created.
    #[must_use]
    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    fn queue_mailbox(&self, destination: &str) -> Arc<Mailbox> {
        Arc::clone(
            self.inner
                .lock()
                .queues
                .entry(destination.to_string())
                .or_default(),
        )
    }

    fn check_connect(&self, endpoint: &BrokerEndpoint) -> Result<(), ConnectError> {
        if !self.online.load(Ordering::Acquire) {
            return Err(ConnectError::Unreachable {
                url: endpoint.url.clone(),
                reason: "broker is offline".to_string(),
            });
        }
        {
            let inner = self.inner.lock();
            if let Some((user, pass)) = &inner.credentials {
                let presented = endpoint.username.as_deref().zip(endpoint.password.as_deref());
                if presented != Some((user.as_str(), pass.as_str())) {
                    return Err(ConnectError::Auth {
                        url: endpoint.url.clone(),
                    });
                }
            }
        }
        if !KNOWN_CONNECTION_FACTORIES.contains(&endpoint.connection_factory.as_str()) {
            return Err(ConnectError::LookupFailed {
                name: endpoint.connection_factory.clone(),
                reason: "no such connection factory at this broker".to_string(),
            });
        }
        self.connections.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

// ── Provider ──────────────────────────────────────────────────────────────

/// Broker provider backed by named in-process brokers.
#[derive(Debug, Default)]
pub struct MemoryBrokerProvider {
    brokers: RwLock<HashMap<String, Arc<MemoryBroker>>>,
}

impl MemoryBrokerProvider {
    /// Creates a provider with no brokers yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the broker for a URL, creating it on first use.
    ///
    /// This is also how tests obtain a handle for publishing and fault
    /// injection before (or after) a source connects.
    #[must_use]
    pub fn broker(&self, url: &str) -> Arc<MemoryBroker> {
        if let Some(broker) = self.brokers.read().get(url) {
            return Arc::clone(broker);
        }
        let mut brokers = self.brokers.write();
        Arc::clone(
            brokers
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(MemoryBroker::new(url))),
        )
    }
}

#[async_trait]
impl BrokerProvider for MemoryBrokerProvider {
    async fn connect(
        &self,
        endpoint: &BrokerEndpoint,
    ) -> Result<Box<dyn BrokerSession>, ConnectError> {
        let broker = self.broker(&endpoint.url);
        broker.check_connect(endpoint)?;
        Ok(Box::new(MemorySession {
            broker,
            attachments: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

// ── Session ───────────────────────────────────────────────────────────────

/// What to undo at the broker when a session closes an attachment.
enum Detach {
    Queue,
    TopicLive { destination: String, subscriber: u64 },
    TopicDurable { destination: String, client_id: String },
}

struct MemorySession {
    broker: Arc<MemoryBroker>,
    attachments: Mutex<Vec<(Arc<ConsumerGate>, Detach)>>,
    closed: AtomicBool,
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn subscribe(
        &self,
        spec: &SubscriptionSpec,
    ) -> Result<Box<dyn MessageConsumer>, ConnectError> {
        let gate = ConsumerGate::live();
        let (mailbox, detach) = match (spec.kind, spec.durable) {
            (DestinationKind::Queue, _) => {
                (self.broker.queue_mailbox(&spec.destination), Detach::Queue)
            }
            (DestinationKind::Topic, true) => {
                let client_id =
                    spec.client_id
                        .clone()
                        .ok_or_else(|| ConnectError::LookupFailed {
                            name: spec.destination.clone(),
                            reason: "durable subscription without a client identity".to_string(),
                        })?;
                let mut inner = self.broker.inner.lock();
                let mailbox = {
                    let topic = inner.topics.entry(spec.destination.clone()).or_default();
                    let sub = topic.durable.entry(client_id.clone()).or_default();
                    // A reconnecting subscriber reclaims its mailbox; any
                    // stale consumer on the same identity is kicked.
                    if let Some(previous) = sub.gate.replace(Arc::clone(&gate)) {
                        previous.revoke(GATE_DROPPED);
                    }
                    Arc::clone(&sub.mailbox)
                };
                inner.gates.push(Arc::clone(&gate));
                drop(inner);
                return self.attach(
                    spec,
                    gate,
                    mailbox,
                    Detach::TopicDurable {
                        destination: spec.destination.clone(),
                        client_id,
                    },
                );
            }
            (DestinationKind::Topic, false) => {
                let subscriber = self.broker.subscriber_seq.fetch_add(1, Ordering::Relaxed) + 1;
                let mailbox = Arc::new(Mailbox::default());
                let mut inner = self.broker.inner.lock();
                inner
                    .topics
                    .entry(spec.destination.clone())
                    .or_default()
                    .live
                    .insert(subscriber, Arc::clone(&mailbox));
                (
                    mailbox,
                    Detach::TopicLive {
                        destination: spec.destination.clone(),
                        subscriber,
                    },
                )
            }
        };
        self.broker.inner.lock().gates.push(Arc::clone(&gate));
        self.attach(spec, gate, mailbox, detach)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let attachments = std::mem::take(&mut *self.attachments.lock());
        let mut inner = self.broker.inner.lock();
        for (gate, detach) in attachments {
            gate.revoke(GATE_CLOSED);
            match detach {
                Detach::Queue => {}
                Detach::TopicLive {
                    destination,
                    subscriber,
                } => {
                    if let Some(topic) = inner.topics.get_mut(&destination) {
                        topic.live.remove(&subscriber);
                    }
                }
                Detach::TopicDurable {
                    destination,
                    client_id,
                } => {
                    if let Some(sub) = inner
                        .topics
                        .get_mut(&destination)
                        .and_then(|topic| topic.durable.get_mut(&client_id))
                    {
                        if sub.gate.as_ref().is_some_and(|g| Arc::ptr_eq(g, &gate)) {
                            sub.gate = None;
                        }
                    }
                }
            }
        }
        inner.gates.retain(|gate| gate.state() == GATE_LIVE);
    }
}

impl MemorySession {
    fn attach(
        &self,
        spec: &SubscriptionSpec,
        gate: Arc<ConsumerGate>,
        mailbox: Arc<Mailbox>,
        detach: Detach,
    ) -> Result<Box<dyn MessageConsumer>, ConnectError> {
        self.attachments.lock().push((Arc::clone(&gate), detach));
        Ok(Box::new(MemoryConsumer {
            destination: spec.destination.clone(),
            mailbox,
            gate,
        }))
    }
}

// ── Consumer ──────────────────────────────────────────────────────────────

struct MemoryConsumer {
    destination: String,
    mailbox: Arc<Mailbox>,
    gate: Arc<ConsumerGate>,
}

#[async_trait]
impl MessageConsumer for MemoryConsumer {
    async fn receive(&mut self) -> Result<RawMessage, ReceiveError> {
        loop {
            match self.gate.state() {
                GATE_LIVE => {}
                GATE_CLOSED => return Err(ReceiveError::Closed),
                _ => {
                    return Err(ReceiveError::Disconnected(format!(
                        "subscription to '{}' was dropped by the broker",
                        self.destination
                    )))
                }
            }
            if let Some(message) = self.mailbox.try_pop() {
                return Ok(message);
            }
            // Check-then-wait is safe: notify_one stores a permit, so a
            // push or revocation landing here still wakes the select.
            let message = self.mailbox.notify.notified();
            let revoked = self.gate.notify.notified();
            tokio::select! {
                () = message => {}
                () = revoked => {}
            }
        }
    }
}
