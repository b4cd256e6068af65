use courier_broker::{handler, Broker, ConsumerId, Handler, SubscriptionId};
use courier_config::BusConfig;
use courier_core::{pattern, CourierError, CourierResult, Message};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// Lifecycle of a [`Bus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// Bound to config and broker; handlers attachable; not yet delivering.
    Created,
    /// Broker connectivity established, consume loops active.
    Started,
    /// Terminal; broker resources released.
    Closed,
}

/// A named logical channel bound to one broker.
///
/// Combines the broker handle with pattern-matched pub/sub dispatch and
/// group-based stream dispatch. Instances are normally obtained through
/// the registry ([`crate::get`]), which constructs each name exactly once.
pub struct Bus {
    name: String,
    config: BusConfig,
    broker: Arc<dyn Broker>,
    /// Held across lifecycle awaits so concurrent `start`/`close` calls
    /// cannot interleave their broker registrations.
    lifecycle: AsyncMutex<()>,
    /// Snapshot readable without awaiting; handlers may consult it (via
    /// `publish`/`send`) while `start` is still draining a backlog.
    state: Mutex<BusState>,
    pubsub_handlers: Arc<Mutex<Vec<(String, Handler)>>>,
    stream_handlers: Arc<Mutex<Vec<(String, Handler)>>>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
    consumers: Mutex<Vec<ConsumerId>>,
}

impl Bus {
    /// Binds a bus to its configuration entry and broker handle.
    pub fn new(name: impl Into<String>, config: BusConfig, broker: Arc<dyn Broker>) -> Self {
        Self {
            name: name.into(),
            config,
            broker,
            lifecycle: AsyncMutex::new(()),
            state: Mutex::new(BusState::Created),
            pubsub_handlers: Arc::new(Mutex::new(Vec::new())),
            stream_handlers: Arc::new(Mutex::new(Vec::new())),
            subscriptions: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        }
    }

    /// The registry key this bus was constructed under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the bus declares the pub/sub capability.
    pub fn has_pubsub(&self) -> bool {
        self.config.pubsub.is_some()
    }

    /// Whether the bus declares the stream capability.
    pub fn has_stream(&self) -> bool {
        self.config.stream.is_some()
    }

    /// Whether the bus declares the reserved delayed capability.
    pub fn has_delayed(&self) -> bool {
        self.config.delayed.is_some()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BusState {
        *self.state.lock()
    }

    /// Registers a pub/sub handler for `pattern`.
    ///
    /// Legal before or after [`start`](Self::start); handlers registered
    /// first still receive messages published later.
    pub fn on<F, Fut>(&self, pattern: impl Into<String>, f: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<()>> + Send + 'static,
    {
        self.register_pubsub(pattern.into(), handler(f));
    }

    /// Registers a stream handler for `topic`, either an exact stream
    /// name or a wildcard pattern over stream names.
    pub fn on_stream<F, Fut>(&self, topic: impl Into<String>, f: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<()>> + Send + 'static,
    {
        self.register_stream(topic.into(), handler(f));
    }

    pub(crate) fn register_pubsub(&self, pattern: String, h: Handler) {
        self.pubsub_handlers.lock().push((pattern, h));
    }

    pub(crate) fn register_stream(&self, topic: String, h: Handler) {
        self.stream_handlers.lock().push((topic, h));
    }

    /// Publishes `message` to every registered handler whose pattern
    /// matches its type.
    ///
    /// Fails with [`CourierError::Capability`] on a bus without pub/sub.
    /// Returns once every matched handler has completed or failed;
    /// handler failures are isolated and logged, not propagated.
    pub async fn publish(&self, message: Message) -> CourierResult<()> {
        if !self.has_pubsub() {
            return Err(CourierError::Capability(format!(
                "bus '{}' has no pubsub capability",
                self.name
            )));
        }
        self.ensure_open()?;
        let pubsub = self.broker.pubsub().ok_or_else(|| {
            CourierError::Capability(format!(
                "broker '{}' behind bus '{}' does not support pubsub",
                self.broker.broker_type(),
                self.name
            ))
        })?;
        pubsub.publish(&message.message_type, &message).await
    }

    /// Appends `message` to the configured stream named by its type and
    /// returns the entry identifier.
    ///
    /// Fails with [`CourierError::Capability`] on a bus without streams
    /// and with [`CourierError::NotFound`] when no configured stream
    /// matches the message type.
    pub async fn send(&self, message: Message) -> CourierResult<String> {
        let Some(stream_config) = &self.config.stream else {
            return Err(CourierError::Capability(format!(
                "bus '{}' has no stream capability",
                self.name
            )));
        };
        self.ensure_open()?;
        let stream = stream_config
            .streams
            .iter()
            .find(|s| s.as_str() == message.message_type)
            .ok_or_else(|| {
                CourierError::NotFound(format!(
                    "stream '{}' is not configured on bus '{}'",
                    message.message_type, self.name
                ))
            })?
            .clone();
        let streams = self.broker.stream().ok_or_else(|| {
            CourierError::Capability(format!(
                "broker '{}' behind bus '{}' does not support streams",
                self.broker.broker_type(),
                self.name
            ))
        })?;
        streams.send(&stream, &message).await
    }

    /// Establishes broker connectivity and begins delivering.
    ///
    /// Idempotent once started; fails with [`CourierError::Runtime`] on a
    /// closed bus. Registers one broker subscription per configured
    /// pub/sub topic and one consume loop per configured stream.
    pub async fn start(&self) -> CourierResult<()> {
        let _guard = self.lifecycle.lock().await;
        match self.state() {
            BusState::Started => return Ok(()),
            BusState::Closed => {
                return Err(CourierError::Runtime(format!(
                    "bus '{}' is closed",
                    self.name
                )))
            }
            BusState::Created => {}
        }
        self.broker.connect().await?;

        if let Some(pubsub_config) = &self.config.pubsub {
            let pubsub = self.broker.pubsub().ok_or_else(|| {
                CourierError::Config(format!(
                    "bus '{}' declares pubsub but broker '{}' does not support it",
                    self.name,
                    self.broker.broker_type()
                ))
            })?;
            for topic in &pubsub_config.topics {
                let id = pubsub.subscribe(topic, self.pubsub_dispatch()).await?;
                self.subscriptions.lock().push(id);
            }
        }

        if let Some(stream_config) = &self.config.stream {
            let streams = self.broker.stream().ok_or_else(|| {
                CourierError::Config(format!(
                    "bus '{}' declares streams but broker '{}' does not support them",
                    self.name,
                    self.broker.broker_type()
                ))
            })?;
            for stream in &stream_config.streams {
                let id = streams
                    .consume(
                        stream,
                        &stream_config.consumer_group,
                        &stream_config.consumer_name,
                        self.stream_dispatch(stream),
                    )
                    .await?;
                self.consumers.lock().push(id);
            }
        }

        *self.state.lock() = BusState::Started;
        info!(bus = %self.name, broker = self.broker.broker_type(), "Bus started");
        Ok(())
    }

    /// Releases broker resources. Idempotent, reachable from any state,
    /// terminal.
    pub async fn close(&self) -> CourierResult<()> {
        let _guard = self.lifecycle.lock().await;
        if self.state() == BusState::Closed {
            return Ok(());
        }

        let subscriptions: Vec<SubscriptionId> = self.subscriptions.lock().drain(..).collect();
        if let Some(pubsub) = self.broker.pubsub() {
            for id in subscriptions {
                pubsub.unsubscribe(id).await?;
            }
        }
        let consumers: Vec<ConsumerId> = self.consumers.lock().drain(..).collect();
        if let Some(streams) = self.broker.stream() {
            for id in consumers {
                streams.stop(id).await?;
            }
        }
        self.broker.close().await?;

        *self.state.lock() = BusState::Closed;
        info!(bus = %self.name, "Bus closed");
        Ok(())
    }

    fn ensure_open(&self) -> CourierResult<()> {
        if self.state() == BusState::Closed {
            return Err(CourierError::Runtime(format!(
                "bus '{}' is closed",
                self.name
            )));
        }
        Ok(())
    }

    /// Broker callback fanning a published message out to the registered
    /// handlers matching its type. Handler failures are isolated.
    fn pubsub_dispatch(&self) -> Handler {
        let handlers = Arc::clone(&self.pubsub_handlers);
        let bus_name = self.name.clone();
        handler(move |message: Message| {
            let matched: Vec<Handler> = handlers
                .lock()
                .iter()
                .filter(|(p, _)| pattern::matches(p, &message.message_type))
                .map(|(_, h)| h.clone())
                .collect();
            let bus_name = bus_name.clone();
            async move {
                let results = join_all(matched.into_iter().map(|h| h(message.clone()))).await;
                for result in results {
                    if let Err(e) = result {
                        warn!(
                            bus = %bus_name,
                            message_type = %message.message_type,
                            error = %e,
                            "Pub/sub handler failed"
                        );
                    }
                }
                Ok(())
            }
        })
    }

    /// Broker callback delivering a stream entry to the handlers whose
    /// topic names or pattern-matches `stream`. Any handler failure (or a
    /// missing handler) propagates, leaving the entry unacknowledged.
    fn stream_dispatch(&self, stream: &str) -> Handler {
        let handlers = Arc::clone(&self.stream_handlers);
        let stream_name = stream.to_string();
        let bus_name = self.name.clone();
        handler(move |message: Message| {
            let matched: Vec<Handler> = handlers
                .lock()
                .iter()
                .filter(|(topic, _)| topic == &stream_name || pattern::matches(topic, &stream_name))
                .map(|(_, h)| h.clone())
                .collect();
            let stream_name = stream_name.clone();
            let bus_name = bus_name.clone();
            async move {
                if matched.is_empty() {
                    return Err(CourierError::Runtime(format!(
                        "no stream handler on bus '{bus_name}' for stream '{stream_name}'"
                    )));
                }
                for h in matched {
                    h(message.clone()).await?;
                }
                Ok(())
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use courier_broker::InMemoryBroker;
    use courier_config::{PubSubConfig, StreamConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn pubsub_bus(topics: &[&str]) -> Bus {
        let config = BusConfig {
            broker: "mem".to_string(),
            pubsub: Some(PubSubConfig {
                topics: topics.iter().map(ToString::to_string).collect(),
            }),
            stream: None,
            delayed: None,
        };
        Bus::new("events", config, Arc::new(InMemoryBroker::new()))
    }

    fn stream_bus(streams: &[&str]) -> Bus {
        let config = BusConfig {
            broker: "mem".to_string(),
            pubsub: None,
            stream: Some(StreamConfig {
                streams: streams.iter().map(ToString::to_string).collect(),
                consumer_group: "test-group".to_string(),
                consumer_name: "test-worker".to_string(),
            }),
            delayed: None,
        };
        Bus::new("orders", config, Arc::new(InMemoryBroker::new()))
    }

    #[tokio::test]
    async fn publish_requires_pubsub_capability() {
        let bus = stream_bus(&["order.created"]);
        let err = bus.publish(Message::new("order.created")).await.unwrap_err();
        assert!(matches!(err, CourierError::Capability(_)));
    }

    #[tokio::test]
    async fn send_requires_stream_capability() {
        let bus = pubsub_bus(&["order.*"]);
        let err = bus.send(Message::new("order.created")).await.unwrap_err();
        assert!(matches!(err, CourierError::Capability(_)));
    }

    #[tokio::test]
    async fn send_to_unconfigured_stream_fails() {
        let bus = stream_bus(&["order.created"]);
        bus.start().await.unwrap();
        let err = bus.send(Message::new("order.deleted")).await.unwrap_err();
        assert!(matches!(err, CourierError::NotFound(_)));
    }

    #[tokio::test]
    async fn handlers_registered_before_start_receive_later_publishes() {
        let bus = pubsub_bus(&["order.*"]);
        let count = Arc::new(AtomicUsize::new(0));
        let count_in = Arc::clone(&count);
        bus.on("order.*", move |_msg| {
            let count = Arc::clone(&count_in);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.start().await.unwrap();
        bus.publish(Message::new("order.created")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn publish_before_start_delivers_nothing() {
        let bus = pubsub_bus(&["order.*"]);
        let count = Arc::new(AtomicUsize::new(0));
        let count_in = Arc::clone(&count);
        bus.on("order.*", move |_msg| {
            let count = Arc::clone(&count_in);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(Message::new("order.created")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.state(), BusState::Created);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_close_is_terminal() {
        let bus = pubsub_bus(&["order.*"]);
        bus.start().await.unwrap();
        bus.start().await.unwrap();
        assert_eq!(bus.state(), BusState::Started);

        bus.close().await.unwrap();
        bus.close().await.unwrap();
        assert_eq!(bus.state(), BusState::Closed);

        let err = bus.start().await.unwrap_err();
        assert!(matches!(err, CourierError::Runtime(_)));
        let err = bus.publish(Message::new("order.created")).await.unwrap_err();
        assert!(matches!(err, CourierError::Runtime(_)));
    }

    #[tokio::test]
    async fn close_from_created_is_legal() {
        let bus = pubsub_bus(&["order.*"]);
        bus.close().await.unwrap();
        assert_eq!(bus.state(), BusState::Closed);
    }

    #[tokio::test]
    async fn stream_handler_by_wildcard_pattern() {
        let bus = stream_bus(&["order.created", "order.updated"]);
        let count = Arc::new(AtomicUsize::new(0));
        let count_in = Arc::clone(&count);
        bus.on_stream("order.*", move |_msg| {
            let count = Arc::clone(&count_in);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.start().await.unwrap();
        bus.send(Message::new("order.created")).await.unwrap();
        bus.send(Message::new("order.updated")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn capability_accessors_reflect_config() {
        let bus = pubsub_bus(&["order.*"]);
        assert!(bus.has_pubsub());
        assert!(!bus.has_stream());
        assert!(!bus.has_delayed());
    }
}
