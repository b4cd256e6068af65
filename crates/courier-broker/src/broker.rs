use async_trait::async_trait;
use courier_core::{CourierResult, Message};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Future returned by a message handler.
pub type HandlerFuture = BoxFuture<'static, CourierResult<()>>;

/// A registered message callback.
///
/// Handlers receive an owned copy of the envelope; the payload behind it
/// is shared-immutable once a message enters a broker.
pub type Handler = Arc<dyn Fn(Message) -> HandlerFuture + Send + Sync>;

/// Wraps a plain async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CourierResult<()>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(f(message)))
}

/// Handle returned by [`PubSubBroker::subscribe`], usable to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn next() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Handle returned by [`StreamBroker::consume`], usable to stop the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    pub(crate) fn next() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Fire-and-forget fan-out delivery.
///
/// There is no replay and no persistence: a message reaches exactly the
/// subscribers registered at publish time.
#[async_trait]
pub trait PubSubBroker: Send + Sync {
    /// Fans `message` out to every subscriber whose pattern matches
    /// `topic`. Returns once all matched handlers have completed; handler
    /// failures are isolated from one another.
    async fn publish(&self, topic: &str, message: &Message) -> CourierResult<()>;

    /// Registers a callback for every published topic matching `pattern`.
    async fn subscribe(&self, pattern: &str, handler: Handler) -> CourierResult<SubscriptionId>;

    /// Removes a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: SubscriptionId) -> CourierResult<()>;
}

/// Durable append/consume delivery with competing-consumer groups.
#[async_trait]
pub trait StreamBroker: Send + Sync {
    /// Appends `message` to `stream` and returns a monotonically
    /// meaningful entry identifier.
    async fn send(&self, stream: &str, message: &Message) -> CourierResult<String>;

    /// Begins a read loop delivering each entry to exactly one consumer
    /// within `group`. An entry is acknowledged only after the handler
    /// returns `Ok`; a failed entry stays redeliverable and the group
    /// cursor does not advance past it.
    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        handler: Handler,
    ) -> CourierResult<ConsumerId>;

    /// Stops a consume loop. Unknown ids are ignored.
    async fn stop(&self, id: ConsumerId) -> CourierResult<()>;
}

/// A transport backend. A concrete broker implements one or both
/// capability groups and advertises them through the accessors.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Backend type name, matching `BrokerConfig::broker_type`.
    fn broker_type(&self) -> &str;

    /// Establishes connectivity. Idempotent.
    async fn connect(&self) -> CourierResult<()>;

    /// Releases all transport resources. Idempotent.
    async fn close(&self) -> CourierResult<()>;

    /// The pub/sub capability, when this backend supports it.
    fn pubsub(&self) -> Option<&dyn PubSubBroker>;

    /// The stream capability, when this backend supports it.
    fn stream(&self) -> Option<&dyn StreamBroker>;
}
