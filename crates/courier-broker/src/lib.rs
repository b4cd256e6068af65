//! Broker capability interface and the in-memory reference broker.
//!
//! A broker is a transport backend exposing one or both delivery
//! primitives: fire-and-forget pub/sub fan-out, and durable
//! send/consume-with-ack streams. The bus layer depends on brokers only
//! through the traits in [`broker`]; network-backed drivers implement the
//! same traits and plug in through [`open`].

/// Capability traits and the handler callback type.
pub mod broker;
/// In-memory reference implementation of both capabilities.
pub mod memory;

pub use broker::{
    handler, Broker, ConsumerId, Handler, HandlerFuture, PubSubBroker, StreamBroker,
    SubscriptionId,
};
pub use memory::InMemoryBroker;

use courier_config::BrokerConfig;
use courier_core::{CourierError, CourierResult};
use std::sync::Arc;

/// Builds a broker from its configuration entry.
///
/// `memory` is the only backend shipped with the core; drivers for
/// external backends register here by matching their own `type` value.
pub fn open(config: &BrokerConfig) -> CourierResult<Arc<dyn Broker>> {
    match config.broker_type.as_str() {
        "memory" => Ok(Arc::new(InMemoryBroker::new())),
        other => Err(CourierError::Config(format!(
            "unknown broker type '{other}'"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn open_memory_broker() {
        let broker = open(&BrokerConfig::new("memory")).unwrap();
        assert_eq!(broker.broker_type(), "memory");
        assert!(broker.pubsub().is_some());
        assert!(broker.stream().is_some());
    }

    #[test]
    fn open_unknown_type_fails() {
        let err = match open(&BrokerConfig::new("kafka")) {
            Ok(_) => panic!("expected open to fail for unknown broker type"),
            Err(e) => e,
        };
        assert!(matches!(err, CourierError::Config(_)));
    }
}
