use courier_core::{CourierError, CourierResult};
use serde::Deserialize;
use std::collections::HashMap;

/// Broker entry from the configuration document: a backend type plus
/// whatever backend-specific parameters the driver understands.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Backend type name (e.g. `memory`).
    #[serde(rename = "type")]
    pub broker_type: String,
    /// Backend-specific connection parameters, passed through untouched.
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

impl BrokerConfig {
    /// Creates a broker entry of the given type with no extra parameters.
    pub fn new(broker_type: impl Into<String>) -> Self {
        Self {
            broker_type: broker_type.into(),
            params: HashMap::new(),
        }
    }
}

/// Pub/sub capability section of a bus.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PubSubConfig {
    /// Subscription patterns the bus uses for wildcard dispatch.
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Stream capability section of a bus.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Stream names the bus sends to and consumes from.
    #[serde(default)]
    pub streams: Vec<String>,
    /// Consumer group this process competes in.
    pub consumer_group: String,
    /// This process's identity within the group.
    pub consumer_name: String,
}

/// Reserved capability for scheduled delivery. Participates in validation
/// only; no core behavior is attached to it yet.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DelayedConfig {
    /// Backend-specific scheduling parameters, passed through untouched.
    #[serde(flatten)]
    pub params: HashMap<String, serde_json::Value>,
}

/// Bus entry from the configuration document.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Name of the broker this bus is bound to. Must exist in
    /// [`MqConfig::brokers`].
    pub broker: String,
    /// Fan-out pub/sub capability.
    #[serde(default)]
    pub pubsub: Option<PubSubConfig>,
    /// Guaranteed-delivery stream capability.
    #[serde(default)]
    pub stream: Option<StreamConfig>,
    /// Reserved scheduled-delivery capability.
    #[serde(default)]
    pub delayed: Option<DelayedConfig>,
}

impl BusConfig {
    /// Whether the bus declares at least one capability.
    pub fn has_capability(&self) -> bool {
        self.pubsub.is_some() || self.stream.is_some() || self.delayed.is_some()
    }
}

/// The validated configuration wiring buses to brokers.
///
/// Immutable once constructed; both [`MqConfig::new`] and deserialization
/// run the same validation, so an invalid document can never produce a
/// usable value.
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "RawMqConfig")]
pub struct MqConfig {
    brokers: HashMap<String, BrokerConfig>,
    buses: HashMap<String, BusConfig>,
}

/// Unvalidated document shape; promoted via `TryFrom`.
#[derive(Debug, Deserialize)]
struct RawMqConfig {
    #[serde(default)]
    brokers: HashMap<String, BrokerConfig>,
    #[serde(default)]
    buses: HashMap<String, BusConfig>,
}

impl TryFrom<RawMqConfig> for MqConfig {
    type Error = CourierError;

    fn try_from(raw: RawMqConfig) -> Result<Self, Self::Error> {
        Self::new(raw.brokers, raw.buses)
    }
}

impl MqConfig {
    /// Builds a configuration from already-parsed broker and bus entries.
    ///
    /// Fails with [`CourierError::Config`] when a bus references a broker
    /// name absent from `brokers`, or declares none of the `pubsub`,
    /// `stream`, or `delayed` capabilities.
    pub fn new(
        brokers: HashMap<String, BrokerConfig>,
        buses: HashMap<String, BusConfig>,
    ) -> CourierResult<Self> {
        for (name, bus) in &buses {
            if !brokers.contains_key(&bus.broker) {
                return Err(CourierError::Config(format!(
                    "bus '{name}' references unknown broker '{}'",
                    bus.broker
                )));
            }
            if !bus.has_capability() {
                return Err(CourierError::Config(format!(
                    "bus '{name}' declares none of pubsub, stream, or delayed"
                )));
            }
        }
        Ok(Self { brokers, buses })
    }

    /// Looks up a broker entry by name.
    pub fn broker(&self, name: &str) -> Option<&BrokerConfig> {
        self.brokers.get(name)
    }

    /// Looks up a bus entry by name.
    pub fn bus(&self, name: &str) -> Option<&BusConfig> {
        self.buses.get(name)
    }

    /// All broker entries.
    pub fn brokers(&self) -> &HashMap<String, BrokerConfig> {
        &self.brokers
    }

    /// All bus entries.
    pub fn buses(&self) -> &HashMap<String, BusConfig> {
        &self.buses
    }
}
