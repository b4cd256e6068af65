//! Configuration model and loader for Courier.
//!
//! The model ([`MqConfig`]) is validated eagerly at construction — a bus
//! referencing an unknown broker or declaring no capability is rejected
//! before anything connects, so misconfiguration surfaces at startup
//! rather than at first use. The loader reads the YAML configuration
//! document from an explicit path or the `COURIER_CONFIG_PATH`
//! environment variable and caches parsed results per path.

/// YAML document loading with per-path caching.
pub mod loader;
/// Typed broker and bus definitions.
pub mod model;

pub use loader::{load_config, CONFIG_PATH_ENV};
pub use model::{BrokerConfig, BusConfig, DelayedConfig, MqConfig, PubSubConfig, StreamConfig};
