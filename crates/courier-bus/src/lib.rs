//! Named buses over configurable brokers.
//!
//! A bus is a logical channel bound to one broker, offering fan-out
//! pub/sub with wildcard topic matching and/or guaranteed-delivery
//! streams with consumer groups, as declared by its configuration entry.
//! Buses are constructed lazily and cached by the process-wide registry.
//!
//! ```no_run
//! use courier_bus::{get, setup_bus_factory, start_all, subscriber, Message};
//! use courier_config::load_config;
//!
//! # async fn run() -> courier_core::CourierResult<()> {
//! let config = load_config(None, true)?;
//! setup_bus_factory((*config).clone());
//!
//! subscriber("events", "order.*", |msg: Message| async move {
//!     println!("received {}", msg.message_type);
//!     Ok(())
//! });
//!
//! let events = get("events").await?;
//! start_all().await?;
//! events
//!     .publish(Message::new("order.created").with_entry("order_id", 1))
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// The per-name bus façade.
pub mod bus;
/// The process-wide registry and factory.
pub mod registry;

pub use bus::{Bus, BusState};
pub use registry::{
    close_all, get, global, reset, resolve, setup_bus_factory, start_all, stream_handler,
    subscriber, BusRegistry, HandlerKind,
};

// The types appearing in every handler signature, re-exported so callers
// depend on one crate.
pub use courier_core::{CourierError, CourierResult, Message};
