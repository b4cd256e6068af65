use crate::bus::Bus;
use courier_broker::{handler, Handler};
use courier_config::MqConfig;
use courier_core::{CourierError, CourierResult, Message};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

/// Which dispatch path a pre-registered handler attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Wildcard pub/sub dispatch.
    PubSub,
    /// Consumer-group stream dispatch.
    Stream,
}

struct PendingHandler {
    pattern: String,
    handler: Handler,
    kind: HandlerKind,
}

#[derive(Default)]
struct RegistryState {
    config: Option<Arc<MqConfig>>,
    instances: HashMap<String, Arc<Bus>>,
    pending: HashMap<String, Vec<PendingHandler>>,
}

/// Configuration-driven cache of [`Bus`] instances.
///
/// One registry normally serves the whole process (see [`global`]);
/// separate instances are useful for tests that need isolated state.
/// Handlers may be registered under a bus name before that bus exists —
/// they are buffered and drained into the bus exactly once at
/// construction.
#[derive(Default)]
pub struct BusRegistry {
    state: Mutex<RegistryState>,
    /// Held across the whole check-then-construct sequence of
    /// [`get`](Self::get) so each name is constructed at most once.
    construct: AsyncMutex<()>,
}

impl BusRegistry {
    /// Creates an empty registry with no configuration installed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the active configuration, replacing any previous one.
    ///
    /// Buses already constructed from a previous configuration stay
    /// cached; call [`reset`](Self::reset) first for a clean slate.
    pub fn install(&self, config: MqConfig) {
        info!(
            brokers = config.brokers().len(),
            buses = config.buses().len(),
            "Installed bus factory configuration"
        );
        self.state.lock().config = Some(Arc::new(config));
    }

    /// Returns the cached bus for `name`, constructing it on first use.
    ///
    /// Fails with [`CourierError::Runtime`] when no configuration is
    /// installed and [`CourierError::NotFound`] when `name` is not a
    /// configured bus. Concurrent calls for the same unconstructed name
    /// yield the same instance.
    pub async fn get(&self, name: &str) -> CourierResult<Arc<Bus>> {
        if let Some(bus) = self.state.lock().instances.get(name) {
            return Ok(Arc::clone(bus));
        }

        let _guard = self.construct.lock().await;
        // lost the race: another caller constructed it while we waited
        if let Some(bus) = self.state.lock().instances.get(name) {
            return Ok(Arc::clone(bus));
        }

        let config = self.state.lock().config.clone().ok_or_else(|| {
            CourierError::Runtime(
                "bus factory is not initialized; call setup_bus_factory first".to_string(),
            )
        })?;
        let bus_config = config
            .bus(name)
            .ok_or_else(|| CourierError::NotFound(format!("bus '{name}' is not configured")))?
            .clone();
        let broker_config = config.broker(&bus_config.broker).ok_or_else(|| {
            CourierError::Config(format!(
                "bus '{name}' references unknown broker '{}'",
                bus_config.broker
            ))
        })?;
        let broker = courier_broker::open(broker_config)?;
        let bus = Arc::new(Bus::new(name, bus_config, broker));

        // A registration racing with construction must land either in the
        // drained buffer or directly on the cached bus, so drain and
        // insert happen under one lock.
        {
            let mut state = self.state.lock();
            for pending in state.pending.remove(name).unwrap_or_default() {
                match pending.kind {
                    HandlerKind::PubSub => bus.register_pubsub(pending.pattern, pending.handler),
                    HandlerKind::Stream => bus.register_stream(pending.pattern, pending.handler),
                }
            }
            state.instances.insert(name.to_string(), Arc::clone(&bus));
        }
        info!(bus = name, "Constructed bus");
        Ok(bus)
    }

    /// Cache-only lookup for contexts that cannot await construction.
    ///
    /// Fails with [`CourierError::NotFound`] when `name` has not been
    /// constructed via [`get`](Self::get).
    pub fn resolve(&self, name: &str) -> CourierResult<Arc<Bus>> {
        self.state
            .lock()
            .instances
            .get(name)
            .map(Arc::clone)
            .ok_or_else(|| {
                CourierError::NotFound(format!("bus '{name}' has not been constructed"))
            })
    }

    /// Starts every cached bus. Ordering across buses is unspecified.
    pub async fn start_all(&self) -> CourierResult<()> {
        for bus in self.cached() {
            bus.start().await?;
        }
        Ok(())
    }

    /// Closes every cached bus. Ordering across buses is unspecified.
    pub async fn close_all(&self) -> CourierResult<()> {
        for bus in self.cached() {
            bus.close().await?;
        }
        Ok(())
    }

    fn cached(&self) -> Vec<Arc<Bus>> {
        self.state.lock().instances.values().cloned().collect()
    }

    /// Registers a pub/sub handler on `bus_name`, buffering it when the
    /// bus has not been constructed yet.
    pub fn subscriber<F, Fut>(&self, bus_name: &str, pattern: &str, f: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<()>> + Send + 'static,
    {
        self.register(bus_name, pattern, handler(f), HandlerKind::PubSub);
    }

    /// Registers a stream handler on `bus_name`, buffering it when the
    /// bus has not been constructed yet.
    pub fn stream_handler<F, Fut>(&self, bus_name: &str, topic: &str, f: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CourierResult<()>> + Send + 'static,
    {
        self.register(bus_name, topic, handler(f), HandlerKind::Stream);
    }

    fn register(&self, bus_name: &str, pattern: &str, h: Handler, kind: HandlerKind) {
        let mut state = self.state.lock();
        if let Some(bus) = state.instances.get(bus_name) {
            match kind {
                HandlerKind::PubSub => bus.register_pubsub(pattern.to_string(), h),
                HandlerKind::Stream => bus.register_stream(pattern.to_string(), h),
            }
            return;
        }
        debug!(bus = bus_name, pattern, kind = ?kind, "Buffered handler for unconstructed bus");
        state
            .pending
            .entry(bus_name.to_string())
            .or_default()
            .push(PendingHandler {
                pattern: pattern.to_string(),
                handler: h,
                kind,
            });
    }

    /// Clears configuration, instances, and pending handlers atomically.
    ///
    /// Cached buses are dropped without being closed; call
    /// [`close_all`](Self::close_all) first when broker resources matter.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.config = None;
        state.instances.clear();
        state.pending.clear();
    }
}

/// The process-wide registry backing the free functions below.
pub fn global() -> &'static BusRegistry {
    static GLOBAL: OnceLock<BusRegistry> = OnceLock::new();
    GLOBAL.get_or_init(BusRegistry::new)
}

/// Installs the process-wide configuration. See [`BusRegistry::install`].
pub fn setup_bus_factory(config: MqConfig) {
    global().install(config);
}

/// [`BusRegistry::get`] on the process-wide registry.
pub async fn get(name: &str) -> CourierResult<Arc<Bus>> {
    global().get(name).await
}

/// [`BusRegistry::resolve`] on the process-wide registry.
pub fn resolve(name: &str) -> CourierResult<Arc<Bus>> {
    global().resolve(name)
}

/// [`BusRegistry::start_all`] on the process-wide registry.
pub async fn start_all() -> CourierResult<()> {
    global().start_all().await
}

/// [`BusRegistry::close_all`] on the process-wide registry.
pub async fn close_all() -> CourierResult<()> {
    global().close_all().await
}

/// [`BusRegistry::subscriber`] on the process-wide registry.
pub fn subscriber<F, Fut>(bus_name: &str, pattern: &str, f: F)
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CourierResult<()>> + Send + 'static,
{
    global().subscriber(bus_name, pattern, f);
}

/// [`BusRegistry::stream_handler`] on the process-wide registry.
pub fn stream_handler<F, Fut>(bus_name: &str, topic: &str, f: F)
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = CourierResult<()>> + Send + 'static,
{
    global().stream_handler(bus_name, topic, f);
}

/// Clears the process-wide registry. Intended for test isolation.
pub fn reset() {
    global().reset();
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use courier_config::{BrokerConfig, BusConfig, PubSubConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> MqConfig {
        let brokers = HashMap::from([("mem".to_string(), BrokerConfig::new("memory"))]);
        let buses = HashMap::from([(
            "events".to_string(),
            BusConfig {
                broker: "mem".to_string(),
                pubsub: Some(PubSubConfig {
                    topics: vec!["order.*".to_string()],
                }),
                stream: None,
                delayed: None,
            },
        )]);
        MqConfig::new(brokers, buses).unwrap()
    }

    #[tokio::test]
    async fn get_before_install_fails() {
        let registry = BusRegistry::new();
        let err = match registry.get("events").await {
            Ok(_) => panic!("expected get before install to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, CourierError::Runtime(_)));
    }

    #[tokio::test]
    async fn get_unknown_bus_fails() {
        let registry = BusRegistry::new();
        registry.install(test_config());
        let err = match registry.get("nonexistent").await {
            Ok(_) => panic!("expected get of unknown bus to fail"),
            Err(e) => e,
        };
        assert!(matches!(err, CourierError::NotFound(_)));
    }

    #[tokio::test]
    async fn pending_handlers_drain_once() {
        let registry = BusRegistry::new();
        registry.install(test_config());

        let count = Arc::new(AtomicUsize::new(0));
        let count_in = Arc::clone(&count);
        registry.subscriber("events", "order.*", move |_msg| {
            let count = Arc::clone(&count_in);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        let bus = registry.get("events").await.unwrap();
        // a second get must not re-drain and double-attach
        let again = registry.get("events").await.unwrap();
        assert!(Arc::ptr_eq(&bus, &again));

        bus.start().await.unwrap();
        bus.publish(Message::new("order.created")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handlers_after_construction_register_directly() {
        let registry = BusRegistry::new();
        registry.install(test_config());
        let bus = registry.get("events").await.unwrap();
        bus.start().await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let count_in = Arc::clone(&count);
        registry.subscriber("events", "order.*", move |_msg| {
            let count = Arc::clone(&count_in);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.publish(Message::new("order.created")).await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let registry = BusRegistry::new();
        registry.install(test_config());
        registry.get("events").await.unwrap();

        registry.reset();
        assert!(matches!(
            registry.resolve("events"),
            Err(CourierError::NotFound(_))
        ));
        assert!(matches!(
            registry.get("events").await,
            Err(CourierError::Runtime(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_get_constructs_once() {
        let registry = Arc::new(BusRegistry::new());
        registry.install(test_config());

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.get("events").await.unwrap() })
            })
            .collect();

        let mut buses = Vec::new();
        for task in tasks {
            buses.push(task.await.unwrap());
        }
        for bus in &buses[1..] {
            assert!(Arc::ptr_eq(&buses[0], bus));
        }
    }
}
