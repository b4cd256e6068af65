//! In-memory reference broker.
//!
//! Implements both capability groups without external infrastructure.
//! Pub/sub is awaited fan-out to the subscribers matching the topic at
//! publish time. Streams are append-only per-stream logs with one read
//! cursor per consumer group, advanced only after a handler completes
//! successfully. Delivery is eager: `send` drains new entries before
//! returning, so a caller observes handler side effects on the next
//! statement. Locks are never held across a handler await.

use crate::broker::{Broker, ConsumerId, Handler, PubSubBroker, StreamBroker, SubscriptionId};
use async_trait::async_trait;
use courier_core::{pattern, CourierResult, Message};
use futures_util::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

struct Subscription {
    id: SubscriptionId,
    pattern: String,
    handler: Handler,
}

struct ConsumerReg {
    id: ConsumerId,
    name: String,
    handler: Handler,
}

/// Read position of one consumer group within a stream.
#[derive(Default)]
struct Group {
    /// Index of the next undelivered entry.
    cursor: usize,
    /// Single-drainer flag; at most one task advances this cursor.
    draining: bool,
    /// Round-robin pick state across the group's consumers.
    next_consumer: usize,
    consumers: Vec<ConsumerReg>,
}

#[derive(Default)]
struct StreamLog {
    next_seq: u64,
    entries: Vec<(String, Message)>,
    groups: HashMap<String, Group>,
}

/// In-memory broker implementing both capability groups.
#[derive(Default)]
pub struct InMemoryBroker {
    subscriptions: Mutex<Vec<Subscription>>,
    streams: Mutex<HashMap<String, StreamLog>>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers pending entries to every group of `stream`.
    async fn drain(&self, stream: &str) {
        let groups: Vec<String> = {
            let streams = self.streams.lock();
            match streams.get(stream) {
                Some(log) => log.groups.keys().cloned().collect(),
                None => return,
            }
        };
        for group in groups {
            self.drain_group(stream, &group).await;
        }
    }

    /// Delivers pending entries to one group.
    ///
    /// If another task is already draining this group, returns
    /// immediately; the active drainer re-checks the log after every
    /// delivery and will pick up entries appended in the meantime.
    async fn drain_group(&self, stream: &str, group_name: &str) {
        {
            let mut streams = self.streams.lock();
            let Some(group) = streams
                .get_mut(stream)
                .and_then(|log| log.groups.get_mut(group_name))
            else {
                return;
            };
            if group.draining {
                return;
            }
            group.draining = true;
        }

        loop {
            let next = {
                let mut streams = self.streams.lock();
                let Some(log) = streams.get_mut(stream) else {
                    return;
                };
                let Some(group) = log.groups.get_mut(group_name) else {
                    return;
                };
                if group.consumers.is_empty() || group.cursor >= log.entries.len() {
                    group.draining = false;
                    None
                } else {
                    let (entry_id, message) = log.entries[group.cursor].clone();
                    let pick = group.next_consumer % group.consumers.len();
                    group.next_consumer = group.next_consumer.wrapping_add(1);
                    let consumer = &group.consumers[pick];
                    Some((entry_id, message, consumer.name.clone(), consumer.handler.clone()))
                }
            };

            let Some((entry_id, message, consumer, handler)) = next else {
                return;
            };

            match handler(message).await {
                Ok(()) => {
                    let mut streams = self.streams.lock();
                    match streams
                        .get_mut(stream)
                        .and_then(|log| log.groups.get_mut(group_name))
                    {
                        Some(group) => group.cursor += 1,
                        None => return,
                    }
                }
                Err(e) => {
                    warn!(
                        stream,
                        group = group_name,
                        consumer = %consumer,
                        entry = %entry_id,
                        error = %e,
                        "Stream handler failed; entry stays unacknowledged"
                    );
                    let mut streams = self.streams.lock();
                    if let Some(group) = streams
                        .get_mut(stream)
                        .and_then(|log| log.groups.get_mut(group_name))
                    {
                        group.draining = false;
                    }
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl PubSubBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, message: &Message) -> CourierResult<()> {
        let matched: Vec<Handler> = {
            let subscriptions = self.subscriptions.lock();
            subscriptions
                .iter()
                .filter(|s| pattern::matches(&s.pattern, topic))
                .map(|s| s.handler.clone())
                .collect()
        };
        debug!(topic, matched = matched.len(), "Publishing message");
        let results = join_all(matched.into_iter().map(|h| h(message.clone()))).await;
        for result in results {
            if let Err(e) = result {
                warn!(topic, error = %e, "Subscriber handler failed");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, handler: Handler) -> CourierResult<SubscriptionId> {
        let id = SubscriptionId::next();
        self.subscriptions.lock().push(Subscription {
            id,
            pattern: pattern.to_string(),
            handler,
        });
        debug!(pattern, "Registered subscription");
        Ok(id)
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> CourierResult<()> {
        self.subscriptions.lock().retain(|s| s.id != id);
        Ok(())
    }
}

#[async_trait]
impl StreamBroker for InMemoryBroker {
    async fn send(&self, stream: &str, message: &Message) -> CourierResult<String> {
        let entry_id = {
            let mut streams = self.streams.lock();
            let log = streams.entry(stream.to_string()).or_default();
            log.next_seq += 1;
            let entry_id = format!("{}-0", log.next_seq);
            log.entries.push((entry_id.clone(), message.clone()));
            entry_id
        };
        self.drain(stream).await;
        Ok(entry_id)
    }

    async fn consume(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        handler: Handler,
    ) -> CourierResult<ConsumerId> {
        let id = ConsumerId::next();
        {
            let mut streams = self.streams.lock();
            let log = streams.entry(stream.to_string()).or_default();
            let group = log.groups.entry(group.to_string()).or_default();
            group.consumers.push(ConsumerReg {
                id,
                name: consumer.to_string(),
                handler,
            });
        }
        debug!(stream, group, consumer, "Registered stream consumer");
        // deliver any backlog appended before the consumer arrived
        self.drain_group(stream, group).await;
        Ok(id)
    }

    async fn stop(&self, id: ConsumerId) -> CourierResult<()> {
        let mut streams = self.streams.lock();
        for log in streams.values_mut() {
            for group in log.groups.values_mut() {
                group.consumers.retain(|c| c.id != id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn broker_type(&self) -> &str {
        "memory"
    }

    async fn connect(&self) -> CourierResult<()> {
        Ok(())
    }

    async fn close(&self) -> CourierResult<()> {
        self.subscriptions.lock().clear();
        self.streams.lock().clear();
        Ok(())
    }

    fn pubsub(&self) -> Option<&dyn PubSubBroker> {
        Some(self)
    }

    fn stream(&self) -> Option<&dyn StreamBroker> {
        Some(self)
    }
}
