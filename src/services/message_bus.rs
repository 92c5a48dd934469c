//! Topic-based message bus for inter-worker communication.
//!
//! One `tokio::sync::broadcast` channel per topic. Publishing is
//! fire-and-forget: a publisher never blocks on subscribers, and a slow
//! subscriber lags (dropping its oldest backlog) without stalling anyone.
//! Direct messages travel over the recipient's inbox topic.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use crate::domain::errors::SwarmResult;
use crate::domain::models::message::{inbox_topic, AgentMessage, Recipient};
use crate::domain::models::run::CommStats;
use crate::services::swarm_events::{SwarmEventBus, SwarmEventData};

/// Configuration for the message bus.
#[derive(Debug, Clone)]
pub struct MessageBusConfig {
    /// Capacity of each per-topic broadcast channel.
    pub channel_capacity: usize,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
        }
    }
}

/// Aggregate bus counters for diagnostics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusStats {
    pub published: u64,
    pub topics: usize,
}

/// Live stream count per (topic, subscriber id), for delivery accounting.
type SubscriptionRegistry = Arc<Mutex<HashMap<(String, String), usize>>>;

/// Per-run message bus. Fresh per run; shares nothing across runs.
pub struct MessageBus {
    topics: Arc<RwLock<HashMap<String, broadcast::Sender<AgentMessage>>>>,
    counters: Arc<RwLock<HashMap<String, CommStats>>>,
    subscriptions: SubscriptionRegistry,
    published: Arc<RwLock<u64>>,
    events: SwarmEventBus,
    config: MessageBusConfig,
}

impl MessageBus {
    pub fn new(config: MessageBusConfig, events: SwarmEventBus) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            counters: Arc::new(RwLock::new(HashMap::new())),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            published: Arc::new(RwLock::new(0)),
            events,
            config,
        }
    }

    /// Publish a message to its topic.
    ///
    /// Returns the number of subscribers the message was delivered to (zero
    /// is not an error: fire-and-forget). Subscribers of the topic receive
    /// it at most once; the sender's own subscriptions are skipped and do
    /// not count as deliveries.
    pub async fn publish(&self, msg: AgentMessage) -> SwarmResult<usize> {
        let sender = self.topic_sender(&msg.topic).await;

        {
            let mut counters = self.counters.write().await;
            counters.entry(msg.sender.clone()).or_default().sent += 1;
            let mut published = self.published.write().await;
            *published += 1;
        }

        self.events.emit(SwarmEventData::MessageSent {
            from: msg.sender.clone(),
            topic: msg.topic.clone(),
            summary: msg.summary(),
        });

        debug!(
            sender = %msg.sender,
            topic = %msg.topic,
            kind = ?msg.kind,
            "message published"
        );

        let own_subscriptions = {
            let subs = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            subs.get(&(msg.topic.clone(), msg.sender.clone()))
                .copied()
                .unwrap_or(0)
        };

        // Receiver count at send time; Err means no subscribers right now.
        let receivers = sender.send(msg).map_or(0, |n| n);
        Ok(receivers.saturating_sub(own_subscriptions))
    }

    /// Publish a direct message to one worker's inbox.
    pub async fn send_direct(&self, msg: AgentMessage) -> SwarmResult<usize> {
        debug_assert!(matches!(msg.recipient, Recipient::Worker(_)));
        self.publish(msg).await
    }

    /// Subscribe to a topic as `subscriber_id`.
    ///
    /// The returned stream yields only messages from other senders and
    /// keeps the per-subscriber received counter.
    pub async fn subscribe(&self, topic: &str, subscriber_id: &str) -> MessageStream {
        let rx = self.topic_sender(topic).await.subscribe();
        let key = (topic.to_string(), subscriber_id.to_string());
        {
            let mut subs = self
                .subscriptions
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *subs.entry(key.clone()).or_insert(0) += 1;
        }
        MessageStream {
            rx,
            subscriber_id: subscriber_id.to_string(),
            counters: Arc::clone(&self.counters),
            subscriptions: Arc::clone(&self.subscriptions),
            registry_key: key,
        }
    }

    /// Subscribe to a worker's own inbox (direct messages).
    pub async fn subscribe_inbox(&self, worker_id: &str) -> MessageStream {
        self.subscribe(&inbox_topic(worker_id), worker_id).await
    }

    /// Sent/received counters for one worker.
    pub async fn comm_stats(&self, worker_id: &str) -> CommStats {
        let counters = self.counters.read().await;
        counters.get(worker_id).copied().unwrap_or_default()
    }

    pub async fn stats(&self) -> BusStats {
        BusStats {
            published: *self.published.read().await,
            topics: self.topics.read().await.len(),
        }
    }

    async fn topic_sender(&self, topic: &str) -> broadcast::Sender<AgentMessage> {
        {
            let topics = self.topics.read().await;
            if let Some(sender) = topics.get(topic) {
                return sender.clone();
            }
        }
        let mut topics = self.topics.write().await;
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.config.channel_capacity).0)
            .clone()
    }
}

/// One subscriber's live view of a topic.
pub struct MessageStream {
    rx: broadcast::Receiver<AgentMessage>,
    subscriber_id: String,
    counters: Arc<RwLock<HashMap<String, CommStats>>>,
    subscriptions: SubscriptionRegistry,
    registry_key: (String, String),
}

impl Drop for MessageStream {
    fn drop(&mut self) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = subs.get_mut(&self.registry_key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subs.remove(&self.registry_key);
            }
        }
    }
}

impl MessageStream {
    /// Next message from another sender, or `None` once the topic is closed.
    ///
    /// A lagged subscriber skips the overwritten backlog and keeps going.
    pub async fn recv(&mut self) -> Option<AgentMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) if msg.sender == self.subscriber_id => continue,
                Ok(msg) => {
                    let mut counters = self.counters.write().await;
                    counters
                        .entry(self.subscriber_id.clone())
                        .or_default()
                        .received += 1;
                    return Some(msg);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        subscriber = %self.subscriber_id,
                        skipped,
                        "subscriber lagged, dropping backlog"
                    );
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking poll, for drain loops at phase boundaries.
    pub async fn try_recv(&mut self) -> Option<AgentMessage> {
        loop {
            match self.rx.try_recv() {
                Ok(msg) if msg.sender == self.subscriber_id => continue,
                Ok(msg) => {
                    let mut counters = self.counters.write().await;
                    counters
                        .entry(self.subscriber_id.clone())
                        .or_default()
                        .received += 1;
                    return Some(msg);
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
