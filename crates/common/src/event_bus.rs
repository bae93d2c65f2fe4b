use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Named channel on an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic(pub &'static str);

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone)]
pub struct EventEnvelope<T: Clone + Send + Sync + Debug + 'static> {
    pub topic: Topic,
    pub payload: T,
    pub ts_ms: u128,
}

/// @component: {"k":"C","id":"event_bus","t":"Topic-based broadcast event bus","m":{"cur":100,"tgt":100,"u":"%"},"f":["events","pubsub","broadcast"]}
/// Шина событий с маршрутизацией по топикам.
///
/// Публикация не блокирует и не возвращает ошибок: события без подписчиков
/// отбрасываются, отстающие подписчики теряют самые старые события
/// (семантика `tokio::sync::broadcast`). Можно вызывать из синхронного кода.
#[derive(Clone)]
pub struct EventBus<T: Clone + Send + Sync + Debug + 'static> {
    topics: Arc<RwLock<HashMap<&'static str, broadcast::Sender<EventEnvelope<T>>>>>,
    subscribe_buffer: usize,
}

impl<T: Clone + Send + Sync + Debug + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let topics: Vec<&'static str> = self.topics.read().keys().copied().collect();
        f.debug_struct("EventBus")
            .field("topics", &topics)
            .field("subscribe_buffer", &self.subscribe_buffer)
            .finish()
    }
}

impl<T: Clone + Send + Sync + Debug + 'static> EventBus<T> {
    pub fn new(subscribe_buffer: usize) -> Self {
        Self {
            topics: Arc::new(RwLock::new(HashMap::new())),
            // broadcast::channel panics on a zero capacity
            subscribe_buffer: subscribe_buffer.max(1),
        }
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<EventEnvelope<T>> {
        let existing = self.topics.read().get(topic.0).cloned();
        if let Some(tx) = existing {
            return tx;
        }

        let mut topics = self.topics.write();
        topics
            .entry(topic.0)
            .or_insert_with(|| {
                let (tx, _rx) = broadcast::channel(self.subscribe_buffer);
                debug!(target: "event_bus", topic = topic.0, "created topic");
                tx
            })
            .clone()
    }

    /// Publish `payload` on `topic`, returning how many subscribers received it.
    pub fn publish(&self, topic: Topic, payload: T) -> usize {
        let tx = self.sender(topic);
        let envelope = EventEnvelope {
            topic,
            payload,
            ts_ms: current_ts_ms(),
        };
        match tx.send(envelope) {
            Ok(receivers) => {
                trace!(target: "event_bus", topic = topic.0, receivers, "published");
                receivers
            }
            Err(_) => {
                trace!(target: "event_bus", topic = topic.0, "no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<EventEnvelope<T>> {
        self.sender(topic).subscribe()
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.topics
            .read()
            .get(topic.0)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

fn current_ts_ms() -> u128 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}
