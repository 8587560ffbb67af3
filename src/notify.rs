//! Topic-based change notifications ("rows changed in table X").

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::store::NavStore;

pub const NAV_PRICES_TOPIC: &str = "nav_prices";
const DEFAULT_TOPIC_CAPACITY: usize = 64;
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub topic: String,
    pub kind: ChangeKind,
}

pub struct ChangeNotifier {
    topics: Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>,
    capacity: usize,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_TOPIC_CAPACITY)
    }
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, topic: &str) -> Subscription {
        let receiver = self.sender(topic).subscribe();
        debug!(component = "notify", event = "notify.subscribe", topic);
        Subscription {
            topic: topic.to_string(),
            receiver,
        }
    }

    /// Returns the number of live subscriptions that will see the event.
    pub fn publish(&self, topic: &str, kind: ChangeKind) -> usize {
        let event = ChangeEvent {
            topic: topic.to_string(),
            kind,
        };
        self.sender(topic).send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .expect("notifier topics lock should not be poisoned")
            .get(topic)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<ChangeEvent> {
        let mut topics = self
            .topics
            .lock()
            .expect("notifier topics lock should not be poisoned");
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

pub struct Subscription {
    topic: String,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next event, or `None` once the notifier is gone. Events dropped while this
    /// subscriber lagged collapse into the next delivered one.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        component = "notify",
                        event = "notify.lagged",
                        topic = %self.topic,
                        skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        debug!(
            component = "notify",
            event = "notify.unsubscribe",
            topic = %self.topic
        );
    }
}

/// Polls the store's change token and publishes an update on [`NAV_PRICES_TOPIC`]
/// whenever another writer has committed. Intervals below 1 ms are raised to 1 ms.
pub fn spawn_change_watcher(
    store: Arc<dyn NavStore>,
    notifier: Arc<ChangeNotifier>,
    poll_interval: Duration,
) -> JoinHandle<()> {
    let poll_interval = poll_interval.max(MIN_POLL_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(poll_interval);
        let mut last_token: Option<i64> = None;

        info!(
            component = "notify",
            event = "watcher.start",
            poll_interval_ms = poll_interval.as_millis() as u64
        );

        loop {
            ticker.tick().await;
            let polled = Arc::clone(&store);
            let token = match tokio::task::spawn_blocking(move || polled.change_token()).await {
                Ok(Ok(token)) => token,
                Ok(Err(err)) => {
                    warn!(
                        component = "notify",
                        event = "watcher.poll.error",
                        error = %err
                    );
                    continue;
                }
                Err(err) => {
                    warn!(
                        component = "notify",
                        event = "watcher.poll.join_error",
                        error = %err
                    );
                    continue;
                }
            };

            if last_token.is_some_and(|previous| previous != token) {
                let receivers = notifier.publish(NAV_PRICES_TOPIC, ChangeKind::Update);
                debug!(
                    component = "notify",
                    event = "watcher.change_detected",
                    receivers
                );
            }
            last_token = Some(token);
        }
    })
}
