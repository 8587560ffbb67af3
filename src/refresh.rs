//! Request-generation tagging so a slow, older refresh never overwrites a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket {
    generation: u64,
}

impl RefreshTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Published<V> {
    generation: u64,
    value: Option<Arc<V>>,
}

pub struct RefreshTracker<V> {
    issued: AtomicU64,
    published: RwLock<Published<V>>,
}

impl<V> Default for RefreshTracker<V> {
    fn default() -> Self {
        Self {
            issued: AtomicU64::new(0),
            published: RwLock::new(Published {
                generation: 0,
                value: None,
            }),
        }
    }
}

impl<V> RefreshTracker<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> RefreshTicket {
        RefreshTicket {
            generation: self.issued.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    /// True while no later ticket has been issued.
    pub fn is_latest(&self, ticket: RefreshTicket) -> bool {
        self.issued.load(Ordering::SeqCst) == ticket.generation
    }

    /// Stores `value` unless a newer generation has already been published.
    pub fn publish(&self, ticket: RefreshTicket, value: Arc<V>) -> bool {
        let mut guard = self
            .published
            .write()
            .expect("refresh tracker lock should not be poisoned");

        if ticket.generation <= guard.generation {
            debug!(
                component = "refresh",
                event = "refresh.superseded",
                generation = ticket.generation,
                published_generation = guard.generation
            );
            return false;
        }

        guard.generation = ticket.generation;
        guard.value = Some(value);
        true
    }

    pub fn current(&self) -> Option<Arc<V>> {
        self.published
            .read()
            .expect("refresh tracker lock should not be poisoned")
            .value
            .clone()
    }

    pub fn published_generation(&self) -> u64 {
        self.published
            .read()
            .expect("refresh tracker lock should not be poisoned")
            .generation
    }
}
