//! Change notifications
//!
//! Handlers subscribe to a fixed set of topics and are invoked synchronously,
//! in registration order, each time a notification is published. Publishing
//! never fails; a handler that panics is not isolated from the publisher.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use crate::domain::RuntimeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Live process state changed; status reports should be refreshed
    SystemUpdateReport,
    /// A runtime configuration was created, updated or deleted
    RuntimeConfigChanged,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::SystemUpdateReport => "system.update-report",
            Topic::RuntimeConfigChanged => "runtime.config-changed",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: Topic,
    /// Runtimes touched by the change, empty when unknown
    pub runtime_ids: Vec<RuntimeId>,
}

type Handler = Arc<dyn Fn(&Notification) + Send + Sync>;

struct Entry {
    id: u64,
    topic: Topic,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    entries: RwLock<Vec<Entry>>,
    next_id: AtomicU64,
}

/// Publish/subscribe dispatcher shared by the orchestrator and its callers
#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Registry>,
}

/// Returned by [`EventBus::subscribe`]; pass it back to stop receiving
#[must_use = "dropping the subscription keeps the handler registered with no way to remove it"]
pub struct Subscription {
    id: u64,
    topic: Topic,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn unsubscribe(self) {
        let mut entries = self
            .registry
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.retain(|e| e.id != self.id);
        debug!("Unsubscribed handler {} from {}", self.id, self.topic);
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> Subscription
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self
            .registry
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.push(Entry {
            id,
            topic,
            handler: Arc::new(handler),
        });

        Subscription {
            id,
            topic,
            registry: self.registry.clone(),
        }
    }

    /// Deliver to every current subscriber of the topic.
    ///
    /// The handler list is snapshotted first so handlers may subscribe or
    /// unsubscribe while being called.
    pub fn publish(&self, topic: Topic, runtime_ids: Vec<RuntimeId>) {
        let handlers: Vec<Handler> = {
            let entries = self
                .registry
                .entries
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            entries
                .iter()
                .filter(|e| e.topic == topic)
                .map(|e| e.handler.clone())
                .collect()
        };

        let notification = Notification { topic, runtime_ids };
        debug!(
            "Publishing {} to {} handler(s)",
            topic,
            handlers.len()
        );
        for handler in handlers {
            handler(&notification);
        }
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        let entries = self
            .registry
            .entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        entries.iter().filter(|e| e.topic == topic).count()
    }
}
