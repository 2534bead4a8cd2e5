use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use super::filter;
use crate::transport::QoS;
use crate::utils::error::RegistryError;

/// An inbound publish handed to a subscription callback.
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
}

/// Callback invoked for every inbound publish matching a subscription.
/// Whatever context the consumer needs is captured by the closure.
pub type IncomingCallback = Arc<dyn Fn(Incoming<'_>) + Send + Sync>;

/// One subscription: a filter and the consumer it routes to.
#[derive(Clone)]
pub struct SubscriptionEntry {
    pub filter: String,
    /// QoS the filter was subscribed with; replayed on resubscribe.
    pub qos: QoS,
    pub callback: IncomingCallback,
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("filter", &self.filter)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

/// Maps topic filters to callbacks and routes inbound publishes.
///
/// The registry is a cheap `Clone` handle over shared state. The lock is held
/// only for the array scan; callbacks run after it is released.
#[derive(Clone, Debug)]
pub struct TopicRegistry {
    entries: Arc<Mutex<Vec<SubscriptionEntry>>>,
    capacity: usize,
}

impl TopicRegistry {
    /// Create a registry holding at most `capacity` filters.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::with_capacity(capacity))),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SubscriptionEntry>> {
        // Callbacks never run under this lock; the vector stays consistent.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `callback` for `filter`. Registering an existing filter
    /// replaces its QoS and callback, keeping one entry per exact filter.
    pub fn register(
        &self,
        filter: &str,
        qos: QoS,
        callback: IncomingCallback,
    ) -> Result<(), RegistryError> {
        filter::validate(filter)?;

        let mut entries = self.lock();
        if let Some(existing) = entries.iter_mut().find(|e| e.filter == filter) {
            existing.qos = qos;
            existing.callback = callback;
            debug!("Replaced callback for {filter}");
            return Ok(());
        }
        if entries.len() >= self.capacity {
            return Err(RegistryError::Full(self.capacity));
        }
        entries.push(SubscriptionEntry {
            filter: filter.to_string(),
            qos,
            callback,
        });
        debug!("Registered {filter}");
        Ok(())
    }

    /// Remove the entry for `filter`. Returns whether one existed.
    pub fn unregister(&self, filter: &str) -> bool {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|e| e.filter != filter);
        before != entries.len()
    }

    /// Route an inbound publish to every matching entry.
    ///
    /// Returns `false` and logs the topic as unsolicited when nothing matches.
    pub fn dispatch(&self, topic: &str, payload: &[u8]) -> bool {
        let callbacks: Vec<IncomingCallback> = self
            .lock()
            .iter()
            .filter(|e| filter::matches(&e.filter, topic))
            .map(|e| e.callback.clone())
            .collect();

        if callbacks.is_empty() {
            warn!("Unsolicited publish on {topic} ({} bytes)", payload.len());
            return false;
        }

        for callback in callbacks {
            callback(Incoming { topic, payload });
        }
        true
    }

    /// Snapshot of every registered filter, in registration order.
    pub fn filters(&self) -> Vec<String> {
        self.lock().iter().map(|e| e.filter.clone()).collect()
    }

    /// Snapshot of every filter with its QoS, in registration order.
    pub fn subscriptions(&self) -> Vec<(String, QoS)> {
        self.lock().iter().map(|e| (e.filter.clone(), e.qos)).collect()
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.lock().iter().any(|e| e.filter == filter)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
