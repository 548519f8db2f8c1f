//! Location subscriber trait

use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Trait for components that need to respond to query string changes
pub trait LocationSubscriber: Send + Sync {
    /// Called after the query string changed, with the new query string
    fn on_location_change(&self, search: &str);
}

/// Weakly held subscribers; dropped subscribers are pruned on notify.
#[derive(Default)]
pub struct SubscriberList {
    subscribers: RwLock<Vec<Weak<dyn LocationSubscriber>>>,
}

impl SubscriberList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber
    pub fn add(&self, subscriber: Arc<dyn LocationSubscriber>) {
        self.subscribers.write().push(Arc::downgrade(&subscriber));
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.subscribers
            .read()
            .iter()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notify every live subscriber of the new query string
    pub fn notify(&self, search: &str) {
        let live: Vec<Arc<dyn LocationSubscriber>> = {
            let mut subscribers = self.subscribers.write();
            subscribers.retain(|weak| weak.strong_count() > 0);
            subscribers.iter().filter_map(Weak::upgrade).collect()
        };

        // Called without the lock held so subscribers may read or write back.
        for subscriber in live {
            subscriber.on_location_change(search);
        }
    }
}
