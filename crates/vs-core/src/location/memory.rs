//! In-memory history stack

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::{HistoryAction, HistoryBackend, LocationSubscriber, SubscriberList};

/// History entries stored internally
#[derive(Debug, Clone)]
struct HistoryStack {
    entries: Vec<String>,
    index: usize,
}

/// A history stack kept in memory, with push/replace and back/forward
/// navigation. Used by hosts without a browser and by tests.
pub struct MemoryHistory {
    stack: RwLock<HistoryStack>,
    subscribers: SubscriberList,
}

impl MemoryHistory {
    /// Create a history with a single empty entry
    pub fn new() -> Self {
        Self::with_search("")
    }

    /// Create a history whose first entry holds `search`
    pub fn with_search(search: &str) -> Self {
        let stack = HistoryStack {
            entries: vec![normalize(search)],
            index: 0,
        };

        Self {
            stack: RwLock::new(stack),
            subscribers: SubscriberList::new(),
        }
    }

    /// Number of entries in the stack
    pub fn len(&self) -> usize {
        self.stack.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.read().entries.is_empty()
    }

    /// Position of the current entry
    pub fn index(&self) -> usize {
        self.stack.read().index
    }

    /// All entries, oldest first
    pub fn entries(&self) -> Vec<String> {
        self.stack.read().entries.clone()
    }

    /// Navigate to an arbitrary query string as if typed into the address bar
    pub fn navigate(&self, search: &str) {
        self.commit(search, HistoryAction::Push);
    }

    /// Move back one entry; returns `false` when already at the oldest entry
    pub fn back(&self) -> bool {
        let search = {
            let mut stack = self.stack.write();
            if stack.index == 0 {
                return false;
            }
            stack.index -= 1;
            stack.entries[stack.index].clone()
        };
        self.subscribers.notify(&search);
        true
    }

    /// Move forward one entry; returns `false` when already at the newest entry
    pub fn forward(&self) -> bool {
        let search = {
            let mut stack = self.stack.write();
            if stack.index + 1 >= stack.entries.len() {
                return false;
            }
            stack.index += 1;
            stack.entries[stack.index].clone()
        };
        self.subscribers.notify(&search);
        true
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryBackend for MemoryHistory {
    fn search(&self) -> String {
        let stack = self.stack.read();
        stack.entries[stack.index].clone()
    }

    fn commit(&self, search: &str, action: HistoryAction) {
        let search = normalize(search);
        {
            let mut stack = self.stack.write();
            match action {
                HistoryAction::Push => {
                    let keep = stack.index + 1;
                    stack.entries.truncate(keep);
                    stack.entries.push(search.clone());
                    stack.index = keep;
                }
                HistoryAction::Replace => {
                    let index = stack.index;
                    stack.entries[index] = search.clone();
                }
            }
            trace!(?action, entries = stack.entries.len(), "history commit: {:?}", search);
        }
        self.subscribers.notify(&search);
    }

    fn subscribe(&self, subscriber: Arc<dyn LocationSubscriber>) {
        self.subscribers.add(subscriber);
    }
}

fn normalize(search: &str) -> String {
    search.strip_prefix('?').unwrap_or(search).to_string()
}
