use std::sync::Arc;

use serde::{Deserialize, Serialize};

mod memory;
mod subscriber;

pub use memory::MemoryHistory;
pub use subscriber::{LocationSubscriber, SubscriberList};

/// Whether a change creates a new navigable history entry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryAction {
    /// Add a new history entry
    #[default]
    Push,
    /// Overwrite the current history entry
    Replace,
}

impl HistoryAction {
    /// Combine two staged actions; one push makes the whole commit a push.
    pub fn merge(self, other: HistoryAction) -> HistoryAction {
        match (self, other) {
            (HistoryAction::Replace, HistoryAction::Replace) => HistoryAction::Replace,
            _ => HistoryAction::Push,
        }
    }
}

/// The browser history as seen by the parameter store.
///
/// Only the query string is read or written; query strings are exchanged
/// without the leading `?`.
pub trait HistoryBackend: Send + Sync {
    /// Current query string
    fn search(&self) -> String;

    /// Commit a new query string
    fn commit(&self, search: &str, action: HistoryAction);

    /// Register for change notifications, including external navigation
    fn subscribe(&self, subscriber: Arc<dyn LocationSubscriber>);
}
