//! Core primitives for URL-backed view state
//!
//! This crate provides the query string codec, the history abstraction, and
//! the typed URL parameter store that the view state controllers build on.

pub mod codec;
pub mod location;
pub mod parameter;
pub mod scheduler;
pub mod sequence;
pub mod settings;
pub mod stable;

use thiserror::Error;

// Re-export commonly used types
pub use codec::{decode, encode, KeyPath, QueryObject};
pub use location::{HistoryAction, HistoryBackend, LocationSubscriber, MemoryHistory};
pub use parameter::{Transaction, UrlParameter, UrlState};
pub use scheduler::Scheduler;
pub use sequence::Sequence;
pub use settings::SyncSettings;
pub use stable::{Snapshot, StableCell};

/// Errors raised while loading settings.
///
/// Reading the URL never fails; malformed input falls back to defaults.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings parse error: {0}")]
    Settings(#[from] serde_json::Error),
}
