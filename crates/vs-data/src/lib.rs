//! Storage-backed view state and paginated fetching
//!
//! Column visibility and widget configs persist to a [`KeyValueStorage`]
//! shared by every table on the page. [`PaginatedFetch`] loads pages from an
//! injected [`PageSource`] with debouncing and deduplication.

pub mod columns;
pub mod fetch;
pub mod storage;
pub mod widgets;

use thiserror::Error;

// Re-exports
pub use columns::{
    filter_managed_columns, hidden_column_count, visibility_map, ColumnConfig, ColumnSchema, Columns,
    ManagedColumns,
};
pub use fetch::{FetchOptions, FetchStatus, PageSource, PaginatedFetch};
pub use storage::{KeyValueStorage, MemoryStorage, SharedRecord};
pub use widgets::WidgetConfig;

/// Errors that can occur writing persisted state
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Storage quota exceeded writing {key:?} ({size} bytes)")]
    QuotaExceeded { key: String, size: usize },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("No tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
