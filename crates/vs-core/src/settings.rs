//! Synchronization settings

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::{CodecOptions, DEFAULT_ARRAY_LIMIT};
use crate::location::HistoryAction;
use crate::CoreError;

/// Settings shared by every controller built on one [`crate::UrlState`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncSettings {
    /// History action used when a caller does not pick one
    pub default_history_action: HistoryAction,

    /// Query key holding the search filter
    pub search_key: String,

    /// Query key holding the sort option
    pub sort_key: String,

    /// Largest bracket index decoded as an array position
    pub array_limit: usize,

    /// Debounce window for paginated fetches (milliseconds)
    pub debounce_rate_ms: u64,

    /// Storage key of the column visibility record
    pub column_storage_key: String,

    /// Storage key of the widget configuration record
    pub widget_storage_key: String,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            default_history_action: HistoryAction::Push,
            search_key: "s".to_string(),
            sort_key: "sortOption".to_string(),
            array_limit: DEFAULT_ARRAY_LIMIT,
            debounce_rate_ms: 800,
            column_storage_key: "managedColumns".to_string(),
            widget_storage_key: "widgetConfigs".to_string(),
        }
    }
}

impl SyncSettings {
    /// Parse settings from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Codec options derived from these settings
    pub fn codec_options(&self) -> CodecOptions {
        CodecOptions {
            array_limit: self.array_limit,
        }
    }

    /// Debounce window as a duration
    pub fn debounce_rate(&self) -> Duration {
        Duration::from_millis(self.debounce_rate_ms)
    }
}
