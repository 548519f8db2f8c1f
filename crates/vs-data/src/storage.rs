//! Persistent key/value storage
//!
//! [`KeyValueStorage`] mirrors the browser's local storage: string keys,
//! string values, shared by everything on the page. [`SharedRecord`] layers a
//! JSON object of per-id entries on top of one storage key.

use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, trace};

use crate::DataError;

/// String key/value store shared by all consumers
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), DataError>;

    fn remove_item(&self, key: &str) -> Result<(), DataError>;
}

/// In-memory storage with an optional size quota
#[derive(Default)]
pub struct MemoryStorage {
    items: RwLock<AHashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes whose value is larger than `bytes`
    pub fn with_quota(bytes: usize) -> Self {
        Self {
            items: RwLock::new(AHashMap::new()),
            quota: Some(bytes),
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.read().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), DataError> {
        if let Some(quota) = self.quota {
            if value.len() > quota {
                return Err(DataError::QuotaExceeded {
                    key: key.to_string(),
                    size: value.len(),
                });
            }
        }
        self.items.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), DataError> {
        self.items.write().remove(key);
        Ok(())
    }
}

/// Entries of a shared record, raw JSON text per id
pub type RawEntries = IndexMap<String, Box<RawValue>>;

/// A storage key holding `{ [id]: entry }`, shared by many owners.
///
/// Every write re-reads the stored record and replaces only its own entry.
/// Other entries are written back as the exact JSON text that was read.
#[derive(Clone)]
pub struct SharedRecord {
    storage: Arc<dyn KeyValueStorage>,
    key: String,
}

impl SharedRecord {
    pub fn new(storage: Arc<dyn KeyValueStorage>, key: impl Into<String>) -> Self {
        Self {
            storage,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// All entries; a missing or non-object record reads as empty
    pub fn entries(&self) -> RawEntries {
        let Some(text) = self.storage.get_item(&self.key) else {
            return RawEntries::new();
        };
        match serde_json::from_str::<RawEntries>(&text) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(key = %self.key, "Ignoring unreadable stored record: {}", err);
                RawEntries::new()
            }
        }
    }

    /// Raw JSON text stored for `id`
    pub fn raw_entry(&self, id: &str) -> Option<String> {
        self.entries().get(id).map(|raw| raw.get().to_string())
    }

    /// Typed entry for `id`; unreadable entries read as `None`
    pub fn get<T: DeserializeOwned>(&self, id: &str) -> Option<T> {
        let entries = self.entries();
        let raw = entries.get(id)?;
        match serde_json::from_str(raw.get()) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(key = %self.key, id, "Ignoring unreadable stored entry: {}", err);
                None
            }
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, id: &str, value: &T) -> Result<(), DataError> {
        let raw = serde_json::value::to_raw_value(value)?;
        let mut entries = self.entries();
        entries.insert(id.to_string(), raw);
        self.store(&entries)
    }

    /// Drop the entry for `id`, leaving the others in place
    pub fn remove(&self, id: &str) -> Result<(), DataError> {
        let mut entries = self.entries();
        if entries.shift_remove(id).is_none() {
            return Ok(());
        }
        self.store(&entries)
    }

    fn store(&self, entries: &RawEntries) -> Result<(), DataError> {
        let text = serde_json::to_string(entries)?;
        trace!(key = %self.key, bytes = text.len(), "Writing shared record");
        self.storage.set_item(&self.key, &text)
    }
}
