//! Column visibility persisted per table
//!
//! All tables share one storage record shaped
//! `{ [tableId]: { [columnKey]: ColumnConfig } }`. Reads reconcile the
//! persisted entry with the table's current schema:
//!
//! - columns missing from storage take their default visibility
//! - stored columns no longer in the schema are dropped
//! - a stored `isShown` wins over the default

use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use vs_core::{Snapshot, StableCell};

use crate::storage::{KeyValueStorage, SharedRecord};
use crate::DataError;

/// Default storage key of the column record
pub const DEFAULT_COLUMN_STORAGE_KEY: &str = "managedColumns";

/// A column as declared by its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSchema {
    pub key: String,
    pub title: String,
    pub is_shown_by_default: bool,
    /// Always shown at its default; toggles are ignored
    pub is_untoggle_able: bool,
}

impl ColumnSchema {
    pub fn new(key: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            title: title.into(),
            is_shown_by_default: true,
            is_untoggle_able: false,
        }
    }

    pub fn hidden_by_default(mut self) -> Self {
        self.is_shown_by_default = false;
        self
    }

    pub fn untoggleable(mut self) -> Self {
        self.is_untoggle_able = true;
        self
    }

    fn config(&self, is_shown: bool) -> ColumnConfig {
        ColumnConfig {
            key: self.key.clone(),
            title: self.title.clone(),
            is_shown,
            is_shown_by_default: self.is_shown_by_default,
            is_untoggle_able: self.is_untoggle_able,
        }
    }
}

/// A column with its resolved visibility
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnConfig {
    pub key: String,
    pub title: String,
    pub is_shown: bool,
    pub is_shown_by_default: bool,
    #[serde(rename = "isUntoggleAble", default)]
    pub is_untoggle_able: bool,
}

/// Resolved columns in schema order
pub type Columns = IndexMap<String, ColumnConfig>;

/// Restrict a schema, e.g. to the columns available for the current scope
pub fn filter_managed_columns(
    schema: &[ColumnSchema],
    mut keep: impl FnMut(&ColumnSchema) -> bool,
) -> Vec<ColumnSchema> {
    schema.iter().filter(|column| keep(column)).cloned().collect()
}

pub fn hidden_column_count(columns: &Columns) -> usize {
    columns.values().filter(|column| !column.is_shown).count()
}

/// Column key to whether it is shown
pub fn visibility_map(columns: &Columns) -> IndexMap<String, bool> {
    columns
        .iter()
        .map(|(key, column)| (key.clone(), column.is_shown))
        .collect()
}

/// Column visibility of one table
pub struct ManagedColumns {
    record: SharedRecord,
    table_id: String,
    schema: Vec<ColumnSchema>,
    cell: StableCell<Columns>,
}

impl ManagedColumns {
    pub fn new(storage: Arc<dyn KeyValueStorage>, table_id: &str, schema: Vec<ColumnSchema>) -> Self {
        Self::with_key(storage, DEFAULT_COLUMN_STORAGE_KEY, table_id, schema)
    }

    pub fn with_key(
        storage: Arc<dyn KeyValueStorage>,
        storage_key: &str,
        table_id: &str,
        schema: Vec<ColumnSchema>,
    ) -> Self {
        Self {
            record: SharedRecord::new(storage, storage_key),
            table_id: table_id.to_string(),
            schema,
            cell: StableCell::new(),
        }
    }

    pub fn table_id(&self) -> &str {
        &self.table_id
    }

    pub fn schema(&self) -> &[ColumnSchema] {
        &self.schema
    }

    /// Persisted `isShown` per column key; anything unreadable is skipped
    fn persisted(&self) -> IndexMap<String, bool> {
        let stored = match self.record.get::<Value>(&self.table_id) {
            Some(Value::Object(stored)) => stored,
            Some(other) => {
                debug!(table = %self.table_id, "Ignoring non-object column record: {}", other);
                return IndexMap::new();
            }
            None => return IndexMap::new(),
        };

        stored
            .iter()
            .filter_map(|(key, column)| {
                let shown = column.get("isShown").and_then(Value::as_bool)?;
                Some((key.clone(), shown))
            })
            .collect()
    }

    fn reconcile(&self) -> Columns {
        let persisted = self.persisted();
        self.schema
            .iter()
            .map(|column| {
                let is_shown = match persisted.get(&column.key) {
                    Some(shown) if !column.is_untoggle_able => *shown,
                    _ => column.is_shown_by_default,
                };
                (column.key.clone(), column.config(is_shown))
            })
            .collect()
    }

    pub fn snapshot(&self) -> Snapshot<Columns> {
        self.cell.settle(self.reconcile())
    }

    /// Current columns; the same `Arc` until visibility changes
    pub fn columns(&self) -> Arc<Columns> {
        self.snapshot().value
    }

    /// Flip one column; unknown and untoggleable keys are ignored
    pub fn toggle_visibility(&self, key: &str) -> Result<(), DataError> {
        let mut columns = self.reconcile();
        match columns.get_mut(key) {
            Some(column) if !column.is_untoggle_able => column.is_shown = !column.is_shown,
            _ => {
                trace!(table = %self.table_id, key, "Ignoring toggle of unmanaged column");
                return Ok(());
            }
        }
        self.store(&columns)
    }

    /// Apply several visibility changes in one write
    pub fn set_columns<'a>(
        &self,
        visibility: impl IntoIterator<Item = (&'a str, bool)>,
    ) -> Result<(), DataError> {
        let mut columns = self.reconcile();
        let mut changed = false;
        for (key, shown) in visibility {
            if let Some(column) = columns.get_mut(key) {
                if !column.is_untoggle_able && column.is_shown != shown {
                    column.is_shown = shown;
                    changed = true;
                }
            }
        }
        if !changed {
            return Ok(());
        }
        self.store(&columns)
    }

    /// Forget this table's stored visibility
    pub fn reset(&self) -> Result<(), DataError> {
        self.record.remove(&self.table_id)
    }

    fn store(&self, columns: &Columns) -> Result<(), DataError> {
        debug!(table = %self.table_id, hidden = hidden_column_count(columns), "Storing column visibility");
        self.record.set(&self.table_id, columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn schema() -> Vec<ColumnSchema> {
        vec![
            ColumnSchema::new("cve", "CVE").untoggleable(),
            ColumnSchema::new("severity", "Severity"),
            ColumnSchema::new("images", "Images"),
            ColumnSchema::new("published", "Published").hidden_by_default(),
        ]
    }

    fn storage_with(text: &str) -> Arc<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item(DEFAULT_COLUMN_STORAGE_KEY, text).unwrap();
        storage
    }

    fn shown(columns: &Columns) -> Vec<&str> {
        columns
            .values()
            .filter(|column| column.is_shown)
            .map(|column| column.key.as_str())
            .collect()
    }

    #[test]
    fn test_defaults_when_storage_empty() {
        let columns = ManagedColumns::new(Arc::new(MemoryStorage::new()), "A", schema()).columns();
        assert_eq!(shown(&columns), vec!["cve", "severity", "images"]);
        assert_eq!(hidden_column_count(&columns), 1);
        assert_eq!(columns["published"].title, "Published");
    }

    #[test]
    fn test_reconciles_with_schema() {
        let storage = storage_with(
            r#"{"A": {
                "severity": {"key": "severity", "title": "Severity", "isShown": false, "isShownByDefault": true},
                "removed": {"key": "removed", "title": "Gone", "isShown": true, "isShownByDefault": true},
                "published": {"isShown": true}
            }}"#,
        );
        let columns = ManagedColumns::new(storage, "A", schema()).columns();

        assert_eq!(columns.keys().collect::<Vec<_>>(), vec!["cve", "severity", "images", "published"]);
        assert_eq!(shown(&columns), vec!["cve", "images", "published"]);
    }

    #[test]
    fn test_corrupt_storage_uses_defaults() {
        for text in ["garbage", "[]", r#"{"A": "text"}"#, r#"{"A": [1]}"#, r#"{"A": {"severity": 7}}"#] {
            let columns = ManagedColumns::new(storage_with(text), "A", schema()).columns();
            assert_eq!(shown(&columns), vec!["cve", "severity", "images"], "{text}");
        }
    }

    #[test]
    fn test_toggle_visibility() {
        let storage = Arc::new(MemoryStorage::new());
        let managed = ManagedColumns::new(storage.clone(), "A", schema());

        managed.toggle_visibility("images").unwrap();
        managed.toggle_visibility("published").unwrap();
        assert_eq!(shown(&managed.columns()), vec!["cve", "severity", "published"]);

        // Another instance for the same table sees the change
        let other = ManagedColumns::new(storage, "A", schema());
        assert!(!visibility_map(&other.columns())["images"]);
    }

    #[test]
    fn test_unknown_and_untoggleable_keys_are_ignored() {
        let storage = Arc::new(MemoryStorage::new());
        let managed = ManagedColumns::new(storage.clone(), "A", schema());

        managed.toggle_visibility("bogus").unwrap();
        managed.toggle_visibility("cve").unwrap();
        managed.set_columns([("bogus", false), ("cve", false)]).unwrap();
        assert!(storage.get_item(DEFAULT_COLUMN_STORAGE_KEY).is_none());

        managed.set_columns([("severity", false), ("bogus", true)]).unwrap();
        let stored: Value =
            serde_json::from_str(&storage.get_item(DEFAULT_COLUMN_STORAGE_KEY).unwrap()).unwrap();
        assert!(stored["A"].get("bogus").is_none());
        assert_eq!(stored["A"]["severity"]["isShown"], Value::Bool(false));
        assert_eq!(stored["A"]["cve"]["isUntoggleAble"], Value::Bool(true));
    }

    #[test]
    fn test_write_leaves_other_tables_untouched() {
        let table_b = r#"{"x":{"key":"x","title":"X","isShown":false,"isShownByDefault":true},  "extra" : 1}"#;
        let storage = storage_with(&format!(r#"{{"B":{table_b}}}"#));
        let table_a = ManagedColumns::new(storage.clone(), "A", schema());
        let b_record = SharedRecord::new(storage.clone(), DEFAULT_COLUMN_STORAGE_KEY);

        table_a.toggle_visibility("severity").unwrap();
        table_a.set_columns([("images", false)]).unwrap();
        table_a.reset().unwrap();

        assert_eq!(b_record.raw_entry("B").as_deref(), Some(table_b));
    }

    #[test]
    fn test_write_over_corrupt_table_record() {
        let storage = storage_with(r#"{"A": 42, "B": {"x": {"isShown": false}}}"#);
        let managed = ManagedColumns::new(storage.clone(), "A", schema());

        managed.toggle_visibility("severity").unwrap();
        assert_eq!(shown(&managed.columns()), vec!["cve", "images"]);
        let record = SharedRecord::new(storage, DEFAULT_COLUMN_STORAGE_KEY);
        assert_eq!(record.raw_entry("B").as_deref(), Some(r#"{"x": {"isShown": false}}"#));
    }

    #[test]
    fn test_reset_restores_defaults() {
        let managed = ManagedColumns::new(Arc::new(MemoryStorage::new()), "A", schema());
        managed.toggle_visibility("severity").unwrap();
        managed.reset().unwrap();
        assert_eq!(shown(&managed.columns()), vec!["cve", "severity", "images"]);
    }

    #[test]
    fn test_columns_are_referentially_stable() {
        let storage = Arc::new(MemoryStorage::new());
        let managed = ManagedColumns::new(storage.clone(), "A", schema());
        let first = managed.snapshot();

        ManagedColumns::new(storage, "B", schema()).toggle_visibility("images").unwrap();
        assert!(first.same_as(&managed.snapshot()));

        managed.toggle_visibility("images").unwrap();
        assert!(!first.same_as(&managed.snapshot()));
    }

    #[test]
    fn test_filter_managed_columns() {
        let filtered = filter_managed_columns(&schema(), |column| column.key != "images");
        let keys: Vec<_> = filtered.iter().map(|column| column.key.as_str()).collect();
        assert_eq!(keys, vec!["cve", "severity", "published"]);
    }
}
