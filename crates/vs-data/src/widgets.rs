//! Persisted per-widget configuration

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use vs_core::{Snapshot, StableCell};

use crate::storage::{KeyValueStorage, SharedRecord};
use crate::DataError;

/// Default storage key of the widget record
pub const DEFAULT_WIDGET_STORAGE_KEY: &str = "widgetConfigs";

type Validator<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// A typed value stored under `widgetId` in the shared widget record
pub struct WidgetConfig<T> {
    record: SharedRecord,
    widget_id: String,
    default: Arc<T>,
    validator: Validator<T>,
    cell: StableCell<T>,
}

impl<T> WidgetConfig<T>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    pub fn new(storage: Arc<dyn KeyValueStorage>, widget_id: &str, default: T) -> Self {
        Self::with_key(storage, DEFAULT_WIDGET_STORAGE_KEY, widget_id, default)
    }

    pub fn with_key(
        storage: Arc<dyn KeyValueStorage>,
        storage_key: &str,
        widget_id: &str,
        default: T,
    ) -> Self {
        Self {
            record: SharedRecord::new(storage, storage_key),
            widget_id: widget_id.to_string(),
            default: Arc::new(default),
            validator: Box::new(|_| true),
            cell: StableCell::new(),
        }
    }

    /// Reject stored or written values failing `validator`
    pub fn with_validator(mut self, validator: impl Fn(&T) -> bool + Send + Sync + 'static) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn snapshot(&self) -> Snapshot<T> {
        let next = match self.record.get::<T>(&self.widget_id) {
            Some(value) if (self.validator)(&value) => Arc::new(value),
            Some(_) => {
                debug!(widget = %self.widget_id, "Stored config failed validation, using default");
                Arc::clone(&self.default)
            }
            None => Arc::clone(&self.default),
        };
        self.cell.settle_arc(next)
    }

    pub fn value(&self) -> Arc<T> {
        self.snapshot().value
    }

    /// Persist `value`; returns `false` without writing when it fails validation
    pub fn set(&self, value: &T) -> Result<bool, DataError> {
        if !(self.validator)(value) {
            return Ok(false);
        }
        self.record.set(&self.widget_id, value)?;
        Ok(true)
    }

    pub fn reset(&self) -> Result<(), DataError> {
        self.record.remove(&self.widget_id)
    }
}
