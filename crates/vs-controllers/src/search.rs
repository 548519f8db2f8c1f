//! Search filter stored in the query string
//!
//! The filter maps a search field to the values entered for it, e.g.
//! `s[Severity][0]=Critical&s[Severity][1]=Low&s[CVE]=CVE-2021-44228`.

use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use vs_core::{HistoryAction, Snapshot, StableCell, UrlParameter, UrlState};

/// Field name to entered values, in insertion order
pub type SearchFilter = IndexMap<String, Vec<String>>;

pub struct SearchFilterController {
    parameter: UrlParameter<Value>,
    cell: StableCell<SearchFilter>,
}

impl SearchFilterController {
    /// Store the filter under the configured search key
    pub fn new(state: &UrlState) -> Self {
        let key = state.settings().search_key.clone();
        Self::with_key(state, &key)
    }

    pub fn with_key(state: &UrlState, key: &str) -> Self {
        Self {
            parameter: state.parameter(key, Value::Object(Map::new())),
            cell: StableCell::new(),
        }
    }

    pub fn snapshot(&self) -> Snapshot<SearchFilter> {
        let filter = match self.parameter.raw() {
            Some(Value::Object(fields)) => fields
                .iter()
                .filter_map(|(field, raw)| {
                    let values = values_of(raw);
                    (!values.is_empty()).then(|| (field.clone(), values))
                })
                .collect(),
            _ => SearchFilter::new(),
        };
        self.cell.settle(filter)
    }

    pub fn search_filter(&self) -> Arc<SearchFilter> {
        self.snapshot().value
    }

    /// Replace the whole filter
    pub fn set_search_filter(&self, filter: &SearchFilter, action: HistoryAction) {
        self.parameter.set_with(to_value(filter), action);
    }

    /// Replace the values of one field; an empty list removes it
    pub fn set_field(&self, field: &str, values: Vec<String>, action: HistoryAction) {
        self.update(action, |filter| {
            if values.is_empty() {
                filter.shift_remove(field);
            } else {
                filter.insert(field.to_string(), values);
            }
        });
    }

    pub fn add_value(&self, field: &str, value: &str, action: HistoryAction) {
        self.update(action, |filter| {
            let values = filter.entry(field.to_string()).or_default();
            if !values.iter().any(|existing| existing == value) {
                values.push(value.to_string());
            }
        });
    }

    pub fn remove_value(&self, field: &str, value: &str, action: HistoryAction) {
        self.update(action, |filter| {
            if let Some(values) = filter.get_mut(field) {
                values.retain(|existing| existing != value);
                if values.is_empty() {
                    filter.shift_remove(field);
                }
            }
        });
    }

    pub fn clear(&self, action: HistoryAction) {
        self.parameter.clear(action);
    }

    /// Read-modify-write against the latest query string
    fn update(&self, action: HistoryAction, modify: impl FnOnce(&mut SearchFilter)) {
        self.parameter.state().transaction(|transaction| {
            let mut filter = SearchFilter::clone(&self.search_filter());
            modify(&mut filter);
            self.parameter
                .stage(transaction, Some(&to_value(&filter)), action);
        });
    }
}

fn values_of(raw: &Value) -> Vec<String> {
    match raw {
        Value::String(text) => vec![text.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// A lone value is written flat (`s[CVE]=x`), several as a list
fn to_value(filter: &SearchFilter) -> Value {
    let fields = filter
        .iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(field, values)| {
            let value = match values.as_slice() {
                [single] => Value::String(single.clone()),
                many => Value::Array(many.iter().cloned().map(Value::String).collect()),
            };
            (field.clone(), value)
        })
        .collect();
    Value::Object(fields)
}
