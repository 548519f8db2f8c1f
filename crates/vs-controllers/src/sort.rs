//! Sort state
//!
//! A sort is either a single [`SortOption`] or a list of them sharing one
//! direction. Values read from the URL are validated; anything malformed is
//! replaced by the default so callers never see a broken sort.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use vs_core::codec::lenient;
use vs_core::{HistoryAction, Snapshot, StableCell, UrlParameter, UrlState};

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Aggregation applied to a field before sorting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateBy {
    pub aggregate_func: String,
    pub distinct: bool,
}

/// One sorted field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOption {
    pub field: String,
    pub direction: SortDirection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_by: Option<AggregateBy>,
}

impl SortOption {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
            aggregate_by: None,
        }
    }

    pub fn with_aggregate(mut self, aggregate_by: AggregateBy) -> Self {
        self.aggregate_by = Some(aggregate_by);
        self
    }

    pub fn is_reversed(&self) -> bool {
        self.direction == SortDirection::Desc
    }
}

/// A single-field or multi-field sort
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SortState {
    Single(SortOption),
    Multi(Vec<SortOption>),
}

impl SortState {
    /// Sorted fields in order
    pub fn options(&self) -> &[SortOption] {
        match self {
            SortState::Single(option) => std::slice::from_ref(option),
            SortState::Multi(options) => options,
        }
    }

    /// Shared direction, read off the first field; an empty list reads as ascending
    pub fn direction(&self) -> SortDirection {
        self.options()
            .first()
            .map(|option| option.direction)
            .unwrap_or(SortDirection::Asc)
    }

    pub fn is_reversed(&self) -> bool {
        self.direction() == SortDirection::Desc
    }

    pub fn fields(&self) -> Vec<&str> {
        self.options()
            .iter()
            .map(|option| option.field.as_str())
            .collect()
    }

    /// Validate a decoded URL value
    pub fn from_query_value(raw: &Value) -> Option<SortState> {
        match raw {
            Value::Object(_) => parse_option(raw).map(SortState::Single),
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(parse_option)
                .collect::<Option<Vec<_>>>()
                .map(SortState::Multi),
            _ => None,
        }
    }
}

fn parse_option(raw: &Value) -> Option<SortOption> {
    lenient::from_value::<SortOption>(raw)
        .ok()
        .filter(|option| !option.field.is_empty())
}

/// A declared sortable column: one field, or several sorted together
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortField {
    Single(String),
    Group(Vec<String>),
}

impl SortField {
    pub fn names(&self) -> &[String] {
        match self {
            SortField::Single(name) => std::slice::from_ref(name),
            SortField::Group(names) => names,
        }
    }

    fn intersects(&self, fields: &[&str]) -> bool {
        self.names()
            .iter()
            .any(|name| fields.contains(&name.as_str()))
    }
}

impl From<&str> for SortField {
    fn from(name: &str) -> Self {
        SortField::Single(name.to_string())
    }
}

impl From<Vec<&str>> for SortField {
    fn from(names: Vec<&str>) -> Self {
        SortField::Group(names.into_iter().map(str::to_string).collect())
    }
}

/// A field of a multi-field column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortFieldOption {
    pub field: String,
    pub aggregate_by: Option<AggregateBy>,
}

impl SortFieldOption {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            aggregate_by: None,
        }
    }

    pub fn with_aggregate(mut self, aggregate_by: AggregateBy) -> Self {
        self.aggregate_by = Some(aggregate_by);
        self
    }
}

/// Extra field information passed to [`SortController::get_sort_params`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldOptions {
    /// Aggregate the single column field
    Aggregate(AggregateBy),
    /// Sort by all of these fields together
    Fields(Vec<SortFieldOption>),
}

pub type OnSort = Box<dyn Fn(&SortState) + Send + Sync>;

/// Sort controller configuration
pub struct SortConfig {
    /// Universe of sortable columns, in declaration order
    pub sort_fields: Vec<SortField>,
    pub default_sort_option: SortState,
    /// Invoked with the new sort before it is committed
    pub on_sort: Option<OnSort>,
}

impl SortConfig {
    pub fn new(sort_fields: Vec<SortField>, default_sort_option: SortState) -> Self {
        Self {
            sort_fields,
            default_sort_option,
            on_sort: None,
        }
    }

    pub fn on_sort(mut self, callback: impl Fn(&SortState) + Send + Sync + 'static) -> Self {
        self.on_sort = Some(Box::new(callback));
        self
    }
}

/// The currently active sort as seen by a column header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSort {
    /// Declared column the active sort belongs to, if any
    pub index: Option<usize>,
    pub direction: SortDirection,
}

/// Sort parameters for one column header
pub struct SortParams<'a> {
    controller: &'a SortController,
    column_name: String,
    field_options: Option<FieldOptions>,
    /// Declared column the requested fields belong to, if any
    pub column_index: Option<usize>,
    pub sort_by: ActiveSort,
}

impl SortParams<'_> {
    /// Sort this column in `direction`
    pub fn on_sort(&self, direction: SortDirection) {
        let next = match &self.field_options {
            Some(FieldOptions::Fields(fields)) => SortState::Multi(
                fields
                    .iter()
                    .map(|option| SortOption {
                        field: option.field.clone(),
                        direction,
                        aggregate_by: option.aggregate_by.clone(),
                    })
                    .collect(),
            ),
            Some(FieldOptions::Aggregate(aggregate_by)) => SortState::Single(
                SortOption::new(self.column_name.as_str(), direction)
                    .with_aggregate(aggregate_by.clone()),
            ),
            None => SortState::Single(SortOption::new(self.column_name.as_str(), direction)),
        };

        if let Some(callback) = &self.controller.on_sort {
            callback(&next);
        }
        self.controller.set_sort_option(next, HistoryAction::Push);
    }
}

/// URL-backed sort state
pub struct SortController {
    parameter: UrlParameter<Value>,
    sort_fields: Vec<SortField>,
    default: Arc<SortState>,
    on_sort: Option<OnSort>,
    cell: StableCell<SortState>,
}

impl SortController {
    /// Store the sort under the configured sort key
    pub fn new(state: &UrlState, config: SortConfig) -> Self {
        let key = state.settings().sort_key.clone();
        Self::with_key(state, &key, config)
    }

    pub fn with_key(state: &UrlState, key: &str, config: SortConfig) -> Self {
        let default_raw =
            serde_json::to_value(&config.default_sort_option).unwrap_or(Value::Null);

        Self {
            parameter: state.parameter(key, default_raw),
            sort_fields: config.sort_fields,
            default: Arc::new(config.default_sort_option),
            on_sort: config.on_sort,
            cell: StableCell::new(),
        }
    }

    pub fn snapshot(&self) -> Snapshot<SortState> {
        let next = match self.parameter.raw() {
            None => Arc::clone(&self.default),
            Some(raw) => match SortState::from_query_value(&raw) {
                Some(sort) => Arc::new(sort),
                None => {
                    debug!(key = self.parameter.key(), "Rejecting malformed sort option {}", raw);
                    Arc::clone(&self.default)
                }
            },
        };
        self.cell.settle_arc(next)
    }

    /// Current validated sort
    pub fn sort_option(&self) -> Arc<SortState> {
        self.snapshot().value
    }

    pub fn set_sort_option(&self, sort: SortState, action: HistoryAction) {
        match serde_json::to_value(&sort) {
            Ok(raw) => self.parameter.set_with(raw, action),
            Err(err) => debug!("Ignoring unserializable sort option: {}", err),
        }
    }

    pub fn sort_fields(&self) -> &[SortField] {
        &self.sort_fields
    }

    /// First declared column intersecting `fields`
    fn column_of(&self, fields: &[&str]) -> Option<usize> {
        self.sort_fields
            .iter()
            .position(|sort_field| sort_field.intersects(fields))
    }

    /// Resolve the column header parameters for `column_name`.
    ///
    /// With [`FieldOptions::Fields`] the column is looked up by its fields,
    /// otherwise by `column_name` itself.
    pub fn get_sort_params(
        &self,
        column_name: &str,
        field_options: Option<FieldOptions>,
    ) -> SortParams<'_> {
        let column_index = match &field_options {
            Some(FieldOptions::Fields(fields)) => {
                let names: Vec<&str> = fields.iter().map(|option| option.field.as_str()).collect();
                self.column_of(&names)
            }
            _ => self.column_of(&[column_name]),
        };

        let current = self.sort_option();
        let sort_by = ActiveSort {
            index: self.column_of(&current.fields()),
            direction: current.direction(),
        };

        SortParams {
            controller: self,
            column_name: column_name.to_string(),
            field_options,
            column_index,
            sort_by,
        }
    }
}
