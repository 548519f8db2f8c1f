//! View state controllers built on the URL parameter store
//!
//! Each controller owns one or more [`vs_core::UrlParameter`]s and exposes
//! validated values and setters. Controllers are independent of one another
//! and may be created by any number of components for the same keys.

pub mod pagination;
pub mod search;
pub mod sort;
pub mod string_union;

// Re-exports
pub use pagination::{PageState, Pagination};
pub use search::{SearchFilter, SearchFilterController};
pub use sort::{
    ActiveSort, AggregateBy, FieldOptions, OnSort, SortConfig, SortController, SortDirection, SortField,
    SortFieldOption, SortOption, SortParams, SortState,
};
pub use string_union::StringUnion;
