//! Demo driving every view state controller against in-memory backends

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use vs_controllers::{
    FieldOptions, Pagination, SearchFilterController, SortConfig, SortController, SortDirection,
    SortFieldOption, SortOption, SortState, StringUnion,
};
use vs_core::{HistoryAction, LocationSubscriber, MemoryHistory, SyncSettings, UrlState};
use vs_data::{
    hidden_column_count, ColumnSchema, FetchOptions, KeyValueStorage, ManagedColumns,
    MemoryStorage, PaginatedFetch, WidgetConfig,
};

mod demo;

use demo::{CveRow, DemoCveSource};

/// Logs every query string the history commits
struct LocationLogger;

impl LocationSubscriber for LocationLogger {
    fn on_location_change(&self, search: &str) {
        info!("location: ?{}", search);
    }
}

fn load_settings() -> Result<SyncSettings> {
    match std::env::args().nth(1) {
        Some(path) => SyncSettings::load(&path)
            .with_context(|| format!("Failed to load settings from {path}")),
        None => Ok(SyncSettings::default()),
    }
}

fn url_controllers(state: &UrlState) {
    let sort = SortController::new(
        state,
        SortConfig::new(
            vec![
                "CVE".into(),
                vec!["Critical severity count", "Low severity count"].into(),
                "Images".into(),
            ],
            SortState::Single(SortOption::new("CVE", SortDirection::Desc)),
        )
        .on_sort(|next| info!(fields = ?next.fields(), "sort changed")),
    );
    sort.get_sort_params("Images", None).on_sort(SortDirection::Asc);
    sort.get_sort_params(
        "Severity",
        Some(FieldOptions::Fields(vec![
            SortFieldOption::new("Critical severity count"),
            SortFieldOption::new("Low severity count"),
        ])),
    )
    .on_sort(SortDirection::Desc);
    let severity = sort.get_sort_params("Severity", None);
    info!(
        active = ?severity.sort_by.index,
        reversed = sort.sort_option().is_reversed(),
        "sort resolved"
    );

    let pagination = Pagination::with_prefix(state, 20, Some("cves"));
    pagination.set_page(3, HistoryAction::Push);
    pagination.set_per_page(50, HistoryAction::Push);
    info!(state = ?pagination.state(), "pagination");

    let tabs = StringUnion::new(state, "entityTab", &["CVE", "Image", "Deployment"], None);
    tabs.set("Image", HistoryAction::Push);
    let rejected = !tabs.set(&42, HistoryAction::Push);
    info!(tab = %tabs.value(), rejected, "entity tab");

    let search = SearchFilterController::new(state);
    search.add_value("Severity", "Critical", HistoryAction::Push);
    search.add_value("Severity", "Important", HistoryAction::Push);
    search.add_value("Image", "nginx:1.25", HistoryAction::Replace);
    info!(filter = ?search.search_filter(), "search filter");
}

fn stored_controllers(storage: Arc<dyn KeyValueStorage>, settings: &SyncSettings) -> Result<()> {
    let schema = vec![
        ColumnSchema::new("cve", "CVE").untoggleable(),
        ColumnSchema::new("severity", "Severity"),
        ColumnSchema::new("images", "Images"),
        ColumnSchema::new("published", "First discovered").hidden_by_default(),
    ];
    let overview = ManagedColumns::with_key(
        storage.clone(),
        &settings.column_storage_key,
        "WorkloadCveOverview",
        schema.clone(),
    );
    let images = ManagedColumns::with_key(
        storage.clone(),
        &settings.column_storage_key,
        "ImageVulnerabilities",
        schema,
    );
    overview.toggle_visibility("images")?;
    images.set_columns([("published", true), ("severity", false)])?;
    info!(
        overview_hidden = hidden_column_count(&overview.columns()),
        images_hidden = hidden_column_count(&images.columns()),
        "column visibility"
    );

    let chart_limit = WidgetConfig::with_key(
        storage.clone(),
        &settings.widget_storage_key,
        "mostCommonVulnerabilities",
        6u32,
    )
    .with_validator(|limit| (1..=25).contains(limit));
    chart_limit.set(&12)?;
    info!(limit = *chart_limit.value(), "widget config");

    for key in [&settings.column_storage_key, &settings.widget_storage_key] {
        info!("storage {}: {}", key, storage.get_item(key).unwrap_or_default());
    }
    Ok(())
}

async fn paginated_fetch(settings: &SyncSettings) -> Result<()> {
    let options = FetchOptions::from_settings(settings)
        .dedup_by(|row: &CveRow| row.cve.clone())
        .on_error(|err| tracing::error!("page request failed: {:#}", err));
    let fetch = PaginatedFetch::new(DemoCveSource::new(23, 10), 10, options)?;

    loop {
        let status = fetch.settled().await;
        info!(
            pages = status.page_count,
            rows = fetch.data().len(),
            end = status.is_end_of_results,
            "fetched"
        );
        if status.is_end_of_results || status.last_fetch_error.is_some() {
            break;
        }
        fetch.fetch_next_page(true);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = load_settings()?;
    info!(?settings, "Starting view state demo");

    let history = Arc::new(MemoryHistory::new());
    let state = UrlState::with_settings(history.clone(), settings.clone());
    let logger = Arc::new(LocationLogger);
    state.subscribe(logger.clone());

    url_controllers(&state);
    info!(entries = history.len(), "final query: ?{}", state.search());
    if history.back() {
        info!("after back: ?{}", state.search());
    }

    let storage: Arc<dyn KeyValueStorage> = Arc::new(MemoryStorage::new());
    stored_controllers(storage, &settings)?;

    paginated_fetch(&settings).await
}
