//! Incremental paginated fetching
//!
//! [`PaginatedFetch`] requests pages from a [`PageSource`] one index at a
//! time. Results land in the slot of the page they were requested for, so
//! requests finishing out of order never overwrite each other. A page joins
//! the loaded run once every page before it has landed, and only then are
//! items whose dedup key was already seen dropped from it.
//!
//! Every reset starts a new generation. Responses from an older generation
//! are discarded when they arrive.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashSet;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use vs_core::{Scheduler, Sequence, Snapshot, StableCell, SyncSettings};

use crate::DataError;

/// Source of pages, e.g. a REST endpoint taking an offset
#[async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, page_index: usize) -> anyhow::Result<Vec<T>>;
}

#[async_trait]
impl<T, F, Fut> PageSource<T> for F
where
    T: Send + 'static,
    F: Fn(usize) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<Vec<T>>> + Send + 'static,
{
    async fn fetch_page(&self, page_index: usize) -> anyhow::Result<Vec<T>> {
        (self)(page_index).await
    }
}

pub type DedupKeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&anyhow::Error) + Send + Sync>;

pub struct FetchOptions<T> {
    /// Window in which non-immediate fetch requests coalesce
    pub debounce_rate: Duration,
    pub dedup_key_fn: Option<DedupKeyFn<T>>,
    pub on_error: Option<ErrorCallback>,
    /// Do not request the first page on construction
    pub manual_fetch: bool,
}

impl<T> Default for FetchOptions<T> {
    fn default() -> Self {
        Self {
            debounce_rate: Duration::from_millis(800),
            dedup_key_fn: None,
            on_error: None,
            manual_fetch: false,
        }
    }
}

impl<T> FetchOptions<T> {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            debounce_rate: settings.debounce_rate(),
            ..Self::default()
        }
    }

    pub fn debounce_rate(mut self, rate: Duration) -> Self {
        self.debounce_rate = rate;
        self
    }

    pub fn dedup_by(mut self, key: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.dedup_key_fn = Some(Arc::new(key));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&anyhow::Error) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn manual_fetch(mut self) -> Self {
        self.manual_fetch = true;
        self
    }
}

/// Observable fetch flags
#[derive(Debug, Clone, Default)]
pub struct FetchStatus {
    /// Contiguous pages stored from index 0
    pub page_count: usize,
    /// A request is waiting for its debounce or in flight
    pub is_fetching_next_page: bool,
    /// The first page of a reset is being fetched
    pub is_refreshing_results: bool,
    pub is_end_of_results: bool,
    pub last_fetch_error: Option<Arc<anyhow::Error>>,
    pub generation: u64,
}

struct FetchState<T> {
    /// Deduplicated pages from index 0 without gaps
    pages: Vec<Vec<T>>,
    /// Raw pages received ahead of a missing one
    waiting: BTreeMap<usize, Vec<T>>,
    in_flight: BTreeSet<usize>,
    seen_keys: AHashSet<String>,
    scheduled: bool,
    is_refreshing: bool,
    is_end_of_results: bool,
    last_fetch_error: Option<Arc<anyhow::Error>>,
    generation: u64,
}

impl<T> FetchState<T> {
    fn empty(generation: u64) -> Self {
        Self {
            pages: Vec::new(),
            waiting: BTreeMap::new(),
            in_flight: BTreeSet::new(),
            seen_keys: AHashSet::new(),
            scheduled: false,
            is_refreshing: false,
            is_end_of_results: false,
            last_fetch_error: None,
            generation,
        }
    }

    /// Lowest index neither stored nor requested
    fn next_index(&self) -> usize {
        (self.pages.len()..)
            .find(|index| !self.in_flight.contains(index) && !self.waiting.contains_key(index))
            .unwrap_or(self.pages.len())
    }

    fn status(&self) -> FetchStatus {
        FetchStatus {
            page_count: self.pages.len(),
            is_fetching_next_page: self.scheduled || !self.in_flight.is_empty(),
            is_refreshing_results: self.is_refreshing,
            is_end_of_results: self.is_end_of_results,
            last_fetch_error: self.last_fetch_error.clone(),
            generation: self.generation,
        }
    }
}

struct Shared<T> {
    source: Arc<dyn PageSource<T>>,
    page_size: usize,
    dedup_key_fn: Option<DedupKeyFn<T>>,
    on_error: Option<ErrorCallback>,
    runtime: Handle,
    state: Mutex<FetchState<T>>,
    status: watch::Sender<FetchStatus>,
    data: StableCell<Vec<T>>,
}

impl<T> Shared<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn publish(&self) {
        let status = self.state.lock().status();
        self.status.send_replace(status);
    }

    /// Request the next page right away
    fn launch(self: &Arc<Self>) {
        let (index, generation) = {
            let mut state = self.state.lock();
            state.scheduled = false;
            if state.is_end_of_results {
                trace!("End of results reached, not fetching");
                drop(state);
                self.publish();
                return;
            }
            let index = state.next_index();
            state.in_flight.insert(index);
            (index, state.generation)
        };
        self.publish();

        debug!(page = index, generation, "Fetching page");
        let shared = Arc::clone(self);
        self.runtime.spawn(async move {
            let result = shared.source.fetch_page(index).await;
            shared.complete(generation, index, result);
        });
    }

    fn complete(&self, generation: u64, index: usize, result: anyhow::Result<Vec<T>>) {
        let failure = {
            let mut state = self.state.lock();
            if state.generation != generation {
                debug!(page = index, generation, "Discarding page from a previous generation");
                return;
            }
            state.in_flight.remove(&index);
            if index == 0 {
                state.is_refreshing = false;
            }

            match result {
                Ok(items) => {
                    let received = items.len();
                    trace!(page = index, received, "Page received");
                    state.waiting.insert(index, items);
                    self.append_ready(&mut state);

                    state.last_fetch_error = None;
                    if received < self.page_size {
                        state.is_end_of_results = true;
                    }
                    None
                }
                Err(err) => {
                    warn!(page = index, "Page request failed: {:#}", err);
                    let err = Arc::new(err);
                    state.last_fetch_error = Some(Arc::clone(&err));
                    Some(err)
                }
            }
        };

        self.publish();
        if let (Some(err), Some(on_error)) = (failure, &self.on_error) {
            on_error(&err);
        }
    }

    /// Move waiting pages that now continue the run, deduplicating in index order
    fn append_ready(&self, state: &mut FetchState<T>) {
        while let Some(items) = state.waiting.remove(&state.pages.len()) {
            let received = items.len();
            let items = self.dedup(&mut state.seen_keys, items);
            trace!(page = state.pages.len(), received, kept = items.len(), "Page stored");
            state.pages.push(items);
        }
    }

    fn dedup(&self, seen: &mut AHashSet<String>, items: Vec<T>) -> Vec<T> {
        let Some(key_of) = &self.dedup_key_fn else {
            return items;
        };
        items
            .into_iter()
            .filter(|item| seen.insert(key_of(item)))
            .collect()
    }
}

/// Debounced, deduplicating page loader
pub struct PaginatedFetch<T> {
    shared: Arc<Shared<T>>,
    scheduler: Scheduler,
    generations: Sequence,
    debounce_rate: Duration,
}

impl<T> PaginatedFetch<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a loader on the current tokio runtime
    pub fn new(
        source: impl PageSource<T> + 'static,
        page_size: usize,
        options: FetchOptions<T>,
    ) -> Result<Self, DataError> {
        let runtime = Handle::try_current()?;
        Ok(Self::with_runtime(runtime, source, page_size, options))
    }

    pub fn with_runtime(
        runtime: Handle,
        source: impl PageSource<T> + 'static,
        page_size: usize,
        options: FetchOptions<T>,
    ) -> Self {
        let generations = Sequence::new();
        let state = FetchState::empty(generations.next());
        let (status, _) = watch::channel(state.status());

        let fetch = Self {
            shared: Arc::new(Shared {
                source: Arc::new(source),
                page_size: page_size.max(1),
                dedup_key_fn: options.dedup_key_fn,
                on_error: options.on_error,
                runtime: runtime.clone(),
                state: Mutex::new(state),
                status,
                data: StableCell::new(),
            }),
            scheduler: Scheduler::new(runtime),
            generations,
            debounce_rate: options.debounce_rate,
        };

        if !options.manual_fetch {
            fetch.reset_pages();
        }
        fetch
    }

    pub fn page_size(&self) -> usize {
        self.shared.page_size
    }

    /// Request the next page.
    ///
    /// Without `immediate` the request waits out the debounce window, and
    /// another call within the window restarts it. An immediate request also
    /// takes the place of a pending one.
    pub fn fetch_next_page(&self, immediate: bool) {
        if immediate {
            self.scheduler.cancel_pending();
            self.shared.launch();
            return;
        }

        {
            let mut state = self.shared.state.lock();
            if state.is_end_of_results {
                trace!("End of results reached, not scheduling a fetch");
                return;
            }
            state.scheduled = true;
        }
        self.shared.publish();

        let shared: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        self.scheduler.schedule(self.debounce_rate, move || {
            if let Some(shared) = shared.upgrade() {
                shared.launch();
            }
        });
    }

    /// Drop everything fetched and refetch from the first page
    pub fn reset_pages(&self) {
        self.restart(true);
        self.fetch_next_page(false);
    }

    /// Drop everything fetched without refetching
    pub fn clear_pages(&self) {
        self.scheduler.cancel_pending();
        self.restart(false);
    }

    fn restart(&self, refreshing: bool) {
        let generation = self.generations.next();
        debug!(generation, refreshing, "Clearing pages");
        {
            let mut state = self.shared.state.lock();
            *state = FetchState::empty(generation);
            state.is_refreshing = refreshing;
        }
        self.shared.publish();
    }

    pub fn status(&self) -> FetchStatus {
        self.shared.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FetchStatus> {
        self.shared.status.subscribe()
    }

    /// Wait until no request is pending or in flight
    pub async fn settled(&self) -> FetchStatus {
        let mut receiver = self.subscribe();
        let settled = receiver
            .wait_for(|status| !status.is_fetching_next_page)
            .await
            .map(|status| status.clone());
        settled.unwrap_or_else(|_| self.status())
    }

    /// Stored pages from index 0 up to the first missing one
    pub fn pages(&self) -> Vec<Vec<T>> {
        self.shared.state.lock().pages.clone()
    }

    /// Items of [`PaginatedFetch::pages`], flattened
    pub fn snapshot(&self) -> Snapshot<Vec<T>> {
        let items: Vec<T> = {
            let state = self.shared.state.lock();
            state.pages.iter().flatten().cloned().collect()
        };
        self.shared.data.settle(items)
    }

    pub fn data(&self) -> Arc<Vec<T>> {
        self.snapshot().value
    }

    /// Number of contiguous pages loaded
    pub fn page(&self) -> usize {
        self.status().page_count
    }

    pub fn is_fetching_next_page(&self) -> bool {
        self.status().is_fetching_next_page
    }

    pub fn is_refreshing_results(&self) -> bool {
        self.status().is_refreshing_results
    }

    pub fn is_end_of_results(&self) -> bool {
        self.status().is_end_of_results
    }

    pub fn last_fetch_error(&self) -> Option<Arc<anyhow::Error>> {
        self.status().last_fetch_error
    }
}

impl<T> Drop for PaginatedFetch<T> {
    fn drop(&mut self) {
        if self.scheduler.cancel_pending() {
            trace!("Cancelled pending page request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SOURCE: [u32; 9] = [1, 2, 3, 4, 4, 5, 6, 7, 8];

    fn slice_source(
        page_size: usize,
        calls: Arc<AtomicUsize>,
    ) -> impl PageSource<u32> + 'static {
        move |index: usize| {
            calls.fetch_add(1, Ordering::SeqCst);
            let start = (index * page_size).min(SOURCE.len());
            let end = (start + page_size).min(SOURCE.len());
            let page = SOURCE[start..end].to_vec();
            async move { Ok::<_, anyhow::Error>(page) }
        }
    }

    fn manual() -> FetchOptions<u32> {
        FetchOptions::default()
            .manual_fetch()
            .dedup_by(|item: &u32| item.to_string())
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_pagination_scenario() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PaginatedFetch::new(slice_source(2, calls.clone()), 2, manual()).unwrap();

        for _ in 0..3 {
            fetch.fetch_next_page(true);
            fetch.settled().await;
        }
        assert_eq!(fetch.pages(), vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert!(!fetch.is_end_of_results());

        fetch.fetch_next_page(true);
        fetch.settled().await;
        assert_eq!(fetch.pages()[3], vec![6, 7]);
        assert!(!fetch.is_end_of_results());

        fetch.fetch_next_page(true);
        let status = fetch.settled().await;
        assert_eq!(fetch.pages()[4], vec![8]);
        assert!(status.is_end_of_results);
        assert_eq!(*fetch.data(), vec![1, 2, 3, 4, 5, 6, 7, 8]);

        // Nothing more is requested once the end is reached
        fetch.fetch_next_page(true);
        fetch.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(fetch.page(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_collapses_requests() {
        let calls = Arc::new(AtomicUsize::new(0));
        let options = manual().debounce_rate(Duration::from_millis(300));
        let fetch = PaginatedFetch::new(slice_source(2, calls.clone()), 2, options).unwrap();

        for _ in 0..5 {
            fetch.fetch_next_page(false);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(fetch.is_fetching_next_page());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        fetch.settled().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(fetch.pages(), vec![vec![1, 2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_first_page_on_construction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PaginatedFetch::new(slice_source(3, calls.clone()), 3, FetchOptions::default())
            .unwrap();
        assert!(fetch.is_refreshing_results());

        let status = fetch.settled().await;
        assert!(!status.is_refreshing_results);
        assert_eq!(fetch.pages(), vec![vec![1, 2, 3]]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_page_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let errors = Arc::new(AtomicUsize::new(0));

        let counter = attempts.clone();
        let source = move |index: usize| {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if index == 1 && attempt == 1 {
                    anyhow::bail!("connection reset");
                }
                Ok(vec![index as u32 * 10, index as u32 * 10 + 1])
            }
        };
        let error_count = errors.clone();
        let options = FetchOptions::default()
            .manual_fetch()
            .on_error(move |_| {
                error_count.fetch_add(1, Ordering::SeqCst);
            });
        let fetch = PaginatedFetch::new(source, 2, options).unwrap();

        fetch.fetch_next_page(true);
        fetch.settled().await;
        fetch.fetch_next_page(true);
        let status = fetch.settled().await;

        assert_eq!(errors.load(Ordering::SeqCst), 1);
        let err = status.last_fetch_error.expect("error is kept");
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(fetch.pages(), vec![vec![0, 1]]);

        fetch.fetch_next_page(true);
        let status = fetch.settled().await;
        assert!(status.last_fetch_error.is_none());
        assert_eq!(fetch.pages(), vec![vec![0, 1], vec![10, 11]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_order_responses_keep_their_slot() {
        let source = |index: usize| async move {
            let delay = if index == 0 { 500 } else { 100 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, anyhow::Error>(vec![format!("page-{index}-a"), format!("page-{index}-b")])
        };
        let fetch = PaginatedFetch::new(source, 2, FetchOptions::default().manual_fetch()).unwrap();

        fetch.fetch_next_page(true);
        fetch.fetch_next_page(true);

        tokio::time::sleep(Duration::from_millis(200)).await;
        // Page 1 is in but page 0 is not, so nothing is exposed yet
        assert_eq!(fetch.page(), 0);
        assert!(fetch.is_fetching_next_page());

        fetch.settled().await;
        assert_eq!(
            fetch.pages(),
            vec![
                vec!["page-0-a".to_string(), "page-0-b".to_string()],
                vec!["page-1-a".to_string(), "page-1-b".to_string()],
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_follows_page_order_not_completion_order() {
        let source = |index: usize| async move {
            let (delay, page) = match index {
                0 => (500, vec![1, 2]),
                1 => (100, vec![2, 3]),
                _ => (0, vec![]),
            };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok::<_, anyhow::Error>(page)
        };
        let fetch = PaginatedFetch::new(source, 2, manual()).unwrap();

        fetch.fetch_next_page(true);
        fetch.fetch_next_page(true);
        fetch.settled().await;

        assert_eq!(fetch.pages(), vec![vec![1, 2], vec![3]]);
        assert_eq!(*fetch.data(), vec![1, 2, 3]);
        assert!(!fetch.is_end_of_results());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounced_fetch_after_end_is_a_no_op() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PaginatedFetch::new(slice_source(5, calls.clone()), 5, manual()).unwrap();

        fetch.fetch_next_page(true);
        fetch.fetch_next_page(true);
        assert!(fetch.settled().await.is_end_of_results);

        fetch.fetch_next_page(false);
        assert!(!fetch.is_fetching_next_page());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_is_discarded() {
        let source = |index: usize| async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, anyhow::Error>(vec![index as u32; 2])
        };
        let options = FetchOptions::default()
            .manual_fetch()
            .debounce_rate(Duration::from_millis(50));
        let fetch = PaginatedFetch::new(source, 2, options).unwrap();

        fetch.fetch_next_page(true);
        fetch.clear_pages();
        assert!(!fetch.is_fetching_next_page());

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(fetch.pages().is_empty());

        fetch.reset_pages();
        assert!(fetch.is_refreshing_results());
        let status = fetch.settled().await;
        assert!(!status.is_refreshing_results);
        assert_eq!(fetch.pages(), vec![vec![0, 0]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_seen_keys() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PaginatedFetch::new(slice_source(2, calls), 2, manual()).unwrap();

        fetch.fetch_next_page(true);
        fetch.settled().await;
        fetch.reset_pages();
        assert!(fetch.pages().is_empty());

        fetch.settled().await;
        assert_eq!(fetch.pages(), vec![vec![1, 2]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_pending_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PaginatedFetch::new(slice_source(2, calls.clone()), 2, manual()).unwrap();
        fetch.fetch_next_page(false);
        drop(fetch);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_observe_status() {
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PaginatedFetch::new(slice_source(5, calls), 5, manual()).unwrap();
        let mut receiver = fetch.subscribe();

        fetch.fetch_next_page(true);
        fetch.fetch_next_page(true);
        let status = receiver
            .wait_for(|status| status.is_end_of_results)
            .await
            .unwrap()
            .clone();
        assert!(status.is_end_of_results);

        fetch.settled().await;
        assert_eq!(fetch.data().len(), 8);
    }

    #[test]
    fn test_new_requires_runtime() {
        let calls = Arc::new(AtomicUsize::new(0));
        let result = PaginatedFetch::new(slice_source(2, calls), 2, manual());
        assert!(matches!(result, Err(DataError::NoRuntime(_))));
    }

    #[test]
    fn test_data_is_referentially_stable() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let fetch = PaginatedFetch::with_runtime(
            runtime.handle().clone(),
            slice_source(2, calls),
            2,
            manual(),
        );

        runtime.block_on(async {
            fetch.fetch_next_page(true);
            fetch.settled().await;
        });
        let first = fetch.snapshot();
        assert!(first.same_as(&fetch.snapshot()));

        runtime.block_on(async {
            fetch.fetch_next_page(true);
            fetch.settled().await;
        });
        assert!(!first.same_as(&fetch.snapshot()));
        assert_eq!(*fetch.data(), vec![1, 2, 3, 4]);
    }
}
