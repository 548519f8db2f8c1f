//! Page and page-size state

use vs_core::{HistoryAction, UrlParameter, UrlState};

/// Largest integer a JavaScript number represents exactly
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// `value` when it is a positive safe integer, otherwise `fallback`
pub fn safe_positive(value: u64, fallback: u64) -> u64 {
    if value == 0 || value > MAX_SAFE_INTEGER {
        fallback
    } else {
        value
    }
}

/// Page state read at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageState {
    pub page: u64,
    pub per_page: u64,
}

impl PageState {
    /// Number of items before the first item of this page
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.per_page)
    }
}

/// URL-backed `page`/`perPage` pair
pub struct Pagination {
    page: UrlParameter<u64>,
    per_page: UrlParameter<u64>,
    default_per_page: u64,
}

impl Pagination {
    pub fn new(state: &UrlState, default_per_page: u64) -> Self {
        Self::with_prefix(state, default_per_page, None)
    }

    /// Store the pair under `prefix[page]` and `prefix[perPage]`, so several
    /// tables on one page keep separate state
    pub fn with_prefix(state: &UrlState, default_per_page: u64, prefix: Option<&str>) -> Self {
        let default_per_page = safe_positive(default_per_page, 1);
        let key = |name: &str| match prefix {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}[{name}]"),
            _ => name.to_string(),
        };

        Self {
            page: state.parameter(&key("page"), 1),
            per_page: state.parameter(&key("perPage"), default_per_page),
            default_per_page,
        }
    }

    /// Current page, 1-based
    pub fn page(&self) -> u64 {
        safe_positive(*self.page.get(), 1)
    }

    pub fn per_page(&self) -> u64 {
        safe_positive(*self.per_page.get(), self.default_per_page)
    }

    pub fn state(&self) -> PageState {
        PageState {
            page: self.page(),
            per_page: self.per_page(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.state().offset()
    }

    pub fn set_page(&self, page: u64, action: HistoryAction) {
        self.page.set_with(safe_positive(page, 1), action);
    }

    /// Change the page size and return to the first page in one history entry
    pub fn set_per_page(&self, per_page: u64, action: HistoryAction) {
        let per_page = safe_positive(per_page, self.default_per_page);
        self.page.state().transaction(|transaction| {
            self.per_page.stage(transaction, Some(&per_page), action);
            self.page
                .stage(transaction, None, HistoryAction::Replace);
        });
    }
}
