//! Referentially stable values
//!
//! Hosts compare values between renders by identity. [`StableCell`] hands
//! out the same `Arc` for as long as the content stays equal, and bumps a
//! revision whenever the reference is swapped.

use std::sync::Arc;

use parking_lot::Mutex;

/// A value together with its identity token
#[derive(Debug)]
pub struct Snapshot<T> {
    pub value: Arc<T>,
    /// Changes exactly when `value` is a new reference
    pub revision: u64,
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            revision: self.revision,
        }
    }
}

impl<T> Snapshot<T> {
    /// Whether both snapshots hold the same reference
    pub fn same_as(&self, other: &Snapshot<T>) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

/// Cache that keeps the previous reference while content is unchanged
#[derive(Debug)]
pub struct StableCell<T> {
    current: Mutex<Option<Snapshot<T>>>,
}

impl<T> Default for StableCell<T> {
    fn default() -> Self {
        Self {
            current: Mutex::new(None),
        }
    }
}

impl<T: PartialEq> StableCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer the latest content; returns the cached reference if equal.
    pub fn settle(&self, next: T) -> Snapshot<T> {
        self.settle_arc(Arc::new(next))
    }

    /// Like [`StableCell::settle`] for content already behind an `Arc`
    pub fn settle_arc(&self, next: Arc<T>) -> Snapshot<T> {
        let mut current = self.current.lock();
        match current.as_ref() {
            Some(cached) if Arc::ptr_eq(&cached.value, &next) || *cached.value == *next => {
                cached.clone()
            }
            Some(cached) => {
                let snapshot = Snapshot {
                    value: next,
                    revision: cached.revision + 1,
                };
                *current = Some(snapshot.clone());
                snapshot
            }
            None => {
                let snapshot = Snapshot {
                    value: next,
                    revision: 0,
                };
                *current = Some(snapshot.clone());
                snapshot
            }
        }
    }

    /// Last settled snapshot, if any
    pub fn current(&self) -> Option<Snapshot<T>> {
        self.current.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_content_keeps_reference() {
        let cell = StableCell::new();
        let first = cell.settle(vec!["a".to_string()]);
        let second = cell.settle(vec!["a".to_string()]);

        assert!(first.same_as(&second));
        assert_eq!(first.revision, second.revision);
    }

    #[test]
    fn test_changed_content_swaps_reference() {
        let cell = StableCell::new();
        let first = cell.settle(1u32);
        let second = cell.settle(2u32);
        let third = cell.settle(2u32);

        assert!(!first.same_as(&second));
        assert_eq!(second.revision, first.revision + 1);
        assert!(second.same_as(&third));
    }
}
