//! Per-instance id sequences

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter owned by one controller instance.
///
/// Each instance creates its own; two controllers never share ids.
#[derive(Debug, Default)]
pub struct Sequence {
    last: AtomicU64,
}

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance and return the new id (the first call returns 1)
    pub fn next(&self) -> u64 {
        self.last.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Most recently issued id, 0 before the first call
    pub fn current(&self) -> u64 {
        self.last.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instances_are_independent() {
        let first = Sequence::new();
        let second = Sequence::new();

        assert_eq!(first.next(), 1);
        assert_eq!(first.next(), 2);
        assert_eq!(second.current(), 0);
        assert_eq!(second.next(), 1);
        assert_eq!(first.current(), 2);
    }
}
