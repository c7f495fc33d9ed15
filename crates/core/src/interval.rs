//! Inclusive revision ranges
//!
//! Used to size batch fetches of change-log entries.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive range `[start, end]` of revisions; empty when `start > end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    /// First revision in the range
    pub start: i64,
    /// Last revision in the range
    pub end: i64,
}

impl Interval {
    /// Create a range; `start > end` yields an empty range
    pub fn new(start: i64, end: i64) -> Self {
        Interval { start, end }
    }

    /// True if the range holds no revision
    pub fn is_empty(&self) -> bool {
        self.start > self.end
    }

    /// Number of revisions in the range
    pub fn size(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            (self.end - self.start) as u64 + 1
        }
    }

    /// True if `revision` lies in the range
    pub fn contains(&self, revision: i64) -> bool {
        revision >= self.start && revision <= self.end
    }

    /// The leading sub-range of at most `max_size` revisions
    pub fn first_subinterval(&self, max_size: usize) -> Interval {
        if self.is_empty() || max_size == 0 {
            return Interval::new(self.start, self.start - 1);
        }
        let end = self
            .start
            .saturating_add(max_size as i64 - 1)
            .min(self.end);
        Interval::new(self.start, end)
    }

    /// The remainder after dropping everything up to and including `revision`
    pub fn after(&self, revision: i64) -> Interval {
        match revision.checked_add(1) {
            Some(next) => Interval::new(self.start.max(next), self.end),
            None => Interval::new(i64::MAX, i64::MAX - 1),
        }
    }

    /// Split into consecutive batches of at most `batch_size` revisions
    pub fn batches(&self, batch_size: usize) -> Batches {
        Batches {
            remaining: *self,
            batch_size: batch_size.max(1),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Iterator over consecutive sub-ranges, see [`Interval::batches`]
#[derive(Debug, Clone)]
pub struct Batches {
    remaining: Interval,
    batch_size: usize,
}

impl Iterator for Batches {
    type Item = Interval;

    fn next(&mut self) -> Option<Interval> {
        if self.remaining.is_empty() {
            return None;
        }
        let batch = self.remaining.first_subinterval(self.batch_size);
        self.remaining = self.remaining.after(batch.end);
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_and_empty() {
        assert_eq!(Interval::new(3, 7).size(), 5);
        assert_eq!(Interval::new(3, 3).size(), 1);
        assert!(Interval::new(4, 3).is_empty());
        assert_eq!(Interval::new(4, 3).size(), 0);
    }

    #[test]
    fn test_first_subinterval() {
        let i = Interval::new(10, 30);
        assert_eq!(i.first_subinterval(5), Interval::new(10, 14));
        assert_eq!(i.first_subinterval(100), i);
        assert!(i.first_subinterval(0).is_empty());
    }

    #[test]
    fn test_batches_cover_range_exactly() {
        let batches: Vec<_> = Interval::new(0, 9).batches(4).collect();
        assert_eq!(
            batches,
            vec![Interval::new(0, 3), Interval::new(4, 7), Interval::new(8, 9)]
        );
        assert_eq!(Interval::new(5, 4).batches(4).count(), 0);
    }

    #[test]
    fn test_batches_end_at_max_revision() {
        let batches: Vec<_> = Interval::new(i64::MAX - 5, i64::MAX).batches(4).collect();
        assert_eq!(
            batches,
            vec![
                Interval::new(i64::MAX - 5, i64::MAX - 2),
                Interval::new(i64::MAX - 1, i64::MAX),
            ]
        );
    }

    #[test]
    fn test_after() {
        let i = Interval::new(0, 9);
        assert_eq!(i.after(4), Interval::new(5, 9));
        assert!(i.after(9).is_empty());
        assert_eq!(i.after(-5), i);
        assert!(Interval::new(3, i64::MAX).after(i64::MAX).is_empty());
    }
}
