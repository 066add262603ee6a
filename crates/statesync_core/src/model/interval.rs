//! Materialized intervals and their merge algebra.

use crate::error::{StateError, StateResult};
use std::ops::Range;

/// A half-open time range `[start, end)` over which a snapshot's data is
/// known materialized.
///
/// Dev-preview intervals record materializations into isolated development
/// storage; they never merge with production intervals even when the ranges
/// touch, because the two do not attest to the same physical data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval {
    /// Inclusive start.
    pub start: i64,
    /// Exclusive end.
    pub end: i64,
    /// Whether this range was materialized into dev-preview storage.
    pub dev_preview: bool,
}

impl Interval {
    /// Creates a production interval.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidInterval`] if `start >= end`.
    pub fn new(start: i64, end: i64) -> StateResult<Self> {
        if start >= end {
            return Err(StateError::InvalidInterval { start, end });
        }
        Ok(Self {
            start,
            end,
            dev_preview: false,
        })
    }

    /// Creates a dev-preview interval.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidInterval`] if `start >= end`.
    pub fn dev(start: i64, end: i64) -> StateResult<Self> {
        let mut interval = Self::new(start, end)?;
        interval.dev_preview = true;
        Ok(interval)
    }

    /// True if `self` and `other` overlap or touch and share a flavor,
    /// meaning they can be replaced by one covering interval.
    #[must_use]
    pub fn mergeable_with(&self, other: &Interval) -> bool {
        self.dev_preview == other.dev_preview && self.start <= other.end && other.start <= self.end
    }
}

/// Coalesces a set of intervals into the minimal covering set.
///
/// Overlapping or adjacent intervals of the same flavor become one
/// interval. The result is sorted by start, production before dev-preview
/// on ties. Coalescing is order-independent: any permutation of the input
/// yields the same output.
#[must_use]
pub fn coalesce(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.sort_by_key(|i| (i.dev_preview, i.start, i.end));

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if last.mergeable_with(&interval) => {
                last.end = last.end.max(interval.end);
            }
            _ => merged.push(interval),
        }
    }
    merged.sort_by_key(|i| (i.start, i.dev_preview, i.end));
    merged
}

/// Removes exactly `range` from a set of intervals, splitting or
/// truncating as needed - never more than requested.
///
/// The removal applies to both flavors: un-recording a range (e.g. a model
/// restatement) invalidates dev and production coverage alike. The input
/// is coalesced first so the result is always minimal.
#[must_use]
pub fn subtract(intervals: Vec<Interval>, range: &Range<i64>) -> Vec<Interval> {
    let mut result = Vec::new();
    for interval in coalesce(intervals) {
        if range.end <= interval.start || interval.end <= range.start {
            // Disjoint from the removed range.
            result.push(interval);
            continue;
        }
        if interval.start < range.start {
            result.push(Interval {
                start: interval.start,
                end: range.start,
                dev_preview: interval.dev_preview,
            });
        }
        if range.end < interval.end {
            result.push(Interval {
                start: range.end,
                end: interval.end,
                dev_preview: interval.dev_preview,
            });
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn prod(start: i64, end: i64) -> Interval {
        Interval::new(start, end).unwrap()
    }

    #[test]
    fn rejects_empty_and_inverted_ranges() {
        assert!(Interval::new(5, 5).is_err());
        assert!(Interval::new(10, 5).is_err());
        assert!(Interval::dev(3, 3).is_err());
    }

    #[test]
    fn adjacent_intervals_merge_either_order() {
        let forward = coalesce(vec![prod(0, 10), prod(10, 20)]);
        let backward = coalesce(vec![prod(10, 20), prod(0, 10)]);
        assert_eq!(forward, vec![prod(0, 20)]);
        assert_eq!(forward, backward);
    }

    #[test]
    fn overlapping_intervals_merge() {
        let merged = coalesce(vec![prod(0, 15), prod(10, 20), prod(18, 25)]);
        assert_eq!(merged, vec![prod(0, 25)]);
    }

    #[test]
    fn disjoint_intervals_stay_separate() {
        let merged = coalesce(vec![prod(0, 5), prod(10, 15)]);
        assert_eq!(merged, vec![prod(0, 5), prod(10, 15)]);
    }

    #[test]
    fn dev_and_prod_never_merge() {
        let merged = coalesce(vec![prod(0, 10), Interval::dev(10, 20).unwrap()]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn subtract_splits_interval() {
        let result = subtract(vec![prod(0, 20)], &(5..15));
        assert_eq!(result, vec![prod(0, 5), prod(15, 20)]);
    }

    #[test]
    fn subtract_truncates_edges() {
        assert_eq!(subtract(vec![prod(0, 20)], &(0..5)), vec![prod(5, 20)]);
        assert_eq!(subtract(vec![prod(0, 20)], &(15..20)), vec![prod(0, 15)]);
        assert_eq!(subtract(vec![prod(0, 20)], &(0..20)), vec![]);
    }

    #[test]
    fn subtract_leaves_disjoint_untouched() {
        let result = subtract(vec![prod(0, 5), prod(10, 15)], &(20..30));
        assert_eq!(result, vec![prod(0, 5), prod(10, 15)]);
    }

    #[test]
    fn subtract_removes_from_both_flavors() {
        let result = subtract(vec![prod(0, 20), Interval::dev(0, 20).unwrap()], &(5..15));
        assert_eq!(
            result,
            vec![
                prod(0, 5),
                Interval::dev(0, 5).unwrap(),
                prod(15, 20),
                Interval::dev(15, 20).unwrap(),
            ]
        );
    }

    fn interval_strategy() -> impl Strategy<Value = Interval> {
        (0i64..200, 1i64..50, any::<bool>()).prop_map(|(start, len, dev)| Interval {
            start,
            end: start + len,
            dev_preview: dev,
        })
    }

    proptest! {
        #[test]
        fn coalesce_is_order_independent(intervals in prop::collection::vec(interval_strategy(), 0..12)) {
            let mut reversed = intervals.clone();
            reversed.reverse();
            prop_assert_eq!(coalesce(intervals), coalesce(reversed));
        }

        #[test]
        fn coalesce_is_idempotent(intervals in prop::collection::vec(interval_strategy(), 0..12)) {
            let once = coalesce(intervals);
            let twice = coalesce(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn coalesce_preserves_point_coverage(
            intervals in prop::collection::vec(interval_strategy(), 0..12),
            point in 0i64..260,
        ) {
            let covered = |set: &[Interval], dev: bool| {
                set.iter().any(|i| i.dev_preview == dev && i.start <= point && point < i.end)
            };
            let merged = coalesce(intervals.clone());
            prop_assert_eq!(covered(&intervals, false), covered(&merged, false));
            prop_assert_eq!(covered(&intervals, true), covered(&merged, true));
        }

        #[test]
        fn subtract_never_covers_removed_range(
            intervals in prop::collection::vec(interval_strategy(), 0..12),
            start in 0i64..200,
            len in 1i64..60,
        ) {
            let result = subtract(intervals, &(start..start + len));
            prop_assert!(result
                .iter()
                .all(|i| i.end <= start || i.start >= start + len));
        }
    }
}
