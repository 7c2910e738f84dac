//! Length-bucketed interval index.
//!
//! Items are grouped by the smallest power of two at or above their length.
//! Inside a bucket every item is at most `L` long, so for a query time `T`
//! only items starting in `(T - L, T]` can be active, which is one binary
//! search plus a short forward scan per bucket. Live chat tickers come in a
//! handful of durations, so the number of buckets stays small.

use std::collections::BTreeMap;

/// Extracts a time bound from an item.
pub type Accessor<T> = fn(&T) -> i64;

/// Index over items active in the half-open range `[start, end)`.
#[derive(Debug, Clone)]
pub struct IntervalIndex<T> {
    start_of: Accessor<T>,
    end_of: Accessor<T>,
    /// bucket length -> items sorted by start
    buckets: BTreeMap<u64, Vec<T>>,
    len: usize,
}

impl<T> IntervalIndex<T> {
    pub fn new(start_of: Accessor<T>, end_of: Accessor<T>) -> Self {
        Self {
            start_of,
            end_of,
            buckets: BTreeMap::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.len = 0;
    }

    fn bucket_key(&self, item: &T) -> u64 {
        let length = (self.end_of)(item).saturating_sub((self.start_of)(item));
        u64::try_from(length)
            .unwrap_or(0)
            .max(1)
            .checked_next_power_of_two()
            .unwrap_or(u64::MAX)
    }

    /// Add an item. Items are expected in non-decreasing start order; a late
    /// item is still placed at its sorted position within its bucket.
    pub fn push(&mut self, item: T) {
        let key = self.bucket_key(&item);
        let start = (self.start_of)(&item);
        let start_of = self.start_of;
        let bucket = self.buckets.entry(key).or_default();
        match bucket.last() {
            Some(last) if start_of(last) > start => {
                let at = bucket.partition_point(|existing| start_of(existing) <= start);
                bucket.insert(at, item);
            }
            _ => bucket.push(item),
        }
        self.len += 1;
    }

    /// Add many items in any order, then rebuild once.
    pub fn extend_unsorted(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            let key = self.bucket_key(&item);
            self.buckets.entry(key).or_default().push(item);
            self.len += 1;
        }
        self.rebuild();
    }

    /// Reconstruct every bucket from a start-sorted snapshot of all items.
    pub fn rebuild(&mut self) {
        let start_of = self.start_of;
        let mut items: Vec<T> = std::mem::take(&mut self.buckets)
            .into_values()
            .flatten()
            .collect();
        items.sort_by_key(|item| start_of(item));
        self.len = 0;
        for item in items {
            let key = self.bucket_key(&item);
            self.buckets.entry(key).or_default().push(item);
            self.len += 1;
        }
    }

    /// Items active at `time`, ordered by start.
    pub fn active_at(&self, time: i64) -> Vec<&T> {
        let start_of = self.start_of;
        let end_of = self.end_of;
        let mut active = Vec::new();
        for (&length, bucket) in &self.buckets {
            let lower = time.saturating_sub(i64::try_from(length).unwrap_or(i64::MAX));
            let first = bucket.partition_point(|item| start_of(item) <= lower);
            active.extend(
                bucket[first..]
                    .iter()
                    .take_while(|item| start_of(item) <= time)
                    .filter(|item| time < end_of(item)),
            );
        }
        active.sort_by_key(|item| start_of(item));
        active
    }

    /// All items, bucket by bucket.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buckets.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    type Span = (i64, i64, usize);

    fn index() -> IntervalIndex<Span> {
        IntervalIndex::new(|s| s.0, |s| s.1)
    }

    fn ids(active: Vec<&Span>) -> Vec<usize> {
        active.into_iter().map(|s| s.2).collect()
    }

    #[test]
    fn test_empty_index() {
        let index = index();
        assert!(index.active_at(0).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn test_half_open_bounds() {
        let mut index = index();
        index.push((100, 200, 0));
        assert!(index.active_at(99).is_empty());
        assert_eq!(ids(index.active_at(100)), vec![0]);
        assert_eq!(ids(index.active_at(199)), vec![0]);
        assert!(index.active_at(200).is_empty());
    }

    #[test]
    fn test_zero_duration_never_active() {
        let mut index = index();
        index.push((50, 50, 0));
        for t in 40..60 {
            assert!(index.active_at(t).is_empty());
        }
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_mixed_lengths() {
        let mut index = index();
        index.push((-5_000, 115_000, 0));
        index.push((0, 30_000, 1));
        index.push((10_000, 12_000, 2));
        index.push((20_000, 320_000, 3));
        assert_eq!(ids(index.active_at(11_000)), vec![0, 1, 2]);
        assert_eq!(ids(index.active_at(25_000)), vec![0, 1, 3]);
        assert_eq!(ids(index.active_at(200_000)), vec![3]);
    }

    #[test]
    fn test_late_push_and_rebuild() {
        let mut index = index();
        index.push((1_000, 2_000, 0));
        index.push((500, 1_500, 1));
        assert_eq!(ids(index.active_at(1_200)), vec![1, 0]);

        index.extend_unsorted([(3_000, 4_000, 2), (-100, 900, 3)]);
        assert_eq!(index.len(), 4);
        assert_eq!(ids(index.active_at(800)), vec![3, 1]);
        assert_eq!(ids(index.active_at(3_500)), vec![2]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// An item is reported exactly when `start <= T < end`.
        #[test]
        fn prop_active_iff_contains(
            mut spans in prop::collection::vec((-10_000i64..10_000, 0i64..5_000), 0..40),
            probes in prop::collection::vec(-12_000i64..16_000, 1..20),
        ) {
            spans.sort_by_key(|(start, _)| *start);
            let mut index = index();
            for (id, (start, length)) in spans.iter().enumerate() {
                index.push((*start, start + length, id));
            }
            for t in probes {
                let mut expected: Vec<usize> = spans
                    .iter()
                    .enumerate()
                    .filter(|(_, (start, length))| *start <= t && t < start + length)
                    .map(|(id, _)| id)
                    .collect();
                let mut actual = ids(index.active_at(t));
                expected.sort_unstable();
                actual.sort_unstable();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
