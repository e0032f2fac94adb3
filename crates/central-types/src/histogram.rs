//! Lazy duration histogram.
//!
//! Small aggregates keep raw nanosecond values; once a histogram grows past
//! `RAW_VALUE_CAP` entries it spills into exponential buckets (32 sub-buckets
//! per power of two, worst-case relative error 1/64). Merging never loses
//! counts and is associative and commutative over the resulting distribution,
//! which is what makes multi-level rollups order-independent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Raw values kept before spilling to buckets.
const RAW_VALUE_CAP: usize = 1024;

/// Sub-bucket bits per power of two.
const SUB_BUCKET_BITS: u32 = 5;
const SUB_BUCKETS: u32 = 1 << SUB_BUCKET_BITS;

/// Values below this are stored in exact singleton buckets.
const EXACT_LIMIT: i64 = (SUB_BUCKETS as i64) * 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Repr {
    Raw(Vec<i64>),
    Buckets(BTreeMap<u32, u64>),
}

/// Histogram of transaction durations in nanoseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurationHistogram {
    total_count: u64,
    repr: Repr,
}

impl Default for DurationHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl DurationHistogram {
    pub fn new() -> Self {
        Self {
            total_count: 0,
            repr: Repr::Raw(Vec::new()),
        }
    }

    /// Build a histogram from raw values. Test/agent convenience.
    pub fn from_values(values: impl IntoIterator<Item = i64>) -> Self {
        let mut histogram = Self::new();
        for value in values {
            histogram.add(value);
        }
        histogram
    }

    pub fn count(&self) -> u64 {
        self.total_count
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    /// Record one duration. Negative values are clamped to zero.
    pub fn add(&mut self, nanos: i64) {
        let nanos = nanos.max(0);
        self.total_count += 1;
        match &mut self.repr {
            Repr::Raw(values) if values.len() < RAW_VALUE_CAP => values.push(nanos),
            Repr::Raw(_) => {
                self.spill();
                self.bump(bucket_index(nanos), 1);
            }
            Repr::Buckets(_) => self.bump(bucket_index(nanos), 1),
        }
    }

    /// Merge another histogram into this one.
    pub fn merge(&mut self, other: &DurationHistogram) {
        self.total_count += other.total_count;
        match &other.repr {
            Repr::Raw(other_values) => match &mut self.repr {
                Repr::Raw(values) if values.len() + other_values.len() <= RAW_VALUE_CAP => {
                    values.extend_from_slice(other_values);
                }
                _ => {
                    self.spill();
                    for value in other_values {
                        self.bump(bucket_index(*value), 1);
                    }
                }
            },
            Repr::Buckets(other_buckets) => {
                self.spill();
                for (index, count) in other_buckets {
                    self.bump(*index, *count);
                }
            }
        }
    }

    /// Value at the given percentile (0 < p <= 100), or 0 when empty.
    ///
    /// Exact while raw, within one sub-bucket once spilled.
    pub fn value_at_percentile(&self, percentile: f64) -> i64 {
        if self.total_count == 0 {
            return 0;
        }
        let rank = ((percentile / 100.0) * self.total_count as f64).ceil() as u64;
        let rank = rank.clamp(1, self.total_count);
        match &self.repr {
            Repr::Raw(values) => {
                let mut sorted = values.clone();
                sorted.sort_unstable();
                sorted[(rank - 1) as usize]
            }
            Repr::Buckets(buckets) => {
                let mut cumulative = 0u64;
                for (index, count) in buckets {
                    cumulative += count;
                    if cumulative >= rank {
                        return bucket_value(*index);
                    }
                }
                // rank <= total_count, so the walk always returns
                0
            }
        }
    }

    /// Convert the raw representation to buckets in place. No-op if already
    /// bucketed.
    fn spill(&mut self) {
        if let Repr::Raw(values) = &self.repr {
            let mut buckets = BTreeMap::new();
            for value in values {
                *buckets.entry(bucket_index(*value)).or_insert(0u64) += 1;
            }
            self.repr = Repr::Buckets(buckets);
        }
    }

    fn bump(&mut self, index: u32, count: u64) {
        if let Repr::Buckets(buckets) = &mut self.repr {
            *buckets.entry(index).or_insert(0) += count;
        }
    }
}

/// Bucket index for a non-negative value: exact below `EXACT_LIMIT`, then
/// (exponent, 5-bit mantissa) pairs.
fn bucket_index(value: i64) -> u32 {
    let value = value.max(0);
    if value < EXACT_LIMIT {
        return value as u32;
    }
    let v = value as u64;
    let exp = 63 - v.leading_zeros();
    let sub = ((v >> (exp - SUB_BUCKET_BITS)) & (SUB_BUCKETS as u64 - 1)) as u32;
    EXACT_LIMIT as u32 + (exp - SUB_BUCKET_BITS - 1) * SUB_BUCKETS + sub
}

/// Representative (midpoint) value for a bucket index.
fn bucket_value(index: u32) -> i64 {
    if index < EXACT_LIMIT as u32 {
        return index as i64;
    }
    let i = index - EXACT_LIMIT as u32;
    let exp = SUB_BUCKET_BITS + 1 + i / SUB_BUCKETS;
    let sub = (i % SUB_BUCKETS) as i64;
    let shift = exp - SUB_BUCKET_BITS;
    let lower = (SUB_BUCKETS as i64 + sub) << shift;
    lower + (1i64 << shift) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_histogram() {
        let histogram = DurationHistogram::new();
        assert!(histogram.is_empty());
        assert_eq!(histogram.value_at_percentile(50.0), 0);
    }

    #[test]
    fn test_raw_percentiles_exact() {
        let histogram = DurationHistogram::from_values(1..=100);
        assert_eq!(histogram.count(), 100);
        assert_eq!(histogram.value_at_percentile(50.0), 50);
        assert_eq!(histogram.value_at_percentile(95.0), 95);
        assert_eq!(histogram.value_at_percentile(100.0), 100);
    }

    #[test]
    fn test_bucket_index_monotone() {
        let mut last = 0;
        for value in [0, 1, 63, 64, 65, 100, 1_000, 1_000_000, i64::MAX / 2] {
            let index = bucket_index(value);
            assert!(index >= last, "index not monotone at {}", value);
            last = index;
        }
    }

    #[test]
    fn test_bucket_value_within_error_bound() {
        for value in [64i64, 100, 12_345, 9_999_999, 1_000_000_000_000] {
            let mid = bucket_value(bucket_index(value));
            let error = (mid - value).abs() as f64 / value as f64;
            assert!(error <= 1.0 / 64.0, "error {} too large for {}", error, value);
        }
    }

    #[test]
    fn test_spill_preserves_count_and_approximate_median() {
        let mut histogram = DurationHistogram::new();
        for i in 0..(RAW_VALUE_CAP as i64 + 500) {
            histogram.add(i * 1_000);
        }
        assert_eq!(histogram.count(), RAW_VALUE_CAP as u64 + 500);
        let median = histogram.value_at_percentile(50.0);
        let expected = (RAW_VALUE_CAP as i64 + 500) / 2 * 1_000;
        let error = (median - expected).abs() as f64 / expected as f64;
        assert!(error < 0.05, "median {} too far from {}", median, expected);
    }

    #[test]
    fn test_merge_raw_stays_raw_under_cap() {
        let mut a = DurationHistogram::from_values([1, 2, 3]);
        let b = DurationHistogram::from_values([4, 5]);
        a.merge(&b);
        assert_eq!(a.count(), 5);
        assert_eq!(a.value_at_percentile(100.0), 5);
    }

    #[test]
    fn test_merge_order_independent_after_spill() {
        let big: Vec<i64> = (0..2_000).map(|i| i * 37 + 11).collect();
        let small = [5i64, 500_000, 123];

        let mut left = DurationHistogram::from_values(big.iter().copied());
        left.merge(&DurationHistogram::from_values(small.iter().copied()));

        let mut right = DurationHistogram::from_values(small.iter().copied());
        right.merge(&DurationHistogram::from_values(big.iter().copied()));

        assert_eq!(left.count(), right.count());
        for p in [10.0, 50.0, 90.0, 99.0] {
            assert_eq!(left.value_at_percentile(p), right.value_at_percentile(p));
        }
    }

    #[test]
    fn test_negative_values_clamped() {
        let histogram = DurationHistogram::from_values([-5, 0, 10]);
        assert_eq!(histogram.count(), 3);
        assert_eq!(histogram.value_at_percentile(1.0), 0);
    }
}
