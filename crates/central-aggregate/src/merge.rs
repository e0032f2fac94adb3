//! Merge/reducer library.
//!
//! Pure reductions that combine N rows of an aggregate kind into one. Every
//! reduction here is associative and commutative, which is what makes
//! re-running a rollup (or running it level by level in any order) produce
//! the same rows.

use std::cmp::Ordering;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::collections::HashMap;

use central_types::{
    aggregate::merge_root_timers, ErrorSummaryRow, HistogramRow, OverviewRow, ProfileRow,
    QueryRow, ServiceCallRow, SummaryRow, ThreadStats, ThroughputRow,
};

/// Sum a list of summary rows.
pub fn reduce_summaries<'a>(rows: impl IntoIterator<Item = &'a SummaryRow>) -> SummaryRow {
    let mut merged = SummaryRow::default();
    for row in rows {
        merged.total_duration_nanos += row.total_duration_nanos;
        merged.transaction_count += row.transaction_count;
    }
    merged
}

/// Sum a list of error summary rows.
pub fn reduce_error_summaries<'a>(
    rows: impl IntoIterator<Item = &'a ErrorSummaryRow>,
) -> ErrorSummaryRow {
    let mut merged = ErrorSummaryRow::default();
    for row in rows {
        merged.error_count += row.error_count;
        merged.transaction_count += row.transaction_count;
    }
    merged
}

/// Sum a list of throughput rows.
pub fn reduce_throughputs<'a>(
    rows: impl IntoIterator<Item = &'a ThroughputRow>,
) -> ThroughputRow {
    let mut merged = ThroughputRow::default();
    for row in rows {
        merged.transaction_count += row.transaction_count;
    }
    merged
}

/// Merge overview rows: sums, OR of the async flag, root-timer tree merges,
/// and nullable thread-stat accumulation (main and aux independently).
pub fn reduce_overviews<'a>(rows: impl IntoIterator<Item = &'a OverviewRow>) -> OverviewRow {
    let mut merged = OverviewRow::default();
    for row in rows {
        merged.total_duration_nanos += row.total_duration_nanos;
        merged.transaction_count += row.transaction_count;
        merged.async_transactions |= row.async_transactions;
        merge_root_timers(&mut merged.main_thread_root_timers, &row.main_thread_root_timers);
        merge_root_timers(&mut merged.aux_thread_root_timers, &row.aux_thread_root_timers);
        merge_root_timers(&mut merged.async_timers, &row.async_timers);
        ThreadStats::accumulate(&mut merged.main_thread_stats, row.main_thread_stats.as_ref());
        ThreadStats::accumulate(&mut merged.aux_thread_stats, row.aux_thread_stats.as_ref());
    }
    merged
}

/// Merge histogram rows.
pub fn reduce_histograms<'a>(rows: impl IntoIterator<Item = &'a HistogramRow>) -> HistogramRow {
    let mut merged = HistogramRow::default();
    for row in rows {
        merged.total_duration_nanos += row.total_duration_nanos;
        merged.transaction_count += row.transaction_count;
        merged
            .duration_nanos_histogram
            .merge(&row.duration_nanos_histogram);
    }
    merged
}

/// Merge profile rows.
pub fn reduce_profiles<'a>(rows: impl IntoIterator<Item = &'a ProfileRow>) -> ProfileRow {
    let mut merged = ProfileRow::default();
    for row in rows {
        merged.profile.merge_from(&row.profile);
    }
    merged
}

#[derive(Debug, PartialEq, Eq, Hash, Clone)]
struct QueryKey {
    truncated_text: String,
    full_query_text_sha1: String,
}

#[derive(Debug, Default, Clone)]
struct QueryData {
    total_duration_nanos: f64,
    execution_count: i64,
    total_rows_sum: i64,
    /// Once any merged row lacks total_rows, the merged value is null
    total_rows_absent: bool,
}

/// Groups query rows by `(type, truncated text, sha1)`, sums them, and caps
/// the result to the top N per query type by total duration.
#[derive(Debug)]
pub struct QueryCollector {
    limit_per_type: usize,
    queries: HashMap<String, HashMap<QueryKey, QueryData>>,
}

impl QueryCollector {
    pub fn new(limit_per_type: usize) -> Self {
        Self {
            limit_per_type,
            queries: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    pub fn add_row(&mut self, row: &QueryRow) {
        let data = self
            .queries
            .entry(row.query_type.clone())
            .or_default()
            .entry(QueryKey {
                truncated_text: row.truncated_query_text.clone(),
                full_query_text_sha1: row.full_query_text_sha1.clone(),
            })
            .or_default();
        data.total_duration_nanos += row.total_duration_nanos;
        data.execution_count += row.execution_count;
        match row.total_rows {
            Some(rows) => data.total_rows_sum += rows,
            None => data.total_rows_absent = true,
        }
    }

    /// The capped, merged rows, largest total duration first within each
    /// type.
    pub fn into_rows(self) -> Vec<QueryRow> {
        let limit = self.limit_per_type;
        let mut rows = Vec::new();
        for (query_type, by_key) in self.queries {
            let entries = by_key.into_iter().map(|(key, data)| {
                let total_duration_nanos = data.total_duration_nanos;
                let row = QueryRow {
                    query_type: query_type.clone(),
                    truncated_query_text: key.truncated_text,
                    full_query_text_sha1: key.full_query_text_sha1,
                    total_duration_nanos,
                    execution_count: data.execution_count,
                    total_rows: if data.total_rows_absent {
                        None
                    } else {
                        Some(data.total_rows_sum)
                    },
                };
                (total_duration_nanos, row)
            });
            rows.extend(cap_by_duration(entries, limit));
        }
        rows
    }
}

/// Groups service call rows by `(type, text)`, sums them, and caps to the
/// top N per type by total duration.
#[derive(Debug)]
pub struct ServiceCallCollector {
    limit_per_type: usize,
    calls: HashMap<String, HashMap<String, (f64, i64)>>,
}

impl ServiceCallCollector {
    pub fn new(limit_per_type: usize) -> Self {
        Self {
            limit_per_type,
            calls: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn add_row(&mut self, row: &ServiceCallRow) {
        let entry = self
            .calls
            .entry(row.service_call_type.clone())
            .or_default()
            .entry(row.service_call_text.clone())
            .or_insert((0.0, 0));
        entry.0 += row.total_duration_nanos;
        entry.1 += row.execution_count;
    }

    pub fn into_rows(self) -> Vec<ServiceCallRow> {
        let limit = self.limit_per_type;
        let mut rows = Vec::new();
        for (service_call_type, by_text) in self.calls {
            let entries = by_text.into_iter().map(|(text, (duration, count))| {
                let row = ServiceCallRow {
                    service_call_type: service_call_type.clone(),
                    service_call_text: text,
                    total_duration_nanos: duration,
                    execution_count: count,
                };
                (duration, row)
            });
            rows.extend(cap_by_duration(entries, limit));
        }
        rows
    }
}

struct CapEntry<T> {
    total_duration_nanos: f64,
    value: T,
}

impl<T> PartialEq for CapEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.total_duration_nanos
            .total_cmp(&other.total_duration_nanos)
            == Ordering::Equal
    }
}

impl<T> Eq for CapEntry<T> {}

impl<T> PartialOrd for CapEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for CapEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.total_duration_nanos
            .total_cmp(&other.total_duration_nanos)
    }
}

/// Keep the `limit` entries with the largest duration. Bounded min-heap: on
/// overflow the smallest is discarded. Output is largest-first.
fn cap_by_duration<T>(entries: impl Iterator<Item = (f64, T)>, limit: usize) -> Vec<T> {
    let mut heap: BinaryHeap<Reverse<CapEntry<T>>> = BinaryHeap::with_capacity(limit + 1);
    for (total_duration_nanos, value) in entries {
        heap.push(Reverse(CapEntry {
            total_duration_nanos,
            value,
        }));
        if heap.len() > limit {
            heap.pop();
        }
    }
    let mut kept: Vec<CapEntry<T>> = heap.into_iter().map(|r| r.0).collect();
    kept.sort_by(|a, b| b.cmp(a));
    kept.into_iter().map(|e| e.value).collect()
}
