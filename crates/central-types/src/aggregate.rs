//! Aggregates submitted by agents, and the pieces they are built from.
//!
//! An agent flushes one `AggregatesByType` per transaction type per capture
//! tick: an overall aggregate plus one aggregate per transaction name.
//! Query entries reference shared query texts by index so a text that
//! appears under many transaction names is shipped once.

use serde::{Deserialize, Serialize};

use crate::histogram::DurationHistogram;
use crate::profile::Profile;

/// One node of a root timer tree.
///
/// Timers are keyed by `(name, extended)`; merging sums `total_nanos` and
/// `count` per node and recurses into children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timer {
    pub name: String,
    pub extended: bool,
    pub total_nanos: f64,
    pub count: i64,
    #[serde(default)]
    pub child_timers: Vec<Timer>,
}

impl Timer {
    pub fn new(name: impl Into<String>, total_nanos: f64, count: i64) -> Self {
        Self {
            name: name.into(),
            extended: false,
            total_nanos,
            count,
            child_timers: Vec::new(),
        }
    }

    pub fn with_children(mut self, child_timers: Vec<Timer>) -> Self {
        self.child_timers = child_timers;
        self
    }
}

/// Merge a list of root timers into an existing list, keyed by
/// `(name, extended)`. Associative and commutative over the resulting sums.
pub fn merge_root_timers(target: &mut Vec<Timer>, source: &[Timer]) {
    for timer in source {
        match target
            .iter_mut()
            .find(|t| t.name == timer.name && t.extended == timer.extended)
        {
            Some(existing) => {
                existing.total_nanos += timer.total_nanos;
                existing.count += timer.count;
                merge_root_timers(&mut existing.child_timers, &timer.child_timers);
            }
            None => target.push(timer.clone()),
        }
    }
}

/// Per-thread statistics attached to an overview aggregate.
///
/// Every field is independently nullable: agents that cannot sample a given
/// counter (e.g. allocation bytes on some JVMs) leave it out. Accumulation
/// treats null as absent; a merged field is null iff it was null in every
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThreadStats {
    pub total_cpu_nanos: Option<f64>,
    pub total_blocked_nanos: Option<f64>,
    pub total_waited_nanos: Option<f64>,
    pub total_allocated_bytes: Option<f64>,
}

impl ThreadStats {
    pub fn is_empty(&self) -> bool {
        self.total_cpu_nanos.is_none()
            && self.total_blocked_nanos.is_none()
            && self.total_waited_nanos.is_none()
            && self.total_allocated_bytes.is_none()
    }

    /// Accumulate `input` into `acc`, field by field.
    pub fn accumulate(acc: &mut Option<ThreadStats>, input: Option<&ThreadStats>) {
        let Some(input) = input else { return };
        let merged = match acc {
            Some(current) => ThreadStats {
                total_cpu_nanos: add_nullable(current.total_cpu_nanos, input.total_cpu_nanos),
                total_blocked_nanos: add_nullable(
                    current.total_blocked_nanos,
                    input.total_blocked_nanos,
                ),
                total_waited_nanos: add_nullable(
                    current.total_waited_nanos,
                    input.total_waited_nanos,
                ),
                total_allocated_bytes: add_nullable(
                    current.total_allocated_bytes,
                    input.total_allocated_bytes,
                ),
            },
            None => *input,
        };
        *acc = Some(merged);
    }
}

/// Nullable addition: absent values do not poison the sum, and the result is
/// absent only when both inputs are.
pub fn add_nullable(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (Some(x), None) => Some(x),
        (None, Some(y)) => Some(y),
        (Some(x), Some(y)) => Some(x + y),
    }
}

/// One per-query rollup inside an aggregate. `shared_query_text_index`
/// points into the shared query text list submitted alongside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAggregate {
    pub query_type: String,
    pub shared_query_text_index: usize,
    pub total_duration_nanos: f64,
    pub execution_count: i64,
    pub total_rows: Option<i64>,
}

/// One per-service-call rollup inside an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCallAggregate {
    pub service_call_type: String,
    pub service_call_text: String,
    pub total_duration_nanos: f64,
    pub execution_count: i64,
}

/// A query text shared across the aggregates of one store call.
///
/// Either the full text (possibly longer than the truncation threshold, in
/// which case the writer truncates and hashes it), or an already-truncated
/// prefix plus the sha1 of the full text the agent computed earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedQueryText {
    pub full_text: String,
    #[serde(default)]
    pub truncated_text: Option<String>,
    #[serde(default)]
    pub full_text_sha1: Option<String>,
}

impl SharedQueryText {
    pub fn full(text: impl Into<String>) -> Self {
        Self {
            full_text: text.into(),
            truncated_text: None,
            full_text_sha1: None,
        }
    }

    pub fn truncated(truncated: impl Into<String>, sha1: impl Into<String>) -> Self {
        Self {
            full_text: String::new(),
            truncated_text: Some(truncated.into()),
            full_text_sha1: Some(sha1.into()),
        }
    }
}

/// One aggregate: everything an agent measured for a transaction type (or a
/// single transaction name) over one capture interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Aggregate {
    pub total_duration_nanos: f64,
    pub transaction_count: i64,
    #[serde(default)]
    pub error_count: i64,
    #[serde(default)]
    pub async_transactions: bool,
    #[serde(default)]
    pub main_thread_root_timers: Vec<Timer>,
    #[serde(default)]
    pub aux_thread_root_timers: Vec<Timer>,
    #[serde(default)]
    pub async_timers: Vec<Timer>,
    #[serde(default)]
    pub main_thread_stats: Option<ThreadStats>,
    #[serde(default)]
    pub aux_thread_stats: Option<ThreadStats>,
    #[serde(default)]
    pub duration_nanos_histogram: DurationHistogram,
    #[serde(default)]
    pub queries: Vec<QueryAggregate>,
    #[serde(default)]
    pub service_calls: Vec<ServiceCallAggregate>,
    #[serde(default)]
    pub main_thread_profile: Option<Profile>,
    #[serde(default)]
    pub aux_thread_profile: Option<Profile>,
}

/// A named transaction's aggregate within an `AggregatesByType`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionAggregate {
    pub transaction_name: String,
    pub aggregate: Aggregate,
}

/// Everything an agent submits for one transaction type at one capture tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatesByType {
    pub transaction_type: String,
    pub overall: Aggregate,
    #[serde(default)]
    pub transactions: Vec<TransactionAggregate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_root_timers_sums_matching_nodes() {
        let mut target = vec![Timer::new("http", 100.0, 1)
            .with_children(vec![Timer::new("render", 40.0, 1)])];
        let source = vec![Timer::new("http", 50.0, 2)
            .with_children(vec![Timer::new("render", 10.0, 1), Timer::new("db", 5.0, 1)])];

        merge_root_timers(&mut target, &source);

        assert_eq!(target.len(), 1);
        assert_eq!(target[0].total_nanos, 150.0);
        assert_eq!(target[0].count, 3);
        assert_eq!(target[0].child_timers.len(), 2);
        assert_eq!(target[0].child_timers[0].total_nanos, 50.0);
        assert_eq!(target[0].child_timers[1].name, "db");
    }

    #[test]
    fn test_merge_root_timers_extended_is_distinct() {
        let mut target = vec![Timer::new("jdbc", 10.0, 1)];
        let mut extended = Timer::new("jdbc", 20.0, 1);
        extended.extended = true;

        merge_root_timers(&mut target, &[extended]);

        assert_eq!(target.len(), 2);
    }

    #[test]
    fn test_thread_stats_accumulate_nullable_fields() {
        let mut acc = Some(ThreadStats {
            total_cpu_nanos: Some(5.0),
            total_blocked_nanos: None,
            ..Default::default()
        });
        let input = ThreadStats {
            total_cpu_nanos: None,
            total_blocked_nanos: Some(3.0),
            ..Default::default()
        };

        ThreadStats::accumulate(&mut acc, Some(&input));

        let merged = acc.unwrap();
        assert_eq!(merged.total_cpu_nanos, Some(5.0));
        assert_eq!(merged.total_blocked_nanos, Some(3.0));
        assert_eq!(merged.total_waited_nanos, None);
    }

    #[test]
    fn test_thread_stats_accumulate_none_input_keeps_acc() {
        let mut acc: Option<ThreadStats> = None;
        ThreadStats::accumulate(&mut acc, None);
        assert!(acc.is_none());
    }

    #[test]
    fn test_add_nullable() {
        assert_eq!(add_nullable(None, None), None);
        assert_eq!(add_nullable(Some(1.0), None), Some(1.0));
        assert_eq!(add_nullable(None, Some(2.0)), Some(2.0));
        assert_eq!(add_nullable(Some(1.0), Some(2.0)), Some(3.0));
    }
}
