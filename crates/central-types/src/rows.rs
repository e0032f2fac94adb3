//! Stored row shapes, one per aggregate kind.
//!
//! These are the values persisted per `(partition, capture_time)` cell at
//! every rollup level. They carry no partition fields of their own; the
//! storage layer wraps them in an envelope that repeats the partition so
//! reads can filter without trusting key parsing.

use serde::{Deserialize, Serialize};

use crate::aggregate::{ThreadStats, Timer};
use crate::histogram::DurationHistogram;
use crate::profile::Profile;

/// The closed set of aggregate kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateKind {
    Summary,
    ErrorSummary,
    Overview,
    Histogram,
    Throughput,
    Query,
    ServiceCall,
    MainThreadProfile,
    AuxThreadProfile,
}

impl AggregateKind {
    pub const ALL: [AggregateKind; 9] = [
        AggregateKind::Summary,
        AggregateKind::ErrorSummary,
        AggregateKind::Overview,
        AggregateKind::Histogram,
        AggregateKind::Throughput,
        AggregateKind::Query,
        AggregateKind::ServiceCall,
        AggregateKind::MainThreadProfile,
        AggregateKind::AuxThreadProfile,
    ];
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SummaryRow {
    pub total_duration_nanos: f64,
    pub transaction_count: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ErrorSummaryRow {
    pub error_count: i64,
    pub transaction_count: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct OverviewRow {
    pub total_duration_nanos: f64,
    pub transaction_count: i64,
    pub async_transactions: bool,
    pub main_thread_root_timers: Vec<Timer>,
    pub aux_thread_root_timers: Vec<Timer>,
    pub async_timers: Vec<Timer>,
    pub main_thread_stats: Option<ThreadStats>,
    pub aux_thread_stats: Option<ThreadStats>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistogramRow {
    pub total_duration_nanos: f64,
    pub transaction_count: i64,
    pub duration_nanos_histogram: DurationHistogram,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThroughputRow {
    pub transaction_count: i64,
}

/// One query rollup row. `full_query_text_sha1` is never null: the empty
/// string means `truncated_query_text` holds the entire text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRow {
    pub query_type: String,
    pub truncated_query_text: String,
    pub full_query_text_sha1: String,
    pub total_duration_nanos: f64,
    pub execution_count: i64,
    pub total_rows: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceCallRow {
    pub service_call_type: String,
    pub service_call_text: String,
    pub total_duration_nanos: f64,
    pub execution_count: i64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProfileRow {
    pub profile: Profile,
}
