//! Reader: ad-hoc time-range merges for the UI layer.
//!
//! The store only does per-key range reads, so all group-by/sort/limit for
//! summary kinds happens here, driven by caller-supplied collectors. The
//! lower time bound follows the schema catalog: summary tables read
//! exclusively (merging adjacent ranges must not double-count a boundary
//! bucket), the rest inclusively.

use std::collections::HashMap;
use std::sync::Arc;

use central_storage::{table_spec, AggregateRowData, Storage};
use central_types::{
    AggregateKind, ErrorSummaryRow, HistogramRow, OverviewRow, Profile, ProfileRow, QueryRow,
    ServiceCallRow, SummaryRow, ThroughputRow,
};

use crate::error::AggregateError;
use crate::merge::{QueryCollector, ServiceCallCollector};

/// One UI read: an agent-rollup, a transaction type (optionally narrowed to
/// one transaction name), a time range, and the rollup level to read from.
#[derive(Debug, Clone)]
pub struct TransactionQuery {
    pub agent_rollup: String,
    pub transaction_type: String,
    pub transaction_name: Option<String>,
    pub from: i64,
    pub to: i64,
    pub rollup_level: usize,
}

/// Accumulates the overall summary over a range.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct OverallSummaryCollector {
    pub total_duration_nanos: f64,
    pub transaction_count: i64,
    pub last_capture_time: i64,
}

impl OverallSummaryCollector {
    pub fn merge_summary(&mut self, total_duration_nanos: f64, transaction_count: i64, capture_time: i64) {
        self.total_duration_nanos += total_duration_nanos;
        self.transaction_count += transaction_count;
        self.last_capture_time = self.last_capture_time.max(capture_time);
    }
}

/// Sort orders for per-transaction summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarySortOrder {
    TotalTime,
    AverageTime,
    Throughput,
}

/// One transaction name's merged summary.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionSummary {
    pub transaction_name: String,
    pub total_duration_nanos: f64,
    pub transaction_count: i64,
}

/// Groups summary rows by transaction name; sorts and limits on demand.
#[derive(Debug, Default)]
pub struct TransactionSummaryCollector {
    summaries: HashMap<String, (f64, i64)>,
}

impl TransactionSummaryCollector {
    pub fn merge_summary(&mut self, transaction_name: &str, total_duration_nanos: f64, transaction_count: i64) {
        let entry = self
            .summaries
            .entry(transaction_name.to_string())
            .or_insert((0.0, 0));
        entry.0 += total_duration_nanos;
        entry.1 += transaction_count;
    }

    pub fn into_sorted(self, sort_order: SummarySortOrder, limit: usize) -> Vec<TransactionSummary> {
        let mut summaries: Vec<TransactionSummary> = self
            .summaries
            .into_iter()
            .map(|(name, (duration, count))| TransactionSummary {
                transaction_name: name,
                total_duration_nanos: duration,
                transaction_count: count,
            })
            .collect();
        summaries.sort_by(|a, b| {
            let (x, y) = match sort_order {
                SummarySortOrder::TotalTime => (a.total_duration_nanos, b.total_duration_nanos),
                SummarySortOrder::AverageTime => (
                    average(a.total_duration_nanos, a.transaction_count),
                    average(b.total_duration_nanos, b.transaction_count),
                ),
                SummarySortOrder::Throughput => {
                    (a.transaction_count as f64, b.transaction_count as f64)
                }
            };
            y.total_cmp(&x)
        });
        summaries.truncate(limit);
        summaries
    }
}

/// Accumulates the overall error summary over a range.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct OverallErrorSummaryCollector {
    pub error_count: i64,
    pub transaction_count: i64,
    pub last_capture_time: i64,
}

impl OverallErrorSummaryCollector {
    pub fn merge_error_summary(&mut self, error_count: i64, transaction_count: i64, capture_time: i64) {
        self.error_count += error_count;
        self.transaction_count += transaction_count;
        self.last_capture_time = self.last_capture_time.max(capture_time);
    }
}

/// Sort orders for per-transaction error summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSummarySortOrder {
    ErrorCount,
    ErrorRate,
}

/// One transaction name's merged error summary.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionErrorSummary {
    pub transaction_name: String,
    pub error_count: i64,
    pub transaction_count: i64,
}

/// Groups error summary rows by transaction name.
#[derive(Debug, Default)]
pub struct TransactionErrorSummaryCollector {
    summaries: HashMap<String, (i64, i64)>,
}

impl TransactionErrorSummaryCollector {
    pub fn merge_error_summary(&mut self, transaction_name: &str, error_count: i64, transaction_count: i64) {
        let entry = self
            .summaries
            .entry(transaction_name.to_string())
            .or_insert((0, 0));
        entry.0 += error_count;
        entry.1 += transaction_count;
    }

    pub fn into_sorted(
        self,
        sort_order: ErrorSummarySortOrder,
        limit: usize,
    ) -> Vec<TransactionErrorSummary> {
        let mut summaries: Vec<TransactionErrorSummary> = self
            .summaries
            .into_iter()
            .map(|(name, (errors, count))| TransactionErrorSummary {
                transaction_name: name,
                error_count: errors,
                transaction_count: count,
            })
            .collect();
        summaries.sort_by(|a, b| {
            let (x, y) = match sort_order {
                ErrorSummarySortOrder::ErrorCount => (a.error_count as f64, b.error_count as f64),
                ErrorSummarySortOrder::ErrorRate => (
                    average(a.error_count as f64, a.transaction_count),
                    average(b.error_count as f64, b.transaction_count),
                ),
            };
            y.total_cmp(&x)
        });
        summaries.truncate(limit);
        summaries
    }
}

fn average(total: f64, count: i64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

/// Range reads for every aggregate kind; reduction is delegated to the
/// collector the caller passes in.
pub struct AggregateReader {
    storage: Arc<Storage>,
}

impl AggregateReader {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Merge the overall summary over the query range.
    pub async fn merge_overall_summary_into(
        &self,
        query: &TransactionQuery,
        collector: &mut OverallSummaryCollector,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let rows: Vec<AggregateRowData<SummaryRow>> = self.scan(query, AggregateKind::Summary, now_millis)?;
        for data in rows {
            collector.merge_summary(
                data.row.total_duration_nanos,
                data.row.transaction_count,
                data.capture_time,
            );
        }
        Ok(())
    }

    /// Merge per-transaction summaries over the query range.
    pub async fn merge_transaction_summaries_into(
        &self,
        query: &TransactionQuery,
        collector: &mut TransactionSummaryCollector,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let rows: Vec<AggregateRowData<SummaryRow>> =
            self.scan_names(query, AggregateKind::Summary, now_millis)?;
        for data in rows {
            if let Some(name) = &data.transaction_name {
                collector.merge_summary(
                    name,
                    data.row.total_duration_nanos,
                    data.row.transaction_count,
                );
            }
        }
        Ok(())
    }

    /// Merge the overall error summary over the query range.
    pub async fn merge_overall_error_summary_into(
        &self,
        query: &TransactionQuery,
        collector: &mut OverallErrorSummaryCollector,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let rows: Vec<AggregateRowData<ErrorSummaryRow>> =
            self.scan(query, AggregateKind::ErrorSummary, now_millis)?;
        for data in rows {
            collector.merge_error_summary(
                data.row.error_count,
                data.row.transaction_count,
                data.capture_time,
            );
        }
        Ok(())
    }

    /// Merge per-transaction error summaries over the query range.
    pub async fn merge_transaction_error_summaries_into(
        &self,
        query: &TransactionQuery,
        collector: &mut TransactionErrorSummaryCollector,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let rows: Vec<AggregateRowData<ErrorSummaryRow>> =
            self.scan_names(query, AggregateKind::ErrorSummary, now_millis)?;
        for data in rows {
            if let Some(name) = &data.transaction_name {
                collector.merge_error_summary(
                    name,
                    data.row.error_count,
                    data.row.transaction_count,
                );
            }
        }
        Ok(())
    }

    /// Overview rows over the range, ascending capture time.
    pub async fn read_overview_aggregates(
        &self,
        query: &TransactionQuery,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<OverviewRow>>, AggregateError> {
        self.scan(query, AggregateKind::Overview, now_millis)
    }

    /// Histogram rows over the range, ascending capture time.
    pub async fn read_percentile_aggregates(
        &self,
        query: &TransactionQuery,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<HistogramRow>>, AggregateError> {
        self.scan(query, AggregateKind::Histogram, now_millis)
    }

    /// Throughput rows over the range, ascending capture time.
    pub async fn read_throughput_aggregates(
        &self,
        query: &TransactionQuery,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<ThroughputRow>>, AggregateError> {
        self.scan(query, AggregateKind::Throughput, now_millis)
    }

    /// Merge query rollups over the range into the collector.
    pub async fn merge_queries_into(
        &self,
        query: &TransactionQuery,
        collector: &mut QueryCollector,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let rows: Vec<AggregateRowData<QueryRow>> = self.scan(query, AggregateKind::Query, now_millis)?;
        for data in rows {
            collector.add_row(&data.row);
        }
        Ok(())
    }

    /// Merge service call rollups over the range into the collector.
    pub async fn merge_service_calls_into(
        &self,
        query: &TransactionQuery,
        collector: &mut ServiceCallCollector,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let rows: Vec<AggregateRowData<ServiceCallRow>> =
            self.scan(query, AggregateKind::ServiceCall, now_millis)?;
        for data in rows {
            collector.add_row(&data.row);
        }
        Ok(())
    }

    /// Merge main-thread profiles over the range into the profile.
    pub async fn merge_main_thread_profile_into(
        &self,
        query: &TransactionQuery,
        profile: &mut Profile,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let rows: Vec<AggregateRowData<ProfileRow>> =
            self.scan(query, AggregateKind::MainThreadProfile, now_millis)?;
        for data in rows {
            profile.merge_from(&data.row.profile);
        }
        Ok(())
    }

    /// Merge aux-thread profiles over the range into the profile.
    pub async fn merge_aux_thread_profile_into(
        &self,
        query: &TransactionQuery,
        profile: &mut Profile,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let rows: Vec<AggregateRowData<ProfileRow>> =
            self.scan(query, AggregateKind::AuxThreadProfile, now_millis)?;
        for data in rows {
            profile.merge_from(&data.row.profile);
        }
        Ok(())
    }

    /// Whether any main-thread profile exists in the range. First-row probe.
    pub async fn has_main_thread_profile(
        &self,
        query: &TransactionQuery,
        now_millis: i64,
    ) -> Result<bool, AggregateError> {
        self.probe(query, AggregateKind::MainThreadProfile, now_millis)
    }

    /// Whether any aux-thread profile exists in the range.
    pub async fn has_aux_thread_profile(
        &self,
        query: &TransactionQuery,
        now_millis: i64,
    ) -> Result<bool, AggregateError> {
        self.probe(query, AggregateKind::AuxThreadProfile, now_millis)
    }

    fn scan<T: serde::de::DeserializeOwned>(
        &self,
        query: &TransactionQuery,
        kind: AggregateKind,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<T>>, AggregateError> {
        let from_inclusive = table_spec(kind).from_inclusive;
        let rows = match &query.transaction_name {
            Some(name) => self.storage.scan_transaction::<T>(
                kind,
                query.rollup_level,
                &query.agent_rollup,
                &query.transaction_type,
                name,
                query.from,
                query.to,
                from_inclusive,
                now_millis,
            )?,
            None => self.storage.scan_overall::<T>(
                kind,
                query.rollup_level,
                &query.agent_rollup,
                &query.transaction_type,
                query.from,
                query.to,
                from_inclusive,
                now_millis,
            )?,
        };
        Ok(rows)
    }

    fn scan_names<T: serde::de::DeserializeOwned>(
        &self,
        query: &TransactionQuery,
        kind: AggregateKind,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<T>>, AggregateError> {
        let from_inclusive = table_spec(kind).from_inclusive;
        Ok(self.storage.scan_all_transactions::<T>(
            kind,
            query.rollup_level,
            &query.agent_rollup,
            &query.transaction_type,
            query.from,
            query.to,
            from_inclusive,
            now_millis,
        )?)
    }

    fn probe(
        &self,
        query: &TransactionQuery,
        kind: AggregateKind,
        now_millis: i64,
    ) -> Result<bool, AggregateError> {
        let from_inclusive = table_spec(kind).from_inclusive;
        let found = match &query.transaction_name {
            Some(name) => self.storage.has_transaction_rows(
                kind,
                query.rollup_level,
                &query.agent_rollup,
                &query.transaction_type,
                name,
                query.from,
                query.to,
                from_inclusive,
                now_millis,
            )?,
            None => self.storage.has_overall_rows(
                kind,
                query.rollup_level,
                &query.agent_rollup,
                &query.transaction_type,
                query.from,
                query.to,
                from_inclusive,
                now_millis,
            )?,
        };
        Ok(found)
    }
}
