//! Writer: fans one agent's submitted aggregates out to every level-0 table
//! and seeds the rollup work queue.
//!
//! Write ordering within one `store` call is strict: side-table query texts
//! first, then all aggregate rows, then the work-queue enqueues. An
//! acknowledged call means all of it is durable; a failed call is retried
//! wholesale by the agent, which is safe because rollups are commutative and
//! queue rows are ULID-unique (duplicates cost extra work, not wrong
//! answers).

use std::sync::Arc;

use tracing::debug;

use central_storage::{ttl, AggregatePut, AgentRollupRecord, Storage};
use central_types::{
    ceil_capture_time, Aggregate, AggregateKind, AggregatesByType, ErrorSummaryRow, HistogramRow,
    OverviewRow, ProfileRow, QueryRow, RollupConfig, ServiceCallRow, SharedQueryText, SummaryRow,
    ThroughputRow,
};

use crate::error::AggregateError;
use crate::hierarchy::rollup_chain;
use crate::query_text::{clustering_suffix, QueryTextClient, ResolvedQueryText};

/// Accepts `(agent_id, capture_time, aggregates_by_type)` submissions and
/// persists them at rollup level 0.
pub struct AggregateWriter {
    storage: Arc<Storage>,
    rollup_config: RollupConfig,
    query_texts: QueryTextClient,
}

impl AggregateWriter {
    pub fn new(
        storage: Arc<Storage>,
        rollup_config: RollupConfig,
        query_text_truncate: usize,
    ) -> Self {
        let text_ttl = rollup_config
            .levels()
            .last()
            .map(|l| l.retention_seconds)
            .unwrap_or(0);
        let query_texts = QueryTextClient::new(storage.clone(), query_text_truncate, text_ttl);
        Self {
            storage,
            rollup_config,
            query_texts,
        }
    }

    /// Store one capture tick worth of aggregates for an agent.
    pub async fn store(
        &self,
        agent_id: &str,
        capture_time: i64,
        aggregates: &[AggregatesByType],
        shared_query_texts: &[SharedQueryText],
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let chain = rollup_chain(agent_id);
        let level0 = self.rollup_config.level(0);
        let data_ttl = ttl::data_ttl_seconds(level0.retention_seconds, capture_time, now_millis);

        self.upsert_registry(agent_id, &chain, capture_time, data_ttl, now_millis)?;

        // Side-table writes must complete before any aggregate row that
        // references a sha1 is written.
        let resolved = self.query_texts.resolve(shared_query_texts, now_millis)?;

        let mut puts = Vec::new();
        for by_type in aggregates {
            self.collect_puts(
                &mut puts,
                agent_id,
                &by_type.transaction_type,
                None,
                &by_type.overall,
                &resolved,
                capture_time,
                data_ttl,
            )?;
            for transaction in &by_type.transactions {
                self.collect_puts(
                    &mut puts,
                    agent_id,
                    &by_type.transaction_type,
                    Some(transaction.transaction_name.clone()),
                    &transaction.aggregate,
                    &resolved,
                    capture_time,
                    data_ttl,
                )?;
            }
        }
        self.storage.write_aggregates(&puts, now_millis)?;

        // Work-queue enqueues only after every aggregate write above has
        // been acknowledged.
        let transaction_types: Vec<String> = aggregates
            .iter()
            .map(|a| a.transaction_type.clone())
            .collect();
        let queue_ttl = ttl::queue_ttl_seconds(
            data_ttl,
            self.rollup_config.max_rollup_interval_millis(),
        );
        let level1_capture = ceil_capture_time(capture_time, self.rollup_config.level(1).interval_millis);
        self.storage.enqueue_needs_rollup(
            1,
            agent_id,
            level1_capture,
            transaction_types.clone(),
            queue_ttl,
            now_millis,
        )?;

        if let Some(parent) = chain.first() {
            self.storage.enqueue_from_child(
                parent,
                capture_time,
                agent_id,
                transaction_types,
                queue_ttl,
                now_millis,
            )?;
        }

        debug!(
            agent_id,
            capture_time,
            rows = puts.len(),
            "Stored level-0 aggregates"
        );
        Ok(())
    }

    fn upsert_registry(
        &self,
        agent_id: &str,
        chain: &[String],
        capture_time: i64,
        ttl_seconds: i64,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        self.storage.upsert_agent_rollup(
            AgentRollupRecord {
                id: agent_id.to_string(),
                parent: chain.first().cloned(),
                is_leaf: true,
                last_capture_time: capture_time,
            },
            ttl_seconds,
            now_millis,
        )?;
        for (i, ancestor) in chain.iter().enumerate() {
            self.storage.upsert_agent_rollup(
                AgentRollupRecord {
                    id: ancestor.clone(),
                    parent: chain.get(i + 1).cloned(),
                    is_leaf: false,
                    last_capture_time: capture_time,
                },
                ttl_seconds,
                now_millis,
            )?;
        }
        Ok(())
    }

    /// One aggregate's fan-out: summary always; error summary iff errors;
    /// overview, histogram, throughput always; query/service-call rows one
    /// per entry; profile rows iff present.
    #[allow(clippy::too_many_arguments)]
    fn collect_puts(
        &self,
        puts: &mut Vec<AggregatePut>,
        agent_rollup: &str,
        transaction_type: &str,
        transaction_name: Option<String>,
        aggregate: &Aggregate,
        resolved_texts: &[ResolvedQueryText],
        capture_time: i64,
        ttl_seconds: i64,
    ) -> Result<(), AggregateError> {
        puts.push(AggregatePut::new(
            AggregateKind::Summary,
            0,
            agent_rollup,
            transaction_type,
            transaction_name.clone(),
            capture_time,
            "",
            &SummaryRow {
                total_duration_nanos: aggregate.total_duration_nanos,
                transaction_count: aggregate.transaction_count,
            },
            ttl_seconds,
        )?);

        if aggregate.error_count > 0 {
            puts.push(AggregatePut::new(
                AggregateKind::ErrorSummary,
                0,
                agent_rollup,
                transaction_type,
                transaction_name.clone(),
                capture_time,
                "",
                &ErrorSummaryRow {
                    error_count: aggregate.error_count,
                    transaction_count: aggregate.transaction_count,
                },
                ttl_seconds,
            )?);
        }

        puts.push(AggregatePut::new(
            AggregateKind::Overview,
            0,
            agent_rollup,
            transaction_type,
            transaction_name.clone(),
            capture_time,
            "",
            &OverviewRow {
                total_duration_nanos: aggregate.total_duration_nanos,
                transaction_count: aggregate.transaction_count,
                async_transactions: aggregate.async_transactions,
                main_thread_root_timers: aggregate.main_thread_root_timers.clone(),
                aux_thread_root_timers: aggregate.aux_thread_root_timers.clone(),
                async_timers: aggregate.async_timers.clone(),
                main_thread_stats: aggregate.main_thread_stats,
                aux_thread_stats: aggregate.aux_thread_stats,
            },
            ttl_seconds,
        )?);

        puts.push(AggregatePut::new(
            AggregateKind::Histogram,
            0,
            agent_rollup,
            transaction_type,
            transaction_name.clone(),
            capture_time,
            "",
            &HistogramRow {
                total_duration_nanos: aggregate.total_duration_nanos,
                transaction_count: aggregate.transaction_count,
                duration_nanos_histogram: aggregate.duration_nanos_histogram.clone(),
            },
            ttl_seconds,
        )?);

        puts.push(AggregatePut::new(
            AggregateKind::Throughput,
            0,
            agent_rollup,
            transaction_type,
            transaction_name.clone(),
            capture_time,
            "",
            &ThroughputRow {
                transaction_count: aggregate.transaction_count,
            },
            ttl_seconds,
        )?);

        for query in &aggregate.queries {
            let resolved = resolved_texts
                .get(query.shared_query_text_index)
                .ok_or_else(|| {
                    AggregateError::InvalidAggregate(format!(
                        "shared query text index {} out of bounds ({} texts)",
                        query.shared_query_text_index,
                        resolved_texts.len()
                    ))
                })?;
            let suffix = clustering_suffix(&[
                &query.query_type,
                &resolved.truncated_text,
                &resolved.full_text_sha1,
            ]);
            puts.push(AggregatePut::new(
                AggregateKind::Query,
                0,
                agent_rollup,
                transaction_type,
                transaction_name.clone(),
                capture_time,
                suffix,
                &QueryRow {
                    query_type: query.query_type.clone(),
                    truncated_query_text: resolved.truncated_text.clone(),
                    full_query_text_sha1: resolved.full_text_sha1.clone(),
                    total_duration_nanos: query.total_duration_nanos,
                    execution_count: query.execution_count,
                    total_rows: query.total_rows,
                },
                ttl_seconds,
            )?);
        }

        for call in &aggregate.service_calls {
            let suffix = clustering_suffix(&[&call.service_call_type, &call.service_call_text]);
            puts.push(AggregatePut::new(
                AggregateKind::ServiceCall,
                0,
                agent_rollup,
                transaction_type,
                transaction_name.clone(),
                capture_time,
                suffix,
                &ServiceCallRow {
                    service_call_type: call.service_call_type.clone(),
                    service_call_text: call.service_call_text.clone(),
                    total_duration_nanos: call.total_duration_nanos,
                    execution_count: call.execution_count,
                },
                ttl_seconds,
            )?);
        }

        if let Some(profile) = &aggregate.main_thread_profile {
            puts.push(AggregatePut::new(
                AggregateKind::MainThreadProfile,
                0,
                agent_rollup,
                transaction_type,
                transaction_name.clone(),
                capture_time,
                "",
                &ProfileRow {
                    profile: profile.clone(),
                },
                ttl_seconds,
            )?);
        }

        if let Some(profile) = &aggregate.aux_thread_profile {
            puts.push(AggregatePut::new(
                AggregateKind::AuxThreadProfile,
                0,
                agent_rollup,
                transaction_type,
                transaction_name,
                capture_time,
                "",
                &ProfileRow {
                    profile: profile.clone(),
                },
                ttl_seconds,
            )?);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use central_storage::AggregateRowData;
    use central_types::{QueryAggregate, TransactionAggregate};
    use tempfile::TempDir;

    fn create_writer() -> (AggregateWriter, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path(), 4).unwrap());
        let writer = AggregateWriter::new(storage.clone(), RollupConfig::default(), 120);
        (writer, storage, temp_dir)
    }

    fn simple_aggregate(duration: f64, count: i64) -> Aggregate {
        Aggregate {
            total_duration_nanos: duration,
            transaction_count: count,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_store_writes_all_always_tables() {
        let (writer, storage, _temp) = create_writer();
        let aggregates = vec![AggregatesByType {
            transaction_type: "Web".to_string(),
            overall: simple_aggregate(100.0, 1),
            transactions: vec![TransactionAggregate {
                transaction_name: "/home".to_string(),
                aggregate: simple_aggregate(100.0, 1),
            }],
        }];
        writer
            .store("web-1", 60_000, &aggregates, &[], 61_000)
            .await
            .unwrap();

        for kind in [
            AggregateKind::Summary,
            AggregateKind::Overview,
            AggregateKind::Histogram,
            AggregateKind::Throughput,
        ] {
            assert!(
                storage
                    .has_overall_rows(kind, 0, "web-1", "Web", 0, 120_000, true, 61_000)
                    .unwrap(),
                "missing overall rows for {:?}",
                kind
            );
            assert!(
                storage
                    .has_transaction_rows(kind, 0, "web-1", "Web", "/home", 0, 120_000, true, 61_000)
                    .unwrap(),
                "missing transaction rows for {:?}",
                kind
            );
        }
    }

    #[tokio::test]
    async fn test_error_summary_only_with_errors() {
        let (writer, storage, _temp) = create_writer();
        let mut with_errors = simple_aggregate(100.0, 2);
        with_errors.error_count = 1;
        let aggregates = vec![
            AggregatesByType {
                transaction_type: "Web".to_string(),
                overall: simple_aggregate(100.0, 1),
                transactions: vec![],
            },
            AggregatesByType {
                transaction_type: "Background".to_string(),
                overall: with_errors,
                transactions: vec![],
            },
        ];
        writer
            .store("web-1", 60_000, &aggregates, &[], 61_000)
            .await
            .unwrap();

        assert!(!storage
            .has_overall_rows(AggregateKind::ErrorSummary, 0, "web-1", "Web", 0, 120_000, true, 61_000)
            .unwrap());
        let rows: Vec<AggregateRowData<ErrorSummaryRow>> = storage
            .scan_overall(
                AggregateKind::ErrorSummary,
                0,
                "web-1",
                "Background",
                0,
                120_000,
                true,
                61_000,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.error_count, 1);
    }

    #[tokio::test]
    async fn test_store_enqueues_level1_and_from_child() {
        let (writer, storage, _temp) = create_writer();
        let aggregates = vec![AggregatesByType {
            transaction_type: "Web".to_string(),
            overall: simple_aggregate(100.0, 1),
            transactions: vec![],
        }];
        writer
            .store("group::web-1", 60_000, &aggregates, &[], 61_000)
            .await
            .unwrap();

        let queue = storage.scan_needs_rollup(1, "group::web-1", 61_000).unwrap();
        assert_eq!(queue.len(), 1);
        // rounded up to the level-1 bucket end
        assert_eq!(queue[0].capture_time, 300_000);
        assert_eq!(queue[0].transaction_types, vec!["Web".to_string()]);

        let from_child = storage.scan_from_child("group", 61_000).unwrap();
        assert_eq!(from_child.len(), 1);
        assert_eq!(from_child[0].capture_time, 60_000);
        assert_eq!(from_child[0].child_agent_rollup, "group::web-1");

        // registry knows both the agent and the group
        let records = storage.list_agent_rollups(61_000).unwrap();
        let agent = records.iter().find(|r| r.id == "group::web-1").unwrap();
        let group = records.iter().find(|r| r.id == "group").unwrap();
        assert!(agent.is_leaf);
        assert_eq!(agent.parent.as_deref(), Some("group"));
        assert!(!group.is_leaf);
    }

    #[tokio::test]
    async fn test_no_from_child_for_top_level_agent() {
        let (writer, storage, _temp) = create_writer();
        let aggregates = vec![AggregatesByType {
            transaction_type: "Web".to_string(),
            overall: simple_aggregate(100.0, 1),
            transactions: vec![],
        }];
        writer
            .store("web-1", 60_000, &aggregates, &[], 61_000)
            .await
            .unwrap();
        assert!(storage.scan_from_child("web-1", 61_000).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_long_query_text_stored_by_sha1() {
        let (writer, storage, _temp) = create_writer();
        let long_text = "SELECT columns FROM a_table ".repeat(10);
        let mut aggregate = simple_aggregate(100.0, 1);
        aggregate.queries = vec![QueryAggregate {
            query_type: "SQL".to_string(),
            shared_query_text_index: 0,
            total_duration_nanos: 50.0,
            execution_count: 2,
            total_rows: Some(10),
        }];
        let aggregates = vec![AggregatesByType {
            transaction_type: "Web".to_string(),
            overall: aggregate,
            transactions: vec![],
        }];
        writer
            .store(
                "web-1",
                60_000,
                &aggregates,
                &[SharedQueryText::full(long_text.clone())],
                61_000,
            )
            .await
            .unwrap();

        let rows: Vec<AggregateRowData<QueryRow>> = storage
            .scan_overall(AggregateKind::Query, 0, "web-1", "Web", 0, 120_000, true, 61_000)
            .unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0].row;
        assert!(!row.full_query_text_sha1.is_empty());
        assert_eq!(row.truncated_query_text.chars().count(), 120);
        // the sha1 resolves in the side table
        assert_eq!(
            storage
                .get_query_text(&row.full_query_text_sha1, 61_000)
                .unwrap(),
            Some(long_text)
        );
    }

    #[tokio::test]
    async fn test_bad_query_text_index_is_fatal() {
        let (writer, _storage, _temp) = create_writer();
        let mut aggregate = simple_aggregate(100.0, 1);
        aggregate.queries = vec![QueryAggregate {
            query_type: "SQL".to_string(),
            shared_query_text_index: 3,
            total_duration_nanos: 50.0,
            execution_count: 1,
            total_rows: None,
        }];
        let aggregates = vec![AggregatesByType {
            transaction_type: "Web".to_string(),
            overall: aggregate,
            transactions: vec![],
        }];
        let result = writer.store("web-1", 60_000, &aggregates, &[], 61_000).await;
        assert!(matches!(result, Err(AggregateError::InvalidAggregate(_))));
    }
}
