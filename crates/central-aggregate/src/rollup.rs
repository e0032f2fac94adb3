//! Rollup engine: drains the work queue for one agent-rollup, reduces
//! source rows into coarser buckets, and re-enqueues at the next level.
//!
//! Two phases per run, in order:
//! 1. From-children (non-leaf nodes only): build this node's level-0 rows
//!    out of its children's level-0 rows, one capture-time bucket at a time.
//! 2. Level-ascending: for each level >= 1, reduce the previous level's rows
//!    across one bucket interval.
//!
//! Ordering discipline per bucket: reduction writes, then the next-level
//! enqueue, then the current-level delete. Dying between the last two steps
//! only re-runs an idempotent rollup. A queue row is never deleted before
//! the writes it triggered are acknowledged.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use central_storage::{ttl, AggregatePut, Storage};
use central_types::{
    ceil_capture_time, AggregateKind, ErrorSummaryRow, HistogramRow, OverviewRow, ProfileRow,
    QueryRow, RollupConfig, ServiceCallRow, SummaryRow, ThroughputRow,
};

use crate::error::AggregateError;
use crate::merge::{
    reduce_error_summaries, reduce_histograms, reduce_overviews, reduce_profiles,
    reduce_summaries, reduce_throughputs, QueryCollector, ServiceCallCollector,
};
use crate::query_text::clustering_suffix;

/// Where a bucket's source rows come from.
enum Source<'a> {
    /// The children's level-0 rows at one exact capture time
    Children {
        children: &'a BTreeSet<String>,
        capture_time: i64,
    },
    /// This node's own rows at the previous level, over `(from, to]`
    Level { level: usize, from: i64, to: i64 },
}

struct Bucket {
    keys: Vec<Vec<u8>>,
    transaction_types: BTreeSet<String>,
    children: BTreeSet<String>,
}

/// Rolls one agent-rollup's aggregates up the level ladder and (for group
/// nodes) up from its children.
pub struct RollupService {
    storage: Arc<Storage>,
    config: RollupConfig,
    max_query_aggregates: usize,
    max_service_call_aggregates: usize,
}

impl RollupService {
    pub fn new(
        storage: Arc<Storage>,
        config: RollupConfig,
        max_query_aggregates: usize,
        max_service_call_aggregates: usize,
    ) -> Self {
        Self {
            storage,
            config,
            max_query_aggregates,
            max_service_call_aggregates,
        }
    }

    /// Run both phases for one agent-rollup. Returns the number of buckets
    /// processed. Cancellation is honored between buckets; undrained queue
    /// rows stay put and the next run resumes them.
    pub async fn rollup(
        &self,
        agent_rollup_id: &str,
        parent_agent_rollup_id: Option<&str>,
        is_leaf: bool,
        cancel: &CancellationToken,
        now_millis: i64,
    ) -> Result<usize, AggregateError> {
        let mut processed = 0;

        if !is_leaf {
            processed += self.rollup_from_children(
                agent_rollup_id,
                parent_agent_rollup_id,
                cancel,
                now_millis,
            )?;
        }

        for level in 1..self.config.level_count() {
            if cancel.is_cancelled() {
                info!(agent_rollup = %agent_rollup_id, "Rollup cancelled");
                break;
            }
            processed += self.rollup_level(agent_rollup_id, level, cancel, now_millis)?;
        }

        Ok(processed)
    }

    // ==================== From-children phase ====================

    fn rollup_from_children(
        &self,
        agent_rollup_id: &str,
        parent_agent_rollup_id: Option<&str>,
        cancel: &CancellationToken,
        now_millis: i64,
    ) -> Result<usize, AggregateError> {
        let entries = self.storage.scan_from_child(agent_rollup_id, now_millis)?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
        for entry in entries {
            let bucket = buckets.entry(entry.capture_time).or_insert_with(|| Bucket {
                keys: Vec::new(),
                transaction_types: BTreeSet::new(),
                children: BTreeSet::new(),
            });
            bucket.keys.push(entry.key);
            bucket.transaction_types.extend(entry.transaction_types);
            bucket.children.insert(entry.child_agent_rollup);
        }
        self.retain_open_bucket(&mut buckets, self.config.level(0).interval_millis, now_millis);

        let mut processed = 0;
        for (capture_time, bucket) in buckets {
            if cancel.is_cancelled() {
                info!(agent_rollup = %agent_rollup_id, "Child rollup cancelled");
                break;
            }
            self.rollup_one_from_children(
                agent_rollup_id,
                parent_agent_rollup_id,
                capture_time,
                &bucket,
                now_millis,
            )?;
            processed += 1;
        }
        Ok(processed)
    }

    fn rollup_one_from_children(
        &self,
        agent_rollup_id: &str,
        parent_agent_rollup_id: Option<&str>,
        capture_time: i64,
        bucket: &Bucket,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let level0 = self.config.level(0);
        let data_ttl = ttl::data_ttl_seconds(level0.retention_seconds, capture_time, now_millis);
        let source = Source::Children {
            children: &bucket.children,
            capture_time,
        };

        let mut puts = Vec::new();
        for transaction_type in &bucket.transaction_types {
            self.reduce_all_kinds(
                &mut puts,
                &source,
                agent_rollup_id,
                transaction_type,
                0,
                capture_time,
                data_ttl,
                now_millis,
            )?;
        }

        if puts.is_empty() {
            warn!(
                agent_rollup = %agent_rollup_id,
                capture_time,
                children = bucket.children.len(),
                "No source rows for child rollup"
            );
        } else {
            self.storage.write_aggregates(&puts, now_millis)?;

            let types: Vec<String> = bucket.transaction_types.iter().cloned().collect();
            let queue_ttl =
                ttl::queue_ttl_seconds(data_ttl, self.config.max_rollup_interval_millis());
            if let Some(parent) = parent_agent_rollup_id {
                self.storage.enqueue_from_child(
                    parent,
                    capture_time,
                    agent_rollup_id,
                    types.clone(),
                    queue_ttl,
                    now_millis,
                )?;
            }
            let level1_capture =
                ceil_capture_time(capture_time, self.config.level(1).interval_millis);
            self.storage.enqueue_needs_rollup(
                1,
                agent_rollup_id,
                level1_capture,
                types,
                queue_ttl,
                now_millis,
            )?;
            debug!(
                agent_rollup = %agent_rollup_id,
                capture_time,
                rows = puts.len(),
                "Rolled up from children"
            );
        }

        self.storage.delete_queue_entries(&bucket.keys)?;
        Ok(())
    }

    // ==================== Level-ascending phase ====================

    fn rollup_level(
        &self,
        agent_rollup_id: &str,
        level: usize,
        cancel: &CancellationToken,
        now_millis: i64,
    ) -> Result<usize, AggregateError> {
        let entries = self.storage.scan_needs_rollup(level, agent_rollup_id, now_millis)?;
        if entries.is_empty() {
            return Ok(0);
        }

        let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
        for entry in entries {
            let bucket = buckets.entry(entry.capture_time).or_insert_with(|| Bucket {
                keys: Vec::new(),
                transaction_types: BTreeSet::new(),
                children: BTreeSet::new(),
            });
            bucket.keys.push(entry.key);
            bucket.transaction_types.extend(entry.transaction_types);
        }
        let interval = self.config.level(level).interval_millis;
        self.retain_open_bucket(&mut buckets, interval, now_millis);

        let mut processed = 0;
        for (capture_time, bucket) in buckets {
            if cancel.is_cancelled() {
                info!(agent_rollup = %agent_rollup_id, level, "Level rollup cancelled");
                break;
            }
            self.rollup_one_bucket(agent_rollup_id, level, capture_time, &bucket, now_millis)?;
            processed += 1;
        }
        Ok(processed)
    }

    fn rollup_one_bucket(
        &self,
        agent_rollup_id: &str,
        level: usize,
        capture_time: i64,
        bucket: &Bucket,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let interval = self.config.level(level).interval_millis;
        let retention = self.config.level(level).retention_seconds;
        let data_ttl = ttl::data_ttl_seconds(retention, capture_time, now_millis);
        // Exclusive lower bound: the row at exactly `capture_time - interval`
        // belongs to the previous bucket.
        let source = Source::Level {
            level: level - 1,
            from: capture_time - interval,
            to: capture_time,
        };

        let mut puts = Vec::new();
        for transaction_type in &bucket.transaction_types {
            self.reduce_all_kinds(
                &mut puts,
                &source,
                agent_rollup_id,
                transaction_type,
                level,
                capture_time,
                data_ttl,
                now_millis,
            )?;
        }

        if puts.is_empty() {
            // Happens for queue rows that outlived their source data, e.g.
            // after a retention change.
            warn!(
                agent_rollup = %agent_rollup_id,
                level,
                capture_time,
                "No source rows for rollup"
            );
        } else {
            self.storage.write_aggregates(&puts, now_millis)?;

            if level + 1 < self.config.level_count() {
                let types: Vec<String> = bucket.transaction_types.iter().cloned().collect();
                let queue_ttl =
                    ttl::queue_ttl_seconds(data_ttl, self.config.max_rollup_interval_millis());
                let next_capture =
                    ceil_capture_time(capture_time, self.config.level(level + 1).interval_millis);
                self.storage.enqueue_needs_rollup(
                    level + 1,
                    agent_rollup_id,
                    next_capture,
                    types,
                    queue_ttl,
                    now_millis,
                )?;
            }
            debug!(
                agent_rollup = %agent_rollup_id,
                level,
                capture_time,
                rows = puts.len(),
                "Rolled up bucket"
            );
        }

        self.storage.delete_queue_entries(&bucket.keys)?;
        Ok(())
    }

    /// The last-bucket rule: the most recent bucket is retained (left on the
    /// queue) while wall clock is still inside its rollup interval, because
    /// data may still be arriving for it.
    fn retain_open_bucket(
        &self,
        buckets: &mut BTreeMap<i64, Bucket>,
        interval_millis: i64,
        now_millis: i64,
    ) {
        if let Some((&last_capture, _)) = buckets.iter().next_back() {
            if last_capture > now_millis - interval_millis {
                buckets.remove(&last_capture);
            }
        }
    }

    // ==================== Per-kind reduction ====================

    #[allow(clippy::too_many_arguments)]
    fn reduce_all_kinds(
        &self,
        puts: &mut Vec<AggregatePut>,
        source: &Source<'_>,
        agent_rollup_id: &str,
        transaction_type: &str,
        target_level: usize,
        capture_time: i64,
        ttl_seconds: i64,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        self.reduce_uniform::<SummaryRow>(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            AggregateKind::Summary,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
            |rows| reduce_summaries(rows.iter()),
        )?;
        self.reduce_uniform::<ErrorSummaryRow>(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            AggregateKind::ErrorSummary,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
            |rows| reduce_error_summaries(rows.iter()),
        )?;
        self.reduce_uniform::<OverviewRow>(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            AggregateKind::Overview,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
            |rows| reduce_overviews(rows.iter()),
        )?;
        self.reduce_uniform::<HistogramRow>(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            AggregateKind::Histogram,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
            |rows| reduce_histograms(rows.iter()),
        )?;
        self.reduce_uniform::<ThroughputRow>(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            AggregateKind::Throughput,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
            |rows| reduce_throughputs(rows.iter()),
        )?;
        self.reduce_uniform::<ProfileRow>(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            AggregateKind::MainThreadProfile,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
            |rows| reduce_profiles(rows.iter()),
        )?;
        self.reduce_uniform::<ProfileRow>(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            AggregateKind::AuxThreadProfile,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
            |rows| reduce_profiles(rows.iter()),
        )?;
        self.reduce_queries(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
        )?;
        self.reduce_service_calls(
            puts,
            source,
            agent_rollup_id,
            transaction_type,
            target_level,
            capture_time,
            ttl_seconds,
            now_millis,
        )?;
        Ok(())
    }

    /// Reduction for the kinds that merge N rows into exactly one row:
    /// the overall rows collapse to one put, the per-transaction rows
    /// collapse to one put per name.
    #[allow(clippy::too_many_arguments)]
    fn reduce_uniform<T>(
        &self,
        puts: &mut Vec<AggregatePut>,
        source: &Source<'_>,
        agent_rollup_id: &str,
        transaction_type: &str,
        kind: AggregateKind,
        target_level: usize,
        capture_time: i64,
        ttl_seconds: i64,
        now_millis: i64,
        reduce: impl Fn(&[T]) -> T,
    ) -> Result<(), AggregateError>
    where
        T: Serialize + DeserializeOwned,
    {
        let overall = self.collect_overall::<T>(source, agent_rollup_id, kind, transaction_type, now_millis)?;
        if !overall.is_empty() {
            puts.push(AggregatePut::new(
                kind,
                target_level,
                agent_rollup_id,
                transaction_type,
                None,
                capture_time,
                "",
                &reduce(&overall),
                ttl_seconds,
            )?);
        }

        let mut by_name: BTreeMap<String, Vec<T>> = BTreeMap::new();
        for (name, row) in
            self.collect_transactions::<T>(source, agent_rollup_id, kind, transaction_type, now_millis)?
        {
            by_name.entry(name).or_default().push(row);
        }
        for (name, rows) in by_name {
            puts.push(AggregatePut::new(
                kind,
                target_level,
                agent_rollup_id,
                transaction_type,
                Some(name),
                capture_time,
                "",
                &reduce(&rows),
                ttl_seconds,
            )?);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn reduce_queries(
        &self,
        puts: &mut Vec<AggregatePut>,
        source: &Source<'_>,
        agent_rollup_id: &str,
        transaction_type: &str,
        target_level: usize,
        capture_time: i64,
        ttl_seconds: i64,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let overall = self.collect_overall::<QueryRow>(
            source,
            agent_rollup_id,
            AggregateKind::Query,
            transaction_type,
            now_millis,
        )?;
        if !overall.is_empty() {
            let mut collector = QueryCollector::new(self.max_query_aggregates);
            for row in &overall {
                collector.add_row(row);
            }
            for row in collector.into_rows() {
                self.push_query_put(
                    puts,
                    agent_rollup_id,
                    transaction_type,
                    None,
                    target_level,
                    capture_time,
                    ttl_seconds,
                    row,
                )?;
            }
        }

        let mut by_name: BTreeMap<String, QueryCollector> = BTreeMap::new();
        for (name, row) in self.collect_transactions::<QueryRow>(
            source,
            agent_rollup_id,
            AggregateKind::Query,
            transaction_type,
            now_millis,
        )? {
            by_name
                .entry(name)
                .or_insert_with(|| QueryCollector::new(self.max_query_aggregates))
                .add_row(&row);
        }
        for (name, collector) in by_name {
            for row in collector.into_rows() {
                self.push_query_put(
                    puts,
                    agent_rollup_id,
                    transaction_type,
                    Some(name.clone()),
                    target_level,
                    capture_time,
                    ttl_seconds,
                    row,
                )?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn push_query_put(
        &self,
        puts: &mut Vec<AggregatePut>,
        agent_rollup_id: &str,
        transaction_type: &str,
        transaction_name: Option<String>,
        target_level: usize,
        capture_time: i64,
        ttl_seconds: i64,
        row: QueryRow,
    ) -> Result<(), AggregateError> {
        let suffix = clustering_suffix(&[
            &row.query_type,
            &row.truncated_query_text,
            &row.full_query_text_sha1,
        ]);
        puts.push(AggregatePut::new(
            AggregateKind::Query,
            target_level,
            agent_rollup_id,
            transaction_type,
            transaction_name,
            capture_time,
            suffix,
            &row,
            ttl_seconds,
        )?);
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn reduce_service_calls(
        &self,
        puts: &mut Vec<AggregatePut>,
        source: &Source<'_>,
        agent_rollup_id: &str,
        transaction_type: &str,
        target_level: usize,
        capture_time: i64,
        ttl_seconds: i64,
        now_millis: i64,
    ) -> Result<(), AggregateError> {
        let overall = self.collect_overall::<ServiceCallRow>(
            source,
            agent_rollup_id,
            AggregateKind::ServiceCall,
            transaction_type,
            now_millis,
        )?;
        if !overall.is_empty() {
            let mut collector = ServiceCallCollector::new(self.max_service_call_aggregates);
            for row in &overall {
                collector.add_row(row);
            }
            for row in collector.into_rows() {
                self.push_service_call_put(
                    puts,
                    agent_rollup_id,
                    transaction_type,
                    None,
                    target_level,
                    capture_time,
                    ttl_seconds,
                    row,
                )?;
            }
        }

        let mut by_name: BTreeMap<String, ServiceCallCollector> = BTreeMap::new();
        for (name, row) in self.collect_transactions::<ServiceCallRow>(
            source,
            agent_rollup_id,
            AggregateKind::ServiceCall,
            transaction_type,
            now_millis,
        )? {
            by_name
                .entry(name)
                .or_insert_with(|| ServiceCallCollector::new(self.max_service_call_aggregates))
                .add_row(&row);
        }
        for (name, collector) in by_name {
            for row in collector.into_rows() {
                self.push_service_call_put(
                    puts,
                    agent_rollup_id,
                    transaction_type,
                    Some(name.clone()),
                    target_level,
                    capture_time,
                    ttl_seconds,
                    row,
                )?;
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn push_service_call_put(
        &self,
        puts: &mut Vec<AggregatePut>,
        agent_rollup_id: &str,
        transaction_type: &str,
        transaction_name: Option<String>,
        target_level: usize,
        capture_time: i64,
        ttl_seconds: i64,
        row: ServiceCallRow,
    ) -> Result<(), AggregateError> {
        let suffix = clustering_suffix(&[&row.service_call_type, &row.service_call_text]);
        puts.push(AggregatePut::new(
            AggregateKind::ServiceCall,
            target_level,
            agent_rollup_id,
            transaction_type,
            transaction_name,
            capture_time,
            suffix,
            &row,
            ttl_seconds,
        )?);
        Ok(())
    }

    fn collect_overall<T: DeserializeOwned>(
        &self,
        source: &Source<'_>,
        agent_rollup_id: &str,
        kind: AggregateKind,
        transaction_type: &str,
        now_millis: i64,
    ) -> Result<Vec<T>, AggregateError> {
        let mut rows = Vec::new();
        match source {
            Source::Children {
                children,
                capture_time,
            } => {
                for child in children.iter() {
                    for data in self.storage.scan_overall::<T>(
                        kind,
                        0,
                        child,
                        transaction_type,
                        *capture_time,
                        *capture_time,
                        true,
                        now_millis,
                    )? {
                        rows.push(data.row);
                    }
                }
            }
            Source::Level { level, from, to } => {
                for data in self.storage.scan_overall::<T>(
                    kind,
                    *level,
                    agent_rollup_id,
                    transaction_type,
                    *from,
                    *to,
                    false,
                    now_millis,
                )? {
                    rows.push(data.row);
                }
            }
        }
        Ok(rows)
    }

    fn collect_transactions<T: DeserializeOwned>(
        &self,
        source: &Source<'_>,
        agent_rollup_id: &str,
        kind: AggregateKind,
        transaction_type: &str,
        now_millis: i64,
    ) -> Result<Vec<(String, T)>, AggregateError> {
        let mut rows = Vec::new();
        match source {
            Source::Children {
                children,
                capture_time,
            } => {
                for child in children.iter() {
                    for data in self.storage.scan_all_transactions::<T>(
                        kind,
                        0,
                        child,
                        transaction_type,
                        *capture_time,
                        *capture_time,
                        true,
                        now_millis,
                    )? {
                        if let Some(name) = data.transaction_name {
                            rows.push((name, data.row));
                        }
                    }
                }
            }
            Source::Level { level, from, to } => {
                for data in self.storage.scan_all_transactions::<T>(
                    kind,
                    *level,
                    agent_rollup_id,
                    transaction_type,
                    *from,
                    *to,
                    false,
                    now_millis,
                )? {
                    if let Some(name) = data.transaction_name {
                        rows.push((name, data.row));
                    }
                }
            }
        }
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_service() -> (RollupService, Arc<Storage>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path(), 4).unwrap());
        let service = RollupService::new(storage.clone(), RollupConfig::default(), 500, 100);
        (service, storage, temp_dir)
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let (service, _storage, _temp) = create_service();
        let cancel = CancellationToken::new();
        let processed = service
            .rollup("web-1", None, true, &cancel, 1_000_000)
            .await
            .unwrap();
        assert_eq!(processed, 0);
    }

    #[tokio::test]
    async fn test_last_bucket_is_retained() {
        let (service, storage, _temp) = create_service();
        let now = 10_000_000;
        // one closed bucket, one still inside the current interval
        storage
            .enqueue_needs_rollup(1, "web-1", 9_300_000, vec!["Web".to_string()], 3600, now)
            .unwrap();
        storage
            .enqueue_needs_rollup(1, "web-1", 9_900_000, vec!["Web".to_string()], 3600, now)
            .unwrap();

        let cancel = CancellationToken::new();
        service.rollup("web-1", None, true, &cancel, now).await.unwrap();

        let remaining = storage.scan_needs_rollup(1, "web-1", now).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].capture_time, 9_900_000);
    }

    #[tokio::test]
    async fn test_queue_row_without_sources_is_deleted() {
        let (service, storage, _temp) = create_service();
        let now = 10_000_000;
        storage
            .enqueue_needs_rollup(1, "web-1", 9_300_000, vec!["Web".to_string()], 3600, now)
            .unwrap();

        let cancel = CancellationToken::new();
        let processed = service.rollup("web-1", None, true, &cancel, now).await.unwrap();

        assert_eq!(processed, 1);
        assert!(storage.scan_needs_rollup(1, "web-1", now).unwrap().is_empty());
        // nothing was enqueued at the next level for an empty bucket
        assert!(storage.scan_needs_rollup(2, "web-1", now).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_rollup_leaves_queue_intact() {
        let (service, storage, _temp) = create_service();
        let now = 10_000_000;
        storage
            .enqueue_needs_rollup(1, "web-1", 9_300_000, vec!["Web".to_string()], 3600, now)
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let processed = service.rollup("web-1", None, true, &cancel, now).await.unwrap();

        assert_eq!(processed, 0);
        assert_eq!(storage.scan_needs_rollup(1, "web-1", now).unwrap().len(), 1);
    }
}
