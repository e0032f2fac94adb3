//! RocksDB wrapper for the aggregation engine.
//!
//! Provides:
//! - Database open with column family setup
//! - Batched, TTL'd aggregate row writes
//! - Range reads per partition in ascending capture-time order
//! - Work-queue enqueue/scan/delete (per-level and from-child)
//! - Full query text side table
//! - Agent-rollup registry
//! - Expired-row purge

use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};
use ulid::Ulid;

use central_types::AggregateKind;

use crate::catalog::Catalog;
use crate::codec::{self, StoredAggregate};
use crate::column_families::{
    build_cf_descriptors, ALL_CF_NAMES, CF_AGENT, CF_AGGREGATE, CF_NEEDS_ROLLUP, CF_QUERY_TEXT,
};
use crate::error::StorageError;
use crate::keys;
use crate::ttl;

/// One aggregate row ready to write: partition, capture time, clustering
/// suffix, pre-encoded payload, and TTL.
#[derive(Debug, Clone)]
pub struct AggregatePut {
    pub kind: AggregateKind,
    pub level: usize,
    pub agent_rollup: String,
    pub transaction_type: String,
    pub transaction_name: Option<String>,
    pub capture_time: i64,
    pub suffix: String,
    pub payload: Vec<u8>,
    pub ttl_seconds: i64,
}

impl AggregatePut {
    #[allow(clippy::too_many_arguments)]
    pub fn new<T: Serialize>(
        kind: AggregateKind,
        level: usize,
        agent_rollup: impl Into<String>,
        transaction_type: impl Into<String>,
        transaction_name: Option<String>,
        capture_time: i64,
        suffix: impl Into<String>,
        row: &T,
        ttl_seconds: i64,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            kind,
            level,
            agent_rollup: agent_rollup.into(),
            transaction_type: transaction_type.into(),
            transaction_name,
            capture_time,
            suffix: suffix.into(),
            payload: codec::encode(row)?,
            ttl_seconds,
        })
    }
}

/// One decoded aggregate row from a range read.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRowData<T> {
    pub capture_time: i64,
    pub transaction_name: Option<String>,
    pub row: T,
}

/// One needs-rollup queue entry, with the key needed to delete it.
#[derive(Debug, Clone, PartialEq)]
pub struct NeedsRollupEntry {
    pub key: Vec<u8>,
    pub capture_time: i64,
    pub transaction_types: Vec<String>,
}

/// One from-child queue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct FromChildEntry {
    pub key: Vec<u8>,
    pub capture_time: i64,
    pub child_agent_rollup: String,
    pub transaction_types: Vec<String>,
}

/// Agent-rollup registry record. Drives the rollup sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRollupRecord {
    pub id: String,
    pub parent: Option<String>,
    /// False once the id has ever been seen as a parent
    pub is_leaf: bool,
    pub last_capture_time: i64,
}

#[derive(Serialize, Deserialize)]
struct NeedsRollupValue {
    capture_time: i64,
    transaction_types: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct FromChildValue {
    capture_time: i64,
    child_agent_rollup: String,
    transaction_types: Vec<String>,
}

enum ScanEnd<'a> {
    /// Stop at the first key >= bound
    Bound(&'a [u8]),
    /// Stop at the first key not starting with the prefix
    Prefix(&'a [u8]),
}

struct RowFilter<'a> {
    agent_rollup: &'a str,
    transaction_type: &'a str,
    /// None with `any_name` false means overall rows
    transaction_name: Option<&'a str>,
    any_name: bool,
    from: i64,
    to: i64,
    from_inclusive: bool,
}

impl RowFilter<'_> {
    fn matches(&self, stored: &StoredAggregate<Vec<u8>>) -> bool {
        if stored.agent_rollup != self.agent_rollup
            || stored.transaction_type != self.transaction_type
        {
            return false;
        }
        let name_matches = if self.any_name {
            stored.transaction_name.is_some()
        } else {
            stored.transaction_name.as_deref() == self.transaction_name
        };
        if !name_matches {
            return false;
        }
        let lower_ok = if self.from_inclusive {
            stored.capture_time >= self.from
        } else {
            stored.capture_time > self.from
        };
        lower_ok && stored.capture_time <= self.to
    }
}

/// Main storage interface.
pub struct Storage {
    db: DB,
    catalog: Catalog,
}

impl Storage {
    /// Open storage at the given path, creating if necessary.
    pub fn open(path: &Path, level_count: usize) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(4);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;

        Ok(Self {
            db,
            catalog: Catalog::new(level_count),
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    // ==================== Aggregate rows ====================

    /// Write a batch of aggregate rows atomically.
    pub fn write_aggregates(
        &self,
        puts: &[AggregatePut],
        now_millis: i64,
    ) -> Result<(), StorageError> {
        if puts.is_empty() {
            return Ok(());
        }
        let cf = self.cf(CF_AGGREGATE)?;
        let mut batch = WriteBatch::default();
        for put in puts {
            let prefix = self
                .catalog
                .table_prefix(put.kind, put.level)
                .ok_or(StorageError::UnknownLevel(put.level))?;
            let key = match &put.transaction_name {
                Some(name) => keys::transaction_row(
                    prefix,
                    &put.agent_rollup,
                    &put.transaction_type,
                    name,
                    put.capture_time,
                    &put.suffix,
                ),
                None => keys::overall_row(
                    prefix,
                    &put.agent_rollup,
                    &put.transaction_type,
                    put.capture_time,
                    &put.suffix,
                ),
            };
            let stored = StoredAggregate {
                agent_rollup: put.agent_rollup.clone(),
                transaction_type: put.transaction_type.clone(),
                transaction_name: put.transaction_name.clone(),
                capture_time: put.capture_time,
                row: put.payload.clone(),
            };
            let expires = ttl::expires_at_millis(now_millis, put.ttl_seconds);
            batch.put_cf(&cf, key, codec::wrap(expires, &stored)?);
        }
        self.db.write(batch)?;
        debug!(rows = puts.len(), "Wrote aggregate batch");
        Ok(())
    }

    /// Read overall rows for one partition, ascending capture time. The
    /// lower bound is inclusive or exclusive per `from_inclusive`; the
    /// upper bound is always inclusive.
    #[allow(clippy::too_many_arguments)]
    pub fn scan_overall<T: DeserializeOwned>(
        &self,
        kind: AggregateKind,
        level: usize,
        agent_rollup: &str,
        transaction_type: &str,
        from: i64,
        to: i64,
        from_inclusive: bool,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<T>>, StorageError> {
        let prefix = self
            .catalog
            .table_prefix(kind, level)
            .ok_or(StorageError::UnknownLevel(level))?;
        let start = keys::overall_scan_start(prefix, agent_rollup, transaction_type, from);
        let end = keys::overall_scan_end(prefix, agent_rollup, transaction_type, to);
        let filter = RowFilter {
            agent_rollup,
            transaction_type,
            transaction_name: None,
            any_name: false,
            from,
            to,
            from_inclusive,
        };
        self.collect_rows(&start, ScanEnd::Bound(&end), &filter, None, now_millis)
    }

    /// Read one transaction name's rows, ascending capture time.
    #[allow(clippy::too_many_arguments)]
    pub fn scan_transaction<T: DeserializeOwned>(
        &self,
        kind: AggregateKind,
        level: usize,
        agent_rollup: &str,
        transaction_type: &str,
        transaction_name: &str,
        from: i64,
        to: i64,
        from_inclusive: bool,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<T>>, StorageError> {
        let prefix = self
            .catalog
            .table_prefix(kind, level)
            .ok_or(StorageError::UnknownLevel(level))?;
        let start = keys::transaction_scan_start(
            prefix,
            agent_rollup,
            transaction_type,
            transaction_name,
            from,
        );
        let end = keys::transaction_scan_end(
            prefix,
            agent_rollup,
            transaction_type,
            transaction_name,
            to,
        );
        let filter = RowFilter {
            agent_rollup,
            transaction_type,
            transaction_name: Some(transaction_name),
            any_name: false,
            from,
            to,
            from_inclusive,
        };
        self.collect_rows(&start, ScanEnd::Bound(&end), &filter, None, now_millis)
    }

    /// Read rows for every transaction name of a type. Names sort before
    /// capture time in the key, so the whole name range is walked and time
    /// bounds are applied to the decoded rows.
    #[allow(clippy::too_many_arguments)]
    pub fn scan_all_transactions<T: DeserializeOwned>(
        &self,
        kind: AggregateKind,
        level: usize,
        agent_rollup: &str,
        transaction_type: &str,
        from: i64,
        to: i64,
        from_inclusive: bool,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<T>>, StorageError> {
        let prefix = self
            .catalog
            .table_prefix(kind, level)
            .ok_or(StorageError::UnknownLevel(level))?;
        let scan_prefix = keys::all_transactions_prefix(prefix, agent_rollup, transaction_type);
        let filter = RowFilter {
            agent_rollup,
            transaction_type,
            transaction_name: None,
            any_name: true,
            from,
            to,
            from_inclusive,
        };
        self.collect_rows(
            &scan_prefix,
            ScanEnd::Prefix(&scan_prefix),
            &filter,
            None,
            now_millis,
        )
    }

    /// Whether any overall row exists in the range. First-row probe.
    #[allow(clippy::too_many_arguments)]
    pub fn has_overall_rows(
        &self,
        kind: AggregateKind,
        level: usize,
        agent_rollup: &str,
        transaction_type: &str,
        from: i64,
        to: i64,
        from_inclusive: bool,
        now_millis: i64,
    ) -> Result<bool, StorageError> {
        let prefix = self
            .catalog
            .table_prefix(kind, level)
            .ok_or(StorageError::UnknownLevel(level))?;
        let start = keys::overall_scan_start(prefix, agent_rollup, transaction_type, from);
        let end = keys::overall_scan_end(prefix, agent_rollup, transaction_type, to);
        let filter = RowFilter {
            agent_rollup,
            transaction_type,
            transaction_name: None,
            any_name: false,
            from,
            to,
            from_inclusive,
        };
        let found: Vec<AggregateRowData<ProbeRow>> =
            self.collect_rows(&start, ScanEnd::Bound(&end), &filter, Some(1), now_millis)?;
        Ok(!found.is_empty())
    }

    /// Whether any row exists for one transaction name in the range.
    #[allow(clippy::too_many_arguments)]
    pub fn has_transaction_rows(
        &self,
        kind: AggregateKind,
        level: usize,
        agent_rollup: &str,
        transaction_type: &str,
        transaction_name: &str,
        from: i64,
        to: i64,
        from_inclusive: bool,
        now_millis: i64,
    ) -> Result<bool, StorageError> {
        let prefix = self
            .catalog
            .table_prefix(kind, level)
            .ok_or(StorageError::UnknownLevel(level))?;
        let start = keys::transaction_scan_start(
            prefix,
            agent_rollup,
            transaction_type,
            transaction_name,
            from,
        );
        let end = keys::transaction_scan_end(
            prefix,
            agent_rollup,
            transaction_type,
            transaction_name,
            to,
        );
        let filter = RowFilter {
            agent_rollup,
            transaction_type,
            transaction_name: Some(transaction_name),
            any_name: false,
            from,
            to,
            from_inclusive,
        };
        let found: Vec<AggregateRowData<ProbeRow>> =
            self.collect_rows(&start, ScanEnd::Bound(&end), &filter, Some(1), now_millis)?;
        Ok(!found.is_empty())
    }

    fn collect_rows<T: DeserializeOwned>(
        &self,
        start: &[u8],
        end: ScanEnd<'_>,
        filter: &RowFilter<'_>,
        limit: Option<usize>,
        now_millis: i64,
    ) -> Result<Vec<AggregateRowData<T>>, StorageError> {
        let cf = self.cf(CF_AGGREGATE)?;
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(start, Direction::Forward));

        let mut rows = Vec::new();
        for item in iter {
            let (key, value) = item?;
            match end {
                ScanEnd::Bound(bound) => {
                    if key.as_ref() >= bound {
                        break;
                    }
                }
                ScanEnd::Prefix(prefix) => {
                    if !key.starts_with(prefix) {
                        break;
                    }
                }
            }
            // A malformed row is skipped, never allowed to wedge the scan.
            let stored: StoredAggregate<Vec<u8>> =
                match codec::unwrap_unexpired(&value, now_millis) {
                    Ok(Some(stored)) => stored,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(error = %e, "Skipping undecodable aggregate row");
                        continue;
                    }
                };
            if !filter.matches(&stored) {
                continue;
            }
            let row: T = match codec::decode(&stored.row) {
                Ok(row) => row,
                Err(e) => {
                    warn!(error = %e, capture_time = stored.capture_time,
                          "Skipping undecodable aggregate payload");
                    continue;
                }
            };
            rows.push(AggregateRowData {
                capture_time: stored.capture_time,
                transaction_name: stored.transaction_name,
                row,
            });
            if let Some(limit) = limit {
                if rows.len() >= limit {
                    break;
                }
            }
        }
        Ok(rows)
    }

    // ==================== Work queues ====================

    /// Enqueue one needs-rollup row at a level. The ULID suffix makes
    /// concurrent enqueues for the same bucket distinct rows.
    pub fn enqueue_needs_rollup(
        &self,
        level: usize,
        agent_rollup: &str,
        capture_time: i64,
        transaction_types: Vec<String>,
        ttl_seconds: i64,
        now_millis: i64,
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_NEEDS_ROLLUP)?;
        let key = keys::needs_rollup(level, agent_rollup, capture_time, Ulid::new());
        let value = NeedsRollupValue {
            capture_time,
            transaction_types,
        };
        let expires = ttl::expires_at_millis(now_millis, ttl_seconds);
        self.db.put_cf(&cf, key, codec::wrap(expires, &value)?)?;
        Ok(())
    }

    /// Enqueue one from-child row addressed to a parent rollup.
    pub fn enqueue_from_child(
        &self,
        parent_agent_rollup: &str,
        capture_time: i64,
        child_agent_rollup: &str,
        transaction_types: Vec<String>,
        ttl_seconds: i64,
        now_millis: i64,
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_NEEDS_ROLLUP)?;
        let key = keys::from_child(parent_agent_rollup, capture_time, Ulid::new());
        let value = FromChildValue {
            capture_time,
            child_agent_rollup: child_agent_rollup.to_string(),
            transaction_types,
        };
        let expires = ttl::expires_at_millis(now_millis, ttl_seconds);
        self.db.put_cf(&cf, key, codec::wrap(expires, &value)?)?;
        Ok(())
    }

    /// All live needs-rollup entries for one agent-rollup at a level,
    /// ascending capture time.
    pub fn scan_needs_rollup(
        &self,
        level: usize,
        agent_rollup: &str,
        now_millis: i64,
    ) -> Result<Vec<NeedsRollupEntry>, StorageError> {
        let cf = self.cf(CF_NEEDS_ROLLUP)?;
        let prefix = keys::needs_rollup_prefix(level, agent_rollup);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let decoded: NeedsRollupValue = match codec::unwrap_unexpired(&value, now_millis) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable needs-rollup row");
                    continue;
                }
            };
            entries.push(NeedsRollupEntry {
                key: key.to_vec(),
                capture_time: decoded.capture_time,
                transaction_types: decoded.transaction_types,
            });
        }
        Ok(entries)
    }

    /// All live from-child entries addressed to one parent, ascending
    /// capture time.
    pub fn scan_from_child(
        &self,
        agent_rollup: &str,
        now_millis: i64,
    ) -> Result<Vec<FromChildEntry>, StorageError> {
        let cf = self.cf(CF_NEEDS_ROLLUP)?;
        let prefix = keys::from_child_prefix(agent_rollup);
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut entries = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let decoded: FromChildValue = match codec::unwrap_unexpired(&value, now_millis) {
                Ok(Some(v)) => v,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable from-child row");
                    continue;
                }
            };
            entries.push(FromChildEntry {
                key: key.to_vec(),
                capture_time: decoded.capture_time,
                child_agent_rollup: decoded.child_agent_rollup,
                transaction_types: decoded.transaction_types,
            });
        }
        Ok(entries)
    }

    /// Delete consumed queue rows.
    pub fn delete_queue_entries(&self, keys: &[Vec<u8>]) -> Result<(), StorageError> {
        if keys.is_empty() {
            return Ok(());
        }
        let cf = self.cf(CF_NEEDS_ROLLUP)?;
        let mut batch = WriteBatch::default();
        for key in keys {
            batch.delete_cf(&cf, key);
        }
        self.db.write(batch)?;
        Ok(())
    }

    // ==================== Query text side table ====================

    /// Store (or refresh the expiry of) a full query text by content hash.
    pub fn put_query_text(
        &self,
        sha1_hex: &str,
        full_text: &str,
        ttl_seconds: i64,
        now_millis: i64,
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_QUERY_TEXT)?;
        let key = keys::query_text(sha1_hex);
        let expires = ttl::expires_at_millis(now_millis, ttl_seconds);
        self.db
            .put_cf(&cf, key, codec::wrap(expires, &full_text.to_string())?)?;
        Ok(())
    }

    /// Look up a full query text by content hash.
    pub fn get_query_text(
        &self,
        sha1_hex: &str,
        now_millis: i64,
    ) -> Result<Option<String>, StorageError> {
        let cf = self.cf(CF_QUERY_TEXT)?;
        match self.db.get_cf(&cf, keys::query_text(sha1_hex))? {
            Some(bytes) => codec::unwrap_unexpired(&bytes, now_millis),
            None => Ok(None),
        }
    }

    // ==================== Agent registry ====================

    /// Upsert an agent-rollup registry record, merging with any existing
    /// record (leaf-ness only ever degrades, capture time only advances).
    pub fn upsert_agent_rollup(
        &self,
        record: AgentRollupRecord,
        ttl_seconds: i64,
        now_millis: i64,
    ) -> Result<(), StorageError> {
        let cf = self.cf(CF_AGENT)?;
        let key = keys::agent(&record.id);

        let merged = match self.db.get_cf(&cf, &key)? {
            Some(bytes) => match codec::unwrap_unexpired::<AgentRollupRecord>(&bytes, now_millis)?
            {
                Some(existing) => AgentRollupRecord {
                    id: record.id,
                    parent: record.parent.or(existing.parent),
                    is_leaf: record.is_leaf && existing.is_leaf,
                    last_capture_time: record.last_capture_time.max(existing.last_capture_time),
                },
                None => record,
            },
            None => record,
        };

        let expires = ttl::expires_at_millis(now_millis, ttl_seconds);
        self.db.put_cf(&cf, key, codec::wrap(expires, &merged)?)?;
        Ok(())
    }

    /// All live agent-rollup records.
    pub fn list_agent_rollups(
        &self,
        now_millis: i64,
    ) -> Result<Vec<AgentRollupRecord>, StorageError> {
        let cf = self.cf(CF_AGENT)?;
        let prefix = keys::agent_prefix();
        let iter = self
            .db
            .iterator_cf(&cf, IteratorMode::From(&prefix, Direction::Forward));

        let mut records = Vec::new();
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            match codec::unwrap_unexpired::<AgentRollupRecord>(&value, now_millis) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Skipping undecodable agent record");
                    continue;
                }
            }
        }
        Ok(records)
    }

    // ==================== Maintenance ====================

    /// Delete expired envelopes from every column family. Returns the number
    /// of rows removed.
    pub fn purge_expired(&self, now_millis: i64) -> Result<u64, StorageError> {
        let mut purged = 0u64;
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            let iter = self.db.iterator_cf(&cf, IteratorMode::Start);
            let mut batch = WriteBatch::default();
            for item in iter {
                let (key, value) = item?;
                let expired = match codec::decode::<crate::codec::Envelope>(&value) {
                    Ok(envelope) => envelope.is_expired(now_millis),
                    // Undecodable rows are dropped along with expired ones.
                    Err(_) => true,
                };
                if expired {
                    batch.delete_cf(&cf, key);
                    purged += 1;
                }
            }
            if !batch.is_empty() {
                self.db.write(batch)?;
            }
        }
        if purged > 0 {
            info!(purged, "Purged expired rows");
        }
        Ok(purged)
    }

    /// Flush all column families to disk.
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            if let Some(cf) = self.db.cf_handle(cf_name) {
                self.db.flush_cf(&cf)?;
            }
        }
        Ok(())
    }
}

/// Decode target for existence probes; payload contents are irrelevant.
#[derive(Deserialize)]
struct ProbeRow {}

#[cfg(test)]
mod tests {
    use super::*;
    use central_types::SummaryRow;
    use tempfile::TempDir;

    fn create_test_storage() -> (Storage, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path(), 4).unwrap();
        (storage, temp_dir)
    }

    fn summary_put(
        agent: &str,
        tt: &str,
        name: Option<&str>,
        capture_time: i64,
        count: i64,
    ) -> AggregatePut {
        AggregatePut::new(
            AggregateKind::Summary,
            0,
            agent,
            tt,
            name.map(|n| n.to_string()),
            capture_time,
            "",
            &SummaryRow {
                total_duration_nanos: count as f64 * 100.0,
                transaction_count: count,
            },
            3600,
        )
        .unwrap()
    }

    #[test]
    fn test_open_creates_column_families() {
        let (storage, _temp) = create_test_storage();
        for cf_name in ALL_CF_NAMES {
            assert!(storage.db.cf_handle(cf_name).is_some());
        }
    }

    #[test]
    fn test_write_and_scan_overall() {
        let (storage, _temp) = create_test_storage();
        let puts = vec![
            summary_put("web-1", "Web", None, 60_000, 1),
            summary_put("web-1", "Web", None, 120_000, 2),
            summary_put("web-1", "Web", None, 180_000, 3),
        ];
        storage.write_aggregates(&puts, 0).unwrap();

        let rows: Vec<AggregateRowData<SummaryRow>> = storage
            .scan_overall(AggregateKind::Summary, 0, "web-1", "Web", 60_000, 180_000, true, 0)
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].capture_time, 60_000);
        assert_eq!(rows[2].row.transaction_count, 3);
    }

    #[test]
    fn test_exclusive_lower_bound_skips_boundary() {
        let (storage, _temp) = create_test_storage();
        storage
            .write_aggregates(&[summary_put("web-1", "Web", None, 60_000, 1)], 0)
            .unwrap();

        let inclusive: Vec<AggregateRowData<SummaryRow>> = storage
            .scan_overall(AggregateKind::Summary, 0, "web-1", "Web", 60_000, 120_000, true, 0)
            .unwrap();
        let exclusive: Vec<AggregateRowData<SummaryRow>> = storage
            .scan_overall(AggregateKind::Summary, 0, "web-1", "Web", 60_000, 120_000, false, 0)
            .unwrap();
        assert_eq!(inclusive.len(), 1);
        assert!(exclusive.is_empty());
    }

    #[test]
    fn test_scan_does_not_leak_other_partitions() {
        let (storage, _temp) = create_test_storage();
        let puts = vec![
            summary_put("web-1", "Web", None, 60_000, 1),
            summary_put("web-1", "Background", None, 60_000, 5),
            summary_put("web-2", "Web", None, 60_000, 7),
        ];
        storage.write_aggregates(&puts, 0).unwrap();

        let rows: Vec<AggregateRowData<SummaryRow>> = storage
            .scan_overall(AggregateKind::Summary, 0, "web-1", "Web", 0, 120_000, true, 0)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].row.transaction_count, 1);
    }

    #[test]
    fn test_scan_all_transactions_groups_names() {
        let (storage, _temp) = create_test_storage();
        let puts = vec![
            summary_put("web-1", "Web", Some("/home"), 60_000, 1),
            summary_put("web-1", "Web", Some("/login"), 60_000, 2),
            summary_put("web-1", "Web", None, 60_000, 3),
        ];
        storage.write_aggregates(&puts, 0).unwrap();

        let rows: Vec<AggregateRowData<SummaryRow>> = storage
            .scan_all_transactions(AggregateKind::Summary, 0, "web-1", "Web", 0, 120_000, true, 0)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.transaction_name.is_some()));
    }

    #[test]
    fn test_expired_rows_skipped_on_read() {
        let (storage, _temp) = create_test_storage();
        storage
            .write_aggregates(&[summary_put("web-1", "Web", None, 60_000, 1)], 0)
            .unwrap();

        // TTL was 3600s; after an hour the row is invisible
        let rows: Vec<AggregateRowData<SummaryRow>> = storage
            .scan_overall(
                AggregateKind::Summary,
                0,
                "web-1",
                "Web",
                0,
                120_000,
                true,
                3_600_001,
            )
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_has_overall_rows() {
        let (storage, _temp) = create_test_storage();
        storage
            .write_aggregates(&[summary_put("web-1", "Web", None, 60_000, 1)], 0)
            .unwrap();

        assert!(storage
            .has_overall_rows(AggregateKind::Summary, 0, "web-1", "Web", 0, 120_000, true, 0)
            .unwrap());
        assert!(!storage
            .has_overall_rows(AggregateKind::Summary, 0, "web-1", "Web", 61_000, 120_000, true, 0)
            .unwrap());
    }

    #[test]
    fn test_needs_rollup_roundtrip() {
        let (storage, _temp) = create_test_storage();
        storage
            .enqueue_needs_rollup(1, "web-1", 300_000, vec!["Web".to_string()], 3600, 0)
            .unwrap();
        storage
            .enqueue_needs_rollup(1, "web-1", 300_000, vec!["Background".to_string()], 3600, 0)
            .unwrap();
        storage
            .enqueue_needs_rollup(1, "web-1", 600_000, vec!["Web".to_string()], 3600, 0)
            .unwrap();

        let entries = storage.scan_needs_rollup(1, "web-1", 0).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].capture_time, 300_000);
        assert_eq!(entries[2].capture_time, 600_000);

        let keys: Vec<Vec<u8>> = entries.iter().map(|e| e.key.clone()).collect();
        storage.delete_queue_entries(&keys).unwrap();
        assert!(storage.scan_needs_rollup(1, "web-1", 0).unwrap().is_empty());
    }

    #[test]
    fn test_needs_rollup_levels_are_separate() {
        let (storage, _temp) = create_test_storage();
        storage
            .enqueue_needs_rollup(1, "web-1", 300_000, vec!["Web".to_string()], 3600, 0)
            .unwrap();
        assert!(storage.scan_needs_rollup(2, "web-1", 0).unwrap().is_empty());
    }

    #[test]
    fn test_from_child_roundtrip() {
        let (storage, _temp) = create_test_storage();
        storage
            .enqueue_from_child("group", 60_000, "group::web-1", vec!["Web".to_string()], 3600, 0)
            .unwrap();

        let entries = storage.scan_from_child("group", 0).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].child_agent_rollup, "group::web-1");
        assert_eq!(entries[0].capture_time, 60_000);
    }

    #[test]
    fn test_query_text_roundtrip_and_refresh() {
        let (storage, _temp) = create_test_storage();
        storage.put_query_text("abc123", "SELECT 1", 60, 0).unwrap();
        assert_eq!(
            storage.get_query_text("abc123", 0).unwrap(),
            Some("SELECT 1".to_string())
        );
        // expired
        assert_eq!(storage.get_query_text("abc123", 61_000).unwrap(), None);

        // refresh extends the expiry
        storage.put_query_text("abc123", "SELECT 1", 60, 50_000).unwrap();
        assert_eq!(
            storage.get_query_text("abc123", 100_000).unwrap(),
            Some("SELECT 1".to_string())
        );
    }

    #[test]
    fn test_agent_upsert_merges() {
        let (storage, _temp) = create_test_storage();
        storage
            .upsert_agent_rollup(
                AgentRollupRecord {
                    id: "group".to_string(),
                    parent: None,
                    is_leaf: false,
                    last_capture_time: 60_000,
                },
                3600,
                0,
            )
            .unwrap();
        storage
            .upsert_agent_rollup(
                AgentRollupRecord {
                    id: "group".to_string(),
                    parent: None,
                    is_leaf: true,
                    last_capture_time: 30_000,
                },
                3600,
                0,
            )
            .unwrap();

        let records = storage.list_agent_rollups(0).unwrap();
        assert_eq!(records.len(), 1);
        // once seen as a parent, stays a non-leaf; capture time keeps its max
        assert!(!records[0].is_leaf);
        assert_eq!(records[0].last_capture_time, 60_000);
    }

    #[test]
    fn test_purge_expired() {
        let (storage, _temp) = create_test_storage();
        storage
            .write_aggregates(&[summary_put("web-1", "Web", None, 60_000, 1)], 0)
            .unwrap();
        storage
            .enqueue_needs_rollup(1, "web-1", 300_000, vec!["Web".to_string()], 60, 0)
            .unwrap();

        // nothing expired yet
        assert_eq!(storage.purge_expired(1_000).unwrap(), 0);

        // queue row (60s ttl) expires first
        assert_eq!(storage.purge_expired(61_000).unwrap(), 1);

        // data row (3600s ttl) expires later
        assert_eq!(storage.purge_expired(3_600_001).unwrap(), 1);
    }
}
