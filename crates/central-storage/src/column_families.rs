//! Column family definitions.
//!
//! Each column family isolates data with different access patterns:
//! - aggregate: append-only, time-ordered aggregate rows (universal
//!   compaction, zstd)
//! - needs_rollup: the rollup work queue, short-lived rows with real
//!   deletes (leveled compaction)
//! - query_text: content-addressed full query texts (universal, zstd)
//! - agent: agent-rollup registry records (leveled compaction)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family for aggregate rows at every rollup level
pub const CF_AGGREGATE: &str = "aggregate";

/// Column family for the needs-rollup work queues (per-level and from-child)
pub const CF_NEEDS_ROLLUP: &str = "needs_rollup";

/// Column family for the full query text side table
pub const CF_QUERY_TEXT: &str = "query_text";

/// Column family for agent-rollup registry records
pub const CF_AGENT: &str = "agent";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_AGGREGATE, CF_NEEDS_ROLLUP, CF_QUERY_TEXT, CF_AGENT];

/// Options for append-only, time-ordered data
fn time_series_options() -> Options {
    let mut opts = Options::default();
    opts.set_compaction_style(rocksdb::DBCompactionStyle::Universal);
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_AGGREGATE, time_series_options()),
        ColumnFamilyDescriptor::new(CF_NEEDS_ROLLUP, Options::default()),
        ColumnFamilyDescriptor::new(CF_QUERY_TEXT, time_series_options()),
        ColumnFamilyDescriptor::new(CF_AGENT, Options::default()),
    ]
}
