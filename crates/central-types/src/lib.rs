//! # central-types
//!
//! Shared domain types for the central aggregation engine.
//!
//! This crate defines the data model used throughout the system:
//! - Aggregates: per-transaction-type rollups submitted by agents
//! - Timers: root timer trees (main/aux/async)
//! - Histograms: lazy duration histograms with mergeable buckets
//! - Profiles: sampled call trees
//! - Rows: the stored shape of each aggregate kind
//! - Rollup levels: interval/retention configuration and bucket math
//! - Settings: configuration types

pub mod aggregate;
pub mod config;
pub mod error;
pub mod histogram;
pub mod profile;
pub mod rollup;
pub mod rows;

// Re-export main types at crate root
pub use aggregate::{
    add_nullable, merge_root_timers, Aggregate, AggregatesByType, QueryAggregate,
    ServiceCallAggregate, SharedQueryText, ThreadStats, Timer, TransactionAggregate,
};
pub use config::{SchedulerSettings, Settings};
pub use error::ConfigError;
pub use histogram::DurationHistogram;
pub use profile::{Profile, ProfileNode};
pub use rollup::{ceil_capture_time, floor_capture_time, RollupConfig, RollupLevel};
pub use rows::{
    AggregateKind, ErrorSummaryRow, HistogramRow, OverviewRow, ProfileRow, QueryRow,
    ServiceCallRow, SummaryRow, ThroughputRow,
};
