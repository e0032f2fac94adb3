//! Background job definitions for the aggregation daemon.

pub mod purge;
pub mod rollup;

pub use purge::create_purge_job;
pub use rollup::create_rollup_job;
