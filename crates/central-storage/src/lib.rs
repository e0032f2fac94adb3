//! # central-storage
//!
//! RocksDB-backed wide-column store for the aggregation engine.
//!
//! The store provides exactly what the rollup pipeline assumes: per-key
//! range reads in ascending clustering order (key layout puts capture time
//! last, zero-padded) and per-row expiry (an envelope carries the expiry,
//! reads skip expired rows, a purge pass deletes them). All reduction
//! happens above this crate.

pub mod catalog;
pub mod codec;
pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod ttl;

pub use catalog::{table_spec, Catalog, TableSpec};
pub use codec::{Envelope, StoredAggregate};
pub use db::{
    AggregatePut, AggregateRowData, AgentRollupRecord, FromChildEntry, NeedsRollupEntry, Storage,
};
pub use error::StorageError;
