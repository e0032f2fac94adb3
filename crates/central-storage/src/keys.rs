//! Key encoding for the storage layer.
//!
//! Key formats (capture times zero-padded to 13 digits so lexicographic
//! order is chronological order):
//!
//! - aggregate overall row:
//!   `{partial}:{level}:{agent_rollup}:{transaction_type}:o:{capture_time:013}:{suffix}`
//! - aggregate per-transaction row:
//!   `{partial}:{level}:{agent_rollup}:{transaction_type}:n:{transaction_name}:{capture_time:013}:{suffix}`
//! - needs-rollup queue: `lvl:{level}:{agent_rollup}:{capture_time:013}:{ulid}`
//! - from-child queue: `child:{agent_rollup}:{capture_time:013}:{ulid}`
//! - query text: `qt:{sha1_hex}`
//! - agent registry: `agent:{agent_rollup}`
//!
//! Values are self-describing (the envelope repeats the partition fields and
//! capture time), so keys are never parsed back; they only have to sort
//! correctly and be unique.

use ulid::Ulid;

/// Key for an overall (per-transaction-type) aggregate row.
pub fn overall_row(
    table_prefix: &str,
    agent_rollup: &str,
    transaction_type: &str,
    capture_time: i64,
    suffix: &str,
) -> Vec<u8> {
    format!(
        "{}:{}:{}:o:{:013}:{}",
        table_prefix, agent_rollup, transaction_type, capture_time, suffix
    )
    .into_bytes()
}

/// Key for a per-transaction-name aggregate row.
pub fn transaction_row(
    table_prefix: &str,
    agent_rollup: &str,
    transaction_type: &str,
    transaction_name: &str,
    capture_time: i64,
    suffix: &str,
) -> Vec<u8> {
    format!(
        "{}:{}:{}:n:{}:{:013}:{}",
        table_prefix, agent_rollup, transaction_type, transaction_name, capture_time, suffix
    )
    .into_bytes()
}

/// Scan start for overall rows at a capture time.
pub fn overall_scan_start(
    table_prefix: &str,
    agent_rollup: &str,
    transaction_type: &str,
    from_capture_time: i64,
) -> Vec<u8> {
    format!(
        "{}:{}:{}:o:{:013}",
        table_prefix, agent_rollup, transaction_type, from_capture_time
    )
    .into_bytes()
}

/// Exclusive scan end for overall rows: the start of `to + 1`.
pub fn overall_scan_end(
    table_prefix: &str,
    agent_rollup: &str,
    transaction_type: &str,
    to_capture_time: i64,
) -> Vec<u8> {
    overall_scan_start(table_prefix, agent_rollup, transaction_type, to_capture_time + 1)
}

/// Scan start for one transaction name at a capture time.
pub fn transaction_scan_start(
    table_prefix: &str,
    agent_rollup: &str,
    transaction_type: &str,
    transaction_name: &str,
    from_capture_time: i64,
) -> Vec<u8> {
    format!(
        "{}:{}:{}:n:{}:{:013}",
        table_prefix, agent_rollup, transaction_type, transaction_name, from_capture_time
    )
    .into_bytes()
}

/// Exclusive scan end for one transaction name.
pub fn transaction_scan_end(
    table_prefix: &str,
    agent_rollup: &str,
    transaction_type: &str,
    transaction_name: &str,
    to_capture_time: i64,
) -> Vec<u8> {
    transaction_scan_start(
        table_prefix,
        agent_rollup,
        transaction_type,
        transaction_name,
        to_capture_time + 1,
    )
}

/// Prefix covering every transaction name of a type. Time filtering happens
/// on the decoded rows (names sort before capture time in the key).
pub fn all_transactions_prefix(
    table_prefix: &str,
    agent_rollup: &str,
    transaction_type: &str,
) -> Vec<u8> {
    format!("{}:{}:{}:n:", table_prefix, agent_rollup, transaction_type).into_bytes()
}

/// Key for a needs-rollup queue row at a level.
pub fn needs_rollup(level: usize, agent_rollup: &str, capture_time: i64, uniqueness: Ulid) -> Vec<u8> {
    format!(
        "lvl:{}:{}:{:013}:{}",
        level, agent_rollup, capture_time, uniqueness
    )
    .into_bytes()
}

/// Prefix covering one agent-rollup's queue at a level.
pub fn needs_rollup_prefix(level: usize, agent_rollup: &str) -> Vec<u8> {
    format!("lvl:{}:{}:", level, agent_rollup).into_bytes()
}

/// Key for a from-child queue row addressed to a parent.
pub fn from_child(agent_rollup: &str, capture_time: i64, uniqueness: Ulid) -> Vec<u8> {
    format!("child:{}:{:013}:{}", agent_rollup, capture_time, uniqueness).into_bytes()
}

/// Prefix covering one parent's from-child queue.
pub fn from_child_prefix(agent_rollup: &str) -> Vec<u8> {
    format!("child:{}:", agent_rollup).into_bytes()
}

/// Key for a full query text, addressed by content hash.
pub fn query_text(sha1_hex: &str) -> Vec<u8> {
    format!("qt:{}", sha1_hex).into_bytes()
}

/// Key for an agent-rollup registry record.
pub fn agent(agent_rollup: &str) -> Vec<u8> {
    format!("agent:{}", agent_rollup).into_bytes()
}

/// Prefix covering the whole agent registry.
pub fn agent_prefix() -> Vec<u8> {
    b"agent:".to_vec()
}
