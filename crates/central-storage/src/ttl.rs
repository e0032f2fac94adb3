//! Per-write expiry policy.
//!
//! A row written now for a capture time in the past has already spent part
//! of its retention, so the TTL is the retention minus the row's age,
//! floored at one minute. Work-queue rows expire earlier than the data they
//! reference by at least one max rollup interval plus an hour, so a queue
//! row that is consumed always finds its source rows still present.

/// Minimum TTL applied to any write.
pub const MIN_TTL_SECONDS: i64 = 60;

/// Slack subtracted from the data TTL for work-queue rows, beyond the max
/// rollup interval.
pub const QUEUE_TTL_SLACK_SECONDS: i64 = 3600;

/// TTL for a data row.
pub fn data_ttl_seconds(retention_seconds: i64, capture_time: i64, now_millis: i64) -> i64 {
    let age_seconds = (now_millis - capture_time).max(0) / 1000;
    (retention_seconds - age_seconds).max(MIN_TTL_SECONDS)
}

/// TTL for a work-queue row, derived from the data TTL of the rows it
/// references.
pub fn queue_ttl_seconds(data_ttl_seconds: i64, max_rollup_interval_millis: i64) -> i64 {
    (data_ttl_seconds - max_rollup_interval_millis / 1000 - QUEUE_TTL_SLACK_SECONDS)
        .max(MIN_TTL_SECONDS)
}

/// Absolute expiry for an envelope written now.
pub fn expires_at_millis(now_millis: i64, ttl_seconds: i64) -> i64 {
    now_millis + ttl_seconds * 1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_row_gets_full_retention() {
        assert_eq!(data_ttl_seconds(7200, 60_000, 60_000), 7200);
    }

    #[test]
    fn test_aged_row_gets_reduced_ttl() {
        // capture 1 hour ago, 2 hour retention
        assert_eq!(data_ttl_seconds(7200, 0, 3_600_000), 3600);
    }

    #[test]
    fn test_data_ttl_floor() {
        // capture far older than retention
        assert_eq!(data_ttl_seconds(3600, 0, 100 * 3_600_000), MIN_TTL_SECONDS);
    }

    #[test]
    fn test_queue_ttl_ordering_invariant() {
        // data_ttl >= queue_ttl + max_interval + slack whenever the queue
        // floor is not engaged
        let data_ttl = data_ttl_seconds(14 * 24 * 3600, 0, 60_000);
        let queue_ttl = queue_ttl_seconds(data_ttl, 86_400_000);
        assert!(data_ttl >= queue_ttl + 86_400 + QUEUE_TTL_SLACK_SECONDS);
    }

    #[test]
    fn test_queue_ttl_floor() {
        assert_eq!(queue_ttl_seconds(120, 86_400_000), MIN_TTL_SECONDS);
    }

    #[test]
    fn test_expires_at() {
        assert_eq!(expires_at_millis(1_000, 60), 61_000);
    }
}
