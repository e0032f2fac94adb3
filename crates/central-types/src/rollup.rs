//! Rollup level configuration and capture-time bucket math.
//!
//! Level 0 is the raw per-minute resolution written by agents; higher levels
//! are coarser. Every row at level N has a capture time that is a multiple of
//! the level-N interval, and a rollup bucket ending at `ct` covers the
//! half-open source range `(ct - interval, ct]`.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One rollup level: how wide its buckets are and how long its rows live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollupLevel {
    /// Bucket width in milliseconds
    pub interval_millis: i64,

    /// Row retention in seconds
    pub retention_seconds: i64,
}

impl RollupLevel {
    pub fn new(interval_millis: i64, retention_seconds: i64) -> Self {
        Self {
            interval_millis,
            retention_seconds,
        }
    }
}

/// Ordered list of rollup levels, validated at construction.
///
/// Built once at startup and shared read-only, like the schema catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollupConfig {
    levels: Vec<RollupLevel>,
}

impl RollupConfig {
    /// Build a config from an explicit level list.
    ///
    /// # Errors
    ///
    /// Rejects lists with fewer than two levels, non-increasing intervals,
    /// intervals that are not multiples of the previous level's interval,
    /// or decreasing retentions.
    pub fn new(levels: Vec<RollupLevel>) -> Result<Self, ConfigError> {
        if levels.len() < 2 {
            return Err(ConfigError::RollupLevels(
                "at least two levels required (raw + one rollup)".to_string(),
            ));
        }
        for level in &levels {
            if level.interval_millis <= 0 {
                return Err(ConfigError::RollupLevels(format!(
                    "interval must be positive, got {}",
                    level.interval_millis
                )));
            }
            if level.retention_seconds <= 0 {
                return Err(ConfigError::RollupLevels(format!(
                    "retention must be positive, got {}",
                    level.retention_seconds
                )));
            }
        }
        for pair in levels.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            if next.interval_millis <= prev.interval_millis {
                return Err(ConfigError::RollupLevels(format!(
                    "intervals must be strictly increasing ({} -> {})",
                    prev.interval_millis, next.interval_millis
                )));
            }
            if next.interval_millis % prev.interval_millis != 0 {
                return Err(ConfigError::RollupLevels(format!(
                    "interval {} is not a multiple of {}",
                    next.interval_millis, prev.interval_millis
                )));
            }
            if next.retention_seconds < prev.retention_seconds {
                return Err(ConfigError::RollupLevels(format!(
                    "retentions must be non-decreasing ({} -> {})",
                    prev.retention_seconds, next.retention_seconds
                )));
            }
        }
        Ok(Self { levels })
    }

    pub fn levels(&self) -> &[RollupLevel] {
        &self.levels
    }

    pub fn level(&self, level: usize) -> RollupLevel {
        self.levels[level]
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Widest bucket interval, in milliseconds. Used by the work-queue TTL.
    pub fn max_rollup_interval_millis(&self) -> i64 {
        self.levels
            .last()
            .map(|l| l.interval_millis)
            .unwrap_or(0)
    }
}

impl Default for RollupConfig {
    /// 1 min / 5 min / 30 min / 1 day with 2 d / 14 d / 60 d / 180 d retention.
    fn default() -> Self {
        Self::new(vec![
            RollupLevel::new(60_000, 48 * 3600),
            RollupLevel::new(300_000, 14 * 24 * 3600),
            RollupLevel::new(1_800_000, 60 * 24 * 3600),
            RollupLevel::new(86_400_000, 180 * 24 * 3600),
        ])
        .expect("default rollup levels are valid")
    }
}

/// Round a capture time up to the end of its bucket.
///
/// A capture time that is already a bucket boundary stays put.
pub fn ceil_capture_time(capture_time: i64, interval_millis: i64) -> i64 {
    let rem = capture_time.rem_euclid(interval_millis);
    if rem == 0 {
        capture_time
    } else {
        capture_time - rem + interval_millis
    }
}

/// Round a capture time down to a bucket boundary.
pub fn floor_capture_time(capture_time: i64, interval_millis: i64) -> i64 {
    capture_time - capture_time.rem_euclid(interval_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_capture_time() {
        assert_eq!(ceil_capture_time(60_000, 300_000), 300_000);
        assert_eq!(ceil_capture_time(300_000, 300_000), 300_000);
        assert_eq!(ceil_capture_time(300_001, 300_000), 600_000);
        assert_eq!(ceil_capture_time(1, 60_000), 60_000);
    }

    #[test]
    fn test_floor_capture_time() {
        assert_eq!(floor_capture_time(299_999, 300_000), 0);
        assert_eq!(floor_capture_time(300_000, 300_000), 300_000);
        assert_eq!(floor_capture_time(600_001, 300_000), 600_000);
    }

    #[test]
    fn test_default_config_valid() {
        let config = RollupConfig::default();
        assert_eq!(config.level_count(), 4);
        assert_eq!(config.level(0).interval_millis, 60_000);
        assert_eq!(config.max_rollup_interval_millis(), 86_400_000);
    }

    #[test]
    fn test_rejects_non_multiple_intervals() {
        let result = RollupConfig::new(vec![
            RollupLevel::new(60_000, 3600),
            RollupLevel::new(90_000, 7200),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_decreasing_retention() {
        let result = RollupConfig::new(vec![
            RollupLevel::new(60_000, 7200),
            RollupLevel::new(300_000, 3600),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_single_level() {
        let result = RollupConfig::new(vec![RollupLevel::new(60_000, 3600)]);
        assert!(result.is_err());
    }
}
