//! Jitter and timeout configuration for scheduled jobs.
//!
//! Jitter spreads simultaneous firings (many agent rollups all scheduled on
//! the same cron tick) over a short random delay. Timeouts bound runaway
//! jobs.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Random delay applied before a job run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JitterConfig {
    /// Maximum jitter in seconds (0 = no jitter).
    pub max_jitter_secs: u64,
}

impl JitterConfig {
    pub fn new(max_jitter_secs: u64) -> Self {
        Self { max_jitter_secs }
    }

    pub fn none() -> Self {
        Self { max_jitter_secs: 0 }
    }

    /// A random duration in `[0, max_jitter_secs)`, or zero when disabled.
    pub fn generate_jitter(&self) -> Duration {
        if self.max_jitter_secs == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..self.max_jitter_secs * 1000);
        Duration::from_millis(jitter_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.max_jitter_secs > 0
    }
}

/// Maximum execution time for a job run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Timeout in seconds (0 = unbounded).
    pub timeout_secs: u64,
}

impl TimeoutConfig {
    pub fn new(timeout_secs: u64) -> Self {
        Self { timeout_secs }
    }

    pub fn none() -> Self {
        Self { timeout_secs: 0 }
    }

    pub fn as_duration(&self) -> Option<Duration> {
        if self.timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_jitter_is_immediate() {
        let config = JitterConfig::none();
        assert_eq!(config.generate_jitter(), Duration::ZERO);
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_jitter_within_bounds() {
        let config = JitterConfig::new(10);
        for _ in 0..100 {
            assert!(config.generate_jitter() < Duration::from_secs(10));
        }
    }

    #[test]
    fn test_timeout_as_duration() {
        assert_eq!(TimeoutConfig::none().as_duration(), None);
        assert_eq!(
            TimeoutConfig::new(300).as_duration(),
            Some(Duration::from_secs(300))
        );
    }
}
