//! Scheduler service configuration.

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Configuration for the scheduler service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Default timezone for jobs (IANA timezone string).
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Timeout in seconds for graceful shutdown; jobs get this much time
    /// to finish before the scheduler stops.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured timezone.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::InvalidTimezone` if the string is not a
    /// valid IANA timezone identifier.
    pub fn parse_timezone(&self) -> Result<chrono_tz::Tz, SchedulerError> {
        self.default_timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| SchedulerError::InvalidTimezone(self.default_timezone.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.default_timezone, "UTC");
        assert_eq!(config.shutdown_timeout_secs, 30);
    }

    #[test]
    fn test_parse_timezone() {
        let config = SchedulerConfig::default();
        assert_eq!(config.parse_timezone().unwrap().name(), "UTC");

        let config = SchedulerConfig {
            default_timezone: "Europe/London".to_string(),
            ..Default::default()
        };
        assert_eq!(config.parse_timezone().unwrap().name(), "Europe/London");
    }

    #[test]
    fn test_parse_invalid_timezone() {
        let config = SchedulerConfig {
            default_timezone: "Invalid/Zone".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.parse_timezone(),
            Err(SchedulerError::InvalidTimezone(_))
        ));
    }
}
