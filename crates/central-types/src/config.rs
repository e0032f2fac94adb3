//! Configuration loading.
//!
//! Layered: built-in defaults -> config file -> environment variables
//! (prefix `CENTRAL_`). The default config file lives at
//! `~/.config/central-apm/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::rollup::{RollupConfig, RollupLevel};

/// One rollup level as it appears in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupLevelSettings {
    pub interval_seconds: i64,
    pub retention_hours: i64,
}

fn default_rollup_levels() -> Vec<RollupLevelSettings> {
    vec![
        RollupLevelSettings {
            interval_seconds: 60,
            retention_hours: 48,
        },
        RollupLevelSettings {
            interval_seconds: 300,
            retention_hours: 14 * 24,
        },
        RollupLevelSettings {
            interval_seconds: 1800,
            retention_hours: 60 * 24,
        },
        RollupLevelSettings {
            interval_seconds: 86_400,
            retention_hours: 180 * 24,
        },
    ]
}

/// Background job cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Cron expression for the rollup sweep (default: every 30 seconds)
    #[serde(default = "default_rollup_cron")]
    pub rollup_cron: String,

    /// Cron expression for the expired-row purge (default: hourly)
    #[serde(default = "default_purge_cron")]
    pub purge_cron: String,

    /// IANA timezone for job scheduling
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Max jitter in seconds before each job run
    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,

    /// Per-run timeout in seconds (0 = none)
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
}

fn default_rollup_cron() -> String {
    "*/30 * * * * *".to_string()
}

fn default_purge_cron() -> String {
    "0 7 * * * *".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

fn default_jitter_secs() -> u64 {
    5
}

fn default_job_timeout_secs() -> u64 {
    600
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            rollup_cron: default_rollup_cron(),
            purge_cron: default_purge_cron(),
            timezone: default_timezone(),
            jitter_secs: default_jitter_secs(),
            job_timeout_secs: default_job_timeout_secs(),
        }
    }
}

/// Main application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to the RocksDB storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Rollup levels, coarsest last. Level 0 is the raw agent resolution.
    #[serde(default = "default_rollup_levels")]
    pub rollup_levels: Vec<RollupLevelSettings>,

    /// Query texts longer than this are truncated and stored by sha1
    #[serde(default = "default_query_text_truncate")]
    pub query_text_truncate: usize,

    /// Max query rollup rows kept per query type per bucket
    #[serde(default = "default_max_query_aggregates")]
    pub max_query_aggregates: usize,

    /// Max service call rollup rows kept per type per bucket
    #[serde(default = "default_max_service_call_aggregates")]
    pub max_service_call_aggregates: usize,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Background job cadence
    #[serde(default)]
    pub scheduler: SchedulerSettings,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "central-apm")
        .map(|dirs| dirs.data_dir().join("db").to_string_lossy().into_owned())
        .unwrap_or_else(|| "./central-db".to_string())
}

fn default_query_text_truncate() -> usize {
    120
}

fn default_max_query_aggregates() -> usize {
    500
}

fn default_max_service_call_aggregates() -> usize {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            rollup_levels: default_rollup_levels(),
            query_text_truncate: default_query_text_truncate(),
            max_query_aggregates: default_max_query_aggregates(),
            max_service_call_aggregates: default_max_service_call_aggregates(),
            log_level: default_log_level(),
            scheduler: SchedulerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from the given file (or the default location) layered
    /// with `CENTRAL_`-prefixed environment variables.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.or_else(|| {
            ProjectDirs::from("", "", "central-apm").map(|dirs| dirs.config_dir().join("config.toml"))
        });
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings: Settings = builder
            .add_source(Environment::with_prefix("CENTRAL").separator("__"))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Validate cross-field constraints not expressible in serde defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_text_truncate == 0 {
            return Err(ConfigError::Invalid(
                "query_text_truncate must be > 0".to_string(),
            ));
        }
        if self.max_query_aggregates == 0 || self.max_service_call_aggregates == 0 {
            return Err(ConfigError::Invalid(
                "aggregate caps must be > 0".to_string(),
            ));
        }
        self.rollup_config()?;
        Ok(())
    }

    /// The validated rollup level list.
    pub fn rollup_config(&self) -> Result<RollupConfig, ConfigError> {
        RollupConfig::new(
            self.rollup_levels
                .iter()
                .map(|l| RollupLevel::new(l.interval_seconds * 1000, l.retention_hours * 3600))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.query_text_truncate, 120);
        assert_eq!(settings.max_query_aggregates, 500);
    }

    #[test]
    fn test_rollup_config_conversion() {
        let settings = Settings::default();
        let rollup = settings.rollup_config().unwrap();
        assert_eq!(rollup.level(0).interval_millis, 60_000);
        assert_eq!(rollup.level(1).interval_millis, 300_000);
        assert_eq!(rollup.level(0).retention_seconds, 48 * 3600);
    }

    #[test]
    fn test_invalid_truncate_rejected() {
        let settings = Settings {
            query_text_truncate: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_invalid_levels_rejected() {
        let settings = Settings {
            rollup_levels: vec![RollupLevelSettings {
                interval_seconds: 60,
                retention_hours: 48,
            }],
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }
}
