//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Underlying config source failed to load
    #[error("Config error: {0}")]
    Load(#[from] config::ConfigError),

    /// A setting failed validation
    #[error("Invalid setting: {0}")]
    Invalid(String),

    /// Rollup level list is malformed
    #[error("Invalid rollup levels: {0}")]
    RollupLevels(String),
}
