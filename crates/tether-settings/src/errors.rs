//! Settings loading errors.

use thiserror::Error;

/// Convenience result alias for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file could not be read.
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    /// The settings file is not valid JSON.
    #[error("failed to parse settings JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// An env override had an unparseable value.
    #[error("invalid value for {var}: {value}")]
    InvalidEnvOverride {
        /// Environment variable name.
        var: String,
        /// The offending value.
        value: String,
    },
}
