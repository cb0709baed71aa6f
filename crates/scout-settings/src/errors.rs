//! Settings error types.

use thiserror::Error;

/// Failures while loading or parsing the settings file.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Filesystem access failed.
    #[error("settings io error: {0}")]
    Io(#[from] std::io::Error),
    /// The file is not valid JSON or does not match the schema.
    #[error("settings parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Crate-local result alias.
pub type Result<T> = std::result::Result<T, SettingsError>;
