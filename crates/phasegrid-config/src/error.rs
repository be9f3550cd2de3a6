//! Error types for configuration operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a file
    #[error("failed to read file '{path}': {source}")]
    ReadFile {
        /// Path of the file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        /// Path of the file that could not be written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Failed to serialize TOML
    #[error("failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// A string-valued option names no known method
    #[error("unknown {field} '{value}' (expected one of: {expected})")]
    UnknownMethod {
        /// Configuration key, e.g. `projection.kernel`.
        field: &'static str,
        /// Value that was supplied.
        value: String,
        /// Accepted values.
        expected: &'static str,
    },

    /// A numeric option is out of range
    #[error("invalid value for '{field}': {reason}")]
    OutOfRange {
        /// Configuration key.
        field: &'static str,
        /// Description of the allowed range.
        reason: String,
    },
}

impl ConfigError {
    /// Create a read file error.
    pub fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::ReadFile {
            path: path.into(),
            source,
        }
    }

    /// Create a write file error.
    pub fn write_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ConfigError::WriteFile {
            path: path.into(),
            source,
        }
    }

    /// Create an out-of-range error.
    pub fn out_of_range(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::OutOfRange {
            field,
            reason: reason.into(),
        }
    }
}
