//! Error types for analysis operations.

use phasegrid_core::CoreError;
use thiserror::Error;

/// Errors that can occur while analysing waveforms and voxel data.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// An operation received no samples.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// Two buffers that must line up differ in length.
    #[error("length mismatch in {context}: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Operation that detected the mismatch.
        context: &'static str,
        /// Required length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },

    /// A numeric parameter is out of range.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Description of why the value is invalid.
        reason: String,
    },

    /// A strategy name did not match any known variant.
    #[error("unknown {kind} '{value}' (expected one of: {expected})")]
    UnknownVariant {
        /// Which strategy was being parsed.
        kind: &'static str,
        /// The name that was given.
        value: String,
        /// Accepted names.
        expected: &'static str,
    },

    /// An external recording does not span the acquisition.
    #[error(
        "reference waveform covers {start:.3}..{end:.3} s but the acquisition needs 0..{needed:.3} s"
    )]
    InputCoverage {
        /// Time of the first recorded sample.
        start: f64,
        /// Time of the last recorded sample.
        end: f64,
        /// Last time that must be covered.
        needed: f64,
    },

    /// The worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(String),

    /// Error from a core container.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AnalysisError {
    /// Create an invalid parameter error.
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        AnalysisError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }

    /// Create a length mismatch error.
    pub fn length_mismatch(context: &'static str, expected: usize, actual: usize) -> Self {
        AnalysisError::LengthMismatch {
            context,
            expected,
            actual,
        }
    }
}

/// Convenience result type for analysis operations.
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn invalid_factory_formats_reason() {
        let err = AnalysisError::invalid("bin_count", "must be at least 2");
        assert_eq!(
            err.to_string(),
            "invalid parameter 'bin_count': must be at least 2"
        );
    }

    #[test]
    fn coverage_message_names_span() {
        let err = AnalysisError::InputCoverage {
            start: 1.0,
            end: 10.0,
            needed: 20.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("1.000..10.000"), "{msg}");
        assert!(msg.contains("0..20.000"), "{msg}");
    }

    #[test]
    fn core_errors_are_transparent() {
        let err: AnalysisError = CoreError::InvalidSampleRate(0.0).into();
        assert!(err.to_string().contains("invalid sample rate"));
        assert!(err.source().is_none());
    }
}
