//! phasegrid Core - waveform containers, robust statistics and phase arithmetic
//!
//! This crate holds the building blocks shared by every stage of the cardiac
//! phase-projection pipeline:
//!
//! - [`waveform`] - [`Waveform`], an owned sample buffer tagged with its rate
//! - [`math`] - mean/median/MAD statistics, quantiles and higher moments
//! - [`polyfit`] - polynomial least squares, trend generation and detrending
//! - [`phase`] - phase wrapping conventions used for gridding coordinates
//!
//! ## Example
//!
//! ```rust
//! use phasegrid_core::{Waveform, mad_normalize, wrap_phase, PhaseConvention};
//!
//! let wave = Waveform::new(vec![1.0, 2.0, 3.0, 10.0], 25.0).unwrap();
//! let normalized = mad_normalize(wave.samples());
//! assert_eq!(normalized.len(), 4);
//!
//! let phi = wrap_phase(7.0, PhaseConvention::Centered);
//! assert!((-std::f32::consts::PI..std::f32::consts::PI).contains(&phi));
//! ```

pub mod math;
pub mod phase;
pub mod polyfit;
pub mod waveform;

pub use math::{
    MAD_SCALE, argmax, argmin, kurtosis, mad, mad_normalize, mean, median, pearson_r, percentile,
    quantile, skewness, std_dev, variance,
};
pub use phase::{PhaseConvention, wrap_phase};
pub use polyfit::{detrend, poly_eval, polyfit, solve_linear, trend};
pub use waveform::Waveform;

/// Errors raised by core containers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    /// Sample rates must be finite and strictly positive.
    #[error("invalid sample rate {0} Hz (must be finite and > 0)")]
    InvalidSampleRate(f32),

    /// Two buffers that must line up have different lengths.
    #[error("length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        /// Required length.
        expected: usize,
        /// Length that was supplied.
        actual: usize,
    },
}
