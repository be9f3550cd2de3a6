//! Windowed signal quality indices for pulse waveforms.
//!
//! Skewness, kurtosis and approximate entropy are computed in a sliding
//! window centered on every sample of a detrended waveform, after
//! M. Elgendi, "Optimal Signal Quality Index for Photoplethysmogram Signals",
//! *Bioengineering* 3(4), 2016.

use crate::error::{AnalysisError, Result};
use phasegrid_core::{detrend, kurtosis, mean, skewness, std_dev};

/// Window lengths and detrending for [`signal_quality`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityConfig {
    /// Skewness window (s).
    pub skew_window_secs: f32,
    /// Kurtosis window (s).
    pub kurtosis_window_secs: f32,
    /// Approximate entropy window (s).
    pub entropy_window_secs: f32,
    /// Polynomial order removed before windowing.
    pub detrend_order: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            skew_window_secs: 5.0,
            kurtosis_window_secs: 60.0,
            entropy_window_secs: 1.0,
            detrend_order: 8,
        }
    }
}

/// One windowed index: the per-sample series and its summary.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityIndex {
    /// Mean over all samples.
    pub mean: f32,
    /// Standard deviation over all samples.
    pub std: f32,
    /// Value at every sample.
    pub series: Vec<f32>,
}

impl QualityIndex {
    fn from_series(series: Vec<f32>) -> Self {
        Self {
            mean: mean(&series),
            std: std_dev(&series),
            series,
        }
    }
}

/// Skewness, kurtosis and entropy indices of a waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalQuality {
    /// Windowed skewness.
    pub skewness: QualityIndex,
    /// Windowed Pearson kurtosis.
    pub kurtosis: QualityIndex,
    /// Windowed approximate entropy.
    pub entropy: QualityIndex,
}

/// Window length in samples, forced odd.
fn odd_window(secs: f32, sample_rate: f32) -> usize {
    let n = (secs * sample_rate).round().max(1.0) as usize;
    n | 1
}

/// Apply `f` to the window `[i - w/2, min(i + w/2, len - 1)]` around every sample.
fn windowed(x: &[f32], window: usize, f: impl Fn(&[f32]) -> f32) -> Vec<f32> {
    let half = window / 2;
    (0..x.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half).min(x.len() - 1);
            f(&x[start..=end])
        })
        .collect()
}

/// Approximate entropy `ApEn(m, r)` of `x` (Pincus 1991).
///
/// Templates match when their Chebyshev distance is at most `r`. Returns 0.0
/// when `x` is too short to form a template of length `m + 1`.
pub fn approximate_entropy(x: &[f32], m: usize, r: f32) -> f32 {
    let n = x.len();
    if m == 0 || n <= m {
        return 0.0;
    }
    let phi = |m: usize| -> f64 {
        let count = n - m + 1;
        let mut total = 0.0f64;
        for i in 0..count {
            let matches = (0..count)
                .filter(|&j| (0..m).all(|k| (x[i + k] - x[j + k]).abs() <= r))
                .count();
            total += (matches as f64 / count as f64).ln();
        }
        total / count as f64
    };
    (phi(m + 1) - phi(m)).abs() as f32
}

/// Compute the windowed quality indices of `waveform`.
///
/// # Errors
///
/// Empty waveform or a non-positive sample rate.
pub fn signal_quality(waveform: &[f32], sample_rate: f32, config: &QualityConfig) -> Result<SignalQuality> {
    if waveform.is_empty() {
        return Err(AnalysisError::EmptyInput("quality waveform"));
    }
    if sample_rate.is_nan() || sample_rate <= 0.0 {
        return Err(AnalysisError::invalid("sample_rate", format!("{sample_rate}")));
    }
    let detrended = detrend(waveform, config.detrend_order, true);

    let skew_w = odd_window(config.skew_window_secs, sample_rate);
    let kurt_w = odd_window(config.kurtosis_window_secs, sample_rate);
    let ent_w = odd_window(config.entropy_window_secs, sample_rate);
    tracing::debug!(skew_w, kurt_w, ent_w, "quality windows (samples)");

    let quality = SignalQuality {
        skewness: QualityIndex::from_series(windowed(&detrended, skew_w, skewness)),
        kurtosis: QualityIndex::from_series(windowed(&detrended, kurt_w, kurtosis)),
        entropy: QualityIndex::from_series(windowed(&detrended, ent_w, |w| {
            approximate_entropy(w, 2, 0.2 * std_dev(w))
        })),
    };
    tracing::info!(
        skewness = quality.skewness.mean,
        kurtosis = quality.kurtosis.mean,
        entropy = quality.entropy.mean,
        "signal quality"
    );
    Ok(quality)
}
