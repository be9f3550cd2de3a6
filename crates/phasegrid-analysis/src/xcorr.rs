//! Cross-correlation lag estimation with sub-sample Gaussian refinement.
//!
//! Cross-correlation measures the similarity between two signals as a function of the
//! time-shift (lag) applied to one of them:
//!
//! ```text
//! R_xy(τ) = Σ_{n} x[n] · y[n + τ]
//! ```
//!
//! R_xy peaks at lag τ₀ when y is a delayed version of x by τ₀ samples,
//! i.e. y\[n\] = x\[n - τ₀\].
//!
//! [`CorrelationAligner`] uses this to measure the delay between an external
//! cardiac recording and the image-derived cardiac waveform. Both are band-passed
//! to the cardiac band and normalized so the zero-lag autocorrelation is 1, the
//! full correlation is searched within a window, and the peak is refined with a
//! Gaussian fit over its half-maximum neighborhood.
//!
//! # References
//!
//! - Oppenheim & Schafer, "Discrete-Time Signal Processing" (3rd ed.), section 2.8.

use crate::error::{AnalysisError, Result};
use crate::fft::{Fft, Window};
use crate::filter::TrapezoidFilter;
use crate::gaussfit::fit_gaussian;
use crate::resample::time_shift;
use phasegrid_core::{detrend, std_dev};
use rustfft::num_complex::Complex;
use std::fmt;

/// FFT cross-correlation for lags `-max_lag..=max_lag`.
///
/// # Returns
///
/// `Vec<f32>` of length `2 * max_lag + 1`, entry `i` holding R_xy at lag
/// `i - max_lag`. Lags beyond the signal length are zero.
///
/// ```text
/// R_xy = IFFT( conj(FFT(x)) · FFT(y) )
/// ```
pub fn xcorr_fft(x: &[f32], y: &[f32], max_lag: usize) -> Vec<f32> {
    // Zero-pad to at least len(x) + len(y) - 1 to avoid circular aliasing
    let min_fft_size = x.len() + y.len().saturating_sub(1).max(1);
    let fft_size = min_fft_size.next_power_of_two().max(2);
    let fft = Fft::new(fft_size);

    let mut buf_x = fft.forward_real(x);
    let buf_y = fft.forward_real(y);
    for (cx, cy) in buf_x.iter_mut().zip(&buf_y) {
        *cx = cx.conj() * cy;
    }
    fft.inverse_complex(&mut buf_x);

    // Positive lags sit at the front of the circular result, negative lags wrap
    // to the back
    let sig_len = x.len().max(y.len()) as isize;
    (-(max_lag as isize)..=(max_lag as isize))
        .map(|lag| {
            if lag.abs() >= sig_len {
                return 0.0;
            }
            let idx = if lag >= 0 {
                lag as usize
            } else {
                (fft_size as isize + lag) as usize
            };
            buf_x.get(idx).map_or(0.0, |c: &Complex<f32>| c.re)
        })
        .collect()
}

/// Full cross-correlation over the common length `n` of `x` and `y`.
///
/// `2n - 1` values for lags `-(n-1)..=(n-1)`.
pub fn xcorr_full(x: &[f32], y: &[f32]) -> Vec<f32> {
    let n = x.len().min(y.len());
    if n == 0 {
        return Vec::new();
    }
    xcorr_fft(&x[..n], &y[..n], n - 1)
}

/// Prepare a signal for correlation.
///
/// Cubic detrend, Hamming window, unit standard deviation, then division by
/// `sqrt(n)` so that the zero-lag autocorrelation is 1. A zero-variance
/// signal becomes all zeros.
pub fn corr_normalize(signal: &[f32]) -> Vec<f32> {
    let mut x = detrend(signal, 3, true);
    Window::Hamming.apply(&mut x);
    let m = phasegrid_core::mean(&x);
    let s = std_dev(&x);
    if s <= 0.0 {
        return vec![0.0; x.len()];
    }
    let scale = 1.0 / (s * (x.len() as f32).sqrt());
    x.iter().map(|&v| (v - m) * scale).collect()
}

/// Why a correlation peak was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitFailure {
    /// The maximum sits on the edge of the search window.
    EdgePeak,
    /// The peak height is below the acceptance threshold.
    LowAmplitude,
    /// The fitted width is non-positive or above the limit.
    BadWidth,
    /// The Gaussian refinement did not converge.
    NotConverged,
    /// The refined lag falls outside the search window.
    BadLag,
}

impl FitFailure {
    /// Stable numeric code for run metadata.
    pub fn code(self) -> u32 {
        match self {
            FitFailure::EdgePeak => 1,
            FitFailure::LowAmplitude => 2,
            FitFailure::BadWidth => 4,
            FitFailure::NotConverged => 8,
            FitFailure::BadLag => 16,
        }
    }
}

impl fmt::Display for FitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FitFailure::EdgePeak => "peak at search window edge",
            FitFailure::LowAmplitude => "peak amplitude too low",
            FitFailure::BadWidth => "peak width out of range",
            FitFailure::NotConverged => "peak fit did not converge",
            FitFailure::BadLag => "lag outside search window",
        })
    }
}

/// Outcome of an alignment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationResult {
    /// Lag in seconds; positive when the reference is delayed relative to the
    /// candidate.
    pub lag_secs: f32,
    /// Correlation at the peak.
    pub peak_value: f32,
    /// Gaussian sigma of the peak in seconds.
    pub width_secs: f32,
    /// True when no failure was detected.
    pub valid: bool,
    /// First failure detected, if any.
    pub failure: Option<FitFailure>,
}

impl CorrelationResult {
    /// Failure code, 0 for a valid result.
    pub fn failure_code(&self) -> u32 {
        self.failure.map_or(0, FitFailure::code)
    }
}

/// Alignment parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignConfig {
    /// Lags beyond ± this many seconds are not searched.
    pub search_range_secs: f32,
    /// Peaks wider than this (Gaussian sigma, seconds) are rejected.
    pub width_limit_secs: f32,
    /// Peaks lower than this are rejected.
    pub min_peak: f32,
    /// Refine the peak with a Gaussian fit.
    pub refine: bool,
}

impl Default for AlignConfig {
    fn default() -> Self {
        Self {
            search_range_secs: 5.0,
            width_limit_secs: 3.0,
            min_peak: 0.0,
            refine: true,
        }
    }
}

/// Measures the delay between two cardiac waveforms.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CorrelationAligner {
    config: AlignConfig,
}

impl CorrelationAligner {
    /// Create an aligner.
    pub fn new(config: AlignConfig) -> Self {
        Self { config }
    }

    /// Parameters in use.
    pub fn config(&self) -> &AlignConfig {
        &self.config
    }

    /// Measure the lag of `reference` relative to `candidate`.
    ///
    /// Both inputs are truncated to their common length and share `sample_rate`.
    ///
    /// # Errors
    ///
    /// Fewer than three common samples or a non-positive sample rate.
    pub fn align(&self, reference: &[f32], candidate: &[f32], sample_rate: f32) -> Result<CorrelationResult> {
        let n = reference.len().min(candidate.len());
        if n < 3 {
            return Err(AnalysisError::EmptyInput("alignment needs at least 3 common samples"));
        }
        if sample_rate.is_nan() || sample_rate <= 0.0 {
            return Err(AnalysisError::invalid("sample_rate", format!("{sample_rate} Hz")));
        }

        let band = TrapezoidFilter::cardiac();
        let y = corr_normalize(&band.apply(&reference[..n], sample_rate));
        let x = corr_normalize(&band.apply(&candidate[..n], sample_rate));

        let dt = 1.0 / sample_rate;
        let max_lag = ((self.config.search_range_secs * sample_rate).round() as usize).min(n - 1);
        let corr = xcorr_fft(&x, &y, max_lag);

        let (peak_idx, &peak) = corr
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .ok_or(AnalysisError::EmptyInput("correlation"))?;
        let lag_of = |idx: f64| (idx - max_lag as f64) as f32 * dt;

        // Half-maximum neighborhood, at least one sample either side
        let half = 0.5 * peak;
        let mut lo = peak_idx;
        while lo > 0 && corr[lo - 1] > half {
            lo -= 1;
        }
        let mut hi = peak_idx;
        while hi + 1 < corr.len() && corr[hi + 1] > half {
            hi += 1;
        }
        lo = lo.min(peak_idx.saturating_sub(1));
        hi = hi.max((peak_idx + 1).min(corr.len() - 1));
        let fwhm_samples = (hi - lo).max(1) as f64;

        let mut result = CorrelationResult {
            lag_secs: lag_of(peak_idx as f64),
            peak_value: peak,
            width_secs: (fwhm_samples / 2.355) as f32 * dt,
            valid: true,
            failure: None,
        };

        let failure = if peak_idx == 0 || peak_idx == corr.len() - 1 {
            Some(FitFailure::EdgePeak)
        } else if peak <= self.config.min_peak {
            Some(FitFailure::LowAmplitude)
        } else if self.config.refine {
            self.refine(&corr, lo, hi, peak_idx, &mut result, max_lag, dt)
        } else {
            None
        };

        let failure = failure.or_else(|| {
            if result.width_secs <= 0.0 || result.width_secs > self.config.width_limit_secs {
                Some(FitFailure::BadWidth)
            } else if result.lag_secs.abs() > self.config.search_range_secs + dt {
                Some(FitFailure::BadLag)
            } else {
                None
            }
        });

        result.valid = failure.is_none();
        result.failure = failure;
        tracing::debug!(
            lag_secs = result.lag_secs,
            peak = result.peak_value,
            width_secs = result.width_secs,
            failure = result.failure_code(),
            "cross-correlation peak"
        );
        Ok(result)
    }

    #[allow(clippy::too_many_arguments)]
    fn refine(
        &self,
        corr: &[f32],
        lo: usize,
        hi: usize,
        peak_idx: usize,
        result: &mut CorrelationResult,
        max_lag: usize,
        dt: f32,
    ) -> Option<FitFailure> {
        let xs: Vec<f64> = (lo..=hi).map(|i| i as f64).collect();
        let ys: Vec<f64> = corr[lo..=hi].iter().map(|&v| f64::from(v)).collect();
        let initial = (
            f64::from(corr[peak_idx]),
            peak_idx as f64,
            ((hi - lo).max(1) as f64 / 2.355).max(0.5),
        );
        let Some(fit) = fit_gaussian(&xs, &ys, initial) else {
            return Some(FitFailure::NotConverged);
        };
        // The fit may only refine the peak, not move it to another sample
        if (fit.center - peak_idx as f64).abs() > 1.0 {
            return Some(FitFailure::NotConverged);
        }
        result.lag_secs = (fit.center - max_lag as f64) as f32 * dt;
        result.peak_value = fit.amplitude as f32;
        result.width_secs = fit.sigma as f32 * dt;
        None
    }

    /// Shift `reference` by the measured lag so it lines up with the candidate.
    pub fn apply_alignment(reference: &[f32], result: &CorrelationResult, sample_rate: f32) -> Vec<f32> {
        time_shift(reference, -f64::from(result.lag_secs) * f64::from(sample_rate))
    }
}
