//! Spectral estimation of the cardiac fundamental.
//!
//! Two estimates are combined: a Welch periodogram gives a coarse, robust peak
//! that is only used as a sanity bound, and a Hamming-windowed full-length
//! spectrum restricted to the plausible heart-rate band and smoothed with a
//! Savitzky-Golay filter gives the refined fundamental.

use crate::error::{AnalysisError, Result};
use crate::fft::{Fft, Window};
use phasegrid_core::{argmax, poly_eval, polyfit, solve_linear};

/// Welch power spectral density.
///
/// Hann-windowed segments of `segment_len` samples with 50% overlap, each
/// demeaned before the transform. Segments longer than the signal are
/// shortened to the signal length.
///
/// # Returns
///
/// `(frequencies, psd)` for the one-sided spectrum, `segment_len / 2 + 1`
/// bins each.
pub fn welch_psd(signal: &[f32], sample_rate: f32, segment_len: usize) -> (Vec<f32>, Vec<f32>) {
    let seg = segment_len.min(signal.len()).max(1);
    let step = (seg / 2).max(1);
    let bins = seg / 2 + 1;
    let window = Window::Hann.coefficients(seg);
    let window_power: f32 = window.iter().map(|w| w * w).sum::<f32>().max(f32::MIN_POSITIVE);
    let fft = Fft::new(seg);

    let mut psd = vec![0.0f32; bins];
    let mut segments = 0usize;
    let mut start = 0;
    while start + seg <= signal.len() {
        let chunk = &signal[start..start + seg];
        let m = phasegrid_core::mean(chunk);
        let windowed: Vec<f32> = chunk
            .iter()
            .zip(&window)
            .map(|(&x, &w)| (x - m) * w)
            .collect();
        let spectrum = fft.forward_real(&windowed);
        for (k, p) in psd.iter_mut().enumerate() {
            *p += spectrum[k].norm_sqr();
        }
        segments += 1;
        start += step;
    }

    let scale = 1.0 / (sample_rate * window_power * segments.max(1) as f32);
    for (k, p) in psd.iter_mut().enumerate() {
        // One-sided: double everything except DC and (even-length) Nyquist
        let doubled = k != 0 && !(seg % 2 == 0 && k == seg / 2);
        *p *= if doubled { 2.0 * scale } else { scale };
    }
    let freqs = (0..bins)
        .map(|k| k as f32 * sample_rate / seg as f32)
        .collect();
    (freqs, psd)
}

/// Savitzky-Golay smoothing.
///
/// Interior points use the least-squares convolution coefficients of a
/// polynomial of `order` over a centered window; the first and last half
/// windows are replaced by the polynomial fitted to the edge window.
/// `window` is forced odd and shrunk to the data length; data too short for
/// the fit is returned unchanged.
pub fn savgol_smooth(data: &[f32], window: usize, order: usize) -> Vec<f32> {
    let n = data.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    if window <= order {
        return data.to_vec();
    }
    let half = window / 2;

    let Some(coeffs) = savgol_coefficients(half, order) else {
        return data.to_vec();
    };

    let mut out = data.to_vec();
    for i in half..n - half {
        out[i] = coeffs
            .iter()
            .zip(&data[i - half..=i + half])
            .map(|(&c, &y)| c * f64::from(y))
            .sum::<f64>() as f32;
    }

    // Edges: evaluate the polynomial fitted to the first / last full window
    let axis: Vec<f64> = (0..window).map(|i| i as f64).collect();
    if let Some(fit) = polyfit(&axis, &data[..window], order) {
        for (i, v) in out.iter_mut().enumerate().take(half) {
            *v = poly_eval(&fit, i as f64) as f32;
        }
    }
    if let Some(fit) = polyfit(&axis, &data[n - window..], order) {
        for i in window - half..window {
            out[n - window + i] = poly_eval(&fit, i as f64) as f32;
        }
    }
    out
}

/// Convolution weights producing the fitted value at the window center.
fn savgol_coefficients(half: usize, order: usize) -> Option<Vec<f64>> {
    let terms = order + 1;
    let offsets: Vec<f64> = (0..=2 * half).map(|i| i as f64 - half as f64).collect();

    let mut normal = vec![vec![0.0f64; terms]; terms];
    for &x in &offsets {
        for r in 0..terms {
            for c in 0..terms {
                normal[r][c] += x.powi((r + c) as i32);
            }
        }
    }
    let mut e0 = vec![0.0; terms];
    e0[0] = 1.0;
    let v = solve_linear(normal, e0)?;
    Some(offsets.iter().map(|&x| poly_eval(&v, x)).collect())
}

/// Result of a fundamental-frequency estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralPeakEstimate {
    /// Refined fundamental in Hz.
    pub frequency: f32,
    /// Coarse Welch peak in Hz, clamped into the search band.
    pub coarse_frequency: f32,
}

impl SpectralPeakEstimate {
    /// Refined fundamental in beats per minute.
    pub fn bpm(&self) -> f32 {
        self.frequency * 60.0
    }
}

/// Estimates the cardiac fundamental within a heart-rate band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralEstimator {
    /// Lowest plausible heart rate in bpm.
    pub min_bpm: f32,
    /// Highest plausible heart rate in bpm.
    pub max_bpm: f32,
    /// Savitzky-Golay window (bins) applied to the magnitude spectrum.
    pub smooth_len: usize,
}

impl Default for SpectralEstimator {
    fn default() -> Self {
        Self {
            min_bpm: 40.0,
            max_bpm: 140.0,
            smooth_len: 101,
        }
    }
}

impl SpectralEstimator {
    /// Create an estimator for the given band.
    pub fn new(min_bpm: f32, max_bpm: f32, smooth_len: usize) -> Self {
        Self {
            min_bpm,
            max_bpm,
            smooth_len,
        }
    }

    /// Savitzky-Golay window for a one-sided spectrum of `bins` values:
    /// `smooth_len`, shortened to the longest odd length that fits.
    pub fn smoothing_window(&self, bins: usize) -> usize {
        let window = self.smooth_len.min(bins);
        if window % 2 == 0 { window.saturating_sub(1) } else { window }
    }

    /// Estimate the fundamental of `signal` sampled at `sample_rate` Hz.
    ///
    /// # Errors
    ///
    /// Empty or very short input, or an empty heart-rate band.
    pub fn estimate(&self, signal: &[f32], sample_rate: f32) -> Result<SpectralPeakEstimate> {
        let n = signal.len();
        if n < 8 {
            return Err(AnalysisError::EmptyInput("spectral estimate needs at least 8 samples"));
        }
        if self.min_bpm.is_nan() || self.min_bpm <= 0.0 || self.max_bpm <= self.min_bpm {
            return Err(AnalysisError::invalid(
                "heart rate band",
                format!("need 0 < min ({}) < max ({})", self.min_bpm, self.max_bpm),
            ));
        }

        let segment = if n > 1024 { 1024 } else { n.min(256) };
        let (freqs, psd) = welch_psd(signal, sample_rate, segment);
        let coarse_bpm = argmax(&psd)
            .map(|k| (freqs[k] * 60.0 * 100.0).round() / 100.0)
            .unwrap_or(self.min_bpm)
            .clamp(self.min_bpm, self.max_bpm);
        let coarse_frequency = coarse_bpm / 60.0;

        let mut windowed = signal.to_vec();
        Window::Hamming.apply(&mut windowed);
        let spectrum = Fft::new(n).forward_real(&windowed);
        let half = n / 2;
        let df = sample_rate / n as f32;

        let min_bin = ((self.min_bpm / (60.0 * df)).floor() as usize).min(half);
        let max_bin = ((self.max_bpm / (60.0 * df)).floor() as usize).min(half);
        let magnitude: Vec<f32> = spectrum[..half]
            .iter()
            .enumerate()
            .map(|(k, c)| if (min_bin..max_bin).contains(&k) { c.norm() } else { 0.0 })
            .collect();

        let smoothed = savgol_smooth(&magnitude, self.smoothing_window(magnitude.len()), 3);

        let frequency = if min_bin < max_bin {
            argmax(&smoothed[min_bin..max_bin])
                .filter(|&k| magnitude[min_bin + k] > 0.0 || smoothed[min_bin + k] > 0.0)
                .map_or(coarse_frequency, |k| (min_bin + k) as f32 * df)
        } else {
            coarse_frequency
        };

        if (frequency - coarse_frequency).abs() * 60.0 > 10.0 {
            tracing::debug!(
                refined_bpm = frequency * 60.0,
                coarse_bpm,
                "refined and coarse heart rate disagree"
            );
        }

        Ok(SpectralPeakEstimate {
            frequency,
            coarse_frequency,
        })
    }
}
