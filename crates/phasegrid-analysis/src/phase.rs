//! Instantaneous cardiac phase.
//!
//! The fundamental of the cardiac waveform is isolated with a narrow band-pass,
//! its analytic-signal angle is unwrapped into a continuous phase, and outlier
//! excursions from a slow polynomial trend are suppressed. The resulting phase
//! is then read off at the acquisition time of every slice and wrapped into the
//! gridding interval.

use crate::filter::TrapezoidFilter;
use crate::hilbert::{HilbertTransform, unwrap_phase};
use crate::resample::interp_linear;
use phasegrid_core::{PhaseConvention, mad, mad_normalize, trend, wrap_phase};

/// Unwrapped phase and amplitude envelope of a narrow-band waveform.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PhaseTrace {
    /// Continuous phase in radians.
    pub phase: Vec<f32>,
    /// Instantaneous amplitude.
    pub amplitude: Vec<f32>,
}

impl PhaseTrace {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.phase.len()
    }

    /// True when the trace holds no samples.
    pub fn is_empty(&self) -> bool {
        self.phase.is_empty()
    }

    /// Mean instantaneous frequency in Hz between samples `start` and `end`.
    pub fn mean_frequency(&self, sample_rate: f32, start: usize, end: usize) -> f32 {
        let end = end.min(self.phase.len().saturating_sub(1));
        if end <= start {
            return 0.0;
        }
        let cycles = (self.phase[end] - self.phase[start]) / std::f32::consts::TAU;
        cycles * sample_rate / (end - start) as f32
    }
}

/// Phase extraction and conditioning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseEngine {
    /// Order of the polynomial trend fitted to the unwrapped phase.
    pub trend_order: usize,
    /// Residuals beyond this many robust deviations are replaced.
    pub outlier_devs: f32,
}

impl Default for PhaseEngine {
    fn default() -> Self {
        Self {
            trend_order: 3,
            outlier_devs: 3.0,
        }
    }
}

impl PhaseEngine {
    /// Analytic phase and amplitude of a narrow-band signal.
    pub fn extract_phase(&self, narrowband: &[f32]) -> PhaseTrace {
        let (wrapped, amplitude) = HilbertTransform::new(narrowband.len()).phase_and_amplitude(narrowband);
        PhaseTrace {
            phase: unwrap_phase(&wrapped),
            amplitude,
        }
    }

    /// Suppress outlier excursions from the slow phase trend.
    ///
    /// A polynomial of `trend_order` is fitted over a centered time axis.
    /// Residuals further than `outlier_devs` MAD-sigmas from the median residual
    /// are replaced by that median; the trend is then added back.
    pub fn detrend_phase(&self, phase: &[f32]) -> Vec<f32> {
        let fitted = trend(phase, self.trend_order, true);
        let mut residual: Vec<f32> = phase.iter().zip(&fitted).map(|(p, t)| p - t).collect();
        let (center, sigma) = mad(&residual);
        let limit = self.outlier_devs * sigma;
        let mut replaced = 0usize;
        if limit > 0.0 {
            for r in &mut residual {
                if (*r - center).abs() > limit {
                    *r = center;
                    replaced += 1;
                }
            }
        }
        if replaced > 0 {
            tracing::debug!(replaced, "phase outliers replaced");
        }
        residual.iter().zip(&fitted).map(|(r, t)| r + t).collect()
    }

    /// Read the phase off at `target_times` and wrap it.
    ///
    /// Linear interpolation of the continuous phase, extended linearly beyond
    /// the source span.
    pub fn resample_phase(
        &self,
        phase: &[f32],
        source_times: &[f64],
        target_times: &[f64],
        convention: PhaseConvention,
    ) -> Vec<f32> {
        interp_linear(source_times, phase, target_times, true)
            .into_iter()
            .map(|p| wrap_phase(p, convention))
            .collect()
    }
}

/// Band-pass a waveform tightly around its fundamental `f0` Hz and
/// MAD-normalize it.
pub fn isolate_fundamental(signal: &[f32], sample_rate: f32, f0: f32) -> Vec<f32> {
    let lower = 0.71 * f0;
    let upper = 1.4 * f0;
    let filtered = TrapezoidFilter::band(0.9 * lower, lower, upper, 1.1 * upper).apply(signal, sample_rate);
    mad_normalize(&filtered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{PI, TAU};

    fn sine(freq: f32, rate: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / rate).sin())
            .collect()
    }

    #[test]
    fn phase_advances_at_signal_frequency() {
        let rate = 25.0;
        let x = sine(1.2, rate, 1500);
        let trace = PhaseEngine::default().extract_phase(&x);
        assert_eq!(trace.len(), 1500);
        let f = trace.mean_frequency(rate, 250, 1250);
        assert!((f - 1.2).abs() < 0.01, "mean frequency {f}");
    }

    #[test]
    fn detrend_keeps_smooth_phase_and_drops_spike() {
        let engine = PhaseEngine::default();
        let mut phase: Vec<f32> = (0..500).map(|i| 0.3 * i as f32 + 1e-5 * (i * i) as f32).collect();
        let clean = phase.clone();
        // Ripple gives the residual a nonzero spread
        for (i, p) in phase.iter_mut().enumerate() {
            *p += 0.1 * (i as f32 * 0.7).sin();
        }
        phase[250] += 20.0;

        let out = engine.detrend_phase(&phase);
        assert!((out[250] - clean[250]).abs() < 0.25, "spike survived: {}", out[250] - clean[250]);
        assert!((out[100] - phase[100]).abs() < 1e-3);
    }

    #[test]
    fn resample_wraps_into_convention() {
        let engine = PhaseEngine::default();
        let src: Vec<f64> = (0..100).map(|i| i as f64 * 0.1).collect();
        let phase: Vec<f32> = src.iter().map(|&t| (TAU as f64 * t) as f32).collect();
        let dst = [0.05, 2.5, 12.0];

        let centered = engine.resample_phase(&phase, &src, &dst, PhaseConvention::Centered);
        assert!(centered.iter().all(|p| (-PI..PI).contains(p)));
        assert!((centered[0] - 0.1 * PI).abs() < 1e-3);
        // 2.5 cycles lands on the ±π seam
        assert!((centered[1].cos() + 1.0).abs() < 1e-3);

        let positive = engine.resample_phase(&phase, &src, &dst, PhaseConvention::NonCentered);
        assert!(positive.iter().all(|p| (0.0..TAU).contains(p)));
        // Extrapolated 12 s is a whole number of cycles
        assert!(positive[2] < 1e-2 || positive[2] > TAU - 1e-2);
    }

    #[test]
    fn isolate_fundamental_rejects_harmonics() {
        let rate = 25.0;
        let n = 1500;
        let fundamental = sine(1.0, rate, n);
        let x: Vec<f32> = fundamental
            .iter()
            .zip(sine(3.0, rate, n))
            .map(|(a, b)| a + b)
            .collect();
        let iso = isolate_fundamental(&x, rate, 1.0);
        let r = phasegrid_core::pearson_r(&iso[100..1400], &fundamental[100..1400]);
        assert!(r > 0.99, "correlation {r}");
    }
}
