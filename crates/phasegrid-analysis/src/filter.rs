//! Zero-phase FFT filters with trapezoidal transfer functions.
//!
//! Physiological bands are specified by four corner frequencies: below
//! `lower_stop` the gain is 0, it ramps linearly to 1 at `lower_pass`, stays at
//! 1 up to `upper_pass` and ramps back to 0 at `upper_stop`. Either side may be
//! absent to build pure low-pass or high-pass responses.
//!
//! Filtering multiplies the full complex spectrum by the real gain curve, so
//! there is no phase distortion. To limit wrap-around at the ends of finite
//! records the input is extended by mirror reflection before the transform
//! ([`Padding::Reflect`]); periodic data such as a projected cardiac cycle uses
//! [`Padding::Cyclic`] instead and is filtered as-is.
//!
//! ```rust
//! use phasegrid_analysis::filter::TrapezoidFilter;
//! use std::f32::consts::PI;
//!
//! let rate = 25.0;
//! let signal: Vec<f32> = (0..1000)
//!     .map(|i| (2.0 * PI * 1.0 * i as f32 / rate).sin() + (2.0 * PI * 0.05 * i as f32 / rate).sin())
//!     .collect();
//! let cardiac = TrapezoidFilter::cardiac().apply(&signal, rate);
//! assert_eq!(cardiac.len(), signal.len());
//! ```

use crate::fft::{Fft, bin_frequency};

/// Lower edge of the default cardiac pass band in Hz (≈ 40 bpm).
pub const CARDIAC_LOWER_PASS: f32 = 0.66;
/// Upper edge of the default cardiac pass band in Hz (180 bpm).
pub const CARDIAC_UPPER_PASS: f32 = 3.0;
/// Lower edge of the respiratory pass band in Hz.
pub const RESP_LOWER_PASS: f32 = 0.1;
/// Upper edge of the respiratory pass band in Hz.
pub const RESP_UPPER_PASS: f32 = 0.5;

/// How the record is extended before the transform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Padding {
    /// Mirror-reflect `seconds` of signal onto both ends (capped at the
    /// record length minus one sample).
    Reflect {
        /// Pad duration in seconds.
        seconds: f32,
    },
    /// Treat the record as one period of a periodic signal.
    Cyclic,
}

impl Default for Padding {
    fn default() -> Self {
        Padding::Reflect { seconds: 30.0 }
    }
}

/// One transition band of a trapezoid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    /// Frequency (Hz) where the gain reaches 1.
    pub pass: f32,
    /// Frequency (Hz) where the gain reaches 0.
    pub stop: f32,
}

/// Trapezoidal band filter applied in the frequency domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapezoidFilter {
    lower: Option<Edge>,
    upper: Option<Edge>,
    padding: Padding,
}

impl TrapezoidFilter {
    /// Arbitrary band from four corner frequencies in Hz.
    ///
    /// A `lower_pass` of zero disables the high-pass side.
    pub fn band(lower_stop: f32, lower_pass: f32, upper_pass: f32, upper_stop: f32) -> Self {
        let lower = (lower_pass > 0.0).then_some(Edge {
            pass: lower_pass,
            stop: lower_stop.min(lower_pass),
        });
        Self {
            lower,
            upper: Some(Edge {
                pass: upper_pass,
                stop: upper_stop.max(upper_pass),
            }),
            padding: Padding::default(),
        }
    }

    /// Band pass with 10% transition bands outside the pass edges.
    pub fn bandpass(lower_pass: f32, upper_pass: f32) -> Self {
        Self::band(0.9 * lower_pass, lower_pass, upper_pass, 1.1 * upper_pass)
    }

    /// Low pass: unity below `pass`, zero above `stop`.
    pub fn lowpass(pass: f32, stop: f32) -> Self {
        Self::band(0.0, 0.0, pass, stop)
    }

    /// High pass: zero below `stop`, unity above `pass`.
    pub fn highpass(stop: f32, pass: f32) -> Self {
        Self {
            lower: Some(Edge {
                pass,
                stop: stop.min(pass),
            }),
            upper: None,
            padding: Padding::default(),
        }
    }

    /// The cardiac band, 0.66-3.0 Hz.
    pub fn cardiac() -> Self {
        Self::bandpass(CARDIAC_LOWER_PASS, CARDIAC_UPPER_PASS)
    }

    /// The respiratory band, 0.1-0.5 Hz.
    pub fn respiratory() -> Self {
        Self::bandpass(RESP_LOWER_PASS, RESP_UPPER_PASS)
    }

    /// Replace the padding strategy.
    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    /// Replace the upper edge (`None` removes the low-pass side).
    pub fn with_upper(mut self, upper: Option<Edge>) -> Self {
        self.upper = upper;
        self
    }

    /// Lower transition band, if any.
    pub fn lower(&self) -> Option<Edge> {
        self.lower
    }

    /// Upper transition band, if any.
    pub fn upper(&self) -> Option<Edge> {
        self.upper
    }

    /// Gain of the transfer function at `freq` Hz.
    pub fn gain(&self, freq: f32) -> f32 {
        let mut g = 1.0;
        if let Some(Edge { pass, stop }) = self.lower {
            if freq < stop || (freq < pass && pass <= stop) {
                return 0.0;
            }
            if freq < pass {
                g *= (freq - stop) / (pass - stop);
            }
        }
        if let Some(Edge { pass, stop }) = self.upper {
            if freq > stop || (freq > pass && stop <= pass) {
                return 0.0;
            }
            if freq > pass {
                g *= (stop - freq) / (stop - pass);
            }
        }
        g
    }

    /// Filter `signal` sampled at `sample_rate` Hz.
    pub fn apply(&self, signal: &[f32], sample_rate: f32) -> Vec<f32> {
        apply_gain(signal, sample_rate, self.padding, |f| self.gain(f))
    }
}

/// Band-stop filter removing a fundamental and all of its harmonics below
/// Nyquist.
///
/// Used to suppress the slice-acquisition frequency (1/TR) and its harmonics
/// from interleaved slice-average signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicNotch {
    fundamental: f32,
    width_pct: f32,
}

impl HarmonicNotch {
    /// Notch `fundamental` Hz and its harmonics, each `width_pct` percent of
    /// the harmonic frequency wide.
    pub fn new(fundamental: f32, width_pct: f32) -> Self {
        Self {
            fundamental,
            width_pct,
        }
    }

    /// True when the notch would remove nothing.
    pub fn is_disabled(&self) -> bool {
        self.width_pct <= 0.0 || self.fundamental <= 0.0
    }

    /// Gain at `freq` for a transform of `len` samples at `sample_rate`.
    ///
    /// Each notch spans at least the bins on either side of the harmonic, so
    /// a line that falls between bins is removed along with its nearest
    /// neighbours.
    pub fn gain(&self, freq: f32, sample_rate: f32, len: usize) -> f32 {
        if self.is_disabled() {
            return 1.0;
        }
        let nyquist = sample_rate / 2.0;
        let min_width = 2.0 * sample_rate / len.max(1) as f32;
        let mut harmonic = self.fundamental;
        while harmonic <= nyquist {
            let half = 0.5 * (self.width_pct / 100.0 * harmonic).max(min_width);
            if (freq - harmonic).abs() <= half {
                return 0.0;
            }
            harmonic += self.fundamental;
        }
        1.0
    }

    /// Remove the harmonic series from `signal`.
    ///
    /// The record is transformed without padding: mirror reflection breaks
    /// the phase of a steady line at each seam and spreads it across bins no
    /// narrow notch can reach.
    pub fn apply(&self, signal: &[f32], sample_rate: f32) -> Vec<f32> {
        if self.is_disabled() {
            return signal.to_vec();
        }
        let len = signal.len();
        apply_gain(signal, sample_rate, Padding::Cyclic, |f| self.gain(f, sample_rate, len))
    }
}

/// Mirror-reflect `pad` samples onto each end (edge sample not repeated).
fn reflect_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let n = signal.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    out.extend((1..=pad).rev().map(|i| signal[i]));
    out.extend_from_slice(signal);
    out.extend((0..pad).map(|i| signal[n - 2 - i]));
    out
}

/// Multiply the spectrum of `signal` by `gain(frequency)` and transform back.
pub(crate) fn apply_gain(
    signal: &[f32],
    sample_rate: f32,
    padding: Padding,
    gain: impl Fn(f32) -> f32,
) -> Vec<f32> {
    let n = signal.len();
    if n < 2 {
        return signal.to_vec();
    }

    let pad = match padding {
        Padding::Reflect { seconds } => ((seconds * sample_rate).round().max(0.0) as usize).min(n - 1),
        Padding::Cyclic => 0,
    };
    let extended = if pad > 0 {
        reflect_pad(signal, pad)
    } else {
        signal.to_vec()
    };

    let size = extended.len();
    let fft = Fft::new(size);
    let mut spectrum = fft.forward_real(&extended);
    for (k, bin) in spectrum.iter_mut().enumerate() {
        *bin *= gain(bin_frequency(k, size, sample_rate));
    }
    let filtered = fft.inverse_real(spectrum);
    filtered[pad..pad + n].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, rate: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / rate).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn gain_is_trapezoidal() {
        let f = TrapezoidFilter::band(0.5, 1.0, 2.0, 3.0);
        assert_eq!(f.gain(0.2), 0.0);
        assert!((f.gain(0.75) - 0.5).abs() < 1e-6);
        assert_eq!(f.gain(1.5), 1.0);
        assert!((f.gain(2.5) - 0.5).abs() < 1e-6);
        assert_eq!(f.gain(3.5), 0.0);
    }

    #[test]
    fn lowpass_keeps_dc() {
        let f = TrapezoidFilter::lowpass(0.4, 0.44);
        assert_eq!(f.gain(0.0), 1.0);
        assert_eq!(f.gain(1.0), 0.0);
    }

    #[test]
    fn cardiac_band_rejects_drift_and_keeps_pulse() {
        let rate = 25.0;
        let pulse = sine(1.2, rate, 1500);
        let drift = sine(0.05, rate, 1500);
        let mixed: Vec<f32> = pulse.iter().zip(&drift).map(|(a, b)| a + 2.0 * b).collect();

        let out = TrapezoidFilter::cardiac().apply(&mixed, rate);
        let err: Vec<f32> = out.iter().zip(&pulse).map(|(a, b)| a - b).collect();
        // Ignore the first and last seconds where reflection is imperfect
        assert!(rms(&err[25..1475]) < 0.05, "residual {}", rms(&err[25..1475]));
    }

    #[test]
    fn cyclic_padding_filters_periodic_record() {
        let rate = 32.0;
        let base = sine(1.0, rate, 32);
        let noisy: Vec<f32> = base
            .iter()
            .zip(sine(12.0, rate, 32))
            .map(|(a, b)| a + b)
            .collect();
        let out = TrapezoidFilter::lowpass(5.0, 5.0)
            .with_padding(Padding::Cyclic)
            .apply(&noisy, rate);
        for (a, b) in out.iter().zip(&base) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn harmonic_notch_removes_series() {
        let rate = 15.0;
        let n = 3000;
        let tr_line = sine(0.5, rate, n);
        let second = sine(1.0, rate, n);
        let keep = sine(1.27, rate, n);
        let mixed: Vec<f32> = (0..n).map(|i| tr_line[i] + second[i] + keep[i]).collect();

        let out = HarmonicNotch::new(0.5, 1.5).apply(&mixed, rate);
        let err: Vec<f32> = out.iter().zip(&keep).map(|(a, b)| a - b).collect();
        assert!(rms(&err[150..n - 150]) < 0.1, "residual {}", rms(&err[150..n - 150]));
    }

    #[test]
    fn harmonic_notch_silences_lone_fundamental() {
        let rate = 15.0;
        let n = 3000;
        let out = HarmonicNotch::new(0.5, 1.5).apply(&sine(0.5, rate, n), rate);
        let peak = out.iter().fold(0.0f32, |m, x| m.max(x.abs()));
        assert!(peak < 1e-3, "peak {peak}");
    }

    #[test]
    fn notch_spans_neighbouring_bins() {
        let notch = HarmonicNotch::new(0.5, 0.1);
        // 100 samples at 10 Hz gives 0.1 Hz bins
        assert_eq!(notch.gain(0.5, 10.0, 100), 0.0);
        assert_eq!(notch.gain(0.58, 10.0, 100), 0.0);
        assert_eq!(notch.gain(0.75, 10.0, 100), 1.0);
    }

    #[test]
    fn disabled_notch_is_identity() {
        let x = sine(0.5, 10.0, 100);
        assert_eq!(HarmonicNotch::new(0.5, -1.0).apply(&x, 10.0), x);
    }

    #[test]
    fn reflect_pad_mirrors_without_edge() {
        assert_eq!(
            reflect_pad(&[1.0, 2.0, 3.0, 4.0], 2),
            vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]
        );
    }
}
