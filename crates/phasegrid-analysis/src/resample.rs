//! Arbitrary-rate resampling, linear interpolation and fractional time shifts.
//!
//! Physiological recordings arrive at arbitrary rates (often hundreds of Hz)
//! and are moved onto three grids during a run: the standard analysis rate, the
//! slice acquisition times, and the upsampled phase axis. Downsampling applies
//! a windowed-sinc anti-aliasing lowpass first; the new samples are then read
//! off by linear interpolation at the target times.
//!
//! The anti-aliasing lowpass uses a windowed-sinc design:
//!   `h[n] = sinc(cutoff * (n - M/2)) * w[n]`
//! where `w[n]` is a Blackman window and the result is normalized to unity DC gain.
//!
//! Reference: A. V. Oppenheim and R. W. Schafer, *Discrete-Time Signal Processing*,
//! 3rd ed., Prentice Hall, 2009, Section 7.6.
//!
//! # Example
//!
//! ```rust
//! use phasegrid_analysis::resample::resample_to_rate;
//!
//! let signal: Vec<f32> = (0..1000)
//!     .map(|i| (2.0 * std::f32::consts::PI * 1.0 * i as f32 / 100.0).sin())
//!     .collect();
//! let resampled = resample_to_rate(&signal, 100.0, 25.0);
//! assert_eq!(resampled.len(), 250);
//! ```

use std::f32::consts::PI;

/// Compute windowed-sinc lowpass FIR coefficients.
///
/// # Arguments
///
/// * `num_taps` - Number of filter taps. Odd tap counts produce a symmetric
///   Type I filter.
/// * `cutoff` - Normalized cutoff frequency in (0.0, 1.0], where 1.0 is Nyquist.
///
/// # Returns
///
/// FIR coefficient vector of length `num_taps`, normalized to sum = 1.0.
pub fn design_lowpass(num_taps: usize, cutoff: f32) -> Vec<f32> {
    if num_taps == 0 {
        return Vec::new();
    }

    let m = num_taps - 1;
    let mut coeffs: Vec<f32> = (0..num_taps)
        .map(|n| {
            let x = n as f32 - m as f32 / 2.0;
            let sinc = if x.abs() < 1e-7 {
                cutoff
            } else {
                (PI * cutoff * x).sin() / (PI * x)
            };
            let window = if m == 0 {
                1.0
            } else {
                let phase = 2.0 * PI * n as f32 / m as f32;
                0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
            };
            sinc * window
        })
        .collect();

    let sum: f32 = coeffs.iter().sum();
    if sum.abs() > 1e-10 {
        for c in &mut coeffs {
            *c /= sum;
        }
    }
    coeffs
}

/// Apply a linear-phase FIR filter, compensating its delay.
///
/// Samples beyond either end are held at the edge value so constant signals
/// pass through unchanged.
pub fn apply_fir(signal: &[f32], coeffs: &[f32]) -> Vec<f32> {
    if coeffs.is_empty() || signal.is_empty() {
        return signal.to_vec();
    }

    let n = signal.len() as isize;
    let half_delay = ((coeffs.len() - 1) / 2) as isize;
    (0..n)
        .map(|i| {
            coeffs
                .iter()
                .enumerate()
                .map(|(k, &c)| {
                    let j = (i + k as isize - half_delay).clamp(0, n - 1);
                    c * signal[j as usize]
                })
                .sum()
        })
        .collect()
}

/// Linearly interpolate `(src_times, values)` at `dst_times`.
///
/// `src_times` must be increasing. Outside the source span the result is the
/// edge value, or the extension of the first / last segment when
/// `extrapolate` is set.
pub fn interp_linear(src_times: &[f64], values: &[f32], dst_times: &[f64], extrapolate: bool) -> Vec<f32> {
    let n = src_times.len().min(values.len());
    match n {
        0 => return vec![0.0; dst_times.len()],
        1 => return vec![values[0]; dst_times.len()],
        _ => {}
    }
    let src = &src_times[..n];

    let segment = |k: usize, t: f64| -> f32 {
        let (t0, t1) = (src[k], src[k + 1]);
        let (y0, y1) = (f64::from(values[k]), f64::from(values[k + 1]));
        let span = t1 - t0;
        if span.abs() < f64::EPSILON {
            return y0 as f32;
        }
        (y0 + (y1 - y0) * (t - t0) / span) as f32
    };

    dst_times
        .iter()
        .map(|&t| {
            if t <= src[0] {
                if extrapolate { segment(0, t) } else { values[0] }
            } else if t >= src[n - 1] {
                if extrapolate { segment(n - 2, t) } else { values[n - 1] }
            } else {
                // First index with src > t, so the bracketing segment is k-1..k
                let k = src.partition_point(|&s| s <= t);
                segment(k - 1, t)
            }
        })
        .collect()
}

/// Resample a uniformly sampled signal from `from_rate` to `to_rate` Hz.
///
/// The output covers the same time span, starting at the first input sample:
/// `floor((n - 1) · to / from) + 1` samples.
pub fn resample_to_rate(signal: &[f32], from_rate: f32, to_rate: f32) -> Vec<f32> {
    if signal.is_empty() || from_rate <= 0.0 || to_rate <= 0.0 {
        return Vec::new();
    }
    if (from_rate - to_rate).abs() < f32::EPSILON {
        return signal.to_vec();
    }

    let source = if to_rate < from_rate {
        let ratio = from_rate / to_rate;
        let taps = 40 * ratio.ceil() as usize + 1;
        apply_fir(signal, &design_lowpass(taps, 0.9 / ratio))
    } else {
        signal.to_vec()
    };

    let from_period = 1.0 / f64::from(from_rate);
    let to_period = 1.0 / f64::from(to_rate);
    let span = (signal.len() - 1) as f64 * from_period;
    // Tolerate rounding so an exact multiple keeps its last sample
    let out_len = (span / to_period + 1e-9).floor() as usize + 1;

    let src_times: Vec<f64> = (0..signal.len()).map(|i| i as f64 * from_period).collect();
    let dst_times: Vec<f64> = (0..out_len).map(|i| i as f64 * to_period).collect();
    interp_linear(&src_times, &source, &dst_times, false)
}

/// Delay a signal by a fractional number of samples.
///
/// `out[i] = x(i - shift)` evaluated by linear interpolation; positions before
/// the first or after the last sample take the edge value.
pub fn time_shift(signal: &[f32], shift_samples: f64) -> Vec<f32> {
    let src: Vec<f64> = (0..signal.len()).map(|i| i as f64).collect();
    let dst: Vec<f64> = src.iter().map(|&i| i - shift_samples).collect();
    interp_linear(&src, signal, &dst, false)
}
