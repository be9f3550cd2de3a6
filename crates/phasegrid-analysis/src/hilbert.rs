//! Hilbert transform for computing analytic signals.
//!
//! The instantaneous phase of the cardiac waveform is the angle of its analytic
//! signal. The transform size always equals the record length, so no
//! zero-padding distorts the ends of the record.
//!
//! # Algorithm
//!
//! 1. FFT of the real signal
//! 2. Keep DC (and Nyquist for even lengths)
//! 3. Double the positive frequencies, zero the negative ones
//! 4. The inverse FFT is the analytic signal
//!
//! # Example
//!
//! ```rust
//! use phasegrid_analysis::hilbert::HilbertTransform;
//! use std::f32::consts::PI;
//!
//! let signal: Vec<f32> = (0..1000)
//!     .map(|i| (2.0 * PI * 10.0 * i as f32 / 1000.0).sin())
//!     .collect();
//!
//! let hilbert = HilbertTransform::new(signal.len());
//! let (phase, amplitude) = hilbert.phase_and_amplitude(&signal);
//! assert_eq!(phase.len(), 1000);
//! assert!((amplitude[500] - 1.0).abs() < 0.01);
//! ```

use crate::fft::Fft;
use rustfft::num_complex::Complex;
use std::f32::consts::PI;

/// Hilbert transform processor for a fixed record length.
pub struct HilbertTransform {
    fft: Fft,
    len: usize,
}

impl HilbertTransform {
    /// Create a processor for records of `len` samples.
    pub fn new(len: usize) -> Self {
        Self {
            fft: Fft::new(len),
            len,
        }
    }

    /// Record length this processor was planned for.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length processor.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Compute the analytic signal `x + i·H{x}`.
    ///
    /// # Arguments
    ///
    /// * `signal` - Input real signal, zero-padded or truncated to the planned length
    ///
    /// # Returns
    ///
    /// Complex analytic signal, one value per planned sample
    pub fn analytic_signal(&self, signal: &[f32]) -> Vec<Complex<f32>> {
        let n = self.len;
        if n == 0 {
            return Vec::new();
        }
        let mut buffer = self.fft.forward_real(signal);

        // Positive frequencies are bins 1..(n+1)/2; for even n the Nyquist bin
        // n/2 is shared and left unchanged
        let positive_end = n.div_ceil(2);
        for bin in buffer.iter_mut().take(positive_end).skip(1) {
            *bin *= 2.0;
        }
        let negative_start = n / 2 + 1;
        for bin in buffer.iter_mut().skip(negative_start) {
            *bin = Complex::new(0.0, 0.0);
        }

        self.fft.inverse_complex(&mut buffer);
        buffer
    }

    /// Compute wrapped phase and amplitude in one pass.
    ///
    /// # Returns
    ///
    /// Tuple of (phase in (-π, π], amplitude)
    pub fn phase_and_amplitude(&self, signal: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let analytic = self.analytic_signal(signal);
        let phase = analytic.iter().map(|c| c.arg()).collect();
        let amplitude = analytic.iter().map(|c| c.norm()).collect();
        (phase, amplitude)
    }
}

/// Unwrap phase by removing jumps larger than π between consecutive samples.
pub fn unwrap_phase(phase: &[f32]) -> Vec<f32> {
    let Some(&first) = phase.first() else {
        return Vec::new();
    };

    let mut unwrapped = Vec::with_capacity(phase.len());
    unwrapped.push(first);

    // Offset accumulated in f64 so long records keep sub-milliradian accuracy
    let mut offset = 0.0f64;
    for pair in phase.windows(2) {
        let diff = pair[1] - pair[0];
        if diff > PI {
            offset -= 2.0 * std::f64::consts::PI;
        } else if diff < -PI {
            offset += 2.0 * std::f64::consts::PI;
        }
        unwrapped.push((f64::from(pair[1]) + offset) as f32);
    }
    unwrapped
}
