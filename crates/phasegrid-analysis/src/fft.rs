//! FFT wrapper with windowing functions

use rustfft::{FftPlanner, num_complex::Complex};
use std::f32::consts::PI;
use std::sync::Arc;

/// Window function types
///
/// All windows are the symmetric variants (denominator `n - 1`), so the first
/// and last coefficients mirror each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// Rectangular (no windowing)
    Rectangular,
    /// Hann window (raised cosine)
    Hann,
    /// Hamming window
    Hamming,
    /// Blackman window
    Blackman,
}

impl Window {
    /// Apply window to a buffer
    pub fn apply(&self, buffer: &mut [f32]) {
        let n = buffer.len();
        if n < 2 {
            return;
        }
        let denom = (n - 1) as f32;
        let w = |i: usize| -> f32 {
            let x = 2.0 * PI * i as f32 / denom;
            match self {
                Window::Rectangular => 1.0,
                Window::Hann => 0.5 - 0.5 * x.cos(),
                Window::Hamming => 0.54 - 0.46 * x.cos(),
                Window::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
            }
        };
        for (i, sample) in buffer.iter_mut().enumerate() {
            *sample *= w(i);
        }
    }

    /// Get window coefficients
    pub fn coefficients(&self, size: usize) -> Vec<f32> {
        let mut coeffs = vec![1.0; size];
        self.apply(&mut coeffs);
        coeffs
    }
}

/// FFT processor with cached forward and inverse plans.
pub struct Fft {
    fft: Arc<dyn rustfft::Fft<f32>>,
    ifft: Arc<dyn rustfft::Fft<f32>>,
    size: usize,
}

impl Fft {
    /// Create a new FFT processor for the given size
    ///
    /// Any size is accepted; non-power-of-two lengths fall back to mixed-radix
    /// or Bluestein plans.
    pub fn new(size: usize) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);
        let ifft = planner.plan_fft_inverse(size);
        Self { fft, ifft, size }
    }

    /// Get FFT size
    pub fn size(&self) -> usize {
        self.size
    }

    /// Full complex spectrum of a real signal, zero-padded or truncated to the
    /// FFT size.
    pub fn forward_real(&self, input: &[f32]) -> Vec<Complex<f32>> {
        let mut buffer: Vec<Complex<f32>> = input
            .iter()
            .take(self.size)
            .map(|&x| Complex::new(x, 0.0))
            .collect();
        buffer.resize(self.size, Complex::new(0.0, 0.0));
        self.fft.process(&mut buffer);
        buffer
    }

    /// Perform forward FFT on complex input (in-place)
    pub fn forward_complex(&self, buffer: &mut [Complex<f32>]) {
        self.fft.process(buffer);
    }

    /// Perform inverse FFT on complex buffer (in-place), normalized by `1/size`
    pub fn inverse_complex(&self, buffer: &mut [Complex<f32>]) {
        self.ifft.process(buffer);
        let scale = 1.0 / self.size as f32;
        for c in buffer.iter_mut() {
            *c *= scale;
        }
    }

    /// Inverse transform of a full spectrum, keeping the real part.
    pub fn inverse_real(&self, mut spectrum: Vec<Complex<f32>>) -> Vec<f32> {
        spectrum.resize(self.size, Complex::new(0.0, 0.0));
        self.inverse_complex(&mut spectrum);
        spectrum.into_iter().map(|c| c.re).collect()
    }
}

/// Frequency (Hz) of bin `k` of a `size`-point transform, folded so that
/// negative-frequency bins report their positive magnitude.
pub fn bin_frequency(k: usize, size: usize, sample_rate: f32) -> f32 {
    let folded = k.min(size - k.min(size));
    folded as f32 * sample_rate / size as f32
}
