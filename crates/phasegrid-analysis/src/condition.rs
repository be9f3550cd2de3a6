//! Cardiac waveform conditioning.
//!
//! Raw plethysmograph and image-derived cardiac signals carry slow drift,
//! high-frequency noise and large amplitude swings. Conditioning band-limits
//! the signal and divides out its amplitude envelope so that every beat has a
//! comparable size before phase estimation.

use crate::error::{AnalysisError, Result};
use crate::filter::{CARDIAC_LOWER_PASS, TrapezoidFilter};
use phasegrid_core::{mad_normalize, mean};

/// Upper pass edge of the cleaning filter in Hz.
const CLEAN_UPPER_PASS: f32 = 10.0;
/// Upper stop edge of the cleaning filter in Hz.
const CLEAN_UPPER_STOP: f32 = 11.0;

/// Amplitude-envelope parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeConfig {
    /// Low-pass cutoff applied to the rectified signal, Hz.
    pub cutoff: f32,
    /// Envelope floor as a fraction of its maximum.
    pub threshold: f32,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            cutoff: 0.4,
            threshold: 0.2,
        }
    }
}

/// Output of [`WaveformConditioner::apply`].
#[derive(Debug, Clone, PartialEq)]
pub struct Conditioned {
    /// Band-limited, MAD-normalized waveform.
    pub cleaned: Vec<f32>,
    /// `cleaned` with its amplitude envelope divided out.
    pub normalized: Vec<f32>,
    /// Floored amplitude envelope.
    pub envelope: Vec<f32>,
}

/// Rectify `signal` about its mean and low-pass the result.
pub fn envelope_detect(signal: &[f32], sample_rate: f32, cutoff: f32) -> Vec<f32> {
    let m = mean(signal);
    let rectified: Vec<f32> = signal.iter().map(|&v| (v - m).abs()).collect();
    TrapezoidFilter::lowpass(cutoff, 1.1 * cutoff).apply(&rectified, sample_rate)
}

/// Cleans a cardiac waveform and removes its amplitude modulation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformConditioner {
    envelope: EnvelopeConfig,
    upper_limit: Option<f32>,
}

impl WaveformConditioner {
    /// Create a conditioner with the given envelope parameters.
    pub fn new(envelope: EnvelopeConfig) -> Self {
        Self {
            envelope,
            upper_limit: None,
        }
    }

    /// Cap the upper cleaning edge at `nyquist` Hz.
    ///
    /// When `nyquist` is below the default 10 Hz edge both upper corners move
    /// to `nyquist`.
    pub fn with_upper_limit(mut self, nyquist: f32) -> Self {
        self.upper_limit = Some(nyquist);
        self
    }

    /// Envelope parameters in use.
    pub fn envelope_config(&self) -> EnvelopeConfig {
        self.envelope
    }

    fn cleaning_filter(&self, sample_rate: f32) -> TrapezoidFilter {
        let nyquist = self.upper_limit.unwrap_or(sample_rate / 2.0);
        let (pass, stop) = if nyquist < CLEAN_UPPER_PASS {
            (nyquist, nyquist)
        } else {
            (CLEAN_UPPER_PASS, CLEAN_UPPER_STOP)
        };
        TrapezoidFilter::band(0.9 * CARDIAC_LOWER_PASS, CARDIAC_LOWER_PASS, pass, stop)
    }

    /// Condition `samples` recorded at `sample_rate` Hz.
    ///
    /// # Errors
    ///
    /// Empty input or a non-positive sample rate.
    pub fn apply(&self, samples: &[f32], sample_rate: f32) -> Result<Conditioned> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptyInput("cardiac waveform"));
        }
        if !(sample_rate.is_finite() && sample_rate > 0.0) {
            return Err(AnalysisError::invalid("sample_rate", format!("{sample_rate} Hz")));
        }

        let normed = mad_normalize(samples);
        let band = mad_normalize(&TrapezoidFilter::cardiac().apply(&normed, sample_rate));

        let mut envelope = envelope_detect(&band, sample_rate, self.envelope.cutoff);
        let peak = envelope.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let floor = (self.envelope.threshold * peak).max(f32::MIN_POSITIVE);
        for e in &mut envelope {
            *e = e.max(floor);
        }
        let env_mean = mean(&envelope);

        let cleaned = mad_normalize(&self.cleaning_filter(sample_rate).apply(&normed, sample_rate));
        let demodulated: Vec<f32> = cleaned
            .iter()
            .zip(&envelope)
            .map(|(&c, &e)| env_mean * c / e)
            .collect();

        tracing::debug!(
            samples = samples.len(),
            sample_rate,
            envelope_floor = floor,
            "conditioned cardiac waveform"
        );

        Ok(Conditioned {
            cleaned,
            normalized: mad_normalize(&demodulated),
            envelope,
        })
    }
}

impl Default for WaveformConditioner {
    fn default() -> Self {
        Self::new(EnvelopeConfig::default())
    }
}

/// Condition a cardiac waveform with the given envelope parameters.
///
/// Convenience wrapper around [`WaveformConditioner::apply`].
pub fn clean_cardiac(samples: &[f32], sample_rate: f32, envelope: &EnvelopeConfig) -> Result<Conditioned> {
    WaveformConditioner::new(*envelope).apply(samples, sample_rate)
}
