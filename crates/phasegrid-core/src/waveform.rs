//! Sampled waveform container.
//!
//! A [`Waveform`] owns its samples. Every conditioning stage in the pipeline
//! takes a waveform by reference and hands back a new one, so intermediate
//! results can be kept side by side without aliasing.

use crate::CoreError;

/// An evenly sampled, owned signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: f32,
    start_time: f64,
}

impl Waveform {
    /// Create a waveform sampled at `sample_rate` Hz starting at t = 0.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidSampleRate`] when the rate is not finite and positive.
    pub fn new(samples: Vec<f32>, sample_rate: f32) -> Result<Self, CoreError> {
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(CoreError::InvalidSampleRate(sample_rate));
        }
        Ok(Self {
            samples,
            sample_rate,
            start_time: 0.0,
        })
    }

    /// Set the time (seconds) of the first sample.
    pub fn with_start_time(mut self, start_time: f64) -> Self {
        self.start_time = start_time;
        self
    }

    /// Samples as a slice.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Consume the waveform and return its samples.
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Sample period in seconds.
    pub fn sample_period(&self) -> f64 {
        1.0 / f64::from(self.sample_rate)
    }

    /// Time of the first sample in seconds.
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Time of the last sample in seconds.
    pub fn end_time(&self) -> f64 {
        self.start_time + self.samples.len().saturating_sub(1) as f64 * self.sample_period()
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when there are no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration covered by the samples in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 * self.sample_period()
    }

    /// Sample times in seconds.
    pub fn time_axis(&self) -> Vec<f64> {
        let dt = self.sample_period();
        (0..self.samples.len())
            .map(|i| self.start_time + i as f64 * dt)
            .collect()
    }

    /// A new waveform with the same timing and different samples.
    ///
    /// # Errors
    ///
    /// [`CoreError::LengthMismatch`] when `samples` differs in length.
    pub fn with_samples(&self, samples: Vec<f32>) -> Result<Self, CoreError> {
        if samples.len() != self.samples.len() {
            return Err(CoreError::LengthMismatch {
                expected: self.samples.len(),
                actual: samples.len(),
            });
        }
        Ok(Self {
            samples,
            sample_rate: self.sample_rate,
            start_time: self.start_time,
        })
    }

    /// Apply `f` to every sample, producing an independent copy.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            samples: self.samples.iter().map(|&x| f(x)).collect(),
            sample_rate: self.sample_rate,
            start_time: self.start_time,
        }
    }

    /// Keep the first `len` samples.
    pub fn truncated(&self, len: usize) -> Self {
        Self {
            samples: self.samples[..len.min(self.samples.len())].to_vec(),
            sample_rate: self.sample_rate,
            start_time: self.start_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_rate() {
        assert_eq!(
            Waveform::new(vec![0.0], 0.0),
            Err(CoreError::InvalidSampleRate(0.0))
        );
        assert!(Waveform::new(vec![0.0], f32::NAN).is_err());
        assert!(Waveform::new(vec![0.0], -1.0).is_err());
    }

    #[test]
    fn timing_follows_rate_and_start() {
        let w = Waveform::new(vec![0.0; 5], 2.0).unwrap().with_start_time(1.0);
        assert_eq!(w.time_axis(), vec![1.0, 1.5, 2.0, 2.5, 3.0]);
        assert_eq!(w.end_time(), 3.0);
        assert_eq!(w.duration(), 2.5);
    }

    #[test]
    fn map_does_not_alias_input() {
        let w = Waveform::new(vec![1.0, 2.0], 10.0).unwrap();
        let doubled = w.map(|x| 2.0 * x);
        assert_eq!(w.samples(), &[1.0, 2.0]);
        assert_eq!(doubled.samples(), &[2.0, 4.0]);
    }

    #[test]
    fn with_samples_checks_length() {
        let w = Waveform::new(vec![1.0, 2.0], 10.0).unwrap();
        assert!(w.with_samples(vec![0.0]).is_err());
        assert_eq!(w.with_samples(vec![3.0, 4.0]).unwrap().sample_rate(), 10.0);
    }
}
