//! Outlier detection for cardiac waveforms.
//!
//! Samples far from the bulk of the distribution are flagged, then short good
//! stretches squeezed between flagged samples are flagged too, since a few
//! isolated good beats inside an artifact burst are not trustworthy either.

use crate::error::{AnalysisError, Result};
use phasegrid_core::{mad, quantile};
use std::fmt;
use std::str::FromStr;

/// Outlier rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BadPointMethod {
    /// `|x - median| >= sqrt(1 / (1 - retain)) * MAD-sigma` is bad.
    #[default]
    ThresholdFromMedian,
    /// Outside the central `retain` quantile range, widened by its own width
    /// on each side, is bad.
    QuantileRange,
}

impl FromStr for BadPointMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mad" | "threshold-from-median" => Ok(BadPointMethod::ThresholdFromMedian),
            "fracval" | "quantile-range" => Ok(BadPointMethod::QuantileRange),
            _ => Err(AnalysisError::UnknownVariant {
                kind: "bad point method",
                value: s.to_string(),
                expected: "mad, fracval",
            }),
        }
    }
}

impl fmt::Display for BadPointMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BadPointMethod::ThresholdFromMedian => "mad",
            BadPointMethod::QuantileRange => "fracval",
        })
    }
}

/// Threshold that was applied, for run metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BadPointThreshold {
    /// Absolute deviation from the median.
    Deviation(f32),
    /// Accepted value range.
    Range {
        /// Lowest accepted value.
        lower: f32,
        /// Highest accepted value.
        upper: f32,
    },
}

/// Per-sample bad flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BadPointMask {
    flags: Vec<bool>,
}

impl BadPointMask {
    /// Wrap existing flags.
    pub fn from_flags(flags: Vec<bool>) -> Self {
        Self { flags }
    }

    /// A mask with every sample good.
    pub fn all_good(len: usize) -> Self {
        Self {
            flags: vec![false; len],
        }
    }

    /// Flag outliers in `signal` and merge short good gaps.
    ///
    /// # Arguments
    ///
    /// * `signal` - Waveform to screen
    /// * `sample_rate` - Sample rate in Hz, used to convert `min_gap_secs`
    /// * `method` - Outlier rule
    /// * `retain_fraction` - Fraction of the distribution considered normal, in (0, 1)
    /// * `min_gap_secs` - Good stretches shorter than this between bad samples become bad
    ///
    /// # Returns
    ///
    /// The mask together with the threshold that was applied.
    ///
    /// # Errors
    ///
    /// `retain_fraction` outside (0, 1).
    pub fn detect(
        signal: &[f32],
        sample_rate: f32,
        method: BadPointMethod,
        retain_fraction: f32,
        min_gap_secs: f32,
    ) -> Result<(Self, BadPointThreshold)> {
        if retain_fraction.is_nan() || retain_fraction <= 0.0 || retain_fraction >= 1.0 {
            return Err(AnalysisError::invalid(
                "retain_fraction",
                format!("{retain_fraction} is not in (0, 1)"),
            ));
        }

        let (flags, threshold) = match method {
            BadPointMethod::ThresholdFromMedian => {
                let (center, sigma) = mad(signal);
                let limit = (1.0 / (1.0 - retain_fraction)).sqrt() * sigma;
                // A zero threshold means a constant signal: nothing is an outlier
                let flags = if limit > 0.0 {
                    signal.iter().map(|&v| (v - center).abs() >= limit).collect()
                } else {
                    vec![false; signal.len()]
                };
                (flags, BadPointThreshold::Deviation(limit))
            }
            BadPointMethod::QuantileRange => {
                let lo = quantile(signal, (1.0 - retain_fraction) / 2.0);
                let hi = quantile(signal, (1.0 + retain_fraction) / 2.0);
                let width = hi - lo;
                let (lower, upper) = (lo - width, hi + width);
                let flags = signal.iter().map(|&v| !(lower..=upper).contains(&v)).collect();
                (flags, BadPointThreshold::Range { lower, upper })
            }
        };

        let mut mask = Self { flags };
        let streak = (min_gap_secs * sample_rate).round().max(0.0) as usize;
        mask.merge_gaps(streak);
        tracing::debug!(
            %method,
            ?threshold,
            bad_fraction = mask.bad_fraction(),
            "bad point screening"
        );
        Ok((mask, threshold))
    }

    /// Flag good runs shorter than `streak` samples that follow a bad sample.
    ///
    /// A good run between two bad samples is flagged when the distance between
    /// those bad samples is below `streak`. The run after the last bad sample
    /// is flagged when `len - last_bad - 1 < streak`. Runs before the first bad
    /// sample are kept, and merging only ever adds flags.
    pub fn merge_gaps(&mut self, streak: usize) {
        let Some(first_bad) = self.flags.iter().position(|&b| b) else {
            return;
        };
        let mut last_bad = first_bad;
        for i in first_bad + 1..self.flags.len() {
            if self.flags[i] {
                if i - last_bad < streak {
                    self.flags[last_bad..i].fill(true);
                }
                last_bad = i;
            }
        }
        if self.flags.len() - last_bad - 1 < streak {
            self.flags[last_bad..].fill(true);
        }
    }

    /// Sample-wise OR with another mask of the same length.
    ///
    /// # Errors
    ///
    /// The masks differ in length.
    pub fn union(&self, other: &Self) -> Result<Self> {
        if self.len() != other.len() {
            return Err(AnalysisError::length_mismatch("bad point union", self.len(), other.len()));
        }
        Ok(Self {
            flags: self.flags.iter().zip(&other.flags).map(|(&a, &b)| a || b).collect(),
        })
    }

    /// Fraction of flagged samples in `[0, 1]` (0 for an empty mask).
    pub fn bad_fraction(&self) -> f32 {
        if self.flags.is_empty() {
            return 0.0;
        }
        self.flags.iter().filter(|&&b| b).count() as f32 / self.flags.len() as f32
    }

    /// Weights `1 - bad` for censoring a waveform.
    pub fn as_weights(&self) -> Vec<f32> {
        self.flags.iter().map(|&b| if b { 0.0 } else { 1.0 }).collect()
    }

    /// Multiply `signal` by the good-sample weights.
    pub fn censor(&self, signal: &[f32]) -> Vec<f32> {
        signal
            .iter()
            .zip(&self.flags)
            .map(|(&v, &b)| if b { 0.0 } else { v })
            .collect()
    }

    /// Raw flags.
    pub fn flags(&self) -> &[bool] {
        &self.flags
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// True for an empty mask.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(bits: &str) -> Vec<bool> {
        bits.chars().map(|c| c == '1').collect()
    }

    #[test]
    fn parses_method_names() {
        assert_eq!("mad".parse::<BadPointMethod>().unwrap(), BadPointMethod::ThresholdFromMedian);
        assert_eq!("FRACVAL".parse::<BadPointMethod>().unwrap(), BadPointMethod::QuantileRange);
        let err = "triangle".parse::<BadPointMethod>().unwrap_err();
        assert!(err.to_string().contains("triangle"));
    }

    #[test]
    fn mad_rule_flags_spike() {
        let mut x: Vec<f32> = (0..200).map(|i| ((i * 37) % 11) as f32 / 11.0 - 0.5).collect();
        x[100] = 50.0;
        let (mask, threshold) = BadPointMask::detect(&x, 10.0, BadPointMethod::ThresholdFromMedian, 0.89, 0.0).unwrap();
        assert!(mask.flags()[100]);
        assert_eq!(mask.flags().iter().filter(|&&b| b).count(), 1);
        assert!(matches!(threshold, BadPointThreshold::Deviation(t) if t > 0.0));
    }

    #[test]
    fn constant_signal_has_no_bad_points() {
        let (mask, _) = BadPointMask::detect(&[3.0; 50], 10.0, BadPointMethod::ThresholdFromMedian, 0.89, 2.0).unwrap();
        assert_eq!(mask.bad_fraction(), 0.0);
    }

    #[test]
    fn quantile_rule_uses_widened_range() {
        let mut x: Vec<f32> = (0..101).map(|i| i as f32 / 100.0).collect();
        x[50] = 10.0;
        let (mask, threshold) = BadPointMask::detect(&x, 1.0, BadPointMethod::QuantileRange, 0.5, 0.0).unwrap();
        let BadPointThreshold::Range { lower, upper } = threshold else {
            panic!("expected a range");
        };
        assert!(lower < 0.0 && upper > 1.0);
        assert!(mask.flags()[50]);
        assert_eq!(mask.bad_fraction(), 1.0 / 101.0);
    }

    #[test]
    fn rejects_out_of_range_retain() {
        assert!(BadPointMask::detect(&[1.0, 2.0], 1.0, BadPointMethod::QuantileRange, 1.0, 0.0).is_err());
        assert!(BadPointMask::detect(&[1.0, 2.0], 1.0, BadPointMethod::QuantileRange, 0.0, 0.0).is_err());
    }

    #[test]
    fn merges_short_gaps_and_tail() {
        let mut mask = BadPointMask::from_flags(flags("0001001000000001000"));
        mask.merge_gaps(4);
        assert_eq!(mask.flags(), flags("0001111000000001111").as_slice());
    }

    #[test]
    fn leading_good_run_is_kept() {
        let mut mask = BadPointMask::from_flags(flags("0010000000"));
        mask.merge_gaps(3);
        assert_eq!(mask.flags(), flags("0010000000").as_slice());
    }

    #[test]
    fn no_bad_points_means_no_merging() {
        let mut mask = BadPointMask::all_good(10);
        mask.merge_gaps(100);
        assert_eq!(mask.bad_fraction(), 0.0);
    }

    #[test]
    fn union_and_weights() {
        let a = BadPointMask::from_flags(flags("1100"));
        let b = BadPointMask::from_flags(flags("0110"));
        let u = a.union(&b).unwrap();
        assert_eq!(u.as_weights(), vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(u.censor(&[5.0, 5.0, 5.0, 5.0]), vec![0.0, 0.0, 0.0, 5.0]);
        assert!(a.union(&BadPointMask::all_good(3)).is_err());
    }
}
