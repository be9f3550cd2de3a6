//! Voxelwise ranking of cross-correlation peaks by mutual information.
//!
//! A correlation function often has several comparable maxima one cardiac
//! or respiratory period apart. Each candidate lag is scored with the mutual
//! information between the reference and the voxel time course shifted by
//! that lag, and the peaks are ranked by that score.

use crate::error::{AnalysisError, Result};
use crate::mutual_info::{DEFAULT_BINS, lagged_mutual_information};
use crate::parallel::ParallelVoxelEvaluator;
use crate::resample::interp_linear;
use std::collections::BTreeMap;

/// A local extremum of a correlation function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationPeak {
    /// Lag in seconds.
    pub lag_secs: f32,
    /// Correlation value.
    pub value: f32,
    /// Index into the correlation array.
    pub index: usize,
}

/// A peak with its mutual-information score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedPeak {
    /// Lag in seconds.
    pub lag_secs: f32,
    /// Correlation value at the peak.
    pub correlation: f32,
    /// Mutual information (nats) at that lag.
    pub mutual_info: f32,
}

/// Interior local maxima of `corr` (and minima when `bipolar`).
///
/// Plateaus report their first sample.
pub fn find_peaks(lag_axis: &[f32], corr: &[f32], bipolar: bool) -> Vec<CorrelationPeak> {
    let n = lag_axis.len().min(corr.len());
    let mut peaks = Vec::new();
    for i in 1..n.saturating_sub(1) {
        let (prev, cur, next) = (corr[i - 1], corr[i], corr[i + 1]);
        let is_max = cur > prev && cur >= next;
        let is_min = bipolar && cur < prev && cur <= next;
        if is_max || is_min {
            peaks.push(CorrelationPeak {
                lag_secs: lag_axis[i],
                value: cur,
                index: i,
            });
        }
    }
    peaks
}

/// Scores and sorts correlation peaks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakRanker {
    /// Histogram bins for the mutual information estimate.
    pub bins: usize,
    /// Oversampling factor applied to voxel time courses (1 = none).
    pub oversample: usize,
    /// Also consider correlation minima.
    pub bipolar: bool,
}

impl Default for PeakRanker {
    fn default() -> Self {
        Self {
            bins: DEFAULT_BINS,
            oversample: 1,
            bipolar: false,
        }
    }
}

impl PeakRanker {
    /// Upsample a time course by the configured factor.
    fn oversampled(&self, series: &[f32]) -> Vec<f32> {
        if self.oversample <= 1 || series.len() < 2 {
            return series.to_vec();
        }
        let src: Vec<f64> = (0..series.len()).map(|i| i as f64).collect();
        let step = 1.0 / self.oversample as f64;
        let dst: Vec<f64> = (0..(series.len() - 1) * self.oversample + 1)
            .map(|i| i as f64 * step)
            .collect();
        interp_linear(&src, series, &dst, false)
    }

    /// Rank the peaks of one voxel's correlation function.
    ///
    /// # Arguments
    ///
    /// * `series` - Voxel time course at the original sample period
    /// * `reference` - Reference time course at the oversampled period
    /// * `lag_axis` - Lag in seconds of each correlation sample
    /// * `corr` - Correlation function
    /// * `sample_period` - Original sample period in seconds
    ///
    /// # Returns
    ///
    /// Peaks sorted by mutual information, highest first.
    pub fn rank(
        &self,
        series: &[f32],
        reference: &[f32],
        lag_axis: &[f32],
        corr: &[f32],
        sample_period: f32,
    ) -> Vec<RankedPeak> {
        let upsampled = self.oversampled(series);
        let period = sample_period / self.oversample.max(1) as f32;
        let mut ranked: Vec<RankedPeak> = find_peaks(lag_axis, corr, self.bipolar)
            .into_iter()
            .map(|peak| {
                let lag = (peak.lag_secs / period).round() as isize;
                RankedPeak {
                    lag_secs: peak.lag_secs,
                    correlation: peak.value,
                    mutual_info: lagged_mutual_information(reference, &upsampled, lag, self.bins),
                }
            })
            .collect();
        ranked.sort_by(|a, b| b.mutual_info.total_cmp(&a.mutual_info));
        ranked
    }

    /// Rank every voxel on the evaluator.
    ///
    /// `series` holds `timepoints` samples per voxel and `corr` holds
    /// `lag_axis.len()` samples per voxel, both voxel-major.
    ///
    /// # Errors
    ///
    /// Buffer sizes disagree, or the worker pool could not be created.
    #[allow(clippy::too_many_arguments)]
    pub fn rank_all(
        &self,
        evaluator: &ParallelVoxelEvaluator,
        series: &[f32],
        timepoints: usize,
        reference: &[f32],
        lag_axis: &[f32],
        corr: &[f32],
        sample_period: f32,
    ) -> Result<BTreeMap<usize, Vec<RankedPeak>>> {
        if timepoints == 0 || series.len() % timepoints != 0 {
            return Err(AnalysisError::length_mismatch(
                "peak ranking series",
                timepoints,
                series.len(),
            ));
        }
        let voxels = series.len() / timepoints;
        let lags = lag_axis.len();
        if corr.len() != voxels * lags {
            return Err(AnalysisError::length_mismatch("peak ranking correlation", voxels * lags, corr.len()));
        }

        let ranked = evaluator.run(0..voxels, |v| {
            Ok::<_, AnalysisError>(self.rank(
                &series[v * timepoints..(v + 1) * timepoints],
                reference,
                lag_axis,
                &corr[v * lags..(v + 1) * lags],
                sample_period,
            ))
        })?;
        tracing::info!(voxels = ranked.len(), "peak evaluation finished");
        Ok(ranked)
    }
}
