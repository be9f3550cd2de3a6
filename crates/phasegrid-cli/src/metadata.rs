//! Run metadata written as `<root>_info.json`.

use anyhow::Context;
use phasegrid_analysis::{BadPointMask, BadPointThreshold, CorrelationResult, SignalQuality, SpectralPeakEstimate};
use serde::Serialize;
use std::path::Path;

/// Everything recorded about one pipeline run.
#[derive(Debug, Default, Serialize)]
pub struct RunInfo {
    pub version: String,
    pub input: String,
    pub slice_times: String,
    pub dims: [usize; 4],
    pub tr_secs: f32,
    pub num_skip: usize,
    pub mask_voxels: usize,
    pub estimation_mask_voxels: usize,
    pub projection_mask_voxels: usize,
    pub var_mask: Option<VarianceMaskInfo>,
    pub motion: Option<MotionInfo>,

    pub slice_sample_rate: f32,
    pub num_steps: usize,
    pub num_points_sliceres: usize,
    pub std_freq: f32,
    pub num_points_stdres: usize,

    pub bold: WaveformInfo,
    pub enhancement: Option<String>,
    pub pleth: Option<ExternalInfo>,

    pub forced_hr_bpm: Option<f32>,
    pub phase_source: String,
    pub cardiac_freq: f32,
    pub cardiac_bpm: f32,
    pub overall_bad_fraction: f32,
    pub phi0: f32,

    pub cardiac_calc_only: bool,
    pub projection: Option<ProjectionInfo>,
    pub regression: Option<RegressionInfo>,
}

/// Variance estimation mask settings.
#[derive(Debug, Serialize)]
pub struct VarianceMaskInfo {
    pub kind: String,
    pub thresh_pct: f32,
    pub by_slice: bool,
}

/// Motion regression summary.
#[derive(Debug, Serialize)]
pub struct MotionInfo {
    pub file: String,
    pub regressors: usize,
    pub orthogonalized: bool,
}

/// Analysis of one cardiac waveform.
#[derive(Debug, Default, Serialize)]
pub struct WaveformInfo {
    pub cardiac_freq: f32,
    pub cardiac_bpm: f32,
    pub coarse_freq: f32,
    pub bad_points: BadPointInfo,
    pub quality: QualityInfo,
}

impl WaveformInfo {
    pub fn new(estimate: &SpectralPeakEstimate, bad_points: BadPointInfo, quality: &SignalQuality) -> Self {
        Self {
            cardiac_freq: estimate.frequency,
            cardiac_bpm: round2(estimate.bpm()),
            coarse_freq: estimate.coarse_frequency,
            bad_points,
            quality: QualityInfo::from(quality),
        }
    }
}

/// Bad-point detection outcome.
#[derive(Debug, Default, Serialize)]
pub struct BadPointInfo {
    pub method: String,
    pub threshold: Option<ThresholdInfo>,
    pub bad_fraction: f32,
}

impl BadPointInfo {
    pub fn new(method: impl ToString, mask: &BadPointMask, threshold: BadPointThreshold) -> Self {
        Self {
            method: method.to_string(),
            threshold: Some(threshold.into()),
            bad_fraction: mask.bad_fraction(),
        }
    }
}

/// Threshold applied by bad-point detection.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdInfo {
    Deviation { deviation: f32 },
    Range { lower: f32, upper: f32 },
}

impl From<BadPointThreshold> for ThresholdInfo {
    fn from(threshold: BadPointThreshold) -> Self {
        match threshold {
            BadPointThreshold::Deviation(deviation) => ThresholdInfo::Deviation { deviation },
            BadPointThreshold::Range { lower, upper } => ThresholdInfo::Range { lower, upper },
        }
    }
}

/// Means and standard deviations of the signal quality indices.
#[derive(Debug, Default, Serialize)]
pub struct QualityInfo {
    pub skewness_mean: f32,
    pub skewness_std: f32,
    pub kurtosis_mean: f32,
    pub kurtosis_std: f32,
    pub entropy_mean: f32,
    pub entropy_std: f32,
}

impl From<&SignalQuality> for QualityInfo {
    fn from(q: &SignalQuality) -> Self {
        Self {
            skewness_mean: q.skewness.mean,
            skewness_std: q.skewness.std,
            kurtosis_mean: q.kurtosis.mean,
            kurtosis_std: q.kurtosis.std,
            entropy_mean: q.entropy.mean,
            entropy_std: q.entropy.std,
        }
    }
}

/// Cross-correlation between two waveforms.
#[derive(Debug, Serialize)]
pub struct CorrelationInfo {
    pub value: f32,
    pub lag_secs: f32,
    pub width_secs: f32,
    pub valid: bool,
    pub failure_code: u32,
}

impl From<&CorrelationResult> for CorrelationInfo {
    fn from(r: &CorrelationResult) -> Self {
        Self {
            value: r.peak_value,
            lag_secs: r.lag_secs,
            width_secs: r.width_secs,
            valid: r.valid,
            failure_code: r.failure_code(),
        }
    }
}

/// External reference recording.
#[derive(Debug, Serialize)]
pub struct ExternalInfo {
    pub file: String,
    pub column: String,
    pub sample_rate: f32,
    pub start_time: f32,
    pub num_points_native: usize,
    pub waveform: WaveformInfo,
    pub match_to_bold: CorrelationInfo,
    pub aligned: bool,
}

/// Phase projection summary.
#[derive(Debug, Serialize)]
pub struct ProjectionInfo {
    pub bins: usize,
    pub kernel: String,
    pub kernel_width: f32,
    pub centric: bool,
    pub censored_timepoints: usize,
    pub empty_bins_total: usize,
    pub empty_bins_by_slice: Vec<usize>,
    pub hard_vessel_threshold: f32,
    pub soft_vessel_threshold: f32,
    pub vessel_voxels: usize,
    pub artery_voxels: usize,
    pub vein_voxels: usize,
}

/// Cardiac noise regression summary.
#[derive(Debug, Serialize)]
pub struct RegressionInfo {
    pub mode: String,
    pub fits: usize,
    pub mean_r_squared: f32,
}

impl RunInfo {
    /// Write as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))
    }
}

/// Round to two decimals, the precision heart rates are reported at.
pub fn round2(x: f32) -> f32 {
    (x * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_serialize_tagged() {
        let dev = serde_json::to_value(ThresholdInfo::from(BadPointThreshold::Deviation(2.5))).unwrap();
        assert_eq!(dev["kind"], "deviation");
        assert_eq!(dev["deviation"], 2.5);

        let range = serde_json::to_value(ThresholdInfo::from(BadPointThreshold::Range {
            lower: -1.0,
            upper: 3.0,
        }))
        .unwrap();
        assert_eq!(range["kind"], "range");
        assert_eq!(range["upper"], 3.0);
    }

    #[test]
    fn absent_sections_are_null() {
        let info = RunInfo::default();
        let value = serde_json::to_value(&info).unwrap();
        assert!(value["pleth"].is_null());
        assert!(value["projection"].is_null());
        assert_eq!(value["bold"]["bad_points"]["bad_fraction"], 0.0);
    }

    #[test]
    fn rounding() {
        assert_eq!(round2(71.23456), 71.23);
    }
}
