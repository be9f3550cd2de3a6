//! Slice-resolution processing of the image volume.
//!
//! Slices are acquired at different offsets within each repetition time.
//! Interleaving the per-slice averages by acquisition offset yields a signal
//! sampled `num_steps` times per TR, fast enough to resolve the cardiac
//! fundamental that the volume rate alone would alias.
//!
//! This module also holds the voxel normalization and mask construction that
//! feed both the waveform estimate and the phase projection.

use crate::error::{AnalysisError, Result};
use crate::filter::{HarmonicNotch, TrapezoidFilter};
use crate::parallel::ParallelVoxelEvaluator;
use phasegrid_core::{mad, mad_normalize, mean, percentile, std_dev};
use std::str::FromStr;

/// Acquisition offsets of the slices within one TR.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceTiming {
    times: Vec<f32>,
    tr_secs: f32,
    num_steps: usize,
    min_step: f32,
    offsets: Vec<usize>,
}

impl SliceTiming {
    /// Derive the step structure from per-slice acquisition times (s).
    ///
    /// The step is the largest gap between consecutive sorted slice times, so
    /// simultaneously acquired (multiband) slices share an offset.
    ///
    /// # Errors
    ///
    /// No slices, a non-positive TR, or non-finite times.
    pub fn from_times(times: Vec<f32>, tr_secs: f32) -> Result<Self> {
        if times.is_empty() {
            return Err(AnalysisError::EmptyInput("slice times"));
        }
        if tr_secs.is_nan() || tr_secs <= 0.0 {
            return Err(AnalysisError::invalid("tr", format!("{tr_secs}")));
        }
        if times.iter().any(|t| !t.is_finite()) {
            return Err(AnalysisError::invalid("slice_times", "non-finite value"));
        }
        let mut sorted = times.clone();
        sorted.sort_by(f32::total_cmp);
        let min_step = sorted.windows(2).map(|w| w[1] - w[0]).fold(0.0f32, f32::max);
        let (num_steps, offsets) = if min_step > 0.0 {
            let steps = ((tr_secs / min_step).round() as usize).max(1);
            let offsets = times
                .iter()
                .map(|&t| ((t / min_step).round() as i64).rem_euclid(steps as i64) as usize)
                .collect();
            (steps, offsets)
        } else {
            (1, vec![0; times.len()])
        };
        tracing::info!(slices = times.len(), num_steps, min_step, "slice timing");
        Ok(Self {
            times,
            tr_secs,
            num_steps,
            min_step,
            offsets,
        })
    }

    /// Per-slice acquisition offsets (s).
    pub fn times(&self) -> &[f32] {
        &self.times
    }

    /// Number of slices.
    pub fn slice_count(&self) -> usize {
        self.times.len()
    }

    /// Repetition time (s).
    pub fn tr_secs(&self) -> f32 {
        self.tr_secs
    }

    /// Distinct acquisition steps per TR.
    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    /// Spacing between steps (s).
    pub fn min_step(&self) -> f32 {
        self.min_step
    }

    /// Step index of every slice.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    /// Sample rate of the interleaved slice-resolution signal (Hz).
    pub fn slice_rate(&self) -> f32 {
        self.num_steps as f32 / self.tr_secs
    }
}

/// Mean of every voxel's time series (`voxels × timepoints` input).
pub fn voxel_means(data: &[f32], timepoints: usize) -> Vec<f32> {
    if timepoints == 0 {
        return Vec::new();
    }
    data.chunks_exact(timepoints).map(mean).collect()
}

/// Voxels whose mean exceeds `thresh_pct` percent of the 98th percentile of
/// all voxel means.
pub fn intensity_mask(mean_image: &[f32], thresh_pct: f32) -> Vec<bool> {
    if mean_image.is_empty() {
        return Vec::new();
    }
    let threshold = thresh_pct / 100.0 * percentile(mean_image, 98.0);
    let mask: Vec<bool> = mean_image.iter().map(|&m| m > threshold).collect();
    tracing::info!(
        kept = mask.iter().filter(|&&m| m).count(),
        total = mask.len(),
        threshold,
        "intensity mask"
    );
    mask
}

/// Output of [`normalize_voxels`], both `voxels × timepoints`.
#[derive(Debug, Clone, PartialEq)]
pub struct VoxelNormalization {
    /// Detrended series minus their mean.
    pub demeaned: Vec<f32>,
    /// `demeaned / mean` (percent-change scale); non-finite values become 0.
    pub normalized: Vec<f32>,
    /// Mean of each detrended series.
    pub means: Vec<f32>,
}

/// Detrend and normalize every masked voxel; the others are left at zero.
///
/// The polynomial detrend keeps the fitted constant so the mean survives
/// for the normalization. An order of 0 skips detrending.
///
/// # Errors
///
/// Shapes disagree, or the worker pool could not be created.
pub fn normalize_voxels(
    data: &[f32],
    timepoints: usize,
    mask: &[bool],
    detrend_order: usize,
    evaluator: &ParallelVoxelEvaluator,
) -> Result<VoxelNormalization> {
    if timepoints == 0 || data.len() % timepoints != 0 {
        return Err(AnalysisError::length_mismatch("voxel data", timepoints, data.len()));
    }
    let voxels = data.len() / timepoints;
    if mask.len() != voxels {
        return Err(AnalysisError::length_mismatch("normalization mask", voxels, mask.len()));
    }

    let mut detrended = data.to_vec();
    if detrend_order > 0 {
        evaluator.for_each_slot(&mut detrended, timepoints, |v, slot| {
            if mask[v] {
                let d = phasegrid_core::detrend(slot, detrend_order, false);
                slot.copy_from_slice(&d);
            }
        })?;
    }
    let means = voxel_means(&detrended, timepoints);

    let mut demeaned = vec![0.0f32; data.len()];
    let mut normalized = vec![0.0f32; data.len()];
    for v in (0..voxels).filter(|&v| mask[v]) {
        let m = means[v];
        let row = v * timepoints..(v + 1) * timepoints;
        for ((d, n), &x) in demeaned[row.clone()]
            .iter_mut()
            .zip(&mut normalized[row.clone()])
            .zip(&detrended[row])
        {
            *d = x - m;
            let ratio = *d / m;
            *n = if ratio.is_finite() { ratio } else { 0.0 };
        }
    }
    tracing::debug!(voxels, detrend_order, "voxels normalized");
    Ok(VoxelNormalization {
        demeaned,
        normalized,
        means,
    })
}

/// Variability measure used by [`variance_mask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VarianceMaskKind {
    /// Median absolute deviation over time.
    #[default]
    Mad,
    /// Standard deviation over time.
    Std,
}

impl FromStr for VarianceMaskKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mad" => Ok(VarianceMaskKind::Mad),
            "std" => Ok(VarianceMaskKind::Std),
            _ => Err(AnalysisError::UnknownVariant {
                kind: "variance mask type",
                value: s.to_string(),
                expected: "mad, std",
            }),
        }
    }
}

impl VarianceMaskKind {
    /// Variability of one time series.
    pub fn measure(self, series: &[f32]) -> f32 {
        match self {
            VarianceMaskKind::Mad => mad(series).1,
            VarianceMaskKind::Std => std_dev(series),
        }
    }
}

/// Keep the most variable voxels.
///
/// A voxel passes when its variability is nonzero and at or above the
/// `thresh_pct` percentile of the nonzero variabilities. With
/// `voxel_slice` given, the percentile is taken within each slice.
///
/// # Returns
///
/// `(mask, variability)` per voxel.
pub fn variance_mask(
    normalized: &[f32],
    timepoints: usize,
    kind: VarianceMaskKind,
    thresh_pct: f32,
    voxel_slice: Option<&[usize]>,
) -> (Vec<bool>, Vec<f32>) {
    if timepoints == 0 {
        return (Vec::new(), Vec::new());
    }
    let variability: Vec<f32> = normalized.chunks_exact(timepoints).map(|s| kind.measure(s)).collect();
    let voxels = variability.len();
    let groups: Vec<usize> = match voxel_slice {
        Some(map) => (0..voxels).map(|v| map.get(v).copied().unwrap_or(0)).collect(),
        None => vec![0; voxels],
    };
    let group_count = groups.iter().copied().max().map_or(0, |g| g + 1);

    let mut mask = vec![false; voxels];
    for g in 0..group_count {
        let members: Vec<usize> = (0..voxels).filter(|&v| groups[v] == g).collect();
        let nonzero: Vec<f32> = members.iter().map(|&v| variability[v]).filter(|&x| x > 0.0).collect();
        if nonzero.is_empty() {
            continue;
        }
        let threshold = percentile(&nonzero, thresh_pct);
        for &v in &members {
            mask[v] = variability[v] > 0.0 && variability[v] >= threshold;
        }
    }
    tracing::info!(
        kept = mask.iter().filter(|&&m| m).count(),
        total = voxels,
        %thresh_pct,
        by_slice = voxel_slice.is_some(),
        "variance mask"
    );
    (mask, variability)
}

/// Parameters of the image-derived waveform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageWaveformConfig {
    /// Width of each TR-harmonic notch in percent (≤ 0 disables the notch).
    pub notch_pct: f32,
    /// MAD-normalize each slice average before interleaving.
    pub mad_normalize_slices: bool,
}

impl Default for ImageWaveformConfig {
    fn default() -> Self {
        Self {
            notch_pct: 1.5,
            mad_normalize_slices: true,
        }
    }
}

/// Cardiac and respiratory signals estimated from the image itself.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageWaveforms {
    /// Cardiac-band waveform at slice resolution.
    pub cardiac: Vec<f32>,
    /// Respiratory-band waveform at slice resolution.
    pub respiratory: Vec<f32>,
    /// Sample rate of both waveforms (Hz).
    pub sample_rate: f32,
    /// Samples per TR.
    pub num_steps: usize,
}

/// Estimate physiological waveforms from masked slice averages.
///
/// # Arguments
///
/// * `normalized` - Normalized voxel series, `voxels × timepoints`
/// * `timepoints` - Samples per voxel
/// * `voxel_slice` - Slice index of every voxel
/// * `mask` - Voxels contributing to the slice averages
/// * `timing` - Slice acquisition offsets
/// * `config` - Notch width and per-slice normalization
///
/// # Errors
///
/// Shapes disagree or a voxel references a slice beyond `timing`.
pub fn image_waveform(
    normalized: &[f32],
    timepoints: usize,
    voxel_slice: &[usize],
    mask: &[bool],
    timing: &SliceTiming,
    config: &ImageWaveformConfig,
) -> Result<ImageWaveforms> {
    if timepoints == 0 || normalized.len() % timepoints != 0 {
        return Err(AnalysisError::length_mismatch("normalized data", timepoints, normalized.len()));
    }
    let voxels = normalized.len() / timepoints;
    if voxel_slice.len() != voxels || mask.len() != voxels {
        return Err(AnalysisError::length_mismatch("slice map", voxels, voxel_slice.len()));
    }
    let slices = timing.slice_count();
    if voxel_slice.iter().any(|&s| s >= slices) {
        return Err(AnalysisError::invalid("voxel_slice", format!("slice index beyond {slices}")));
    }

    let steps = timing.num_steps();
    let mut hires = vec![0.0f32; timepoints * steps];
    for s in 0..slices {
        let members: Vec<usize> = (0..voxels).filter(|&v| mask[v] && voxel_slice[v] == s).collect();
        if members.is_empty() {
            continue;
        }
        let mut average = vec![0.0f32; timepoints];
        for &v in &members {
            for (acc, &x) in average.iter_mut().zip(&normalized[v * timepoints..(v + 1) * timepoints]) {
                *acc += x;
            }
        }
        let scale = 1.0 / members.len() as f32;
        average.iter_mut().for_each(|a| *a *= scale);
        if config.mad_normalize_slices {
            average = mad_normalize(&average);
        }
        let offset = timing.offsets()[s];
        for (t, &a) in average.iter().enumerate() {
            hires[steps * t + offset] += a;
        }
    }

    let rate = timing.slice_rate();
    let notched = HarmonicNotch::new(1.0 / timing.tr_secs(), config.notch_pct).apply(&hires, rate);
    let band = |filter: TrapezoidFilter| -> Vec<f32> {
        let inverted: Vec<f32> = mad_normalize(&filter.apply(&notched, rate)).iter().map(|x| -x).collect();
        mad_normalize(&inverted)
    };
    let cardiac = band(TrapezoidFilter::cardiac());
    let respiratory = band(TrapezoidFilter::respiratory());
    tracing::info!(samples = hires.len(), sample_rate = rate, "image-derived waveforms");

    Ok(ImageWaveforms {
        cardiac,
        respiratory,
        sample_rate: rate,
        num_steps: steps,
    })
}
