//! Cardiac-gated phase projection of voxel time series.
//!
//! Every acquired timepoint of a slice has a cardiac phase. The projector
//! grids each voxel's samples onto a fixed cyclic phase axis, giving one
//! averaged cardiac cycle per voxel:
//!
//! ```text
//! raw[v, b] = Σ_t w(φ[slice(v), t], b) · x[v, t]  /  Σ_t w(φ[slice(v), t], b)
//! app[v, b] = smooth(raw[v, ·])[b] - min_b smooth(raw[v, ·])
//! ```
//!
//! Weights depend only on the slice phase, so they are computed once per
//! slice and shared by every voxel of that slice. Each voxel then fills its
//! own `bin_count`-long slot of the output buffer, which makes the voxel loop
//! embarrassingly parallel.

use crate::badpoints::BadPointMask;
use crate::error::{AnalysisError, Result};
use crate::filter::{Padding, TrapezoidFilter};
use crate::gridding::{GridKernel, KernelShape, PhaseBinGrid};
use crate::parallel::ParallelVoxelEvaluator;
use phasegrid_core::PhaseConvention;

/// Parameters of one projection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectionConfig {
    /// Number of phase bins over one cycle.
    pub bin_count: usize,
    /// Kernel support in bins.
    pub kernel_width: f32,
    /// Kernel shape.
    pub shape: KernelShape,
    /// Phase interval of the bin axis.
    pub convention: PhaseConvention,
    /// Cyclic low-pass smoothing of each voxel's cycle.
    pub smooth: bool,
    /// Negate voxel values before gridding, so signal drops read as peaks.
    pub invert: bool,
    /// Wrap kernel contributions around the ends of the phase axis.
    pub cyclic: bool,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            bin_count: 32,
            kernel_width: 3.0,
            shape: KernelShape::KaiserBessel { beta: 4.2054 },
            convention: PhaseConvention::Centered,
            smooth: true,
            invert: true,
            cyclic: true,
        }
    }
}

impl ProjectionConfig {
    /// Build the gridding kernel for this configuration.
    ///
    /// # Errors
    ///
    /// Fewer than two bins or an invalid kernel width.
    pub fn kernel(&self) -> Result<GridKernel> {
        let kernel = GridKernel::new(self.shape, self.kernel_width, self.bin_count, self.convention)?;
        Ok(if self.cyclic { kernel } else { kernel.non_cyclic() })
    }
}

/// Borrowed inputs of a volume projection.
///
/// All buffers are row-major: `phases` is `slices × timepoints`, `values` is
/// `voxels × timepoints`.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInputs<'a> {
    /// Cardiac phase of every slice at every timepoint.
    pub phases: &'a [f32],
    /// Voxel time series.
    pub values: &'a [f32],
    /// Samples per voxel.
    pub timepoints: usize,
    /// Slice index of every voxel.
    pub voxel_slice: &'a [usize],
    /// Voxels to project; the rest stay zero.
    pub mask: &'a [bool],
    /// Timepoints excluded from the projection.
    pub censor: &'a [bool],
}

impl ProjectionInputs<'_> {
    /// Check buffer shapes, returning `(slices, voxels)`.
    fn shape(&self) -> Result<(usize, usize)> {
        let t = self.timepoints;
        if t == 0 {
            return Err(AnalysisError::EmptyInput("projection timepoints"));
        }
        if self.phases.len() % t != 0 {
            return Err(AnalysisError::length_mismatch("slice phases", t, self.phases.len()));
        }
        if self.values.len() % t != 0 {
            return Err(AnalysisError::length_mismatch("voxel values", t, self.values.len()));
        }
        let slices = self.phases.len() / t;
        let voxels = self.values.len() / t;
        if self.voxel_slice.len() != voxels {
            return Err(AnalysisError::length_mismatch("voxel slice map", voxels, self.voxel_slice.len()));
        }
        if self.mask.len() != voxels {
            return Err(AnalysisError::length_mismatch("projection mask", voxels, self.mask.len()));
        }
        if self.censor.len() != t {
            return Err(AnalysisError::length_mismatch("censor list", t, self.censor.len()));
        }
        if let Some(&s) = self.voxel_slice.iter().find(|&&s| s >= slices) {
            return Err(AnalysisError::invalid("voxel_slice", format!("slice {s} of {slices}")));
        }
        Ok((slices, voxels))
    }
}

/// Result of a volume projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    bin_count: usize,
    app: Vec<f32>,
    raw: Vec<f32>,
    slice_weights: Vec<f32>,
    empty_bins: Vec<usize>,
}

impl Projection {
    /// Number of phase bins.
    pub fn bin_count(&self) -> usize {
        self.bin_count
    }

    /// Number of voxels.
    pub fn voxel_count(&self) -> usize {
        self.app.len() / self.bin_count
    }

    /// Baseline-corrected cycles, `voxels × bins`.
    pub fn app(&self) -> &[f32] {
        &self.app
    }

    /// Cycles before baseline correction, `voxels × bins`.
    pub fn raw(&self) -> &[f32] {
        &self.raw
    }

    /// Baseline-corrected cycle of one voxel.
    pub fn voxel_app(&self, voxel: usize) -> &[f32] {
        &self.app[voxel * self.bin_count..(voxel + 1) * self.bin_count]
    }

    /// Raw cycle of one voxel.
    pub fn voxel_raw(&self, voxel: usize) -> &[f32] {
        &self.raw[voxel * self.bin_count..(voxel + 1) * self.bin_count]
    }

    /// Accumulated kernel weight per bin of one slice (after the empty-bin
    /// fallback).
    pub fn slice_weights(&self, slice: usize) -> &[f32] {
        &self.slice_weights[slice * self.bin_count..(slice + 1) * self.bin_count]
    }

    /// Number of bins that received no weight, per slice.
    pub fn empty_bins(&self) -> &[usize] {
        &self.empty_bins
    }

    /// Empty bins summed over slices.
    pub fn total_empty_bins(&self) -> usize {
        self.empty_bins.iter().sum()
    }
}

/// Map slice-resolution bad points onto acquisition timepoints.
///
/// A timepoint is censored when any of its `steps_per_timepoint` slice
/// samples is bad.
pub fn censor_timepoints(bad: &BadPointMask, steps_per_timepoint: usize, timepoints: usize) -> Vec<bool> {
    let steps = steps_per_timepoint.max(1);
    let mut censor = vec![false; timepoints];
    for (i, _) in bad.flags().iter().enumerate().filter(|&(_, &b)| b) {
        if let Some(slot) = censor.get_mut(i / steps) {
            *slot = true;
        }
    }
    censor
}

/// Grids voxel time series onto a cyclic cardiac-phase axis.
#[derive(Debug, Clone)]
pub struct PhaseProjector {
    config: ProjectionConfig,
    kernel: GridKernel,
    evaluator: ParallelVoxelEvaluator,
}

impl PhaseProjector {
    /// Create a projector running its voxel loop on `evaluator`.
    ///
    /// # Errors
    ///
    /// The kernel cannot be built from `config`.
    pub fn new(config: ProjectionConfig, evaluator: ParallelVoxelEvaluator) -> Result<Self> {
        let kernel = config.kernel()?;
        Ok(Self {
            config,
            kernel,
            evaluator,
        })
    }

    /// Projection parameters.
    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Gridding kernel.
    pub fn kernel(&self) -> &GridKernel {
        &self.kernel
    }

    /// Phase-axis smoother: cyclic low-pass at a sixth of the phase sample rate.
    fn smoother(&self) -> (TrapezoidFilter, f32) {
        let phase_rate = 1.0 / self.kernel.step();
        let cutoff = phase_rate / 6.0;
        (
            TrapezoidFilter::lowpass(cutoff, cutoff).with_padding(Padding::Cyclic),
            phase_rate,
        )
    }

    /// Project every masked voxel onto the phase axis.
    ///
    /// # Errors
    ///
    /// Buffer shapes disagree, or the worker pool could not be created.
    pub fn project(&self, inputs: &ProjectionInputs<'_>) -> Result<Projection> {
        let (slices, voxels) = inputs.shape()?;
        let bins = self.config.bin_count;
        let t_len = inputs.timepoints;

        // Kernel weights per (slice, timepoint), shared by all voxels of a slice
        let mut slice_taps: Vec<Vec<Vec<(usize, f32)>>> = Vec::with_capacity(slices);
        let mut slice_weights = vec![0.0f32; slices * bins];
        let mut empty_bins = Vec::with_capacity(slices);
        for s in 0..slices {
            let weights = &mut slice_weights[s * bins..(s + 1) * bins];
            let taps: Vec<Vec<(usize, f32)>> = (0..t_len)
                .map(|t| {
                    if inputs.censor[t] {
                        return Vec::new();
                    }
                    let taps = self.kernel.weights(inputs.phases[s * t_len + t]);
                    for &(b, w) in &taps {
                        weights[b] += w;
                    }
                    taps
                })
                .collect();
            let mut empty = 0;
            for w in weights.iter_mut().filter(|w| **w == 0.0) {
                *w = 1.0;
                empty += 1;
            }
            if empty > 0 {
                tracing::debug!(slice = s, empty, "phase bins without samples");
            }
            empty_bins.push(empty);
            slice_taps.push(taps);
        }

        let sign = if self.config.invert { -1.0 } else { 1.0 };
        let smoother = self.config.smooth.then(|| self.smoother());
        let mut raw = vec![0.0f32; voxels * bins];
        self.evaluator.for_each_slot(&mut raw, bins, |v, slot| {
            if !inputs.mask[v] {
                return;
            }
            let s = inputs.voxel_slice[v];
            let series = &inputs.values[v * t_len..(v + 1) * t_len];
            for (taps, &x) in slice_taps[s].iter().zip(series) {
                for &(b, w) in taps {
                    slot[b] += w * sign * x;
                }
            }
            for (value, &w) in slot.iter_mut().zip(&slice_weights[s * bins..(s + 1) * bins]) {
                *value /= w;
                if !value.is_finite() {
                    *value = 0.0;
                }
            }
            if let Some((filter, rate)) = &smoother {
                let smoothed = filter.apply(slot, *rate);
                slot.copy_from_slice(&smoothed);
            }
        })?;

        let mut app = raw.clone();
        for (v, cycle) in app.chunks_exact_mut(bins).enumerate() {
            if !inputs.mask[v] {
                continue;
            }
            let floor = cycle.iter().copied().fold(f32::INFINITY, f32::min);
            cycle.iter_mut().for_each(|x| *x -= floor);
        }

        let total_empty: usize = empty_bins.iter().sum();
        if total_empty > 0 {
            tracing::warn!(total_empty, slices, "some phase bins had no samples; weight 1 substituted");
        }
        tracing::info!(
            voxels = inputs.mask.iter().filter(|&&m| m).count(),
            bins,
            censored = inputs.censor.iter().filter(|&&c| c).count(),
            "phase projection finished"
        );

        Ok(Projection {
            bin_count: bins,
            app,
            raw,
            slice_weights,
            empty_bins,
        })
    }

    /// Average cycle of a single series, baseline-corrected to a zero minimum.
    ///
    /// No inversion or smoothing is applied; bins without samples are 0
    /// before the baseline shift.
    ///
    /// # Errors
    ///
    /// `phase`, `values` and `censor` differ in length.
    pub fn project_waveform(&self, phase: &[f32], values: &[f32], censor: &[bool]) -> Result<Vec<f32>> {
        if phase.len() != values.len() {
            return Err(AnalysisError::length_mismatch("waveform phase", values.len(), phase.len()));
        }
        if censor.len() != values.len() {
            return Err(AnalysisError::length_mismatch("waveform censor list", values.len(), censor.len()));
        }
        let mut grid = PhaseBinGrid::new(self.config.bin_count);
        for ((&phi, &x), _) in phase.iter().zip(values).zip(censor).filter(|(_, c)| !**c) {
            grid.accumulate(&self.kernel, phi, x);
        }
        let mut cycle = grid.finalize();
        let floor = cycle.iter().copied().fold(f32::INFINITY, f32::min);
        if floor.is_finite() {
            cycle.iter_mut().for_each(|x| *x -= floor);
        }
        Ok(cycle)
    }

    /// Per-voxel cardiac noise regressor sampled at every timepoint.
    ///
    /// Each value is the raw projected cycle at the bin nearest the slice's
    /// phase at that timepoint. Voxels outside `mask` stay zero.
    ///
    /// # Errors
    ///
    /// Buffer shapes disagree with the projection, or the worker pool could
    /// not be created.
    pub fn synthesize_regressor(
        &self,
        projection: &Projection,
        phases: &[f32],
        timepoints: usize,
        voxel_slice: &[usize],
        mask: &[bool],
    ) -> Result<Vec<f32>> {
        let voxels = projection.voxel_count();
        if projection.bin_count() != self.kernel.bin_count() {
            return Err(AnalysisError::length_mismatch(
                "projection bins",
                self.kernel.bin_count(),
                projection.bin_count(),
            ));
        }
        if timepoints == 0 || phases.len() % timepoints != 0 {
            return Err(AnalysisError::length_mismatch("slice phases", timepoints, phases.len()));
        }
        if voxel_slice.len() != voxels || mask.len() != voxels {
            return Err(AnalysisError::length_mismatch("regressor voxel maps", voxels, voxel_slice.len()));
        }
        let slices = phases.len() / timepoints;
        if voxel_slice.iter().any(|&s| s >= slices) {
            return Err(AnalysisError::invalid("voxel_slice", format!("slice index beyond {slices}")));
        }

        let nearest: Vec<usize> = phases.iter().map(|&phi| self.kernel.nearest_bin(phi)).collect();
        let mut noise = vec![0.0f32; voxels * timepoints];
        self.evaluator.for_each_slot(&mut noise, timepoints, |v, slot| {
            if !mask[v] {
                return;
            }
            let s = voxel_slice[v];
            let cycle = projection.voxel_raw(v);
            for (out, &b) in slot.iter_mut().zip(&nearest[s * timepoints..(s + 1) * timepoints]) {
                *out = cycle[b];
            }
        })?;
        Ok(noise)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn triangular() -> ProjectionConfig {
        ProjectionConfig {
            shape: KernelShape::Triangular,
            smooth: false,
            invert: false,
            ..ProjectionConfig::default()
        }
    }

    /// One slice whose phase visits every bin center in turn.
    fn sweep(bins: usize, timepoints: usize) -> Vec<f32> {
        let step = 2.0 * PI / bins as f32;
        (0..timepoints).map(|t| -PI + (t % bins) as f32 * step).collect()
    }

    #[test]
    fn triangular_at_bin_centers_recovers_values() {
        let bins = 8;
        let timepoints = 32;
        let phases = sweep(bins, timepoints);
        let values: Vec<f32> = (0..timepoints).map(|t| (t % bins) as f32).collect();
        let projector = PhaseProjector::new(
            ProjectionConfig {
                bin_count: bins,
                ..triangular()
            },
            ParallelVoxelEvaluator::new(1),
        )
        .unwrap();
        let out = projector
            .project(&ProjectionInputs {
                phases: &phases,
                values: &values,
                timepoints,
                voxel_slice: &[0],
                mask: &[true],
                censor: &vec![false; timepoints],
            })
            .unwrap();
        for (b, &w) in out.slice_weights(0).iter().enumerate() {
            assert!((w - 4.0).abs() < 1e-4, "bin {b} weight {w}");
        }
        for (b, &x) in out.voxel_raw(0).iter().enumerate() {
            assert!((x - b as f32).abs() < 1e-4, "bin {b} value {x}");
        }
        assert_eq!(out.voxel_app(0), out.voxel_raw(0));
        assert_eq!(out.total_empty_bins(), 0);
    }

    #[test]
    fn total_weight_is_samples_times_kernel_mass() {
        let bins = 16;
        let timepoints = 40;
        let config = ProjectionConfig {
            bin_count: bins,
            smooth: false,
            ..ProjectionConfig::default()
        };
        let projector = PhaseProjector::new(config, ParallelVoxelEvaluator::new(1)).unwrap();
        let kernel = projector.kernel();
        let mass: f32 = (-2..=2).map(|d| kernel.profile(d as f32)).sum();
        let phases = sweep(bins, timepoints);
        let mut censor = vec![false; timepoints];
        censor[3] = true;
        censor[17] = true;
        let out = projector
            .project(&ProjectionInputs {
                phases: &phases,
                values: &vec![1.0; timepoints],
                timepoints,
                voxel_slice: &[0],
                mask: &[true],
                censor: &censor,
            })
            .unwrap();
        let total: f32 = out.slice_weights(0).iter().sum();
        let expected = (timepoints - 2) as f32 * mass;
        assert!((total - expected).abs() < 1e-3 * expected, "{total} vs {expected}");
    }

    #[test]
    fn fully_censored_voxel_falls_back_without_nan() {
        let timepoints = 10;
        let projector = PhaseProjector::new(ProjectionConfig::default(), ParallelVoxelEvaluator::new(1)).unwrap();
        let out = projector
            .project(&ProjectionInputs {
                phases: &sweep(32, timepoints),
                values: &vec![5.0; timepoints],
                timepoints,
                voxel_slice: &[0],
                mask: &[true],
                censor: &vec![true; timepoints],
            })
            .unwrap();
        assert!(out.app().iter().all(|x| x.is_finite() && *x == 0.0));
        assert!(out.slice_weights(0).iter().all(|&w| w == 1.0));
        assert_eq!(out.empty_bins(), &[32]);
    }

    #[test]
    fn masked_voxels_stay_zero_and_baseline_is_zero() {
        let bins = 8;
        let timepoints = 24;
        let phases = sweep(bins, timepoints);
        let mut values = Vec::new();
        for v in 0..3 {
            values.extend((0..timepoints).map(|t| 100.0 + v as f32 + (t % bins) as f32));
        }
        let projector = PhaseProjector::new(
            ProjectionConfig {
                bin_count: bins,
                invert: true,
                ..triangular()
            },
            ParallelVoxelEvaluator::new(1),
        )
        .unwrap();
        let out = projector
            .project(&ProjectionInputs {
                phases: &phases,
                values: &values,
                timepoints,
                voxel_slice: &[0, 0, 0],
                mask: &[true, false, true],
                censor: &vec![false; timepoints],
            })
            .unwrap();
        assert!(out.voxel_app(1).iter().all(|&x| x == 0.0));
        for v in [0, 2] {
            let min = out.voxel_app(v).iter().copied().fold(f32::INFINITY, f32::min);
            assert!(min.abs() < 1e-4);
            // Inverted: the first bin holds the largest value
            assert!((out.voxel_app(v)[0] - 7.0).abs() < 1e-3);
        }
    }

    #[test]
    fn censored_spike_is_excluded() {
        let bins = 8;
        let timepoints = 16;
        let phases = sweep(bins, timepoints);
        let mut values = vec![1.0f32; timepoints];
        values[5] = 1000.0;
        let mut censor = vec![false; timepoints];
        censor[5] = true;
        let projector = PhaseProjector::new(
            ProjectionConfig {
                bin_count: bins,
                ..triangular()
            },
            ParallelVoxelEvaluator::new(1),
        )
        .unwrap();
        let out = projector
            .project(&ProjectionInputs {
                phases: &phases,
                values: &values,
                timepoints,
                voxel_slice: &[0],
                mask: &[true],
                censor: &censor,
            })
            .unwrap();
        assert!(out.voxel_raw(0).iter().all(|&x| (x - 1.0).abs() < 1e-4));
    }

    #[test]
    fn smoothing_keeps_low_harmonics() {
        let bins = 32;
        let timepoints = 320;
        let phases = sweep(bins, timepoints);
        let values: Vec<f32> = phases.iter().map(|&p| p.cos() + 0.5 * (12.0 * p).cos()).collect();
        let projector = PhaseProjector::new(
            ProjectionConfig {
                smooth: true,
                ..triangular()
            },
            ParallelVoxelEvaluator::new(1),
        )
        .unwrap();
        let out = projector
            .project(&ProjectionInputs {
                phases: &phases,
                values: &values,
                timepoints,
                voxel_slice: &[0],
                mask: &[true],
                censor: &vec![false; timepoints],
            })
            .unwrap();
        for (b, &x) in out.voxel_raw(0).iter().enumerate() {
            let expected = (-PI + b as f32 * 2.0 * PI / 32.0).cos();
            assert!((x - expected).abs() < 1e-2, "bin {b}: {x} vs {expected}");
        }
    }

    #[test]
    fn serial_and_parallel_projection_agree() {
        let bins = 16;
        let timepoints = 50;
        let slices = 3;
        let phases: Vec<f32> = (0..slices * timepoints).map(|i| (i as f32 * 0.77).sin() * PI).collect();
        let voxels = 30;
        let values: Vec<f32> = (0..voxels * timepoints).map(|i| (i as f32 * 0.13).cos()).collect();
        let voxel_slice: Vec<usize> = (0..voxels).map(|v| v % slices).collect();
        let mask: Vec<bool> = (0..voxels).map(|v| v % 7 != 0).collect();
        let censor: Vec<bool> = (0..timepoints).map(|t| t % 11 == 0).collect();
        let inputs = ProjectionInputs {
            phases: &phases,
            values: &values,
            timepoints,
            voxel_slice: &voxel_slice,
            mask: &mask,
            censor: &censor,
        };
        let config = ProjectionConfig {
            bin_count: bins,
            ..ProjectionConfig::default()
        };
        let serial = PhaseProjector::new(config, ParallelVoxelEvaluator::new(1))
            .unwrap()
            .project(&inputs)
            .unwrap();
        let parallel = PhaseProjector::new(config, ParallelVoxelEvaluator::new(4))
            .unwrap()
            .project(&inputs)
            .unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn regressor_reads_nearest_bin() {
        let bins = 8;
        let timepoints = 16;
        let phases = sweep(bins, timepoints);
        // voxel 0 steps with the phase, voxel 1 is masked out
        let values: Vec<f32> = (0..2 * timepoints)
            .map(|i| if i < timepoints { (i % bins) as f32 * 2.0 } else { 50.0 })
            .collect();
        let projector = PhaseProjector::new(
            ProjectionConfig {
                bin_count: bins,
                ..triangular()
            },
            ParallelVoxelEvaluator::new(2),
        )
        .unwrap();
        let censor = vec![false; timepoints];
        let out = projector
            .project(&ProjectionInputs {
                phases: &phases,
                values: &values,
                timepoints,
                voxel_slice: &[0, 0],
                mask: &[true, false],
                censor: &censor,
            })
            .unwrap();
        let noise = projector
            .synthesize_regressor(&out, &phases, timepoints, &[0, 0], &[true, false])
            .unwrap();
        assert_eq!(noise.len(), 2 * timepoints);
        for t in 0..timepoints {
            assert!((noise[t] - values[t]).abs() < 1e-3, "t {t}: {} vs {}", noise[t], values[t]);
            assert_eq!(noise[timepoints + t], 0.0);
        }
    }

    #[test]
    fn waveform_cycle_has_zero_floor() {
        let bins = 8;
        let phases = sweep(bins, 24);
        let values: Vec<f32> = (0..24).map(|t| 3.0 + (t % bins) as f32).collect();
        let projector = PhaseProjector::new(
            ProjectionConfig {
                bin_count: bins,
                ..triangular()
            },
            ParallelVoxelEvaluator::new(1),
        )
        .unwrap();
        let cycle = projector.project_waveform(&phases, &values, &[false; 24]).unwrap();
        assert!(cycle[0].abs() < 1e-4);
        assert!((cycle[7] - 7.0).abs() < 1e-3);
        assert!(projector.project_waveform(&phases, &values[..3], &[false; 3]).is_err());
    }

    #[test]
    fn censor_maps_slice_samples_to_timepoints() {
        let mut flags = vec![false; 12];
        flags[4] = true;
        flags[11] = true;
        let censor = censor_timepoints(&BadPointMask::from_flags(flags), 3, 4);
        assert_eq!(censor, vec![false, true, false, true]);
    }

    #[test]
    fn shape_errors_are_reported() {
        let projector = PhaseProjector::new(ProjectionConfig::default(), ParallelVoxelEvaluator::new(1)).unwrap();
        let err = projector.project(&ProjectionInputs {
            phases: &[0.0; 10],
            values: &[0.0; 10],
            timepoints: 10,
            voxel_slice: &[1],
            mask: &[true],
            censor: &[false; 10],
        });
        assert!(err.is_err());
    }
}
