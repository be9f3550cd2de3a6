//! The phase projection pipeline.
//!
//! Reads the 4-D series, derives a cardiac waveform from the image (and
//! optionally from an external recording), turns it into a per-slice cardiac
//! phase and projects every voxel onto one cardiac cycle. Products are
//! written beside `output_root`.

mod cardiac;
mod external;
pub mod output;
mod project;

pub use external::CardiacSource;

use anyhow::{Context, bail};
use phasegrid_analysis::slices::{intensity_mask, normalize_voxels, variance_mask};
use phasegrid_analysis::{
    ParallelVoxelEvaluator, PhaseEngine, PhaseProjector, SliceTiming, WaveformEnhancer,
    censor_timepoints, phase::isolate_fundamental,
};
use phasegrid_config::ResolvedConfig;
use phasegrid_core::wrap_phase;
use phasegrid_io::{NiftiVolumeIo, VolumeReader, read_mask, read_slice_times};
use std::path::PathBuf;

use crate::metadata::{MotionInfo, RunInfo, VarianceMaskInfo, round2};
use crate::motion::{MotionFileRegressor, MotionRegressor};
use crate::progress::tracked;
use output::{DEBUG, DETAIL, ESSENTIAL, OutputSink};
use project::{ProjectionData, project_volume, regress_noise};

/// Files a run reads and the root its products are written under.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub fmri: PathBuf,
    pub slice_times: PathBuf,
    pub output_root: PathBuf,
    pub cardiac: Option<CardiacSource>,
    /// Voxels used to build the image-derived waveform.
    pub estimation_mask: Option<PathBuf>,
    /// Voxels projected and regressed.
    pub projection_mask: Option<PathBuf>,
    /// Six-column rigid-body motion parameters.
    pub motion: Option<PathBuf>,
}

/// Run the whole pipeline.
///
/// # Errors
///
/// Unreadable inputs, inconsistent shapes, empty masks, an external
/// recording that does not cover the acquisition, or a failing analysis
/// step.
pub fn run_pipeline(
    inputs: &RunInputs,
    config: &ResolvedConfig,
    enhancer: Option<&dyn WaveformEnhancer>,
) -> anyhow::Result<RunInfo> {
    let proc = &config.source.processing;
    let std_freq = config.source.cardiac.std_freq;
    let io = NiftiVolumeIo::default();
    let evaluator = config.evaluator();
    tracing::info!(workers = evaluator.workers(), "voxel workers");

    let mut volume = io
        .read_volume(&inputs.fmri)
        .with_context(|| format!("reading {}", inputs.fmri.display()))?;
    volume
        .skip_leading(proc.num_skip)
        .context("skipping leading volumes")?;
    let header = volume.header;
    let timepoints = header.timepoints();
    if timepoints < 2 {
        bail!("{} has {timepoints} usable timepoints", inputs.fmri.display());
    }
    let voxel_slice = volume.voxel_slices();
    let voxels = voxel_slice.len();
    tracing::info!(dims = ?header.dims, tr = header.tr_secs, "read fmri data");

    let sink = OutputSink::new(&inputs.output_root, config.source.output.level, header)?;
    let mut info = RunInfo {
        version: env!("CARGO_PKG_VERSION").to_string(),
        input: inputs.fmri.display().to_string(),
        slice_times: inputs.slice_times.display().to_string(),
        dims: header.dims,
        tr_secs: header.tr_secs,
        num_skip: proc.num_skip,
        std_freq,
        ..RunInfo::default()
    };

    let mask = intensity_mask(volume.mean_image().data(), proc.mask_thresh_pct);
    info.mask_voxels = count(&mask);
    if info.mask_voxels == 0 {
        bail!("intensity mask is empty; lower processing.mask_thresh_pct");
    }
    let restrict = |path: &Option<PathBuf>| -> anyhow::Result<Vec<bool>> {
        match path {
            Some(path) => {
                let external = read_mask(&io, path, &header).with_context(|| format!("reading mask {}", path.display()))?;
                Ok(external.iter().zip(&mask).map(|(&a, &b)| a && b).collect())
            }
            None => Ok(mask.clone()),
        }
    };
    let mut est_mask = restrict(&inputs.estimation_mask)?;
    let proj_mask = restrict(&inputs.projection_mask)?;
    info.projection_mask_voxels = count(&proj_mask);

    let mut data = volume.into_data();
    if let Some(path) = &inputs.motion {
        tracing::info!(path = %path.display(), "filtering motion");
        let regressor = MotionFileRegressor::new(path, proc.mot_skip, config.motion);
        let regressors = tracked(&evaluator, voxels, "motion", |ev| {
            regressor.filter(&mut data, timepoints, &mask, ev)
        })?;
        let columns: Vec<&[f32]> = regressors.iter().map(Vec::as_slice).collect();
        sink.columns("orthogonalizedmotion", &columns, ESSENTIAL)?;
        if sink.wants(DEBUG) {
            sink.series("motionfiltered", data.clone(), DEBUG)?;
        }
        info.motion = Some(MotionInfo {
            file: path.display().to_string(),
            regressors: regressors.len(),
            orthogonalized: config.motion.orthogonalize,
        });
    }

    let norm = tracked(&evaluator, voxels, "normalizing", |ev| {
        normalize_voxels(&data, timepoints, &mask, proc.detrend_order, ev)
    })
    .context("normalizing voxels")?;

    if let Some(vm) = config.var_mask {
        let (keep, variability) = variance_mask(
            &norm.normalized,
            timepoints,
            vm.kind,
            vm.thresh_pct,
            vm.by_slice.then_some(voxel_slice.as_slice()),
        );
        est_mask.iter_mut().zip(&keep).for_each(|(m, &k)| *m &= k);
        sink.map("var", variability, ESSENTIAL)?;
        sink.mask("varmask", &est_mask, ESSENTIAL)?;
        info.var_mask = Some(VarianceMaskInfo {
            kind: config.source.processing.var_mask_kind.clone(),
            thresh_pct: vm.thresh_pct,
            by_slice: vm.by_slice,
        });
    }
    info.estimation_mask_voxels = count(&est_mask);
    if info.estimation_mask_voxels == 0 {
        bail!("estimation mask is empty");
    }

    let times = read_slice_times(&inputs.slice_times)
        .with_context(|| format!("reading slice times {}", inputs.slice_times.display()))?;
    if times.len() != header.slice_count() {
        bail!(
            "{} lists {} slice times for {} slices",
            inputs.slice_times.display(),
            times.len(),
            header.slice_count()
        );
    }
    let timing = SliceTiming::from_times(times, header.tr_secs)?;

    let image = cardiac::from_image(
        &norm.normalized,
        timepoints,
        &voxel_slice,
        &est_mask,
        &timing,
        config,
        enhancer,
        &sink,
    )?;
    let slice_rate = image.waves.sample_rate;
    info.slice_sample_rate = slice_rate;
    info.num_steps = image.waves.num_steps;
    info.num_points_sliceres = image.waves.cardiac.len();
    info.num_points_stdres = image.stdres.len();
    info.enhancement = image.enhancement.as_ref().map(ToString::to_string);

    // The recording, when given, sets the rate. Its waveform drives the phase
    // unless the image waveform is explicitly preferred.
    let project_with_raw = config.source.projection.project_with_raw;
    let (waveform, bad, estimate, from_image) = match &inputs.cardiac {
        Some(source) => {
            let reference = external::load_reference(source, &image, config, &sink)?;
            let picked = if project_with_raw {
                (image.waves.cardiac.clone(), image.bad.clone(), reference.estimate, true)
            } else {
                let merged = reference.bad.union(&image.bad)?;
                (reference.sliceres, merged, reference.estimate, false)
            };
            info.pleth = Some(reference.info);
            picked
        }
        None => (image.waves.cardiac.clone(), image.bad.clone(), image.estimate, true),
    };
    info.bold = image.info;
    info.phase_source = if from_image { "fmri" } else { "external" }.to_string();
    info.overall_bad_fraction = bad.bad_fraction();
    sink.flag_column("overall_sliceres_badpts", bad.flags(), DETAIL)?;

    let f0 = config.forced_hz.unwrap_or(estimate.frequency);
    info.forced_hr_bpm = config.forced_hz.map(|f| round2(f * 60.0));
    info.cardiac_freq = f0;
    info.cardiac_bpm = round2(f0 * 60.0);
    tracing::info!(bpm = info.cardiac_bpm, source = %info.phase_source, "cardiac rate for phase extraction");

    let engine = PhaseEngine::default();
    let narrowband = if from_image { bad.censor(&waveform) } else { waveform };
    let fundamental = isolate_fundamental(&narrowband, slice_rate, f0);
    sink.column("cardiacfundamental", &fundamental, DETAIL)?;
    let trace = engine.extract_phase(&fundamental);
    sink.column("ampenv", &trace.amplitude, DETAIL)?;
    sink.column("instphase_unwrapped", &trace.phase, DETAIL)?;
    let phase = engine.detrend_phase(&trace.phase);
    sink.column("filtered_instphase_unwrapped", &phase, DETAIL)?;
    info.phi0 = phase.first().copied().unwrap_or(0.0);

    let convention = config.projection.convention;
    let slice_axis: Vec<f64> = (0..phase.len()).map(|i| i as f64 / f64::from(slice_rate)).collect();
    let tr = f64::from(header.tr_secs);
    let span = tr * timepoints as f64;
    let upsampled = phase.len() * config.source.cardiac.upsample_factor.max(1);
    let up_axis: Vec<f64> = (0..upsampled).map(|i| i as f64 * span / upsampled as f64).collect();
    sink.column(
        "interpinstphase",
        &engine.resample_phase(&phase, &slice_axis, &up_axis, convention),
        DETAIL,
    )?;

    let sample_censor = if config.source.badpoints.censor {
        bad.flags().to_vec()
    } else {
        vec![false; bad.len()]
    };
    let wrapped: Vec<f32> = phase.iter().map(|&p| wrap_phase(p, convention)).collect();
    let cycle = PhaseProjector::new(config.projection, ParallelVoxelEvaluator::new(1))?
        .project_waveform(&wrapped, &image.waves.cardiac, &sample_censor)
        .context("projecting the cardiac waveform")?;
    sink.column("cardcyclefromfmri", &cycle, ESSENTIAL)?;

    if proc.cardiac_calc_only {
        tracing::info!("cardiac waveform only; skipping projection");
        info.cardiac_calc_only = true;
        return finish(info, config, &sink);
    }

    let phases = slice_phases(&engine, &phase, &slice_axis, &timing, timepoints, convention);
    let censor = if config.source.badpoints.censor {
        censor_timepoints(&bad, image.waves.num_steps, timepoints)
    } else {
        vec![false; timepoints]
    };
    let censored = count(&censor);
    if censored == timepoints {
        bail!("every timepoint is censored; disable badpoints.censor or relax retain_fraction");
    }
    if censored > 0 {
        tracing::info!(censored, "timepoints censored from projection");
    }

    let values = if config.source.projection.use_demeaned {
        norm.demeaned.as_slice()
    } else {
        data.as_slice()
    };
    let projection_data = ProjectionData {
        header,
        values,
        series: &data,
        phases: &phases,
        voxel_slice: &voxel_slice,
        mask: &mask,
        projection_mask: &proj_mask,
        censor: &censor,
    };
    let (projection, projection_info) = project_volume(&projection_data, config, &evaluator, &sink)?;
    info.projection = Some(projection_info);

    if let Some(mode) = config.regression {
        info.regression = Some(regress_noise(&projection_data, &projection, mode, config, &evaluator, &sink)?);
    }
    finish(info, config, &sink)
}

/// Wrapped phase of each slice at each acquisition time, `slices × timepoints`.
fn slice_phases(
    engine: &PhaseEngine,
    phase: &[f32],
    phase_axis: &[f64],
    timing: &SliceTiming,
    timepoints: usize,
    convention: phasegrid_core::PhaseConvention,
) -> Vec<f32> {
    let tr = f64::from(timing.tr_secs());
    let mut phases = Vec::with_capacity(timing.slice_count() * timepoints);
    for &offset in timing.times() {
        let acquired: Vec<f64> = (0..timepoints).map(|t| t as f64 * tr + f64::from(offset)).collect();
        phases.extend(engine.resample_phase(phase, phase_axis, &acquired, convention));
    }
    phases
}

fn finish(info: RunInfo, config: &ResolvedConfig, sink: &OutputSink) -> anyhow::Result<RunInfo> {
    if config.source.output.write_info {
        let path = sink.path("info", ".json");
        info.save(&path)?;
        tracing::info!(path = %path.display(), "wrote run metadata");
    }
    Ok(info)
}

fn count(flags: &[bool]) -> usize {
    flags.iter().filter(|&&b| b).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use phasegrid_core::PhaseConvention;

    #[test]
    fn slice_phases_follow_acquisition_times() {
        let rate = 10.0;
        // one cycle per second
        let phase: Vec<f32> = (0..200).map(|i| std::f32::consts::TAU * i as f32 / rate).collect();
        let axis: Vec<f64> = (0..200).map(|i| f64::from(i) / f64::from(rate)).collect();
        let timing = SliceTiming::from_times(vec![0.0, 0.25], 2.0).unwrap();
        let phases = slice_phases(&PhaseEngine::default(), &phase, &axis, &timing, 5, PhaseConvention::Centered);

        assert_eq!(phases.len(), 10);
        // slice 0 is sampled on whole seconds, so phase wraps to 0
        assert!(phases[..5].iter().all(|p| p.abs() < 1e-3));
        // slice 1 lags by a quarter cycle
        for p in &phases[5..] {
            assert!((p - std::f32::consts::FRAC_PI_2).abs() < 1e-3);
        }
    }

    #[test]
    fn mask_count() {
        assert_eq!(count(&[true, false, true]), 2);
        assert_eq!(count(&[]), 0);
    }
}
