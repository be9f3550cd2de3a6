//! Phase projection, vessel maps and cardiac noise regression.

use anyhow::Context;
use phasegrid_analysis::{
    DenoiseRegressor, ParallelVoxelEvaluator, PhaseProjector, Projection, ProjectionInputs, RegressionMode,
    VesselMaps,
};
use phasegrid_config::ResolvedConfig;
use phasegrid_io::VolumeHeader;
use std::f32::consts::TAU;

use super::output::{DETAIL, ESSENTIAL, OutputSink};
use crate::metadata::{ProjectionInfo, RegressionInfo};
use crate::progress::tracked;

/// Voxel data and phases shared by the projection stages.
pub struct ProjectionData<'a> {
    pub header: VolumeHeader,
    /// Series projected onto the phase axis, `voxels × timepoints`.
    pub values: &'a [f32],
    /// Series the cardiac noise is regressed from, `voxels × timepoints`.
    pub series: &'a [f32],
    /// Wrapped cardiac phase of every slice at every timepoint, `slices × timepoints`.
    pub phases: &'a [f32],
    pub voxel_slice: &'a [usize],
    /// Intensity mask.
    pub mask: &'a [bool],
    /// Voxels that are projected and regressed.
    pub projection_mask: &'a [bool],
    pub censor: &'a [bool],
}

/// Project every voxel onto the cardiac phase axis and write the results.
pub fn project_volume(
    data: &ProjectionData<'_>,
    config: &ResolvedConfig,
    evaluator: &ParallelVoxelEvaluator,
    sink: &OutputSink,
) -> anyhow::Result<(Projection, ProjectionInfo)> {
    let timepoints = data.header.timepoints();
    let voxels = data.voxel_slice.len();
    let bins = config.projection.bin_count;

    tracing::info!(bins, "starting phase projection");
    let projection = tracked(evaluator, voxels, "projecting", |ev| {
        PhaseProjector::new(config.projection, ev.clone())?.project(&ProjectionInputs {
            phases: data.phases,
            values: data.values,
            timepoints,
            voxel_slice: data.voxel_slice,
            mask: data.projection_mask,
            censor: data.censor,
        })
    })
    .context("phase projection")?;

    let phase_header = data
        .header
        .with_time_axis(bins, config.projection.convention.lower(), TAU / bins as f32);
    sink.volume("app", phase_header, projection.app().to_vec(), ESSENTIAL)?;
    sink.volume("rawapp", phase_header, projection.raw().to_vec(), DETAIL)?;
    sink.mask("mask", data.mask, DETAIL)?;

    let vessels = VesselMaps::from_projection(&projection, data.mask);
    tracing::info!(
        hard = vessels.hard_threshold,
        soft = vessels.soft_threshold,
        "vessel thresholds"
    );
    sink.volume("maskedapp", phase_header, vessels.masked_app.clone(), DETAIL)?;
    sink.mask("vesselmask", &vessels.vessel_mask, ESSENTIAL)?;
    sink.map("minphase", vessels.min_phase.clone(), DETAIL)?;
    sink.map("maxphase", vessels.max_phase.clone(), DETAIL)?;
    sink.mask("arteries", &vessels.arteries, ESSENTIAL)?;
    sink.mask("veins", &vessels.veins, ESSENTIAL)?;
    sink.map("vesselmap", vessels.vessel_map.clone(), ESSENTIAL)?;

    let count = |flags: &[bool]| flags.iter().filter(|&&b| b).count();
    let info = ProjectionInfo {
        bins,
        kernel: config.source.projection.kernel.clone(),
        kernel_width: config.projection.kernel_width,
        centric: config.source.projection.centric,
        censored_timepoints: count(data.censor),
        empty_bins_total: projection.total_empty_bins(),
        empty_bins_by_slice: projection.empty_bins().to_vec(),
        hard_vessel_threshold: vessels.hard_threshold,
        soft_vessel_threshold: vessels.soft_threshold,
        vessel_voxels: count(&vessels.vessel_mask),
        artery_voxels: count(&vessels.arteries),
        vein_voxels: count(&vessels.veins),
    };
    Ok((projection, info))
}

/// Regress the phase-synthesized cardiac noise out of the series.
pub fn regress_noise(
    data: &ProjectionData<'_>,
    projection: &Projection,
    mode: RegressionMode,
    config: &ResolvedConfig,
    evaluator: &ParallelVoxelEvaluator,
    sink: &OutputSink,
) -> anyhow::Result<RegressionInfo> {
    let timepoints = data.header.timepoints();
    let voxels = data.voxel_slice.len();

    tracing::info!("generating cardiac regressors");
    let projector = PhaseProjector::new(config.projection, evaluator.clone())?;
    let noise = projector
        .synthesize_regressor(projection, data.phases, timepoints, data.voxel_slice, data.projection_mask)
        .context("synthesizing the cardiac regressor")?;
    if config.source.regression.save_noise {
        sink.series("cardiacnoise", noise.clone(), ESSENTIAL)?;
    }

    // Fit over the masked voxels only
    let kept: Vec<usize> = (0..voxels).filter(|&v| data.mask[v]).collect();
    let gather = |buf: &[f32]| -> Vec<f32> {
        kept.iter()
            .flat_map(|&v| buf[v * timepoints..(v + 1) * timepoints].iter().copied())
            .collect()
    };
    let series = gather(data.series);
    let regressor = gather(&noise);
    drop(noise);

    let jobs = match mode {
        RegressionMode::Spatial => timepoints,
        RegressionMode::Temporal => kept.len(),
    };
    tracing::info!(%mode, voxels = kept.len(), "removing cardiac signal");
    let result = tracked(evaluator, jobs, "regressing", |ev| {
        DenoiseRegressor::new(mode, ev.clone()).regress(&series, &regressor, timepoints)
    })
    .context("cardiac noise regression")?;

    let mut filtered = data.series.to_vec();
    let mut removed = vec![0.0f32; data.series.len()];
    for (k, &v) in kept.iter().enumerate() {
        let src = k * timepoints..(k + 1) * timepoints;
        let dst = v * timepoints..(v + 1) * timepoints;
        filtered[dst.clone()].copy_from_slice(&result.residual[src.clone()]);
        removed[dst].copy_from_slice(&result.removed[src]);
    }

    match mode {
        RegressionMode::Spatial => {
            sink.column("fitcoff", &result.coefficients, ESSENTIAL)?;
            sink.column("fitmean", &result.intercepts, ESSENTIAL)?;
            sink.column("fitR", &result.r, ESSENTIAL)?;
        }
        RegressionMode::Temporal => {
            let scatter = |values: &[f32]| {
                let mut map = vec![0.0f32; voxels];
                for (&v, &x) in kept.iter().zip(values) {
                    map[v] = x;
                }
                map
            };
            sink.map("fitamp", scatter(&result.coefficients), ESSENTIAL)?;
            sink.map("fitmean", scatter(&result.intercepts), ESSENTIAL)?;
            sink.map("fitR", scatter(&result.r), ESSENTIAL)?;
        }
    }
    sink.series("filtereddata", filtered, ESSENTIAL)?;
    sink.series("datatoremove", removed, ESSENTIAL)?;

    let mean_r_squared = if result.r_squared.is_empty() {
        0.0
    } else {
        result.r_squared.iter().sum::<f32>() / result.r_squared.len() as f32
    };
    Ok(RegressionInfo {
        mode: mode.to_string(),
        fits: result.coefficients.len(),
        mean_r_squared,
    })
}
