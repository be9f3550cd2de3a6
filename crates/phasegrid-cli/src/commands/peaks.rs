//! Mutual-information ranking of cross-correlation peaks.

use crate::pipeline::output::{ESSENTIAL, OutputSink};
use crate::progress::tracked;
use anyhow::{Context, bail};
use clap::Args;
use phasegrid_analysis::{ParallelVoxelEvaluator, PeakRanker, RankedPeak};
use phasegrid_io::{ColumnSpec, NiftiVolumeIo, VolumeReader, read_column, read_mask};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Args)]
pub struct PeaksArgs {
    /// 4-D voxel time courses
    #[arg(value_name = "SERIES")]
    series: PathBuf,

    /// 4-D correlation functions; the time axis is the lag axis
    #[arg(value_name = "CORRELATION")]
    correlation: PathBuf,

    /// Reference time course (text column), sampled at TR / oversample
    #[arg(value_name = "REFERENCE")]
    reference: PathBuf,

    /// Root of all output file names
    #[arg(value_name = "OUTPUT_ROOT")]
    output_root: PathBuf,

    /// Only rank voxels inside this mask
    #[arg(long, value_name = "FILE")]
    mask: Option<PathBuf>,

    /// Lag of the first correlation sample in seconds (default: from the header)
    #[arg(long)]
    lag_start: Option<f32>,

    /// Lag step in seconds (default: from the header)
    #[arg(long)]
    lag_step: Option<f32>,

    /// Histogram bins for mutual information
    #[arg(long, default_value = "16")]
    bins: usize,

    /// Oversampling factor of the reference relative to the series
    #[arg(long, default_value = "1")]
    oversample: usize,

    /// Also rank correlation minima
    #[arg(long)]
    bipolar: bool,

    /// Voxel worker threads (0 uses every CPU)
    #[arg(short = 'j', long, default_value = "0")]
    workers: usize,

    /// Write every voxel's ranked peaks as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct VoxelPeaks {
    voxel: usize,
    peaks: Vec<PeakRecord>,
}

#[derive(Serialize)]
struct PeakRecord {
    lag_secs: f32,
    correlation: f32,
    mutual_info: f32,
}

impl From<&RankedPeak> for PeakRecord {
    fn from(p: &RankedPeak) -> Self {
        Self {
            lag_secs: p.lag_secs,
            correlation: p.correlation,
            mutual_info: p.mutual_info,
        }
    }
}

pub fn run(args: PeaksArgs) -> anyhow::Result<()> {
    let io = NiftiVolumeIo::default();
    println!("Reading {}...", args.series.display());
    let series = io
        .read_volume(&args.series)
        .with_context(|| format!("reading {}", args.series.display()))?;
    let correlation = io
        .read_volume(&args.correlation)
        .with_context(|| format!("reading {}", args.correlation.display()))?;
    if !series.header.same_grid(&correlation.header) {
        bail!(
            "series grid {:?} differs from correlation grid {:?}",
            &series.header.dims[..3],
            &correlation.header.dims[..3]
        );
    }
    let reference = read_column(&args.reference, &ColumnSpec::default())
        .with_context(|| format!("reading {}", args.reference.display()))?
        .samples;

    let timepoints = series.timepoints();
    let lags = correlation.timepoints();
    let lag_start = args.lag_start.unwrap_or(correlation.header.toffset);
    let lag_step = args.lag_step.unwrap_or(correlation.header.tr_secs);
    if lag_step.is_nan() || lag_step <= 0.0 {
        bail!("lag step must be positive, got {lag_step}");
    }
    let lag_axis: Vec<f32> = (0..lags).map(|i| lag_start + i as f32 * lag_step).collect();
    println!(
        "  {} voxels, {timepoints} timepoints, lags {:.2}s to {:.2}s",
        series.voxel_count(),
        lag_axis.first().copied().unwrap_or(0.0),
        lag_axis.last().copied().unwrap_or(0.0)
    );

    let voxels = series.voxel_count();
    let mask = match &args.mask {
        Some(path) => read_mask(&io, path, &series.header).with_context(|| format!("reading mask {}", path.display()))?,
        None => vec![true; voxels],
    };
    let kept: Vec<usize> = (0..voxels).filter(|&v| mask[v]).collect();
    if kept.is_empty() {
        bail!("mask selects no voxels");
    }
    let gathered_series: Vec<f32> = kept.iter().flat_map(|&v| series.voxel_series(v).iter().copied()).collect();
    let gathered_corr: Vec<f32> = kept
        .iter()
        .flat_map(|&v| correlation.voxel_series(v).iter().copied())
        .collect();

    let ranker = PeakRanker {
        bins: args.bins,
        oversample: args.oversample.max(1),
        bipolar: args.bipolar,
    };
    let evaluator = match args.workers {
        0 => ParallelVoxelEvaluator::all_cpus(),
        n => ParallelVoxelEvaluator::new(n),
    };
    let ranked = tracked(&evaluator, kept.len(), "ranking", |ev| {
        ranker.rank_all(
            ev,
            &gathered_series,
            timepoints,
            &reference,
            &lag_axis,
            &gathered_corr,
            series.header.tr_secs,
        )
    })
    .context("ranking correlation peaks")?;

    let (best_lag, best_corr, best_mi, counts) = best_peak_maps(&ranked, &kept, voxels);
    let found = counts.iter().filter(|&&c| c > 0.0).count();

    let sink = OutputSink::new(&args.output_root, ESSENTIAL, series.header)?;
    sink.map("bestlag", best_lag, ESSENTIAL)?;
    sink.map("bestcorr", best_corr, ESSENTIAL)?;
    sink.map("bestMI", best_mi, ESSENTIAL)?;
    sink.map("peakcount", counts, ESSENTIAL)?;
    if args.json {
        let records: Vec<VoxelPeaks> = ranked
            .iter()
            .map(|(&slot, peaks)| VoxelPeaks {
                voxel: kept[slot],
                peaks: peaks.iter().map(PeakRecord::from).collect(),
            })
            .collect();
        let path = sink.path("peaks", ".json");
        std::fs::write(&path, serde_json::to_string_pretty(&records)?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    println!("Ranked peaks in {found} of {} voxels", kept.len());
    println!("Done. Outputs written under {}", args.output_root.display());
    Ok(())
}

/// Lag, correlation and mutual information of each voxel's top peak, plus
/// its peak count, scattered back onto the full grid.
fn best_peak_maps(
    ranked: &BTreeMap<usize, Vec<RankedPeak>>,
    kept: &[usize],
    voxels: usize,
) -> (Vec<f32>, Vec<f32>, Vec<f32>, Vec<f32>) {
    let mut lag = vec![0.0f32; voxels];
    let mut corr = vec![0.0f32; voxels];
    let mut mi = vec![0.0f32; voxels];
    let mut counts = vec![0.0f32; voxels];
    for (&slot, peaks) in ranked {
        let v = kept[slot];
        counts[v] = peaks.len() as f32;
        if let Some(best) = peaks.first() {
            lag[v] = best.lag_secs;
            corr[v] = best.correlation;
            mi[v] = best.mutual_info;
        }
    }
    (lag, corr, mi, counts)
}
