//! Cardiac phase projection of one fMRI series.

use crate::pipeline::{CardiacSource, RunInputs, run_pipeline};
use anyhow::Context;
use clap::Args;
use phasegrid_config::PipelineConfig;
use std::path::PathBuf;

#[derive(Args)]
pub struct RunArgs {
    /// 4-D NIfTI series
    #[arg(value_name = "FMRI")]
    fmri: PathBuf,

    /// Slice acquisition times (text column or BIDS JSON sidecar)
    #[arg(value_name = "SLICE_TIMES")]
    slice_times: PathBuf,

    /// Root of all output file names
    #[arg(value_name = "OUTPUT_ROOT")]
    output_root: PathBuf,

    /// Pipeline configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// External cardiac recording, optionally with a column (file[:column])
    #[arg(long, value_name = "FILE[:COLUMN]")]
    cardiac_file: Option<CardiacSource>,

    /// Mask of voxels used to estimate the cardiac waveform
    #[arg(long, value_name = "FILE")]
    est_mask: Option<PathBuf>,

    /// Mask of voxels to project and regress
    #[arg(long, value_name = "FILE")]
    proj_mask: Option<PathBuf>,

    /// Six-column motion parameter file to regress out first
    #[arg(long, value_name = "FILE")]
    motion_file: Option<PathBuf>,

    /// Use this heart rate (beats per minute) instead of estimating it
    #[arg(long, value_name = "BPM")]
    forced_hr: Option<f32>,

    /// Number of cardiac phase bins
    #[arg(long)]
    bins: Option<usize>,

    /// Gridding kernel (kaiser, gauss or old)
    #[arg(long)]
    kernel: Option<String>,

    /// Gridding kernel width in bins
    #[arg(long)]
    kernel_width: Option<f32>,

    /// Voxel worker threads (0 uses every CPU)
    #[arg(short = 'j', long)]
    workers: Option<usize>,

    /// Leading volumes to discard
    #[arg(long)]
    num_skip: Option<usize>,

    /// Output level (0 essential, 1 detail, 2 debug)
    #[arg(long)]
    output_level: Option<u8>,

    /// Stop after the cardiac waveform and phase
    #[arg(long)]
    cardiac_calc_only: bool,

    /// Do not remove the cardiac noise from the data
    #[arg(long)]
    no_regression: bool,

    /// Fit the noise per voxel over time instead of per timepoint over space
    #[arg(long)]
    temporal_regression: bool,

    /// Take the phase from the image waveform even with a recording
    #[arg(long)]
    project_with_raw: bool,

    /// Leave the recording unshifted relative to the image waveform
    #[arg(long)]
    no_align: bool,
}

impl RunArgs {
    /// Configuration file (or defaults) with the command-line overrides applied.
    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        if let Some(bpm) = self.forced_hr {
            config.cardiac.forced_hr = Some(bpm);
        }
        if let Some(bins) = self.bins {
            config.projection.bin_count = bins;
        }
        if let Some(kernel) = &self.kernel {
            config.projection.kernel.clone_from(kernel);
        }
        if let Some(width) = self.kernel_width {
            config.projection.kernel_width = width;
        }
        if let Some(workers) = self.workers {
            config.processing.workers = workers;
        }
        if let Some(skip) = self.num_skip {
            config.processing.num_skip = skip;
        }
        if let Some(level) = self.output_level {
            config.output.level = level;
        }
        if self.cardiac_calc_only {
            config.processing.cardiac_calc_only = true;
        }
        if self.no_regression {
            config.regression.enabled = false;
        }
        if self.temporal_regression {
            config.regression.mode = "temporal".to_string();
        }
        if self.project_with_raw {
            config.projection.project_with_raw = true;
        }
        if self.no_align {
            config.external.align_cardiac = false;
        }
        Ok(config)
    }
}

pub fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = args
        .pipeline_config()?
        .validate()
        .context("configuration is invalid")?;

    let inputs = RunInputs {
        fmri: args.fmri,
        slice_times: args.slice_times,
        output_root: args.output_root,
        cardiac: args.cardiac_file,
        estimation_mask: args.est_mask,
        projection_mask: args.proj_mask,
        motion: args.motion_file,
    };
    println!("Processing {}...", inputs.fmri.display());
    let info = run_pipeline(&inputs, &config, None)?;

    println!(
        "  {} x {} x {} voxels, {} timepoints, TR {:.3}s",
        info.dims[0], info.dims[1], info.dims[2], info.dims[3], info.tr_secs
    );
    println!(
        "  Cardiac rate: {:.1} BPM from {} ({:.1}% bad points)",
        info.cardiac_bpm,
        info.phase_source,
        info.overall_bad_fraction * 100.0
    );
    if let Some(projection) = &info.projection {
        println!(
            "  Projected {} voxels onto {} phase bins; {} vessel voxels",
            info.projection_mask_voxels, projection.bins, projection.vessel_voxels
        );
    }
    if let Some(regression) = &info.regression {
        println!(
            "  Removed cardiac noise ({} fit, mean R² {:.3})",
            regression.mode, regression.mean_r_squared
        );
    }
    println!("Done. Outputs written under {}", inputs.output_root.display());
    Ok(())
}
