//! Range checks and conversion of a [`PipelineConfig`] into analysis settings.
//!
//! String-valued methods are parsed with the analysis crate's `FromStr`
//! implementations, so the names accepted here are exactly the names the
//! analysis components understand.
//!
//! # Example
//!
//! ```rust
//! use phasegrid_config::PipelineConfig;
//!
//! let mut config = PipelineConfig::default();
//! config.projection.kernel = "gauss".to_string();
//! let resolved = config.validate().unwrap();
//! assert_eq!(resolved.projection.bin_count, 32);
//! ```

use std::str::FromStr;

use phasegrid_analysis::{
    AnalysisError, BadPointMethod, EnvelopeConfig, ImageWaveformConfig, KernelShape, ParallelVoxelEvaluator,
    ProjectionConfig, QualityConfig, RegressionMode, SpectralEstimator, VarianceMaskKind,
};
use phasegrid_core::PhaseConvention;

use crate::error::ConfigError;
use crate::pipeline::PipelineConfig;

/// Variance mask settings, present only when the mask is enabled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VarianceMaskSettings {
    /// Variability measure.
    pub kind: VarianceMaskKind,
    /// Percentile of nonzero variabilities to keep above.
    pub thresh_pct: f32,
    /// Take the percentile within each slice.
    pub by_slice: bool,
}

/// Motion regressor selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionOptions {
    /// Include positions.
    pub position: bool,
    /// Include first derivatives.
    pub derivative: bool,
    /// Include derivatives delayed by one volume.
    pub delayed_derivative: bool,
    /// Orthogonalize before fitting.
    pub orthogonalize: bool,
}

impl MotionOptions {
    /// Whether any regressor family is selected.
    pub fn any(&self) -> bool {
        self.position || self.derivative || self.delayed_derivative
    }
}

/// A checked configuration with every method parsed.
///
/// Created by [`PipelineConfig::validate`]. The source configuration is kept
/// in [`ResolvedConfig::source`] for fields that need no conversion.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The configuration this was built from.
    pub source: PipelineConfig,
    /// Envelope normalization of cardiac waveforms.
    pub envelope: EnvelopeConfig,
    /// Heart-rate search.
    pub spectral: SpectralEstimator,
    /// Forced cardiac fundamental (Hz), if any.
    pub forced_hz: Option<f32>,
    /// Image-derived waveform construction.
    pub image_waveform: ImageWaveformConfig,
    /// Bad-point method for the image-derived waveform.
    pub image_bad_method: BadPointMethod,
    /// Bad-point method for an external recording.
    pub external_bad_method: BadPointMethod,
    /// Phase projection.
    pub projection: ProjectionConfig,
    /// Regression mode, `None` when regression is disabled.
    pub regression: Option<RegressionMode>,
    /// Variance mask, `None` when disabled.
    pub var_mask: Option<VarianceMaskSettings>,
    /// Motion regressor selection.
    pub motion: MotionOptions,
    /// Signal quality windows.
    pub quality: QualityConfig,
}

impl ResolvedConfig {
    /// Voxel-loop evaluator for the configured worker count; 0 uses every CPU.
    pub fn evaluator(&self) -> ParallelVoxelEvaluator {
        match self.source.processing.workers {
            0 => ParallelVoxelEvaluator::all_cpus(),
            n => ParallelVoxelEvaluator::new(n),
        }
    }
}

fn parse_method<T>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = AnalysisError>,
{
    value.parse().map_err(|e| from_analysis(field, e))
}

fn from_analysis(field: &'static str, err: AnalysisError) -> ConfigError {
    match err {
        AnalysisError::UnknownVariant { value, expected, .. } => ConfigError::UnknownMethod {
            field,
            value,
            expected,
        },
        other => ConfigError::out_of_range(field, other.to_string()),
    }
}

fn check(cond: bool, field: &'static str, reason: &str) -> Result<(), ConfigError> {
    if cond {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(field, reason))
    }
}

fn positive(value: f32, field: &'static str) -> Result<(), ConfigError> {
    check(value.is_finite() && value > 0.0, field, "must be a positive number")
}

fn percent(value: f32, field: &'static str) -> Result<(), ConfigError> {
    check((0.0..=100.0).contains(&value), field, "must be in [0, 100]")
}

impl PipelineConfig {
    /// Check every value and build the analysis settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownMethod`] for an unrecognized method name and
    /// [`ConfigError::OutOfRange`] for the first value outside its range.
    pub fn validate(&self) -> Result<ResolvedConfig, ConfigError> {
        let cardiac = &self.cardiac;
        positive(cardiac.min_hr, "cardiac.min_hr")?;
        positive(cardiac.max_hr, "cardiac.max_hr")?;
        check(
            cardiac.max_hr > cardiac.min_hr,
            "cardiac.max_hr",
            "must exceed cardiac.min_hr",
        )?;
        check(cardiac.smooth_len >= 3, "cardiac.smooth_len", "must be at least 3")?;
        positive(cardiac.envelope_cutoff, "cardiac.envelope_cutoff")?;
        check(
            (0.0..1.0).contains(&cardiac.envelope_threshold),
            "cardiac.envelope_threshold",
            "must be in [0, 1)",
        )?;
        if let Some(hr) = cardiac.forced_hr {
            positive(hr, "cardiac.forced_hr")?;
        }
        check(
            cardiac.notch_pct >= 0.0 && cardiac.notch_pct < 100.0,
            "cardiac.notch_pct",
            "must be in [0, 100)",
        )?;
        positive(cardiac.std_freq, "cardiac.std_freq")?;
        check(cardiac.upsample_factor >= 1, "cardiac.upsample_factor", "must be at least 1")?;

        let bad = &self.badpoints;
        check(
            bad.retain_fraction > 0.0 && bad.retain_fraction < 1.0,
            "badpoints.retain_fraction",
            "must be in (0, 1)",
        )?;
        check(
            bad.min_gap_secs.is_finite() && bad.min_gap_secs >= 0.0,
            "badpoints.min_gap_secs",
            "must be non-negative",
        )?;
        let image_bad_method = parse_method("badpoints.image_method", &bad.image_method)?;
        let external_bad_method = parse_method("badpoints.external_method", &bad.external_method)?;

        let proj = &self.projection;
        check(proj.bin_count >= 2, "projection.bin_count", "must be at least 2")?;
        let shape = KernelShape::parse(&proj.kernel, proj.kernel_width).map_err(|e| match e {
            AnalysisError::UnknownVariant { .. } => from_analysis("projection.kernel", e),
            other => from_analysis("projection.kernel_width", other),
        })?;
        let projection = ProjectionConfig {
            bin_count: proj.bin_count,
            kernel_width: proj.kernel_width,
            shape,
            convention: if proj.centric {
                PhaseConvention::Centered
            } else {
                PhaseConvention::NonCentered
            },
            smooth: proj.smooth,
            invert: proj.invert,
            ..ProjectionConfig::default()
        };
        // Construction checks the kernel against the bin count.
        projection.kernel().map_err(|e| from_analysis("projection.bin_count", e))?;

        let regression = if self.regression.enabled {
            Some(parse_method("regression.mode", &self.regression.mode)?)
        } else {
            None
        };

        positive(self.external.sample_rate, "external.sample_rate")?;
        check(
            self.external.start_time.is_finite(),
            "external.start_time",
            "must be finite",
        )?;

        let proc = &self.processing;
        percent(proc.mask_thresh_pct, "processing.mask_thresh_pct")?;
        percent(proc.var_mask_thresh_pct, "processing.var_mask_thresh_pct")?;
        let var_kind: VarianceMaskKind = parse_method("processing.var_mask_kind", &proc.var_mask_kind)?;
        let var_mask = proc.var_mask.then_some(VarianceMaskSettings {
            kind: var_kind,
            thresh_pct: proc.var_mask_thresh_pct,
            by_slice: proc.var_mask_by_slice,
        });
        check(self.output.level <= 2, "output.level", "must be 0, 1 or 2")?;

        Ok(ResolvedConfig {
            source: self.clone(),
            envelope: EnvelopeConfig {
                cutoff: cardiac.envelope_cutoff,
                threshold: cardiac.envelope_threshold,
            },
            spectral: SpectralEstimator::new(cardiac.min_hr, cardiac.max_hr, cardiac.smooth_len),
            forced_hz: cardiac.forced_hr.map(|bpm| bpm / 60.0),
            image_waveform: ImageWaveformConfig {
                notch_pct: cardiac.notch_pct,
                mad_normalize_slices: cardiac.mad_normalize_slices,
            },
            image_bad_method,
            external_bad_method,
            projection,
            regression,
            var_mask,
            motion: MotionOptions {
                position: proc.motion_position,
                derivative: proc.motion_derivative,
                delayed_derivative: proc.motion_delayed_derivative,
                orthogonalize: proc.motion_orthogonalize,
            },
            quality: QualityConfig::default(),
        })
    }
}
