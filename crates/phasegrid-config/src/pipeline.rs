//! Pipeline configuration file format and operations.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Complete configuration of a phase-projection run.
///
/// Every field has a default, so an empty file is a valid configuration and
/// any subset of keys may be given.
///
/// # TOML Format
///
/// ```toml
/// [cardiac]
/// min_hr = 40.0
/// max_hr = 140.0
/// forced_hr = 62.0
///
/// [badpoints]
/// retain_fraction = 0.89
/// image_method = "mad"
///
/// [projection]
/// bin_count = 32
/// kernel = "kaiser"
/// kernel_width = 3.0
///
/// [regression]
/// mode = "temporal"
///
/// [external]
/// column = "cardiac"
/// sample_rate = 50.0
///
/// [processing]
/// workers = 4
///
/// [output]
/// level = 2
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Cardiac waveform estimation.
    pub cardiac: CardiacConfig,
    /// Bad-point detection.
    pub badpoints: BadPointConfig,
    /// Phase projection.
    pub projection: ProjectionSection,
    /// Cardiac noise regression.
    pub regression: RegressionSection,
    /// External plethysmogram handling.
    pub external: ExternalConfig,
    /// Masks, normalization, parallelism and motion filtering.
    pub processing: ProcessingConfig,
    /// What gets written.
    pub output: OutputConfig,
}

/// `[cardiac]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CardiacConfig {
    /// Lowest plausible heart rate (bpm).
    pub min_hr: f32,
    /// Highest plausible heart rate (bpm).
    pub max_hr: f32,
    /// Savitzky-Golay window for the spectral peak search (bins).
    pub smooth_len: usize,
    /// Envelope low-pass cutoff (Hz).
    pub envelope_cutoff: f32,
    /// Envelope floor as a fraction of its maximum.
    pub envelope_threshold: f32,
    /// Use this heart rate (bpm) instead of estimating it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_hr: Option<f32>,
    /// Width of each TR-harmonic notch in percent; 0 disables the notch.
    pub notch_pct: f32,
    /// MAD-normalize slice averages before interleaving.
    pub mad_normalize_slices: bool,
    /// Standard output rate for cardiac waveforms (Hz).
    pub std_freq: f32,
    /// Oversampling of the slice-resolution phase before slice lookup.
    pub upsample_factor: usize,
    /// Pass the image-derived waveform through a waveform enhancer.
    pub enhance: bool,
}

impl Default for CardiacConfig {
    fn default() -> Self {
        Self {
            min_hr: 40.0,
            max_hr: 140.0,
            smooth_len: 101,
            envelope_cutoff: 0.4,
            envelope_threshold: 0.2,
            forced_hr: None,
            notch_pct: 1.5,
            mad_normalize_slices: true,
            std_freq: 25.0,
            upsample_factor: 100,
            enhance: false,
        }
    }
}

/// `[badpoints]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BadPointConfig {
    /// Fraction of points a Gaussian model should retain.
    pub retain_fraction: f32,
    /// Good runs shorter than this between bad runs become bad (s).
    pub min_gap_secs: f32,
    /// Method for the image-derived waveform (`mad` or `fracval`).
    pub image_method: String,
    /// Method for an external plethysmogram (`mad` or `fracval`).
    pub external_method: String,
    /// Exclude timepoints with bad points from the projection.
    pub censor: bool,
}

impl Default for BadPointConfig {
    fn default() -> Self {
        Self {
            retain_fraction: 0.89,
            min_gap_secs: 2.0,
            image_method: "mad".to_string(),
            external_method: "fracval".to_string(),
            censor: true,
        }
    }
}

/// `[projection]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectionSection {
    /// Phase bins per cardiac cycle.
    pub bin_count: usize,
    /// Gridding kernel (`old`, `gauss` or `kaiser`).
    pub kernel: String,
    /// Kernel width in bins.
    pub kernel_width: f32,
    /// Phase axis from −π (true) or from 0 (false).
    pub centric: bool,
    /// Cyclic low-pass smoothing of each projected cycle.
    pub smooth: bool,
    /// Project demeaned rather than raw voxel data.
    pub use_demeaned: bool,
    /// Negate voxel values before projection.
    pub invert: bool,
    /// Use the image-derived waveform even when an external one is given.
    pub project_with_raw: bool,
}

impl Default for ProjectionSection {
    fn default() -> Self {
        Self {
            bin_count: 32,
            kernel: "kaiser".to_string(),
            kernel_width: 3.0,
            centric: true,
            smooth: true,
            use_demeaned: true,
            invert: true,
            project_with_raw: false,
        }
    }
}

/// `[regression]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RegressionSection {
    /// Remove the synthesized cardiac noise from the data.
    pub enabled: bool,
    /// `spatial` (per timepoint) or `temporal` (per voxel).
    pub mode: String,
    /// Write the synthesized noise regressor volume.
    pub save_noise: bool,
}

impl Default for RegressionSection {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: "spatial".to_string(),
            save_noise: false,
        }
    }
}

/// `[external]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalConfig {
    /// Column name or zero-based index of the cardiac trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    /// Sample rate (Hz) used when the file does not state one.
    pub sample_rate: f32,
    /// Recording start relative to the acquisition (s) when the file does
    /// not state one.
    pub start_time: f32,
    /// Shift the recording by its measured lag to the image waveform.
    pub align_cardiac: bool,
}

impl Default for ExternalConfig {
    fn default() -> Self {
        Self {
            column: None,
            sample_rate: 32.0,
            start_time: 0.0,
            align_cardiac: true,
        }
    }
}

/// `[processing]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Worker threads for voxel loops; 0 uses every CPU.
    pub workers: usize,
    /// Polynomial order removed from each voxel before normalization.
    pub detrend_order: usize,
    /// Leading volumes to discard.
    pub num_skip: usize,
    /// Leading motion-file rows to discard.
    pub mot_skip: usize,
    /// Intensity mask threshold, percent of the 98th percentile mean.
    pub mask_thresh_pct: f32,
    /// Restrict the waveform estimate to the most variable voxels.
    pub var_mask: bool,
    /// Variance mask percentile.
    pub var_mask_thresh_pct: f32,
    /// Variance measure (`mad` or `std`).
    pub var_mask_kind: String,
    /// Take the variance percentile within each slice.
    pub var_mask_by_slice: bool,
    /// Stop after the cardiac waveform and phase are calculated.
    pub cardiac_calc_only: bool,
    /// Regress motion positions.
    pub motion_position: bool,
    /// Regress motion derivatives.
    pub motion_derivative: bool,
    /// Regress derivatives delayed by one volume.
    pub motion_delayed_derivative: bool,
    /// Orthogonalize motion regressors before fitting.
    pub motion_orthogonalize: bool,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            detrend_order: 3,
            num_skip: 0,
            mot_skip: 0,
            mask_thresh_pct: 10.0,
            var_mask: false,
            var_mask_thresh_pct: 75.0,
            var_mask_kind: "mad".to_string(),
            var_mask_by_slice: false,
            cardiac_calc_only: false,
            motion_position: false,
            motion_derivative: true,
            motion_delayed_derivative: true,
            motion_orthogonalize: true,
        }
    }
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// 0 writes the essentials, 1 adds intermediate maps, 2 adds everything.
    pub level: u8,
    /// Write `<root>_info.json`.
    pub write_info: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            level: 1,
            write_info: true,
        }
    }
}

impl PipelineConfig {
    /// Load a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        Self::from_toml(&content)
    }

    /// Load a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Save the configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::write_file(parent, e))?;
        }
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))?;
        Ok(())
    }

    /// Convert the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_default() {
        let config = PipelineConfig::from_toml("").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert_eq!(config.projection.bin_count, 32);
        assert_eq!(config.badpoints.retain_fraction, 0.89);
        assert_eq!(config.external.sample_rate, 32.0);
        assert!(config.regression.enabled);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            [cardiac]
            forced_hr = 72.0

            [projection]
            kernel = "gauss"
            "#,
        )
        .unwrap();
        assert_eq!(config.cardiac.forced_hr, Some(72.0));
        assert_eq!(config.cardiac.min_hr, 40.0);
        assert_eq!(config.projection.kernel, "gauss");
        assert_eq!(config.projection.kernel_width, 3.0);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PipelineConfig::from_toml("[projection]\nbins = 16\n").is_err());
        assert!(PipelineConfig::from_toml("[plotting]\nenabled = true\n").is_err());
    }

    #[test]
    fn toml_round_trip() {
        let mut config = PipelineConfig::default();
        config.external.column = Some("cardiac".to_string());
        config.processing.workers = 8;
        let text = config.to_toml().unwrap();
        assert!(text.contains("[processing]"));
        assert_eq!(PipelineConfig::from_toml(&text).unwrap(), config);
    }
}
