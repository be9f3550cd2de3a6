//! Cardiac waveform estimated from the image data.

use anyhow::Context;
use phasegrid_analysis::resample::{interp_linear, resample_to_rate};
use phasegrid_analysis::{
    BadPointMask, CorrelationAligner, EnhancementStatus, ImageWaveforms, SliceTiming, SpectralPeakEstimate,
    WaveformConditioner, WaveformEnhancer, enhance_or_passthrough, signal_quality, slices::image_waveform,
};
use phasegrid_config::ResolvedConfig;
use phasegrid_core::mad_normalize;

use super::output::{DETAIL, ESSENTIAL, OutputSink};
use crate::metadata::{BadPointInfo, WaveformInfo};

/// Image-derived cardiac waveform and its analysis.
pub struct ImageCardiac {
    /// Cardiac and respiratory waveforms at slice resolution.
    pub waves: ImageWaveforms,
    /// Slice-resolution waveform exactly as estimated, before any enhancement.
    pub raw_sliceres: Vec<f32>,
    pub bad: BadPointMask,
    pub estimate: SpectralPeakEstimate,
    /// MAD-normalized waveform at the standard rate.
    pub stdres: Vec<f32>,
    pub info: WaveformInfo,
    pub enhancement: Option<EnhancementStatus>,
}

/// Build the cardiac waveform from normalized voxel data and analyse it.
#[allow(clippy::too_many_arguments)]
pub fn from_image(
    normalized: &[f32],
    timepoints: usize,
    voxel_slice: &[usize],
    est_mask: &[bool],
    timing: &SliceTiming,
    config: &ResolvedConfig,
    enhancer: Option<&dyn WaveformEnhancer>,
    sink: &OutputSink,
) -> anyhow::Result<ImageCardiac> {
    let cardiac = &config.source.cardiac;
    let bad_cfg = &config.source.badpoints;
    let std_freq = cardiac.std_freq;

    tracing::info!("estimating cardiac signal from fmri data");
    let mut waves = image_waveform(normalized, timepoints, voxel_slice, est_mask, timing, &config.image_waveform)
        .context("building the image-derived waveform")?;
    let rate = waves.sample_rate;
    sink.column("cardfromfmri_sliceres", &waves.cardiac, ESSENTIAL)?;
    sink.column("respfromfmri_sliceres", &waves.respiratory, DETAIL)?;
    let raw_sliceres = waves.cardiac.clone();

    let (bad, threshold) = BadPointMask::detect(
        &waves.cardiac,
        rate,
        config.image_bad_method,
        bad_cfg.retain_fraction,
        bad_cfg.min_gap_secs,
    )?;
    sink.flag_column("cardfromfmri_sliceres_badpts", bad.flags(), DETAIL)?;
    sink.column("cardfromfmri_sliceres_censored", &bad.censor(&waves.cardiac), DETAIL)?;

    let estimate = config
        .spectral
        .estimate(&bad.censor(&waves.cardiac), rate)
        .context("estimating the heart rate of the image-derived waveform")?;
    tracing::info!(bpm = estimate.bpm(), freq = estimate.frequency, "cardiac rate from fmri");

    // Standard-rate copy for envelope cleaning and quality
    let stdres = mad_normalize(&resample_to_rate(&waves.cardiac, rate, std_freq));
    sink.column(&format!("cardfromfmri_{std_freq}Hz"), &stdres, ESSENTIAL)?;
    let conditioned = WaveformConditioner::new(config.envelope)
        .with_upper_limit(rate / 2.0)
        .apply(&stdres, std_freq)?;
    sink.column(&format!("normcardfromfmri_{std_freq}Hz"), &conditioned.normalized, ESSENTIAL)?;
    sink.column(&format!("cardfromfmrienv_{std_freq}Hz"), &conditioned.envelope, ESSENTIAL)?;

    let quality = signal_quality(&conditioned.normalized, std_freq, &config.quality)?;
    sink.column(&format!("normcardfromfmri_S_sqi_{std_freq}Hz"), &quality.skewness.series, DETAIL)?;
    sink.column(&format!("normcardfromfmri_K_sqi_{std_freq}Hz"), &quality.kurtosis.series, DETAIL)?;
    sink.column(&format!("normcardfromfmri_E_sqi_{std_freq}Hz"), &quality.entropy.series, DETAIL)?;

    let (std_bad, _) = BadPointMask::detect(
        &stdres,
        std_freq,
        config.image_bad_method,
        bad_cfg.retain_fraction,
        bad_cfg.min_gap_secs,
    )?;
    sink.flag_column(&format!("cardfromfmri_{std_freq}Hz_badpts"), std_bad.flags(), DETAIL)?;

    let enhancement = if cardiac.enhance {
        let aligner = CorrelationAligner::default();
        let (enhanced, status) = enhance_or_passthrough(enhancer, &stdres, std_freq, &aligner);
        if matches!(status, EnhancementStatus::Applied { .. }) {
            sink.column(&format!("cardfromfmri_enhanced_{std_freq}Hz"), &enhanced, ESSENTIAL)?;
            waves.cardiac = to_slice_rate(&enhanced, std_freq, rate, waves.cardiac.len());
            sink.column("cardfromfmri_enhanced_sliceres", &waves.cardiac, ESSENTIAL)?;
        }
        tracing::info!(status = %status, "waveform enhancement");
        Some(status)
    } else {
        None
    };

    let info = WaveformInfo::new(&estimate, BadPointInfo::new(config.image_bad_method, &bad, threshold), &quality);
    Ok(ImageCardiac {
        waves,
        raw_sliceres,
        bad,
        estimate,
        stdres,
        info,
        enhancement,
    })
}

/// Bring a standard-rate waveform back onto the `len`-sample slice grid.
fn to_slice_rate(samples: &[f32], std_freq: f32, slice_rate: f32, len: usize) -> Vec<f32> {
    let filtered = resample_to_rate(samples, std_freq, slice_rate);
    let src: Vec<f64> = (0..filtered.len()).map(|i| i as f64 / f64::from(slice_rate)).collect();
    let dst: Vec<f64> = (0..len).map(|i| i as f64 / f64::from(slice_rate)).collect();
    mad_normalize(&interp_linear(&src, &filtered, &dst, false))
}
