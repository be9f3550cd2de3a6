//! Externally recorded cardiac reference (plethysmogram).

use anyhow::{Context, bail};
use phasegrid_analysis::resample::{interp_linear, resample_to_rate};
use phasegrid_analysis::{
    AnalysisError, BadPointMask, CorrelationAligner, SpectralPeakEstimate, TrapezoidFilter, WaveformConditioner,
    clean_cardiac, signal_quality,
};
use phasegrid_config::ResolvedConfig;
use phasegrid_core::{Waveform, mad_normalize};
use phasegrid_io::{ColumnSpec, read_column};
use std::path::PathBuf;
use std::str::FromStr;

use super::cardiac::ImageCardiac;
use super::output::{DETAIL, ESSENTIAL, OutputSink};
use crate::metadata::{BadPointInfo, CorrelationInfo, ExternalInfo, WaveformInfo};

/// A recording file with an optional column selector, written `file[:column]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CardiacSource {
    pub path: PathBuf,
    pub column: Option<ColumnSpec>,
}

impl FromStr for CardiacSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err("empty cardiac file".to_string());
        }
        if let Some((path, column)) = s.rsplit_once(':')
            && !path.is_empty()
            && !column.is_empty()
            && !column.contains(['/', '\\'])
        {
            let column = column.parse::<ColumnSpec>().map_err(|e| e.to_string())?;
            return Ok(Self {
                path: PathBuf::from(path),
                column: Some(column),
            });
        }
        Ok(Self {
            path: PathBuf::from(s),
            column: None,
        })
    }
}

/// Reference waveform resampled onto the acquisition's time grids.
pub struct ExternalCardiac {
    /// Cleaned, aligned waveform on the slice grid.
    pub sliceres: Vec<f32>,
    /// Bad points on the slice grid.
    pub bad: BadPointMask,
    pub estimate: SpectralPeakEstimate,
    pub info: ExternalInfo,
}

/// Read, check, clean, resample and align the reference recording.
///
/// # Errors
///
/// Unreadable file, a recording that does not span the acquisition
/// ([`AnalysisError::InputCoverage`]), or a failing analysis step.
pub fn load_reference(
    source: &CardiacSource,
    image: &ImageCardiac,
    config: &ResolvedConfig,
    sink: &OutputSink,
) -> anyhow::Result<ExternalCardiac> {
    let ext = &config.source.external;
    let bad_cfg = &config.source.badpoints;
    let std_freq = config.source.cardiac.std_freq;
    let slice_rate = image.waves.sample_rate;

    let column = source
        .column
        .clone()
        .or_else(|| ext.column.as_deref().map(|c| c.parse().unwrap_or_default()))
        .unwrap_or_default();
    tracing::info!(path = %source.path.display(), %column, "reading cardiac signal from file");
    let recording = read_column(&source.path, &column)
        .with_context(|| format!("reading cardiac recording {}", source.path.display()))?;
    let rate = recording.sample_rate.unwrap_or(ext.sample_rate);
    let start = recording.start_time.unwrap_or(ext.start_time);

    let mut samples = recording.samples;
    let missing = samples.iter().filter(|x| !x.is_finite()).count();
    if missing == samples.len() {
        bail!("cardiac recording {} holds no numeric samples", source.path.display());
    }
    if missing > 0 {
        tracing::warn!(missing, "zero-filling missing samples in the cardiac recording");
        samples.iter_mut().filter(|x| !x.is_finite()).for_each(|x| *x = 0.0);
    }
    let native_len = samples.len();
    let wave = Waveform::new(samples, rate)?.with_start_time(f64::from(start));

    let slice_axis: Vec<f64> = (0..image.waves.cardiac.len())
        .map(|i| i as f64 / f64::from(slice_rate))
        .collect();
    check_coverage(&wave, slice_axis.last().copied().unwrap_or(0.0))?;

    let cleaned = clean_cardiac(wave.samples(), rate, &config.envelope)?;
    sink.column("rawpleth_native", wave.samples(), DETAIL)?;
    sink.column("pleth_native", &cleaned.cleaned, DETAIL)?;
    sink.column("cardenvelopefromfile_native", &cleaned.envelope, DETAIL)?;

    let mut sliceres = interp_linear(&wave.time_axis(), &cleaned.cleaned, &slice_axis, false);

    // Anti-aliased resampling keeps the recording's own start time
    let filtered = resample_to_rate(&cleaned.cleaned, rate, std_freq);
    let filtered_axis: Vec<f64> = (0..filtered.len())
        .map(|i| wave.start_time() + i as f64 / f64::from(std_freq))
        .collect();
    let std_axis: Vec<f64> = (0..image.stdres.len())
        .map(|i| i as f64 / f64::from(std_freq))
        .collect();
    let mut stdres = mad_normalize(&interp_linear(&filtered_axis, &filtered, &std_axis, false));

    let aligner = CorrelationAligner::default();
    let matched = aligner.align(&sliceres, &image.raw_sliceres, slice_rate)?;
    tracing::info!(
        lag_secs = matched.lag_secs,
        r = matched.peak_value,
        valid = matched.valid,
        "reference delay relative to fmri waveform"
    );
    let aligned = ext.align_cardiac && matched.valid;
    if aligned {
        sliceres = CorrelationAligner::apply_alignment(&sliceres, &matched, slice_rate);
        stdres = CorrelationAligner::apply_alignment(&stdres, &matched, std_freq);
    } else if ext.align_cardiac {
        let reason = matched.failure.map_or_else(|| "unknown".to_string(), |f| f.to_string());
        tracing::warn!(%reason, "reference and fmri waveforms do not match; leaving the reference unshifted");
    }
    sink.column("pleth_sliceres", &sliceres, ESSENTIAL)?;
    sink.column(&format!("pleth_{std_freq}Hz"), &stdres, ESSENTIAL)?;

    let conditioned = WaveformConditioner::new(config.envelope).apply(&stdres, std_freq)?;
    sink.column(&format!("normpleth_{std_freq}Hz"), &conditioned.normalized, ESSENTIAL)?;
    sink.column(&format!("plethenv_{std_freq}Hz"), &conditioned.envelope, DETAIL)?;
    let quality = signal_quality(&conditioned.cleaned, std_freq, &config.quality)?;
    sink.column(&format!("normpleth_S_sqi_{std_freq}Hz"), &quality.skewness.series, DETAIL)?;
    sink.column(&format!("normpleth_K_sqi_{std_freq}Hz"), &quality.kurtosis.series, DETAIL)?;
    sink.column(&format!("normpleth_E_sqi_{std_freq}Hz"), &quality.entropy.series, DETAIL)?;

    let (bad, threshold) = BadPointMask::detect(
        &sliceres,
        slice_rate,
        config.external_bad_method,
        bad_cfg.retain_fraction,
        bad_cfg.min_gap_secs,
    )?;
    sink.flag_column("pleth_sliceres_badpts", bad.flags(), DETAIL)?;
    let (std_bad, _) = BadPointMask::detect(
        &stdres,
        std_freq,
        config.external_bad_method,
        bad_cfg.retain_fraction,
        bad_cfg.min_gap_secs,
    )?;
    sink.flag_column(&format!("pleth_{std_freq}Hz_badpts"), std_bad.flags(), DETAIL)?;

    let band_limited = mad_normalize(&TrapezoidFilter::cardiac().apply(&sliceres, slice_rate));
    let estimate = config
        .spectral
        .estimate(&bad.censor(&band_limited), slice_rate)
        .context("estimating the heart rate of the cardiac recording")?;
    tracing::info!(bpm = estimate.bpm(), freq = estimate.frequency, "cardiac rate from recording");

    let info = ExternalInfo {
        file: source.path.display().to_string(),
        column: column.to_string(),
        sample_rate: rate,
        start_time: start,
        num_points_native: native_len,
        waveform: WaveformInfo::new(&estimate, BadPointInfo::new(config.external_bad_method, &bad, threshold), &quality),
        match_to_bold: CorrelationInfo::from(&matched),
        aligned,
    };
    Ok(ExternalCardiac {
        sliceres,
        bad,
        estimate,
        info,
    })
}

/// The recording must start no later than 0 s and reach `needed` s.
fn check_coverage(wave: &Waveform, needed: f64) -> Result<(), AnalysisError> {
    let (start, end) = (wave.start_time(), wave.end_time());
    if start > 0.0 || end < needed {
        return Err(AnalysisError::InputCoverage { start, end, needed });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_with_and_without_column() {
        let plain: CardiacSource = "physio/pleth.txt".parse().unwrap();
        assert_eq!(plain.path, PathBuf::from("physio/pleth.txt"));
        assert!(plain.column.is_none());

        let indexed: CardiacSource = "pleth.txt:2".parse().unwrap();
        assert_eq!(indexed.column, Some(ColumnSpec::Index(2)));

        let named: CardiacSource = "sub-01_physio.json:cardiac".parse().unwrap();
        assert_eq!(named.path, PathBuf::from("sub-01_physio.json"));
        assert_eq!(named.column, Some(ColumnSpec::name("cardiac")));

        let windows: CardiacSource = r"C:\data\pleth.txt".parse().unwrap();
        assert_eq!(windows.path, PathBuf::from(r"C:\data\pleth.txt"));
        assert!(windows.column.is_none());

        assert!("".parse::<CardiacSource>().is_err());
    }

    #[test]
    fn coverage() {
        let wave = Waveform::new(vec![0.0; 101], 10.0).unwrap().with_start_time(-1.0);
        // spans -1 .. 9 s
        assert!(check_coverage(&wave, 9.0).is_ok());
        assert!(matches!(
            check_coverage(&wave, 9.5),
            Err(AnalysisError::InputCoverage { .. })
        ));
        let late = Waveform::new(vec![0.0; 101], 10.0).unwrap().with_start_time(0.5);
        assert!(check_coverage(&late, 5.0).is_err());
    }
}
