//! Optional refinement of the image-derived cardiac waveform.
//!
//! An enhancer is any model that maps a noisy cardiac waveform at the
//! standard rate to a cleaner one. None ships with this crate. When no
//! enhancer is configured, or the enhancer fails, the pipeline carries on
//! with the unenhanced waveform and records why.

use crate::error::Result;
use crate::xcorr::{CorrelationAligner, CorrelationResult};
use std::fmt;

/// A black-box waveform enhancement filter.
pub trait WaveformEnhancer: Send + Sync {
    /// Short identifier recorded in run metadata.
    fn name(&self) -> &str;

    /// Enhance `waveform` sampled at `sample_rate` Hz.
    ///
    /// The output must have the same length and rate as the input.
    ///
    /// # Errors
    ///
    /// Implementation-specific; any error degrades to the unenhanced waveform.
    fn enhance(&self, waveform: &[f32], sample_rate: f32) -> Result<Vec<f32>>;
}

/// What happened to the waveform.
#[derive(Debug, Clone, PartialEq)]
pub enum EnhancementStatus {
    /// No enhancer was configured.
    Unavailable,
    /// The enhancer ran; `check` compares its output with its input.
    Applied {
        /// Enhancer name.
        name: String,
        /// Correlation of the enhanced waveform against the original.
        check: CorrelationResult,
    },
    /// The enhancer returned an error or a malformed waveform.
    Failed {
        /// Enhancer name.
        name: String,
        /// Failure description.
        reason: String,
    },
}

impl EnhancementStatus {
    /// Label recorded in run metadata.
    pub fn label(&self) -> &'static str {
        match self {
            EnhancementStatus::Unavailable => "unavailable",
            EnhancementStatus::Applied { .. } => "applied",
            EnhancementStatus::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for EnhancementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnhancementStatus::Unavailable => f.write_str("unavailable"),
            EnhancementStatus::Applied { name, check } => {
                write!(f, "applied ({name}, r = {:.3}, lag = {:.3} s)", check.peak_value, check.lag_secs)
            }
            EnhancementStatus::Failed { name, reason } => write!(f, "failed ({name}: {reason})"),
        }
    }
}

/// Run `enhancer` on `waveform` if there is one.
///
/// # Returns
///
/// The waveform to use downstream and the status to record. On any failure
/// the original waveform is returned.
pub fn enhance_or_passthrough(
    enhancer: Option<&dyn WaveformEnhancer>,
    waveform: &[f32],
    sample_rate: f32,
    aligner: &CorrelationAligner,
) -> (Vec<f32>, EnhancementStatus) {
    let Some(enhancer) = enhancer else {
        tracing::info!("no waveform enhancer configured; using the unenhanced waveform");
        return (waveform.to_vec(), EnhancementStatus::Unavailable);
    };
    let name = enhancer.name().to_string();
    let failed = |reason: String| {
        tracing::warn!(enhancer = %name, %reason, "waveform enhancement failed; using the unenhanced waveform");
        (
            waveform.to_vec(),
            EnhancementStatus::Failed {
                name: name.clone(),
                reason,
            },
        )
    };

    let enhanced = match enhancer.enhance(waveform, sample_rate) {
        Ok(enhanced) => enhanced,
        Err(e) => return failed(e.to_string()),
    };
    if enhanced.len() != waveform.len() {
        return failed(format!("length {} instead of {}", enhanced.len(), waveform.len()));
    }
    if enhanced.iter().any(|x| !x.is_finite()) {
        return failed("non-finite output".to_string());
    }
    let check = match aligner.align(waveform, &enhanced, sample_rate) {
        Ok(check) => check,
        Err(e) => return failed(e.to_string()),
    };
    tracing::info!(
        enhancer = %name,
        r = check.peak_value,
        lag = check.lag_secs,
        failure = check.failure_code(),
        "waveform enhanced"
    );
    (enhanced, EnhancementStatus::Applied { name, check })
}
