//! phasegrid Analysis - cardiac waveform estimation and phase projection
//!
//! This crate turns a cardiac waveform and a 4-D image series into a
//! phase-resolved average cardiac cycle per voxel:
//!
//! - [`condition`] - band limiting and envelope normalization ([`WaveformConditioner`])
//! - [`badpoints`] - outlier flagging and gap merging ([`BadPointMask`])
//! - [`spectrum`] - Welch PSD, Savitzky-Golay smoothing, fundamental search ([`SpectralEstimator`])
//! - [`phase`] - analytic-signal phase, detrending, resampling ([`PhaseEngine`])
//! - [`xcorr`] - cross-correlation with Gaussian peak refinement ([`CorrelationAligner`])
//! - [`gridding`] - cyclic convolution-gridding kernels ([`GridKernel`])
//! - [`projector`] - voxelwise phase projection ([`PhaseProjector`])
//! - [`regress`] - least-squares noise removal ([`DenoiseRegressor`])
//! - [`parallel`] - serial or rayon fork-join voxel execution ([`ParallelVoxelEvaluator`])
//! - [`peakeval`] - mutual-information ranking of correlation peaks
//! - [`slices`] - slice timing, voxel normalization, masks, image-derived waveforms
//! - [`quality`] - windowed signal quality indices
//! - [`vessels`] - vessel, artery and vein maps
//! - [`enhance`] - optional black-box waveform enhancement
//!
//! Supporting DSP lives in [`fft`], [`filter`], [`hilbert`], [`resample`],
//! [`gaussfit`] and [`mutual_info`].
//!
//! ## Example
//!
//! ```rust
//! use phasegrid_analysis::{PhaseEngine, SpectralEstimator, phase::isolate_fundamental};
//! use std::f32::consts::PI;
//!
//! let rate = 25.0;
//! let pulse: Vec<f32> = (0..1500).map(|i| (2.0 * PI * 1.2 * i as f32 / rate).sin()).collect();
//!
//! let estimate = SpectralEstimator::default().estimate(&pulse, rate).unwrap();
//! assert!((estimate.frequency - 1.2).abs() < 0.05);
//!
//! let narrow = isolate_fundamental(&pulse, rate, estimate.frequency);
//! let trace = PhaseEngine::default().extract_phase(&narrow);
//! assert_eq!(trace.len(), pulse.len());
//! ```

pub mod badpoints;
pub mod condition;
pub mod enhance;
pub mod error;
pub mod fft;
pub mod filter;
pub mod gaussfit;
pub mod gridding;
pub mod hilbert;
pub mod mutual_info;
pub mod parallel;
pub mod peakeval;
pub mod phase;
pub mod projector;
pub mod quality;
pub mod regress;
pub mod resample;
pub mod slices;
pub mod spectrum;
pub mod vessels;
pub mod xcorr;

// Re-export main types
pub use badpoints::{BadPointMask, BadPointMethod, BadPointThreshold};
pub use condition::{Conditioned, EnvelopeConfig, WaveformConditioner, clean_cardiac};
pub use enhance::{EnhancementStatus, WaveformEnhancer, enhance_or_passthrough};
pub use error::{AnalysisError, Result};
pub use fft::{Fft, Window};
pub use filter::{HarmonicNotch, Padding, TrapezoidFilter};
pub use gridding::{GridKernel, KernelShape, PhaseBinGrid};
pub use hilbert::HilbertTransform;
pub use parallel::{ParallelVoxelEvaluator, ProgressFn};
pub use peakeval::{PeakRanker, RankedPeak};
pub use phase::{PhaseEngine, PhaseTrace};
pub use projector::{PhaseProjector, Projection, ProjectionConfig, ProjectionInputs, censor_timepoints};
pub use quality::{QualityConfig, SignalQuality, signal_quality};
pub use regress::{DenoiseRegressor, RegressionMode, RegressionResult};
pub use slices::{ImageWaveformConfig, ImageWaveforms, SliceTiming, VarianceMaskKind, VoxelNormalization};
pub use spectrum::{SpectralEstimator, SpectralPeakEstimate};
pub use vessels::VesselMaps;
pub use xcorr::{AlignConfig, CorrelationAligner, CorrelationResult, FitFailure};
