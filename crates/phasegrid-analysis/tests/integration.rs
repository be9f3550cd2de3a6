//! Integration tests for phasegrid-analysis.
//!
//! Tests run the public API end to end on synthetic cardiac waveforms and
//! small synthetic volumes with known answers.

use std::f32::consts::PI;

use phasegrid_analysis::badpoints::BadPointMask;
use phasegrid_analysis::gridding::KernelShape;
use phasegrid_analysis::phase::isolate_fundamental;
use phasegrid_analysis::{
    AlignConfig, CorrelationAligner, DenoiseRegressor, ParallelVoxelEvaluator, PhaseEngine, PhaseProjector,
    ProjectionConfig, ProjectionInputs, RegressionMode, SpectralEstimator, WaveformConditioner,
};
use phasegrid_core::PhaseConvention;
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Generate a sine wave at a given frequency and amplitude.
fn sine(freq_hz: f32, sample_rate: f32, num_samples: usize, amplitude: f32) -> Vec<f32> {
    (0..num_samples)
        .map(|i| amplitude * (2.0 * PI * freq_hz * i as f32 / sample_rate).sin())
        .collect()
}

/// Deterministic uniform noise in [-1, 1).
fn white_noise(n: usize, seed: u32) -> Vec<f32> {
    let mut state = seed;
    (0..n)
        .map(|_| {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as f32 / 32_768.0 - 1.0
        })
        .collect()
}

/// RMS of a signal slice.
fn rms(signal: &[f32]) -> f32 {
    (signal.iter().map(|x| x * x).sum::<f32>() / signal.len() as f32).sqrt()
}

// ===========================================================================
// 1. Cardiac frequency and phase
// ===========================================================================

#[test]
fn noisy_pulse_frequency_and_phase_rate() {
    let rate = 25.0;
    let n = 60 * 25;
    let noise = white_noise(n, 42);
    let pulse: Vec<f32> = sine(1.2, rate, n, 1.0)
        .iter()
        .zip(&noise)
        .map(|(s, e)| s + 0.3 * e)
        .collect();

    let conditioned = WaveformConditioner::default().apply(&pulse, rate).unwrap();
    let estimate = SpectralEstimator::default().estimate(&conditioned.normalized, rate).unwrap();
    assert!(
        (estimate.frequency - 1.2).abs() < 0.05,
        "estimated {} Hz",
        estimate.frequency
    );

    let narrow = isolate_fundamental(&conditioned.normalized, rate, estimate.frequency);
    let trace = PhaseEngine::default().extract_phase(&narrow);
    // Steady state: skip 10 s at each end
    let measured = trace.mean_frequency(rate, 250, n - 250);
    assert!((measured - 1.2).abs() < 0.02, "phase rate {measured} Hz");

    let detrended = PhaseEngine::default().detrend_phase(&trace.phase);
    let slope = (detrended[n - 250] - detrended[250]) / ((n - 500) as f32 / rate);
    assert!((slope - 2.0 * PI * 1.2).abs() < 0.15, "slope {slope} rad/s");
}

// ===========================================================================
// 2. Noise regression
// ===========================================================================

#[test]
fn temporal_regression_recovers_injected_amplitude() {
    let voxels = 4;
    let timepoints = 20;
    let rate = 5.0;
    let regressor_row = sine(1.0, rate, timepoints, 1.0);
    // A 1 Hz sine at 5 Hz has a zero at every fifth sample; shift it off the grid
    let regressor_row: Vec<f32> = regressor_row
        .iter()
        .enumerate()
        .map(|(i, &s)| s + (2.0 * PI * i as f32 / rate).cos())
        .collect();
    let amplitudes = [0.5, 1.0, 1.5, 2.0];

    let mut regressor = Vec::new();
    let mut series = Vec::new();
    for (v, &amp) in amplitudes.iter().enumerate() {
        let noise = white_noise(timepoints, 7 + v as u32);
        regressor.extend_from_slice(&regressor_row);
        series.extend(
            regressor_row
                .iter()
                .zip(&noise)
                .map(|(&r, &e)| 100.0 + amp * r + 0.01 * e),
        );
    }

    let result = DenoiseRegressor::new(RegressionMode::Temporal, ParallelVoxelEvaluator::new(2))
        .regress(&series, &regressor, timepoints)
        .unwrap();
    assert_eq!(result.coefficients.len(), voxels);
    for (coeff, amp) in result.coefficients.iter().zip(amplitudes) {
        assert!((coeff - amp).abs() / amp < 0.03, "{coeff} vs {amp}");
    }
    for v in 0..voxels {
        let row = &result.residual[v * timepoints..(v + 1) * timepoints];
        let centered: Vec<f32> = row.iter().map(|x| x - 100.0).collect();
        assert!(rms(&centered) < 0.05, "voxel {v} residual {}", rms(&centered));
        assert!(result.r[v] > 0.99);
    }
}

// ===========================================================================
// 3. Alignment and parallel execution
// ===========================================================================

#[test]
fn self_alignment_has_zero_lag() {
    let rate = 25.0;
    let wave: Vec<f32> = sine(1.1, rate, 2000, 1.0)
        .iter()
        .zip(white_noise(2000, 3))
        .map(|(s, e)| s + 0.2 * e)
        .collect();
    let result = CorrelationAligner::new(AlignConfig::default())
        .align(&wave, &wave, rate)
        .unwrap();
    assert!(result.lag_secs.abs() < 0.02, "lag {}", result.lag_secs);
    assert!((result.peak_value - 1.0).abs() < 0.05, "peak {}", result.peak_value);
    assert!(result.valid);
}

#[test]
fn evaluator_results_do_not_depend_on_worker_count() {
    let data = white_noise(1000, 9);
    let job = |i: usize| {
        let window = &data[i..(i + 50).min(data.len())];
        Ok::<_, std::convert::Infallible>(window.iter().map(|x| x * x).sum::<f32>())
    };
    let serial = ParallelVoxelEvaluator::new(1).run(0..data.len(), job).unwrap();
    let parallel = ParallelVoxelEvaluator::new(4).run(0..data.len(), job).unwrap();
    assert_eq!(serial, parallel);
}

#[test]
fn projection_of_slice_shifted_voxels() {
    // Two slices acquired half a TR apart see the same cardiac cycle at
    // different phases; the projected cycles must still line up.
    let tr = 1.0;
    let timepoints = 300;
    let f_card = 1.13;
    let slice_times = [0.0, 0.5];
    let mut phases = Vec::new();
    for &st in &slice_times {
        phases.extend((0..timepoints).map(|t| {
            let time = t as f32 * tr + st;
            2.0 * PI * f_card * time
        }));
    }
    let mut values = Vec::new();
    for &st in &slice_times {
        values.extend((0..timepoints).map(|t| {
            let time = t as f32 * tr + st;
            (2.0 * PI * f_card * time).cos()
        }));
    }
    let projector = PhaseProjector::new(
        ProjectionConfig {
            bin_count: 16,
            invert: false,
            convention: PhaseConvention::Centered,
            ..ProjectionConfig::default()
        },
        ParallelVoxelEvaluator::new(2),
    )
    .unwrap();
    let out = projector
        .project(&ProjectionInputs {
            phases: &phases,
            values: &values,
            timepoints,
            voxel_slice: &[0, 1],
            mask: &[true, true],
            censor: &vec![false; timepoints],
        })
        .unwrap();
    for b in 0..16 {
        let a = out.voxel_app(0)[b];
        let c = out.voxel_app(1)[b];
        assert!((a - c).abs() < 0.1, "bin {b}: {a} vs {c}");
    }
    // cos peaks at phase 0, the middle bin of a centered axis
    let peak = out
        .voxel_app(0)
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i);
    assert_eq!(peak, Some(8));
}

// ===========================================================================
// 4. Properties
// ===========================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn gap_merging_only_adds_bad_points(flags in prop::collection::vec(any::<bool>(), 1..200), streak in 0usize..20) {
        let original = BadPointMask::from_flags(flags.clone());
        let mut merged = original.clone();
        merged.merge_gaps(streak);
        prop_assert_eq!(merged.len(), original.len());
        for (before, after) in original.flags().iter().zip(merged.flags()) {
            prop_assert!(!before || *after);
        }
    }

    #[test]
    fn triangular_weight_sum_counts_samples(bins in prop::collection::vec(0usize..16, 1..100)) {
        let step = 2.0 * PI / 16.0;
        let timepoints = bins.len();
        let phases: Vec<f32> = bins.iter().map(|&b| -PI + b as f32 * step).collect();
        let projector = PhaseProjector::new(
            ProjectionConfig {
                bin_count: 16,
                shape: KernelShape::Triangular,
                smooth: false,
                ..ProjectionConfig::default()
            },
            ParallelVoxelEvaluator::new(1),
        )
        .unwrap();
        let out = projector
            .project(&ProjectionInputs {
                phases: &phases,
                values: &vec![1.0; timepoints],
                timepoints,
                voxel_slice: &[0],
                mask: &[true],
                censor: &vec![false; timepoints],
            })
            .unwrap();
        let weights = out.slice_weights(0);
        let filled: f32 = weights
            .iter()
            .enumerate()
            .filter(|(b, _)| bins.contains(b))
            .map(|(_, w)| w)
            .sum();
        prop_assert!((filled - timepoints as f32).abs() < 1e-3);
        prop_assert!(out.app().iter().all(|x| x.is_finite()));
    }
}
