//! Criterion benchmarks for phasegrid-analysis components
//!
//! Run with: cargo bench -p phasegrid-analysis

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use phasegrid_analysis::{
    AlignConfig, CorrelationAligner, ParallelVoxelEvaluator, PhaseProjector, ProjectionConfig, ProjectionInputs,
    SpectralEstimator,
};
use std::f32::consts::PI;

const SAMPLE_RATE: f32 = 25.0;

/// Generate a noisy cardiac-like waveform
fn generate_pulse(size: usize, frequency: f32) -> Vec<f32> {
    let mut state = 0x1234_5678u32;
    (0..size)
        .map(|i| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let noise = (state as i32 as f32) / (i32::MAX as f32);
            (2.0 * PI * frequency * i as f32 / SAMPLE_RATE).sin() + 0.2 * noise
        })
        .collect()
}

// ============================================================================
// Spectral estimation
// ============================================================================

fn bench_spectral_estimate(c: &mut Criterion) {
    let mut group = c.benchmark_group("SpectralEstimator");
    let estimator = SpectralEstimator::default();

    for secs in [60, 300, 600] {
        let signal = generate_pulse(secs * SAMPLE_RATE as usize, 1.2);
        group.bench_with_input(BenchmarkId::from_parameter(secs), &signal, |b, signal| {
            b.iter(|| estimator.estimate(black_box(signal), SAMPLE_RATE))
        });
    }

    group.finish();
}

// ============================================================================
// Cross-correlation alignment
// ============================================================================

fn bench_align(c: &mut Criterion) {
    let mut group = c.benchmark_group("CorrelationAligner");
    let aligner = CorrelationAligner::new(AlignConfig::default());

    for secs in [60, 300] {
        let reference = generate_pulse(secs * SAMPLE_RATE as usize, 1.1);
        let candidate: Vec<f32> = reference.iter().skip(5).copied().collect();
        group.bench_with_input(BenchmarkId::from_parameter(secs), &secs, |b, _| {
            b.iter(|| aligner.align(black_box(&reference), black_box(&candidate), SAMPLE_RATE))
        });
    }

    group.finish();
}

// ============================================================================
// Phase projection
// ============================================================================

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("PhaseProjector");
    let timepoints = 400;
    let slices = 4;
    let voxels = 4096;

    let phases: Vec<f32> = (0..slices * timepoints).map(|i| i as f32 * 0.71).collect();
    let values = generate_pulse(voxels * timepoints, 0.3);
    let voxel_slice: Vec<usize> = (0..voxels).map(|v| v % slices).collect();
    let mask = vec![true; voxels];
    let censor = vec![false; timepoints];
    let inputs = ProjectionInputs {
        phases: &phases,
        values: &values,
        timepoints,
        voxel_slice: &voxel_slice,
        mask: &mask,
        censor: &censor,
    };

    for workers in [1, 4] {
        let projector =
            PhaseProjector::new(ProjectionConfig::default(), ParallelVoxelEvaluator::new(workers)).unwrap();
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, _| {
            b.iter(|| projector.project(black_box(&inputs)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_spectral_estimate, bench_align, bench_projection);
criterion_main!(benches);
