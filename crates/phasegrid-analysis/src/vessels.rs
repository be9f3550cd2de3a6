//! Vessel maps derived from projected cardiac cycles.
//!
//! Voxels with a large cardiac excursion are vessels. Where the minimum of
//! the cycle precedes its maximum the voxel is classed as a vein, and the
//! reverse as an artery.

use crate::projector::Projection;
use phasegrid_core::{argmax, argmin, percentile};
use std::f32::consts::{PI, TAU};

/// Fraction of the hard threshold used for the soft vessel threshold.
pub const SOFT_VESSEL_FRACTION: f32 = 0.4;

/// Per-voxel vessel classification.
#[derive(Debug, Clone, PartialEq)]
pub struct VesselMaps {
    /// Half the 98th percentile of the masked voxel maxima.
    pub hard_threshold: f32,
    /// `SOFT_VESSEL_FRACTION × hard_threshold`.
    pub soft_threshold: f32,
    /// Voxels whose maximum exceeds the hard threshold.
    pub vessel_mask: Vec<bool>,
    /// Projection with voxels at or below the soft threshold zeroed,
    /// `voxels × bins`.
    pub masked_app: Vec<f32>,
    /// Phase of each voxel's cycle minimum (rad, starting at −π).
    pub min_phase: Vec<f32>,
    /// Phase of each voxel's cycle maximum.
    pub max_phase: Vec<f32>,
    /// Vessel voxels whose maximum precedes their minimum.
    pub arteries: Vec<bool>,
    /// Vessel voxels whose minimum precedes their maximum.
    pub veins: Vec<bool>,
    /// Cycle maximum of every voxel.
    pub vessel_map: Vec<f32>,
}

impl VesselMaps {
    /// Classify the voxels of `projection`; thresholds use voxels in `mask`.
    pub fn from_projection(projection: &Projection, mask: &[bool]) -> Self {
        let bins = projection.bin_count();
        let voxels = projection.voxel_count();
        let step = TAU / bins as f32;

        let vessel_map: Vec<f32> = (0..voxels)
            .map(|v| projection.voxel_app(v).iter().copied().fold(f32::NEG_INFINITY, f32::max))
            .collect();
        let masked_max: Vec<f32> = (0..voxels)
            .filter(|&v| mask.get(v).copied().unwrap_or(false))
            .map(|v| vessel_map[v])
            .collect();
        let hard_threshold = if masked_max.is_empty() {
            0.0
        } else {
            percentile(&masked_max, 98.0) / 2.0
        };
        let soft_threshold = SOFT_VESSEL_FRACTION * hard_threshold;

        let mut masked_app = projection.app().to_vec();
        for (cycle, &peak) in masked_app.chunks_exact_mut(bins).zip(&vessel_map) {
            if peak <= soft_threshold {
                cycle.fill(0.0);
            }
        }

        let phase_of = |idx: Option<usize>| idx.map_or(-PI, |i| i as f32 * step - PI);
        let min_phase: Vec<f32> = (0..voxels).map(|v| phase_of(argmin(projection.voxel_app(v)))).collect();
        let max_phase: Vec<f32> = (0..voxels).map(|v| phase_of(argmax(projection.voxel_app(v)))).collect();
        let vessel_mask: Vec<bool> = vessel_map.iter().map(|&m| m > hard_threshold).collect();

        let rise: Vec<f32> = (0..voxels)
            .map(|v| if vessel_mask[v] { max_phase[v] - min_phase[v] } else { 0.0 })
            .collect();
        let arteries = rise.iter().map(|&r| r < 0.0).collect();
        let veins = rise.iter().map(|&r| r > 0.0).collect();

        tracing::info!(
            hard_threshold,
            soft_threshold,
            vessels = vessel_mask.iter().filter(|&&m| m).count(),
            "vessel maps"
        );
        Self {
            hard_threshold,
            soft_threshold,
            vessel_mask,
            masked_app,
            min_phase,
            max_phase,
            arteries,
            veins,
            vessel_map,
        }
    }
}
