//! Phase wrapping conventions.
//!
//! Gridding coordinates live on a periodic axis. Depending on configuration the
//! axis is either centered on zero, `[-π, π)`, or starts at zero, `[0, 2π)`.
//! [`wrap_phase`] maps any finite angle onto the chosen interval and is exactly
//! idempotent: values already inside the interval are returned unchanged.

use std::f32::consts::{PI, TAU};

/// Which interval wrapped phases occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseConvention {
    /// `[-π, π)`
    #[default]
    Centered,
    /// `[0, 2π)`
    NonCentered,
}

impl PhaseConvention {
    /// Lower (inclusive) bound of the interval.
    pub fn lower(self) -> f32 {
        match self {
            PhaseConvention::Centered => -PI,
            PhaseConvention::NonCentered => 0.0,
        }
    }

    /// Upper (exclusive) bound of the interval.
    pub fn upper(self) -> f32 {
        self.lower() + TAU
    }

    /// `count` evenly spaced bin centers covering one cycle, endpoint excluded.
    pub fn bin_centers(self, count: usize) -> Vec<f32> {
        let step = TAU / count as f32;
        (0..count)
            .map(|i| self.lower() + i as f32 * step)
            .collect()
    }
}

/// Wrap `phi` into the interval selected by `convention`.
pub fn wrap_phase(phi: f32, convention: PhaseConvention) -> f32 {
    let lower = convention.lower();
    let upper = convention.upper();
    if (lower..upper).contains(&phi) || !phi.is_finite() {
        return phi;
    }
    let wrapped = (phi - lower).rem_euclid(TAU) + lower;
    if wrapped >= upper || wrapped < lower {
        lower
    } else {
        wrapped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centered_wraps_into_range() {
        assert!((wrap_phase(3.0 * PI / 2.0, PhaseConvention::Centered) + PI / 2.0).abs() < 1e-5);
        assert_eq!(wrap_phase(PI, PhaseConvention::Centered), -PI);
        assert_eq!(wrap_phase(-PI, PhaseConvention::Centered), -PI);
    }

    #[test]
    fn non_centered_wraps_into_range() {
        assert!((wrap_phase(-PI / 2.0, PhaseConvention::NonCentered) - 3.0 * PI / 2.0).abs() < 1e-5);
        assert_eq!(wrap_phase(TAU, PhaseConvention::NonCentered), 0.0);
    }

    #[test]
    fn bin_centers_exclude_endpoint() {
        let centers = PhaseConvention::Centered.bin_centers(4);
        assert_eq!(centers.len(), 4);
        assert_eq!(centers[0], -PI);
        assert!((centers[3] - PI / 2.0).abs() < 1e-6);
    }
}
