//! Least-squares removal of a synthetic noise regressor.
//!
//! The regressor has the same `voxels × timepoints` layout as the data. In
//! spatial mode one fit is made per timepoint across voxels, so the noise
//! shape is shared and only its amplitude varies over time. In temporal mode
//! one fit is made per voxel across time.

use crate::error::{AnalysisError, Result};
use crate::parallel::ParallelVoxelEvaluator;
use std::fmt;
use std::str::FromStr;

/// Axis along which the regression is solved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegressionMode {
    /// One fit per timepoint across voxels.
    #[default]
    Spatial,
    /// One fit per voxel across time.
    Temporal,
}

impl FromStr for RegressionMode {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "spatial" => Ok(RegressionMode::Spatial),
            "temporal" => Ok(RegressionMode::Temporal),
            _ => Err(AnalysisError::UnknownVariant {
                kind: "regression mode",
                value: s.to_string(),
                expected: "spatial, temporal",
            }),
        }
    }
}

impl fmt::Display for RegressionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RegressionMode::Spatial => "spatial",
            RegressionMode::Temporal => "temporal",
        })
    }
}

/// Ordinary least-squares fit of `y = intercept + slope·x`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LinearFit {
    /// Slope.
    pub slope: f32,
    /// Intercept.
    pub intercept: f32,
    /// Pearson correlation of `x` and `y`.
    pub r: f32,
}

/// Fit `y` against `x`; a constant regressor gives slope 0 and `r` 0.
pub fn linear_fit(x: &[f32], y: &[f32]) -> LinearFit {
    let n = x.len().min(y.len());
    if n == 0 {
        return LinearFit::default();
    }
    let inv_n = 1.0 / n as f64;
    let mx = x[..n].iter().map(|&v| f64::from(v)).sum::<f64>() * inv_n;
    let my = y[..n].iter().map(|&v| f64::from(v)).sum::<f64>() * inv_n;
    let (mut sxx, mut syy, mut sxy) = (0.0f64, 0.0f64, 0.0f64);
    for (&a, &b) in x.iter().zip(y).take(n) {
        let dx = f64::from(a) - mx;
        let dy = f64::from(b) - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let denom = (sxx * syy).sqrt();
    let r = if denom > 0.0 { sxy / denom } else { 0.0 };
    LinearFit {
        slope: slope as f32,
        intercept: (my - slope * mx) as f32,
        r: r as f32,
    }
}

/// Output of a regression pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionResult {
    /// Mode the fits were made in.
    pub mode: RegressionMode,
    /// Slope per fit (per timepoint or per voxel).
    pub coefficients: Vec<f32>,
    /// Intercept per fit.
    pub intercepts: Vec<f32>,
    /// Correlation per fit.
    pub r: Vec<f32>,
    /// Variance explained per fit.
    pub r_squared: Vec<f32>,
    /// `coefficient × regressor`, `voxels × timepoints`.
    pub removed: Vec<f32>,
    /// `series − removed`, `voxels × timepoints`.
    pub residual: Vec<f32>,
}

/// Removes a regressor from voxel time series by least squares.
#[derive(Debug, Clone, Default)]
pub struct DenoiseRegressor {
    mode: RegressionMode,
    evaluator: ParallelVoxelEvaluator,
}

impl DenoiseRegressor {
    /// Create a regressor running its fits on `evaluator`.
    pub fn new(mode: RegressionMode, evaluator: ParallelVoxelEvaluator) -> Self {
        Self { mode, evaluator }
    }

    /// Regression mode.
    pub fn mode(&self) -> RegressionMode {
        self.mode
    }

    /// Regress `regressor` out of `series`.
    ///
    /// Both buffers are `voxels × timepoints`, row-major.
    ///
    /// # Errors
    ///
    /// Shapes disagree, or the worker pool could not be created.
    pub fn regress(&self, series: &[f32], regressor: &[f32], timepoints: usize) -> Result<RegressionResult> {
        if timepoints == 0 || series.len() % timepoints != 0 {
            return Err(AnalysisError::length_mismatch("regression series", timepoints, series.len()));
        }
        if regressor.len() != series.len() {
            return Err(AnalysisError::length_mismatch("regressor", series.len(), regressor.len()));
        }
        let voxels = series.len() / timepoints;

        let (rows, fits) = match self.mode {
            RegressionMode::Temporal => {
                let fits = self.evaluator.run(0..voxels, |v| {
                    let row = v * timepoints..(v + 1) * timepoints;
                    Ok::<_, AnalysisError>(linear_fit(&regressor[row.clone()], &series[row]))
                })?;
                (voxels, fits)
            }
            RegressionMode::Spatial => {
                let fits = self.evaluator.run(0..timepoints, |t| {
                    let x: Vec<f32> = (0..voxels).map(|v| regressor[v * timepoints + t]).collect();
                    let y: Vec<f32> = (0..voxels).map(|v| series[v * timepoints + t]).collect();
                    Ok::<_, AnalysisError>(linear_fit(&x, &y))
                })?;
                (timepoints, fits)
            }
        };

        let fit_at = |i: usize| fits.get(&i).copied().unwrap_or_default();
        let coefficients: Vec<f32> = (0..rows).map(|i| fit_at(i).slope).collect();
        let intercepts: Vec<f32> = (0..rows).map(|i| fit_at(i).intercept).collect();
        let r: Vec<f32> = (0..rows).map(|i| fit_at(i).r).collect();
        let r_squared = r.iter().map(|v| v * v).collect();

        let mut removed = vec![0.0f32; series.len()];
        for (i, out) in removed.iter_mut().enumerate() {
            let (v, t) = (i / timepoints, i % timepoints);
            let coeff = match self.mode {
                RegressionMode::Temporal => coefficients[v],
                RegressionMode::Spatial => coefficients[t],
            };
            *out = coeff * regressor[i];
        }
        let residual = series.iter().zip(&removed).map(|(s, d)| s - d).collect();

        tracing::info!(mode = %self.mode, fits = rows, "noise regression finished");
        Ok(RegressionResult {
            mode: self.mode,
            coefficients,
            intercepts,
            r,
            r_squared,
            removed,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!("Spatial".parse::<RegressionMode>().unwrap(), RegressionMode::Spatial);
        assert_eq!("temporal".parse::<RegressionMode>().unwrap(), RegressionMode::Temporal);
        assert!("diagonal".parse::<RegressionMode>().is_err());
        assert_eq!(RegressionMode::Temporal.to_string(), "temporal");
    }

    #[test]
    fn exact_line_is_recovered() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [3.0, 5.0, 7.0, 9.0];
        let fit = linear_fit(&x, &y);
        assert!((fit.slope - 2.0).abs() < 1e-6);
        assert!((fit.intercept - 1.0).abs() < 1e-6);
        assert!((fit.r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn constant_regressor_gives_zero_coefficient() {
        let fit = linear_fit(&[2.0; 5], &[1.0, 4.0, 2.0, 8.0, 5.0]);
        assert_eq!(fit.slope, 0.0);
        assert_eq!(fit.r, 0.0);
    }

    #[test]
    fn spatial_mode_fits_per_timepoint() {
        // 3 voxels × 2 timepoints; amplitude 2 at t=0, 0.5 at t=1
        let regressor = [1.0, 4.0, 2.0, -2.0, 3.0, 6.0];
        let series = [2.0, 2.0, 4.0, -1.0, 6.0, 3.0];
        let out = DenoiseRegressor::new(RegressionMode::Spatial, ParallelVoxelEvaluator::new(1))
            .regress(&series, &regressor, 2)
            .unwrap();
        assert_eq!(out.coefficients.len(), 2);
        assert!((out.coefficients[0] - 2.0).abs() < 1e-5);
        assert!((out.coefficients[1] - 0.5).abs() < 1e-5);
        assert!(out.residual.iter().all(|r| r.abs() < 1e-4));
    }

    #[test]
    fn temporal_serial_matches_parallel() {
        let timepoints = 30;
        let regressor: Vec<f32> = (0..6 * timepoints).map(|i| (i as f32 * 0.4).sin()).collect();
        let series: Vec<f32> = regressor
            .iter()
            .enumerate()
            .map(|(i, &x)| (i / timepoints) as f32 * x + (i as f32 * 1.7).cos() * 0.1)
            .collect();
        let serial = DenoiseRegressor::new(RegressionMode::Temporal, ParallelVoxelEvaluator::new(1))
            .regress(&series, &regressor, timepoints)
            .unwrap();
        let parallel = DenoiseRegressor::new(RegressionMode::Temporal, ParallelVoxelEvaluator::new(4))
            .regress(&series, &regressor, timepoints)
            .unwrap();
        assert_eq!(serial, parallel);
    }

    #[test]
    fn shape_mismatch_is_an_error() {
        let regressor = DenoiseRegressor::default();
        assert!(regressor.regress(&[0.0; 6], &[0.0; 5], 3).is_err());
        assert!(regressor.regress(&[0.0; 7], &[0.0; 7], 3).is_err());
    }
}
