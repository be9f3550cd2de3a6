//! Motion regressor removal.
//!
//! Six rigid-body parameters per volume (three translations, three rotations)
//! are expanded into position, derivative and delayed-derivative regressors,
//! optionally orthogonalized, and removed from every masked voxel by least
//! squares. Voxel means are preserved.

use anyhow::{Context, bail};
use phasegrid_analysis::ParallelVoxelEvaluator;
use phasegrid_config::MotionOptions;
use phasegrid_core::{mean, solve_linear};
use std::path::PathBuf;

/// Number of rigid-body parameters per volume.
pub const MOTION_PARAMETERS: usize = 6;

/// Source of motion regressors.
pub trait MotionRegressor {
    /// Regressors spanning `timepoints` volumes, each demeaned.
    fn regressors(&self, timepoints: usize) -> anyhow::Result<Vec<Vec<f32>>>;

    /// Remove the regressors from every masked voxel of `data`
    /// (`voxels × timepoints`) in place.
    ///
    /// # Returns
    ///
    /// The regressors that were removed.
    fn filter(
        &self,
        data: &mut [f32],
        timepoints: usize,
        mask: &[bool],
        evaluator: &ParallelVoxelEvaluator,
    ) -> anyhow::Result<Vec<Vec<f32>>> {
        let regressors = self.regressors(timepoints)?;
        remove_regressors(data, timepoints, mask, &regressors, evaluator)?;
        Ok(regressors)
    }
}

/// Motion parameters read from a whitespace text file, one row per volume.
#[derive(Debug, Clone)]
pub struct MotionFileRegressor {
    path: PathBuf,
    skip: usize,
    options: MotionOptions,
}

impl MotionFileRegressor {
    /// Regressor over the first six columns of `path`, dropping `skip`
    /// leading rows.
    pub fn new(path: impl Into<PathBuf>, skip: usize, options: MotionOptions) -> Self {
        Self {
            path: path.into(),
            skip,
            options,
        }
    }
}

impl MotionRegressor for MotionFileRegressor {
    fn regressors(&self, timepoints: usize) -> anyhow::Result<Vec<Vec<f32>>> {
        let columns = phasegrid_io::read_columns(&self.path, MOTION_PARAMETERS)
            .with_context(|| format!("reading motion parameters from {}", self.path.display()))?;
        let rows = columns.first().map_or(0, Vec::len);
        if rows < self.skip + timepoints {
            bail!(
                "motion file {} has {rows} rows; {} skipped + {timepoints} volumes needed",
                self.path.display(),
                self.skip
            );
        }
        if rows > self.skip + timepoints {
            tracing::warn!(rows, needed = self.skip + timepoints, "ignoring trailing motion rows");
        }
        let params: Vec<Vec<f32>> = columns
            .into_iter()
            .map(|c| c[self.skip..self.skip + timepoints].to_vec())
            .collect();
        expand_parameters(&params, self.options)
    }
}

/// Build the selected regressor families from raw parameter columns.
///
/// # Errors
///
/// No family is selected, or every regressor is constant.
pub fn expand_parameters(params: &[Vec<f32>], options: MotionOptions) -> anyhow::Result<Vec<Vec<f32>>> {
    if !options.any() {
        bail!("no motion regressors selected");
    }
    let mut regressors = Vec::new();
    let derivatives: Vec<Vec<f32>> = params.iter().map(|p| derivative(p)).collect();
    if options.position {
        regressors.extend(params.iter().cloned());
    }
    if options.derivative {
        regressors.extend(derivatives.iter().cloned());
    }
    if options.delayed_derivative {
        regressors.extend(derivatives.iter().map(|d| delayed(d)));
    }
    for r in &mut regressors {
        let m = mean(r);
        r.iter_mut().for_each(|x| *x -= m);
    }
    // Constant parameters carry nothing once demeaned and make the fit singular
    let scale = regressors.iter().map(|r| dot(r, r).sqrt()).fold(0.0f64, f64::max);
    regressors.retain(|r| dot(r, r).sqrt() > 1e-6 * scale);
    if regressors.is_empty() {
        bail!("motion regressors are all constant");
    }
    if options.orthogonalize {
        regressors = orthogonalize(&regressors);
    }
    tracing::debug!(count = regressors.len(), "motion regressors built");
    Ok(regressors)
}

fn derivative(x: &[f32]) -> Vec<f32> {
    let mut d = vec![0.0; x.len()];
    for t in 1..x.len() {
        d[t] = x[t] - x[t - 1];
    }
    d
}

fn delayed(x: &[f32]) -> Vec<f32> {
    let mut d = vec![0.0; x.len()];
    if x.len() > 1 {
        d[1..].copy_from_slice(&x[..x.len() - 1]);
    }
    d
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum()
}

/// Modified Gram-Schmidt with unit-norm output. Vectors that are
/// numerically dependent on earlier ones are dropped.
pub fn orthogonalize(vectors: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let scale = vectors.iter().map(|v| dot(v, v).sqrt()).fold(0.0f64, f64::max);
    let mut basis: Vec<Vec<f32>> = Vec::with_capacity(vectors.len());
    for v in vectors {
        let mut w: Vec<f64> = v.iter().map(|&x| f64::from(x)).collect();
        for q in &basis {
            let proj: f64 = w.iter().zip(q).map(|(&a, &b)| a * f64::from(b)).sum();
            w.iter_mut().zip(q).for_each(|(a, &b)| *a -= proj * f64::from(b));
        }
        let norm = w.iter().map(|a| a * a).sum::<f64>().sqrt();
        if norm > 1e-6 * scale && norm > 0.0 {
            basis.push(w.iter().map(|a| (a / norm) as f32).collect());
        }
    }
    basis
}

/// Least-squares removal of `regressors` from each masked voxel.
///
/// Voxels whose system is singular are left unchanged.
pub fn remove_regressors(
    data: &mut [f32],
    timepoints: usize,
    mask: &[bool],
    regressors: &[Vec<f32>],
    evaluator: &ParallelVoxelEvaluator,
) -> anyhow::Result<()> {
    if regressors.iter().any(|r| r.len() != timepoints) {
        bail!("motion regressors must be {timepoints} samples long");
    }
    let k = regressors.len();
    let gram: Vec<Vec<f64>> = (0..k)
        .map(|i| (0..k).map(|j| dot(&regressors[i], &regressors[j])).collect())
        .collect();

    evaluator.for_each_slot(data, timepoints, |v, series| {
        if !mask.get(v).copied().unwrap_or(false) {
            return;
        }
        let m = mean(series);
        let centered: Vec<f32> = series.iter().map(|x| x - m).collect();
        let rhs: Vec<f64> = regressors.iter().map(|r| dot(r, &centered)).collect();
        let Some(beta) = solve_linear(gram.clone(), rhs) else {
            return;
        };
        for (t, x) in series.iter_mut().enumerate() {
            let fitted: f64 = regressors.iter().zip(&beta).map(|(r, b)| b * f64::from(r[t])).sum();
            *x -= fitted as f32;
        }
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn all_families() -> MotionOptions {
        MotionOptions {
            position: true,
            derivative: true,
            delayed_derivative: true,
            orthogonalize: false,
        }
    }

    #[test]
    fn families_and_lengths() {
        let params = vec![vec![0.0, 1.0, 3.0, 6.0]; MOTION_PARAMETERS];
        let regs = expand_parameters(&params, all_families()).unwrap();
        assert_eq!(regs.len(), 18);
        // derivative of 0,1,3,6 is 0,1,2,3, demeaned
        assert_eq!(regs[6], vec![-1.5, -0.5, 0.5, 1.5]);
        // delayed derivative is 0,0,1,2, demeaned
        assert_eq!(regs[12], vec![-0.75, -0.75, 0.25, 1.25]);
    }

    #[test]
    fn nothing_selected_is_an_error() {
        let options = MotionOptions {
            position: false,
            derivative: false,
            delayed_derivative: false,
            orthogonalize: true,
        };
        assert!(expand_parameters(&[vec![1.0, 2.0]], options).is_err());
    }

    #[test]
    fn gram_schmidt_drops_dependent_vectors() {
        let a = vec![1.0, -1.0, 1.0, -1.0];
        let b = vec![2.0, -2.0, 2.0, -2.0];
        let c = vec![1.0, 1.0, -1.0, -1.0];
        let basis = orthogonalize(&[a, b, c]);
        assert_eq!(basis.len(), 2);
        assert!(dot(&basis[0], &basis[1]).abs() < 1e-6);
        for q in &basis {
            assert!((dot(q, q) - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn removal_keeps_mean_and_masked_out_voxels() {
        let t = 40;
        let reg: Vec<f32> = (0..t).map(|i| (i as f32 * 0.7).sin()).collect();
        let m = mean(&reg);
        let reg: Vec<f32> = reg.iter().map(|x| x - m).collect();
        let noise: Vec<f32> = (0..t).map(|i| 0.01 * (i as f32 * 2.3).cos()).collect();

        let mut data = Vec::new();
        for _ in 0..2 {
            data.extend(reg.iter().zip(&noise).map(|(r, n)| 100.0 + 5.0 * r + n));
        }
        let original = data.clone();
        remove_regressors(&mut data, t, &[true, false], &[reg], &ParallelVoxelEvaluator::new(2)).unwrap();

        let cleaned = &data[..t];
        assert!((mean(cleaned) - mean(&original[..t])).abs() < 1e-3);
        assert!(cleaned.iter().all(|x| (x - 100.0).abs() < 0.05));
        assert_eq!(&data[t..], &original[t..]);
    }

    #[test]
    fn file_regressor_applies_skip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motion.par");
        let rows: Vec<String> = (0..12)
            .map(|i| {
                let x = i as f32;
                format!("{} {} {} {} {} {}", x, x * x, 0.0, (x * 0.5).sin(), 1.0, -x)
            })
            .collect();
        std::fs::write(&path, rows.join("\n")).unwrap();

        let options = MotionOptions {
            position: true,
            derivative: false,
            delayed_derivative: false,
            orthogonalize: false,
        };
        let regressor = MotionFileRegressor::new(&path, 2, options);
        let regs = regressor.regressors(10).unwrap();
        // the two constant columns are dropped
        assert_eq!(regs.len(), 4);
        // first column 2..=11 demeaned starts at -4.5
        assert!((regs[0][0] + 4.5).abs() < 1e-6);
        assert!(regressor.regressors(11).is_err());
    }
}
