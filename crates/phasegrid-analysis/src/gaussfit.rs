//! Three-parameter Gaussian fit by Levenberg-Marquardt.
//!
//! Used to refine a correlation peak to sub-sample accuracy:
//!
//! ```text
//! y(x) = amplitude · exp(-(x - center)² / (2 · sigma²))
//! ```
//!
//! Reference: W. H. Press et al., *Numerical Recipes* (3rd ed.), section 15.5.

use phasegrid_core::solve_linear;

const MAX_ITERATIONS: usize = 200;

/// Fitted Gaussian parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianFit {
    /// Peak height.
    pub amplitude: f64,
    /// Peak location.
    pub center: f64,
    /// Standard deviation (always positive).
    pub sigma: f64,
    /// Iterations used.
    pub iterations: usize,
}

impl GaussianFit {
    /// Evaluate the fitted curve at `x`.
    pub fn eval(&self, x: f64) -> f64 {
        gaussian(self.amplitude, self.center, self.sigma, x)
    }
}

fn gaussian(a: f64, c: f64, s: f64, x: f64) -> f64 {
    let d = x - c;
    a * (-d * d / (2.0 * s * s)).exp()
}

fn sum_sq(x: &[f64], y: &[f64], p: [f64; 3]) -> f64 {
    x.iter()
        .zip(y)
        .map(|(&xi, &yi)| {
            let r = yi - gaussian(p[0], p[1], p[2], xi);
            r * r
        })
        .sum()
}

/// Fit a Gaussian to `(x, y)` starting from `initial = (amplitude, center, sigma)`.
///
/// # Returns
///
/// `None` when fewer than three points are given, the initial sigma is not
/// positive, or the iteration fails to converge to finite parameters.
pub fn fit_gaussian(x: &[f64], y: &[f64], initial: (f64, f64, f64)) -> Option<GaussianFit> {
    let n = x.len().min(y.len());
    if n < 3 || initial.2 <= 0.0 {
        return None;
    }
    let (x, y) = (&x[..n], &y[..n]);

    let mut p = [initial.0, initial.1, initial.2];
    let mut lambda = 1e-3;
    let mut cost = sum_sq(x, y, p);

    for iteration in 1..=MAX_ITERATIONS {
        // Normal equations JᵀJ and Jᵀr
        let mut jtj = [[0.0f64; 3]; 3];
        let mut jtr = [0.0f64; 3];
        for (&xi, &yi) in x.iter().zip(y) {
            let d = xi - p[1];
            let s2 = p[2] * p[2];
            let e = (-d * d / (2.0 * s2)).exp();
            let model = p[0] * e;
            let grad = [e, model * d / s2, model * d * d / (s2 * p[2])];
            let r = yi - model;
            for row in 0..3 {
                jtr[row] += grad[row] * r;
                for col in 0..3 {
                    jtj[row][col] += grad[row] * grad[col];
                }
            }
        }

        let mut improved = false;
        while lambda < 1e12 {
            let damped: Vec<Vec<f64>> = (0..3)
                .map(|r| {
                    (0..3)
                        .map(|c| if r == c { jtj[r][c] * (1.0 + lambda) } else { jtj[r][c] })
                        .collect()
                })
                .collect();
            let Some(step) = solve_linear(damped, jtr.to_vec()) else {
                lambda *= 10.0;
                continue;
            };
            let candidate = [p[0] + step[0], p[1] + step[1], (p[2] + step[2]).abs()];
            let new_cost = sum_sq(x, y, candidate);
            if new_cost.is_finite() && new_cost <= cost {
                let rel = (cost - new_cost) / cost.max(f64::MIN_POSITIVE);
                let step_small = step
                    .iter()
                    .zip(&candidate)
                    .all(|(d, v)| d.abs() <= 1e-10 * (v.abs() + 1e-10));
                p = candidate;
                cost = new_cost;
                lambda = (lambda / 10.0).max(1e-12);
                improved = true;
                if rel < 1e-12 || step_small || cost == 0.0 {
                    return finish(p, iteration);
                }
                break;
            }
            lambda *= 10.0;
        }

        if !improved {
            // No downhill step left: the current point is a minimum
            return finish(p, iteration);
        }
    }
    None
}

fn finish(p: [f64; 3], iterations: usize) -> Option<GaussianFit> {
    (p.iter().all(|v| v.is_finite()) && p[2] > 0.0).then_some(GaussianFit {
        amplitude: p[0],
        center: p[1],
        sigma: p[2],
        iterations,
    })
}
