//! Polynomial least squares and detrending.
//!
//! Fits are solved in `f64` through the normal equations on a time axis
//! centered at zero, which keeps the system well conditioned for the low orders
//! (1-8) the pipeline uses.

/// Solve the square system `a · x = b` by Gaussian elimination with partial
/// pivoting.
///
/// # Returns
///
/// `None` if the matrix is singular (pivot below `1e-12` relative to the
/// largest entry) or the dimensions disagree.
pub fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return None;
    }
    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |m, v| m.max(v.abs()))
        .max(f64::MIN_POSITIVE);

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 * scale {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

/// Least-squares polynomial fit of `y` against `x`.
///
/// # Returns
///
/// Coefficients in ascending power order (`c[0] + c[1]·x + …`), or `None` when
/// there are fewer points than coefficients or the system is singular.
pub fn polyfit(x: &[f64], y: &[f32], order: usize) -> Option<Vec<f64>> {
    let n = x.len().min(y.len());
    let terms = order + 1;
    if n < terms {
        return None;
    }

    // Power sums Σ x^k for k = 0..2*order and moments Σ y·x^k
    let mut power_sums = vec![0.0f64; 2 * order + 1];
    let mut moments = vec![0.0f64; terms];
    for (&xi, &yi) in x[..n].iter().zip(&y[..n]) {
        let yi = f64::from(yi);
        let mut p = 1.0;
        for k in 0..=2 * order {
            power_sums[k] += p;
            if k < terms {
                moments[k] += yi * p;
            }
            p *= xi;
        }
    }

    let normal: Vec<Vec<f64>> = (0..terms)
        .map(|r| (0..terms).map(|c| power_sums[r + c]).collect())
        .collect();
    solve_linear(normal, moments)
}

/// Evaluate an ascending-order polynomial at `x` (Horner's rule).
pub fn poly_eval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

fn centered_axis(n: usize) -> Vec<f64> {
    // Scaled to [-1, 1) so high powers stay bounded
    let half = n as f64 / 2.0;
    (0..n).map(|i| (i as f64 - half) / half.max(1.0)).collect()
}

/// Fitted polynomial trend of `y` over a centered sample axis.
///
/// With `include_constant` false the constant term is omitted, so the trend
/// only carries the varying part of the fit.
pub fn trend(y: &[f32], order: usize, include_constant: bool) -> Vec<f32> {
    let axis = centered_axis(y.len());
    let Some(mut coeffs) = polyfit(&axis, y, order) else {
        return vec![0.0; y.len()];
    };
    if !include_constant {
        coeffs[0] = 0.0;
    }
    axis.iter().map(|&t| poly_eval(&coeffs, t) as f32).collect()
}

/// Remove a polynomial trend of the given order.
///
/// With `demean` true the result has zero mean; otherwise the fitted constant
/// is kept and only the varying part of the trend is subtracted.
pub fn detrend(y: &[f32], order: usize, demean: bool) -> Vec<f32> {
    let fitted = trend(y, order, demean);
    y.iter().zip(&fitted).map(|(&v, &t)| v - t).collect()
}
