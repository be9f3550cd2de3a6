//! Descriptive and robust statistics over sample slices.
//!
//! Sums are accumulated in `f64` so long physiological recordings do not lose
//! precision. Empty inputs return `0.0` (or `None` for index searches) rather
//! than NaN.
//!
//! The robust scale used throughout the pipeline is the median absolute
//! deviation scaled by [`MAD_SCALE`], which makes it a consistent estimator of
//! the standard deviation for Gaussian data.
//!
//! Reference: P. J. Rousseeuw and C. Croux, "Alternatives to the Median Absolute
//! Deviation", JASA 88(424), 1993.

/// Scale factor converting a MAD into a Gaussian-consistent sigma.
pub const MAD_SCALE: f32 = 1.4826;

/// Arithmetic mean.
pub fn mean(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    (x.iter().map(|&v| f64::from(v)).sum::<f64>() / x.len() as f64) as f32
}

/// Population variance (divides by `n`).
pub fn variance(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    let m = f64::from(mean(x));
    let ss: f64 = x.iter().map(|&v| (f64::from(v) - m).powi(2)).sum();
    (ss / x.len() as f64) as f32
}

/// Population standard deviation.
pub fn std_dev(x: &[f32]) -> f32 {
    variance(x).sqrt()
}

fn sorted_copy(x: &[f32]) -> Vec<f32> {
    let mut sorted = x.to_vec();
    sorted.sort_by(f32::total_cmp);
    sorted
}

/// Median (average of the two middle values for even lengths).
pub fn median(x: &[f32]) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    let sorted = sorted_copy(x);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        0.5 * (sorted[mid - 1] + sorted[mid])
    } else {
        sorted[mid]
    }
}

/// Quantile `q` in `[0, 1]` with linear interpolation between order statistics.
///
/// Matches the "linear" definition (Hyndman & Fan type 7).
pub fn quantile(x: &[f32], q: f32) -> f32 {
    if x.is_empty() {
        return 0.0;
    }
    let sorted = sorted_copy(x);
    quantile_sorted(&sorted, q)
}

fn quantile_sorted(sorted: &[f32], q: f32) -> f32 {
    let q = f64::from(q.clamp(0.0, 1.0));
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    (f64::from(sorted[lo]) + frac * (f64::from(sorted[hi]) - f64::from(sorted[lo]))) as f32
}

/// Percentile `pct` in `[0, 100]`.
pub fn percentile(x: &[f32], pct: f32) -> f32 {
    quantile(x, pct / 100.0)
}

/// Median and MAD-derived sigma of `x`.
///
/// # Returns
///
/// `(median, MAD_SCALE * median(|x - median|))`
pub fn mad(x: &[f32]) -> (f32, f32) {
    let med = median(x);
    let deviations: Vec<f32> = x.iter().map(|&v| (v - med).abs()).collect();
    (med, MAD_SCALE * median(&deviations))
}

/// Robust z-scoring: subtract the median and divide by the MAD sigma.
///
/// A zero MAD (for instance a constant signal) only removes the median.
pub fn mad_normalize(x: &[f32]) -> Vec<f32> {
    let (med, sigma) = mad(x);
    if sigma > 0.0 {
        x.iter().map(|&v| (v - med) / sigma).collect()
    } else {
        x.iter().map(|&v| v - med).collect()
    }
}

/// Sample skewness (biased estimator, `m3 / m2^1.5`).
pub fn skewness(x: &[f32]) -> f32 {
    let (m2, m3, _) = central_moments(x);
    if m2 <= 0.0 { 0.0 } else { (m3 / m2.powf(1.5)) as f32 }
}

/// Pearson kurtosis `m4 / m2^2` (3.0 for a Gaussian).
pub fn kurtosis(x: &[f32]) -> f32 {
    let (m2, _, m4) = central_moments(x);
    if m2 <= 0.0 { 0.0 } else { (m4 / (m2 * m2)) as f32 }
}

fn central_moments(x: &[f32]) -> (f64, f64, f64) {
    if x.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let n = x.len() as f64;
    let m = f64::from(mean(x));
    let (mut m2, mut m3, mut m4) = (0.0, 0.0, 0.0);
    for &v in x {
        let d = f64::from(v) - m;
        let d2 = d * d;
        m2 += d2;
        m3 += d2 * d;
        m4 += d2 * d2;
    }
    (m2 / n, m3 / n, m4 / n)
}

/// Pearson correlation coefficient over the common prefix of `x` and `y`.
///
/// Returns 0.0 when either input has zero variance.
pub fn pearson_r(x: &[f32], y: &[f32]) -> f32 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let mx = f64::from(mean(&x[..n]));
    let my = f64::from(mean(&y[..n]));
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x[..n].iter().zip(&y[..n]) {
        let da = f64::from(a) - mx;
        let db = f64::from(b) - my;
        sxy += da * db;
        sxx += da * da;
        syy += db * db;
    }
    let denom = (sxx * syy).sqrt();
    if denom > 0.0 { (sxy / denom) as f32 } else { 0.0 }
}

/// Index of the first maximum, ignoring NaN.
pub fn argmax(x: &[f32]) -> Option<usize> {
    x.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

/// Index of the first minimum, ignoring NaN.
pub fn argmin(x: &[f32]) -> Option<usize> {
    x.iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f32)>, (i, &v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn quantile_interpolates() {
        let x = [0.0, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(quantile(&x, 0.0), 0.0);
        assert_eq!(quantile(&x, 1.0), 40.0);
        assert!((quantile(&x, 0.375) - 15.0).abs() < 1e-5);
        assert!((percentile(&x, 98.0) - 39.2).abs() < 1e-4);
    }

    #[test]
    fn mad_of_gaussian_like_data_matches_std() {
        // Deterministic approximately normal samples via sum of uniforms
        let mut state = 12345u32;
        let x: Vec<f32> = (0..20000)
            .map(|_| {
                let mut acc = 0.0f32;
                for _ in 0..12 {
                    state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    acc += (state >> 8) as f32 / (1u32 << 24) as f32;
                }
                acc - 6.0
            })
            .collect();
        let (_, sigma) = mad(&x);
        assert!((sigma - 1.0).abs() < 0.05, "MAD sigma {sigma} should be near 1");
    }

    #[test]
    fn mad_normalize_constant_only_demedians() {
        let x = [5.0; 8];
        assert!(mad_normalize(&x).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn moments_of_symmetric_data() {
        let x = [-2.0, -1.0, 0.0, 1.0, 2.0];
        assert!(skewness(&x).abs() < 1e-6);
        assert!((kurtosis(&x) - 1.7).abs() < 1e-5);
    }

    #[test]
    fn pearson_of_scaled_copy_is_one() {
        let x: Vec<f32> = (0..50).map(|i| (i as f32 * 0.3).sin()).collect();
        let y: Vec<f32> = x.iter().map(|v| 3.0 * v + 1.0).collect();
        assert!((pearson_r(&x, &y) - 1.0).abs() < 1e-5);
        assert_eq!(pearson_r(&x, &[1.0; 50]), 0.0);
    }

    #[test]
    fn argmax_and_argmin_take_first() {
        let x = [1.0, 5.0, 5.0, -2.0, -2.0];
        assert_eq!(argmax(&x), Some(1));
        assert_eq!(argmin(&x), Some(3));
        assert_eq!(argmax(&[]), None);
    }
}
