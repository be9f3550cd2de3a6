//! Histogram estimate of mutual information between two time courses.

/// Default number of histogram bins per axis.
pub const DEFAULT_BINS: usize = 16;

fn bin_index(v: f32, lo: f32, width: f32, bins: usize) -> usize {
    if width <= 0.0 {
        return 0;
    }
    (((v - lo) / width) as usize).min(bins - 1)
}

/// Mutual information (nats) of the common prefix of `x` and `y`.
///
/// Both axes are split into `bins` equal-width bins spanning their own range.
/// Returns 0.0 for fewer than two samples or a constant input.
pub fn mutual_information(x: &[f32], y: &[f32], bins: usize) -> f32 {
    let n = x.len().min(y.len());
    if n < 2 || bins == 0 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let range = |s: &[f32]| {
        s.iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    };
    let (xlo, xhi) = range(x);
    let (ylo, yhi) = range(y);
    if xhi <= xlo || yhi <= ylo {
        return 0.0;
    }
    let xw = (xhi - xlo) / bins as f32;
    let yw = (yhi - ylo) / bins as f32;

    let mut joint = vec![0u32; bins * bins];
    let mut px = vec![0u32; bins];
    let mut py = vec![0u32; bins];
    for (&a, &b) in x.iter().zip(y) {
        let i = bin_index(a, xlo, xw, bins);
        let j = bin_index(b, ylo, yw, bins);
        joint[i * bins + j] += 1;
        px[i] += 1;
        py[j] += 1;
    }

    let total = n as f64;
    let mut mi = 0.0f64;
    for i in 0..bins {
        for j in 0..bins {
            let c = joint[i * bins + j];
            if c == 0 {
                continue;
            }
            let pxy = f64::from(c) / total;
            let marginal = f64::from(px[i]) * f64::from(py[j]) / (total * total);
            mi += pxy * (pxy / marginal).ln();
        }
    }
    mi.max(0.0) as f32
}

/// Mutual information of `reference[n]` against `series[n + lag]` over the
/// overlapping samples.
pub fn lagged_mutual_information(reference: &[f32], series: &[f32], lag: isize, bins: usize) -> f32 {
    let (ref_start, ser_start) = if lag >= 0 {
        (0, lag.unsigned_abs())
    } else {
        (lag.unsigned_abs(), 0)
    };
    if ref_start >= reference.len() || ser_start >= series.len() {
        return 0.0;
    }
    let len = (reference.len() - ref_start).min(series.len() - ser_start);
    mutual_information(
        &reference[ref_start..ref_start + len],
        &series[ser_start..ser_start + len],
        bins,
    )
}
