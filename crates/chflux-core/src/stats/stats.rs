pub(crate) fn finite_sorted(data: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Median of the finite values, NaN when there are none.
pub fn median(data: &[f64]) -> f64 {
    median_sorted(&finite_sorted(data))
}

fn median_sorted(sorted: &[f64]) -> f64 {
    let len = sorted.len();
    if len == 0 {
        return f64::NAN;
    }
    let mid = len / 2;
    if len % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Quantile `q` in [0, 1] of the finite values.
///
/// Linear interpolation between closest ranks (Hyndman & Fan type 7, the
/// numpy/R default): `h = (n - 1) q`, `Q = x[⌊h⌋] + (h - ⌊h⌋)(x[⌊h⌋+1] - x[⌊h⌋])`.
pub fn quantile(data: &[f64], q: f64) -> f64 {
    quantile_sorted(&finite_sorted(data), q)
}

pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return f64::NAN;
    }
    let h = (sorted.len() - 1) as f64 * q;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Median absolute deviation scaled to be a consistent estimator of the
/// standard deviation for normal data.
pub fn mad(data: &[f64]) -> f64 {
    let sorted = finite_sorted(data);
    let med = median_sorted(&sorted);
    let deviations: Vec<f64> = sorted.iter().map(|v| (v - med).abs()).collect();
    median(&deviations) / 0.6745
}

/// Typical spacing between consecutive timestamps, ignoring gaps and repeats.
pub fn median_spacing(time: &[f64]) -> Option<f64> {
    let diffs: Vec<f64> = time.windows(2).map(|w| w[1] - w[0]).filter(|d| *d > 0.0).collect();
    let m = median(&diffs);
    if m.is_finite() && m > 0.0 {
        Some(m)
    } else {
        None
    }
}

pub fn rmse(y: &[f64], y_hat: &[f64]) -> Option<f64> {
    if y.len() != y_hat.len() || y.is_empty() {
        return None;
    }

    let sum_sq: f64 = y.iter().zip(y_hat.iter()).map(|(&yi, &yhi)| (yi - yhi).powi(2)).sum();

    Some((sum_sq / y.len() as f64).sqrt())
}

pub fn aic_from_rss(rss: f64, n: usize, k: usize) -> f64 {
    if rss <= 0.0 || n == 0 {
        return f64::NEG_INFINITY; // perfect fit
    }
    n as f64 * (rss / n as f64).ln() + 2.0 * k as f64
}

pub fn r2_from_predictions(y: &[f64], y_hat: &[f64]) -> Option<f64> {
    if y.len() != y_hat.len() || y.len() < 2 {
        return None;
    }

    let y_mean = y.iter().sum::<f64>() / y.len() as f64;

    let ss_res: f64 = y.iter().zip(y_hat).map(|(&yi, &yhi)| (yi - yhi).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|&yi| (yi - y_mean).powi(2)).sum();

    if ss_tot == 0.0 {
        return None;
    }

    Some(1.0 - ss_res / ss_tot)
}

pub fn adjusted_r2(r2: f64, n: usize, k: usize) -> f64 {
    if n <= k + 1 {
        return r2; // Not enough data to adjust
    }
    1.0 - (1.0 - r2) * (n as f64 - 1.0) / (n as f64 - k as f64 - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_ignores_nan() {
        assert_eq!(median(&[3.0, f64::NAN, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_quantile_type7() {
        let x = [1.0, 2.0, 3.0, 4.0];
        assert!((quantile(&x, 0.25) - 1.75).abs() < 1e-12);
        assert!((quantile(&x, 0.75) - 3.25).abs() < 1e-12);
        assert_eq!(quantile(&x, 0.0), 1.0);
        assert_eq!(quantile(&x, 1.0), 4.0);
        assert!(quantile(&x, 1.5).is_nan());
    }

    #[test]
    fn test_median_spacing() {
        let t = [0.0, 1.0, 2.0, 2.0, 3.0, 10.0, 11.0];
        assert_eq!(median_spacing(&t), Some(1.0));
        assert_eq!(median_spacing(&[5.0]), None);
    }

    #[test]
    fn test_r2_flat_is_none() {
        assert_eq!(r2_from_predictions(&[1.0, 1.0, 1.0], &[1.0, 1.0, 1.0]), None);
    }
}
