//! Outlier-resistant summary statistics.
//!
//! All functions skip non-finite values and return NaN on empty input so a bad
//! segment never aborts bulk processing.

use crate::stats::stats::{finite_sorted, mad, median, quantile_sorted};

use serde::{Deserialize, Serialize};

/// Trimming parameters shared by [`resist_mean`] and [`resist_std`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RobustOptions {
    /// Values farther than `n_sigma` resistant standard deviations from the
    /// median are discarded.
    pub n_sigma: f64,
    pub max_iter: usize,
}

impl Default for RobustOptions {
    fn default() -> Self {
        Self { n_sigma: 3.0, max_iter: 10 }
    }
}

/// Iteratively drops values beyond `n_sigma · MAD/0.6745` of the median.
///
/// With a zero MAD only values equal to the median survive.
fn trimmed(data: &[f64], opts: &RobustOptions) -> Vec<f64> {
    let mut kept: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    for _ in 0..opts.max_iter {
        if kept.is_empty() {
            break;
        }
        let med = median(&kept);
        let limit = opts.n_sigma * mad(&kept);
        let next: Vec<f64> = kept.iter().copied().filter(|v| (v - med).abs() <= limit).collect();
        if next.len() == kept.len() {
            break;
        }
        kept = next;
    }
    kept
}

pub fn resist_mean(data: &[f64], opts: &RobustOptions) -> f64 {
    let kept = trimmed(data, opts);
    if kept.is_empty() {
        return f64::NAN;
    }
    kept.iter().sum::<f64>() / kept.len() as f64
}

/// Sample standard deviation of the values that survive trimming.
pub fn resist_std(data: &[f64], opts: &RobustOptions) -> f64 {
    let kept = trimmed(data, opts);
    match kept.len() {
        0 => f64::NAN,
        1 => 0.0,
        n => {
            let mean = kept.iter().sum::<f64>() / n as f64;
            let ss: f64 = kept.iter().map(|v| (v - mean).powi(2)).sum();
            (ss / (n as f64 - 1.0)).sqrt()
        },
    }
}

/// Interquartile range, type 7 quantiles.
pub fn iqr(data: &[f64]) -> f64 {
    let sorted = finite_sorted(data);
    quantile_sorted(&sorted, 0.75) - quantile_sorted(&sorted, 0.25)
}

/// Number of values outside the Tukey fences `[Q1 - k·IQR, Q3 + k·IQR]`.
///
/// `floor` is the minimum fence half-width; it keeps rounding noise in a
/// near-perfect fit from being reported.
pub fn count_outliers(data: &[f64], k: f64, floor: f64) -> usize {
    let sorted = finite_sorted(data);
    if sorted.len() < 4 {
        return 0;
    }
    let q1 = quantile_sorted(&sorted, 0.25);
    let q3 = quantile_sorted(&sorted, 0.75);
    let width = (k * (q3 - q1)).max(floor);
    sorted.iter().filter(|&&v| v < q1 - width || v > q3 + width).count()
}

/* =================== Dixon's Q test =================== */

/// Confidence level of the Dixon critical values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DixonConfidence {
    Q90,
    #[default]
    Q95,
    Q99,
}

// critical Q for n = 3..=30
const Q90: [f64; 28] = [
    0.941, 0.765, 0.642, 0.560, 0.507, 0.468, 0.437, 0.412, 0.392, 0.376, 0.361, 0.349, 0.338,
    0.329, 0.320, 0.313, 0.306, 0.300, 0.295, 0.290, 0.285, 0.281, 0.277, 0.273, 0.269, 0.266,
    0.263, 0.260,
];
const Q95: [f64; 28] = [
    0.970, 0.829, 0.710, 0.625, 0.568, 0.526, 0.493, 0.466, 0.444, 0.426, 0.410, 0.396, 0.384,
    0.374, 0.365, 0.356, 0.349, 0.342, 0.337, 0.331, 0.326, 0.321, 0.317, 0.312, 0.308, 0.305,
    0.301, 0.290,
];
const Q99: [f64; 28] = [
    0.994, 0.926, 0.821, 0.740, 0.680, 0.634, 0.598, 0.568, 0.542, 0.522, 0.503, 0.488, 0.475,
    0.463, 0.452, 0.442, 0.433, 0.425, 0.418, 0.411, 0.404, 0.399, 0.393, 0.388, 0.384, 0.380,
    0.376, 0.372,
];

impl DixonConfidence {
    fn table(&self) -> &'static [f64; 28] {
        match self {
            DixonConfidence::Q90 => &Q90,
            DixonConfidence::Q95 => &Q95,
            DixonConfidence::Q99 => &Q99,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DixonError {
    #[error("Dixon test needs between {min} and {max} finite values, got {len}")]
    SampleSize { len: usize, min: usize, max: usize },
    #[error("Dixon test must check at least one end")]
    NoSide,
}

/// Suspect extremes found by [`dixon_test`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DixonOutliers {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

/// Dixon's Q test on the smallest and/or largest value of a small sample.
///
/// An extreme is reported when its gap to the neighbour, relative to the
/// range, exceeds the critical Q and is at least the gap at the other end.
/// Meant to be applied once per sample.
pub fn dixon_test(
    data: &[f64],
    low: bool,
    high: bool,
    confidence: DixonConfidence,
) -> Result<DixonOutliers, DixonError> {
    let table = confidence.table();
    let (min, max) = (3, table.len() + 2);
    let sorted = finite_sorted(data);
    let len = sorted.len();
    if !(min..=max).contains(&len) {
        return Err(DixonError::SampleSize { len, min, max });
    }
    if !(low || high) {
        return Err(DixonError::NoSide);
    }

    let range = sorted[len - 1] - sorted[0];
    if range == 0.0 {
        return Ok(DixonOutliers::default());
    }
    let q_crit = table[len - 3];
    let q_low = (sorted[1] - sorted[0]) / range;
    let q_high = (sorted[len - 1] - sorted[len - 2]) / range;
    Ok(DixonOutliers {
        low: (low && q_low > q_crit && q_low >= q_high).then_some(sorted[0]),
        high: (high && q_high > q_crit && q_high >= q_low).then_some(sorted[len - 1]),
    })
}
