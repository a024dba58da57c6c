use crate::cycle::PhaseWindows;
use crate::flux::fitkind::FitKind;
use crate::flux::fitter::CurveFitter;
use crate::schedule::TimelagPolicy;
use crate::stats::median_spacing;
use crate::timeseries::TimeSeries;
use crate::types::Seconds;

const TIE_EPS: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LagEstimate {
    pub lag: Seconds,
    /// R² of the trial linear fit at `lag`, NaN when not searched.
    pub r2: f64,
    /// The search could not run or no trial fit succeeded.
    pub fallback: bool,
    pub candidates: usize,
}

impl LagEstimate {
    fn nominal(policy: &TimelagPolicy, fallback: bool, candidates: usize) -> Self {
        Self { lag: policy.nominal, r2: f64::NAN, fallback, candidates }
    }
}

/// Chooses the delay between chamber events and the analyzer seeing them.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimelagEstimator {
    fitter: CurveFitter,
}

impl TimelagEstimator {
    pub fn new(fitter: CurveFitter) -> Self {
        Self { fitter }
    }

    pub fn estimate(
        &self,
        series: &TimeSeries,
        column: &str,
        policy: &TimelagPolicy,
        windows: &PhaseWindows,
    ) -> LagEstimate {
        if !policy.optimize {
            return LagEstimate::nominal(policy, false, 0);
        }
        let (close, open_after) = windows.closure();
        let lo = close + policy.lower.min(policy.upper);
        let hi = open_after + policy.upper.max(policy.lower);
        match series.window(column, lo, hi) {
            Some((time, conc)) => self.search(time, conc, policy, (close, open_after)),
            None => LagEstimate::nominal(policy, true, 0),
        }
    }

    /// Grid search over `[lower, upper]` stepping by the median sampling
    /// interval, maximizing the linear R² over the lagged closure window.
    pub fn search(
        &self,
        time: &[f64],
        conc: &[f64],
        policy: &TimelagPolicy,
        closure: (Seconds, Seconds),
    ) -> LagEstimate {
        if !policy.optimize {
            return LagEstimate::nominal(policy, false, 0);
        }
        let (lower, upper) = (policy.lower, policy.upper);
        let step = match median_spacing(time) {
            Some(s) if s.is_finite() && s > 0.0 => s,
            _ => return LagEstimate::nominal(policy, true, 0),
        };
        if !(lower.is_finite() && upper.is_finite()) || lower > upper {
            return LagEstimate::nominal(policy, true, 0);
        }

        let n_steps = ((upper - lower) / step + 1e-9).floor() as usize;
        let mut best: Option<(Seconds, f64)> = None;

        for i in 0..=n_steps {
            let lag = lower + i as f64 * step;
            let lo = time.partition_point(|&t| t < closure.0 + lag);
            let hi = time.partition_point(|&t| t <= closure.1 + lag).max(lo);
            let fit = self.fitter.fit(&time[lo..hi], &conc[lo..hi], FitKind::Linear);
            if !fit.is_valid || !fit.r2.is_finite() {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_lag, best_r2)) => {
                    fit.r2 > best_r2 + TIE_EPS
                        || ((fit.r2 - best_r2).abs() <= TIE_EPS
                            && (lag - policy.nominal).abs() < (best_lag - policy.nominal).abs())
                },
            };
            if better {
                best = Some((lag, fit.r2));
            }
        }

        match best {
            Some((lag, r2)) => LagEstimate { lag, r2, fallback: false, candidates: n_steps + 1 },
            None => LagEstimate::nominal(policy, true, n_steps + 1),
        }
    }
}
