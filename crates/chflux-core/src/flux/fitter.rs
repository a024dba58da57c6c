use crate::flux::fiterror::{FitError, FitOutcome};
use crate::flux::fitkind::{FitKind, FitSelection};
use crate::stats::{adjusted_r2, aic_from_rss, r2_from_predictions, rmse, LinReg, SatExpReg};

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, StudentsT};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FitOptions {
    /// Minimum number of finite points for the linear model. The exponential
    /// model needs at least one more than its parameter count.
    pub min_points: usize,
    pub max_iter: usize,
    pub selection: FitSelection,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self { min_points: 3, max_iter: 200, selection: FitSelection::default() }
    }
}

/// Fitted concentration model over one closure window.
///
/// Invalid fits keep their `kind` and point count but carry NaN statistics,
/// they are missing values and never zero.
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub kind: FitKind,
    /// Rate of concentration change at the start of the window, per second.
    pub slope: f64,
    pub intercept: f64,
    pub se_slope: f64,
    pub r2: f64,
    pub adjusted_r2: f64,
    pub rmse: f64,
    pub p_value: f64,
    pub aic: f64,
    /// Exponential decay constant k, 1/s. `None` for the linear model.
    pub curvature: Option<f64>,
    pub n: usize,
    pub is_valid: bool,
    pub error: Option<FitError>,
    pub residuals: Vec<f64>,
}

impl fmt::Display for FitResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}, slope: {}, r2: {}, n: {}", self.kind, self.slope, self.r2, self.n)
    }
}

impl FitResult {
    pub fn invalid(kind: FitKind, n: usize, error: FitError) -> Self {
        Self {
            kind,
            slope: f64::NAN,
            intercept: f64::NAN,
            se_slope: f64::NAN,
            r2: f64::NAN,
            adjusted_r2: f64::NAN,
            rmse: f64::NAN,
            p_value: f64::NAN,
            aic: f64::NAN,
            curvature: None,
            n,
            is_valid: false,
            error: Some(error),
            residuals: Vec::new(),
        }
    }

    pub fn is_non_convergence(&self) -> bool {
        matches!(self.error, Some(FitError::NonConvergence { .. }))
    }
}

/// Both candidate models fitted to the same window.
#[derive(Debug, Clone, PartialEq)]
pub struct FitPair {
    pub linear: FitResult,
    pub exponential: FitResult,
}

impl FitPair {
    pub fn select(&self, selection: FitSelection) -> &FitResult {
        match selection {
            FitSelection::Linear => &self.linear,
            FitSelection::Exponential => &self.exponential,
            FitSelection::PreferNonlinear { margin } => {
                let exp = &self.exponential;
                let lin = &self.linear;
                // adjusted R² charges the exponential for its extra parameter
                if exp.is_valid && (!lin.is_valid || exp.adjusted_r2 > lin.adjusted_r2 + margin) {
                    exp
                } else {
                    lin
                }
            },
        }
    }
}

fn two_sided_p(estimate: f64, se: f64, dof: f64) -> FitOutcome<f64> {
    if se == 0.0 {
        return Ok(if estimate == 0.0 { 1.0 } else { 0.0 });
    }
    let t_stat = estimate / se;
    if !t_stat.is_finite() {
        return Ok(f64::NAN);
    }
    let dist = StudentsT::new(0.0, 1.0, dof)
        .map_err(|_| FitError::StatError("failed to construct StudentsT"))?;
    Ok(2.0 * (1.0 - dist.cdf(t_stat.abs())))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CurveFitter {
    opts: FitOptions,
}

impl CurveFitter {
    pub fn new(opts: FitOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &FitOptions {
        &self.opts
    }

    /// Fits `kind` to the finite (time, concentration) pairs. Never fails,
    /// problems come back as an invalid result.
    pub fn fit(&self, time: &[f64], conc: &[f64], kind: FitKind) -> FitResult {
        if time.len() != conc.len() {
            let err = FitError::LengthMismatch { len_x: time.len(), len_y: conc.len() };
            return FitResult::invalid(kind, 0, err);
        }
        let (x, y) = normalized_pairs(time, conc);
        let outcome = match kind {
            FitKind::Linear => self.fit_linear(&x, &y),
            FitKind::Exponential => self.fit_exponential(&x, &y),
        };
        outcome.unwrap_or_else(|err| FitResult::invalid(kind, x.len(), err))
    }

    pub fn fit_pair(&self, time: &[f64], conc: &[f64]) -> FitPair {
        FitPair {
            linear: self.fit(time, conc, FitKind::Linear),
            exponential: self.fit(time, conc, FitKind::Exponential),
        }
    }

    fn fit_linear(&self, x: &[f64], y: &[f64]) -> FitOutcome<FitResult> {
        let needed = self.opts.min_points.max(3);
        if x.len() < needed {
            return Err(FitError::NotEnoughPoints { len: x.len(), needed });
        }
        let n = x.len() as f64;
        let model = LinReg::train(x, y).ok_or(FitError::DegenerateX)?;

        let y_hat: Vec<f64> = x.iter().map(|&xi| model.calculate(xi)).collect();
        let residuals: Vec<f64> = y.iter().zip(&y_hat).map(|(&yi, &yhi)| yi - yhi).collect();
        let rss: f64 = residuals.iter().map(|r| r.powi(2)).sum();

        let x_mean = x.iter().sum::<f64>() / n;
        let ss_xx: f64 = x.iter().map(|xi| (xi - x_mean).powi(2)).sum();
        let sigma = (rss / (n - 2.0)).sqrt();
        let se_slope = sigma / ss_xx.sqrt();

        let r2 = r2_from_predictions(y, &y_hat).unwrap_or(0.0);

        Ok(FitResult {
            kind: FitKind::Linear,
            slope: model.slope,
            intercept: model.intercept,
            se_slope,
            r2,
            adjusted_r2: adjusted_r2(r2, x.len(), 1),
            rmse: rmse(y, &y_hat).unwrap_or(f64::NAN),
            p_value: two_sided_p(model.slope, se_slope, n - 2.0)?,
            aic: aic_from_rss(rss, x.len(), 2),
            curvature: None,
            n: x.len(),
            is_valid: true,
            error: None,
            residuals,
        })
    }

    fn fit_exponential(&self, x: &[f64], y: &[f64]) -> FitOutcome<FitResult> {
        let needed = self.opts.min_points.max(FitKind::Exponential.n_params() + 1);
        if x.len() < needed {
            return Err(FitError::NotEnoughPoints { len: x.len(), needed });
        }
        let n = x.len() as f64;
        let guess = LinReg::train(x, y).ok_or(FitError::DegenerateX)?;
        let fit = SatExpReg::train(x, y, &guess, self.opts.max_iter).ok_or(FitError::DegenerateX)?;
        if !fit.converged {
            return Err(FitError::NonConvergence { iterations: fit.iterations });
        }
        let model = fit.model;

        let y_hat: Vec<f64> = x.iter().map(|&xi| model.calculate(xi)).collect();
        let residuals: Vec<f64> = y.iter().zip(&y_hat).map(|(&yi, &yhi)| yi - yhi).collect();
        let rss: f64 = residuals.iter().map(|r| r.powi(2)).sum();

        let dof = n - 3.0;
        let se_slope = fit
            .cov_unscaled
            .map(|cov| (rss / dof * cov[(1, 1)]).max(0.0).sqrt())
            .unwrap_or(f64::NAN);

        let r2 = r2_from_predictions(y, &y_hat).unwrap_or(0.0);

        Ok(FitResult {
            kind: FitKind::Exponential,
            slope: model.f0,
            intercept: model.c0,
            se_slope,
            r2,
            adjusted_r2: adjusted_r2(r2, x.len(), 2),
            rmse: rmse(y, &y_hat).unwrap_or(f64::NAN),
            p_value: two_sided_p(model.f0, se_slope, dof)?,
            aic: aic_from_rss(rss, x.len(), 3),
            curvature: Some(model.k),
            n: x.len(),
            is_valid: true,
            error: None,
            residuals,
        })
    }
}

/// Drops non-finite pairs and shifts time so the first kept point is zero.
fn normalized_pairs(time: &[f64], conc: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let (x, y): (Vec<f64>, Vec<f64>) =
        time.iter().zip(conc).filter(|(t, c)| t.is_finite() && c.is_finite()).unzip();
    let x0 = x.first().copied().unwrap_or(0.0);
    (x.into_iter().map(|t| t - x0).collect(), y)
}
