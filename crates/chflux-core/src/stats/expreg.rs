use crate::stats::linreg::LinReg;

use nalgebra::{Matrix3, Vector3};
use std::fmt;

/// Saturating exponential approach to equilibrium,
/// y = c0 + f0 · (1 - exp(-k x)) / k with k ≥ 0.
///
/// `f0` is the initial rate dy/dx at x = 0 and the model reduces to the
/// straight line c0 + f0 · x as k → 0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SatExpReg {
    pub c0: f64,
    pub f0: f64,
    pub k: f64,
}

/// Outcome of a Levenberg-Marquardt run.
#[derive(Debug, Clone, Copy)]
pub struct SatExpFit {
    pub model: SatExpReg,
    /// (JᵀJ)⁻¹ at the solution; scale by the residual variance for the
    /// parameter covariance.
    pub cov_unscaled: Option<Matrix3<f64>>,
    pub iterations: usize,
    pub converged: bool,
}

impl fmt::Display for SatExpReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SatExpReg")
    }
}

const SMALL_KX: f64 = 1e-3;
const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e10;
const REL_TOL: f64 = 1e-12;

impl SatExpReg {
    pub fn from_val(c0: f64, f0: f64, k: f64) -> Self {
        Self { c0, f0, k }
    }

    /// (1 - e^{-kx}) / k and its derivative with respect to k.
    fn shape(x: f64, k: f64) -> (f64, f64) {
        let kx = k * x;
        if kx.abs() < SMALL_KX {
            // series expansion, the closed form cancels badly here
            let g = x * (1.0 - kx / 2.0 + kx * kx / 6.0 - kx * kx * kx / 24.0);
            let dg = x * x * (-0.5 + kx / 3.0 - kx * kx / 8.0 + kx * kx * kx / 30.0);
            (g, dg)
        } else {
            let e = (-kx).exp();
            let g = (1.0 - e) / k;
            (g, x * e / k - (1.0 - e) / (k * k))
        }
    }

    pub fn calculate(&self, x: f64) -> f64 {
        self.c0 + self.f0 * Self::shape(x, self.k).0
    }

    fn ssr(&self, x: &[f64], y: &[f64]) -> f64 {
        x.iter().zip(y).map(|(&xi, &yi)| (yi - self.calculate(xi)).powi(2)).sum()
    }

    fn normal_equations(&self, x: &[f64], y: &[f64]) -> (Matrix3<f64>, Vector3<f64>) {
        let mut jtj = Matrix3::zeros();
        let mut jtr = Vector3::zeros();
        for (&xi, &yi) in x.iter().zip(y) {
            let (g, dg_dk) = Self::shape(xi, self.k);
            let row = Vector3::new(1.0, g, self.f0 * dg_dk);
            let r = yi - (self.c0 + self.f0 * g);
            jtj += row * row.transpose();
            jtr += row * r;
        }
        (jtj, jtr)
    }

    /// Levenberg-Marquardt fit seeded with a straight line.
    ///
    /// x is expected to start at zero. `None` when fewer than four points are
    /// given or x has no spread.
    pub fn train(x: &[f64], y: &[f64], guess: &LinReg, max_iter: usize) -> Option<SatExpFit> {
        if x.len() != y.len() || x.len() < 4 {
            return None;
        }
        let span = x.iter().cloned().fold(f64::NEG_INFINITY, f64::max)
            - x.iter().cloned().fold(f64::INFINITY, f64::min);
        if !span.is_finite() || span <= 0.0 {
            return None;
        }

        // start from the line itself or a mild curvature, whichever fits better
        let line = Self::from_val(guess.intercept, guess.slope, 0.0);
        let curved = Self::from_val(guess.intercept, guess.slope, 0.5 / span);
        let (mut model, mut ssr) = {
            let (a, b) = (line.ssr(x, y), curved.ssr(x, y));
            if b < a {
                (curved, b)
            } else {
                (line, a)
            }
        };
        let ssr_floor = 1e-28 * y.iter().map(|v| v * v).sum::<f64>();
        let mut lambda = LAMBDA_INIT;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < max_iter {
            iterations += 1;
            if ssr <= ssr_floor {
                converged = true;
                break;
            }
            let (jtj, jtr) = model.normal_equations(x, y);
            let mut damped = jtj;
            for i in 0..3 {
                let d = jtj[(i, i)];
                damped[(i, i)] += lambda * if d > 0.0 { d } else { 1.0 };
            }
            let Some(step) = damped.lu().solve(&jtr) else {
                lambda *= 10.0;
                if lambda > LAMBDA_MAX {
                    break;
                }
                continue;
            };

            let trial = Self::from_val(
                model.c0 + step[0],
                model.f0 + step[1],
                (model.k + step[2]).max(0.0),
            );
            let trial_ssr = trial.ssr(x, y);

            if trial_ssr.is_finite() && trial_ssr < ssr {
                let rel = (ssr - trial_ssr) / ssr;
                model = trial;
                ssr = trial_ssr;
                lambda = (lambda / 10.0).max(1e-12);
                if rel < REL_TOL {
                    converged = true;
                    break;
                }
            } else {
                lambda *= 10.0;
                // no descent direction left, we are at a (possibly boundary) minimum
                if lambda > LAMBDA_MAX {
                    converged = true;
                    break;
                }
            }
        }

        if !(model.c0.is_finite() && model.f0.is_finite() && model.k.is_finite()) {
            return None;
        }

        let (jtj, _) = model.normal_equations(x, y);
        Some(SatExpFit { model, cov_unscaled: jtj.try_inverse(), iterations, converged })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_saturating_curve() {
        let truth = SatExpReg::from_val(410.0, 0.8, 1.0 / 150.0);
        let x: Vec<f64> = (0..180).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| truth.calculate(xi)).collect();
        let guess = LinReg::train(&x, &y).unwrap();

        let fit = SatExpReg::train(&x, &y, &guess, 200).unwrap();
        assert!(fit.converged);
        assert!((fit.model.f0 - 0.8).abs() < 1e-4, "f0 = {}", fit.model.f0);
        assert!((fit.model.c0 - 410.0).abs() < 1e-3);
        assert!((fit.model.k - 1.0 / 150.0).abs() < 1e-5);
    }

    #[test]
    fn test_linear_data_goes_to_zero_k() {
        let x: Vec<f64> = (0..60).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 2.0 + 0.5 * xi).collect();
        let guess = LinReg::train(&x, &y).unwrap();

        let fit = SatExpReg::train(&x, &y, &guess, 200).unwrap();
        assert!(fit.converged);
        assert!(fit.model.k < 1e-6);
        assert!((fit.model.f0 - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_shape_continuity_at_small_k() {
        // either side of the series/closed-form switch
        let (g_series, dg_series) = SatExpReg::shape(100.0, 0.999e-5);
        let (g_closed, dg_closed) = SatExpReg::shape(100.0, 1.001e-5);
        assert!((g_series - g_closed).abs() < 1e-3);
        assert!((dg_series - dg_closed).abs() < 1e-2);
        assert_eq!(SatExpReg::shape(7.0, 0.0), (7.0, -24.5));
    }

    #[test]
    fn test_convex_data_pins_k_at_zero() {
        // curving upwards, the best saturating fit is the line itself
        let x: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| 5.0 + 0.01 * xi * xi).collect();
        let guess = LinReg::train(&x, &y).unwrap();

        let fit = SatExpReg::train(&x, &y, &guess, 200).unwrap();
        assert!(fit.converged);
        assert_eq!(fit.model.k, 0.0);
        assert!((fit.model.f0 - guess.slope).abs() < 1e-9);
        assert!(fit.iterations < 200);

        // damping has not run out yet after a handful of rejected steps
        let short = SatExpReg::train(&x, &y, &guess, 5).unwrap();
        assert!(!short.converged);
        assert_eq!(short.iterations, 5);
    }

    #[test]
    fn test_iteration_cap_stops_unconverged() {
        let truth = SatExpReg::from_val(410.0, 0.8, 1.0 / 40.0);
        let x: Vec<f64> = (0..180).map(|i| i as f64).collect();
        let y: Vec<f64> = x.iter().map(|&xi| truth.calculate(xi)).collect();
        let guess = LinReg::train(&x, &y).unwrap();

        let fit = SatExpReg::train(&x, &y, &guess, 1).unwrap();
        assert!(!fit.converged);
        assert_eq!(fit.iterations, 1);
    }

    #[test]
    fn test_too_few_points() {
        let guess = LinReg::from_val(0.0, 1.0);
        assert!(SatExpReg::train(&[0.0, 1.0, 2.0], &[0.0, 1.0, 2.0], &guess, 50).is_none());
    }
}
