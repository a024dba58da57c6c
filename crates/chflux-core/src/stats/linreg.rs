use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinReg {
    pub intercept: f64,
    pub slope: f64,
}

impl fmt::Display for LinReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "LinReg")
    }
}

impl Default for LinReg {
    fn default() -> Self {
        Self::new()
    }
}

impl LinReg {
    pub fn new() -> Self {
        Self { intercept: 0., slope: 0. }
    }
    pub fn calculate(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
    pub fn from_val(intercept: f64, slope: f64) -> Self {
        Self { intercept, slope }
    }

    /// Ordinary least squares. `None` when lengths differ, fewer than two
    /// points are given or x has no spread.
    pub fn train(x: &[f64], y: &[f64]) -> Option<Self> {
        if x.len() != y.len() || x.len() < 2 {
            return None;
        }
        let n = x.len() as f64;
        let avg_x = x.iter().sum::<f64>() / n;
        let avg_y = y.iter().sum::<f64>() / n;

        let ss_xx: f64 = x.iter().map(|xi| (xi - avg_x).powi(2)).sum();
        let ss_xy: f64 = x.iter().zip(y).map(|(xi, yi)| (xi - avg_x) * (yi - avg_y)).sum();
        if !ss_xx.is_finite() || ss_xx <= f64::EPSILON {
            return None;
        }

        let slope = ss_xy / ss_xx;
        let intercept = avg_y - slope * avg_x;

        Some(Self { intercept, slope })
    }
}

#[cfg(test)]
mod tests {
    use super::LinReg;

    #[test]
    fn test_linreg_exact() {
        let x = [0.0, 1.0, 2.0, 3.0];
        let y = [1.0, 3.0, 5.0, 7.0];
        let model = LinReg::train(&x, &y).unwrap();
        assert!((model.slope - 2.0).abs() < 1e-12);
        assert!((model.intercept - 1.0).abs() < 1e-12);
        assert!((model.calculate(10.0) - 21.0).abs() < 1e-12);
    }

    #[test]
    fn test_linreg_degenerate_x() {
        assert!(LinReg::train(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
        assert!(LinReg::train(&[1.0, 2.0], &[1.0]).is_none());
    }
}
