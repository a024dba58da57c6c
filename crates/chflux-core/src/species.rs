use crate::error::ConfigError;
use crate::stats::{median, resist_mean, RobustOptions};

use serde::{Deserialize, Serialize};

const UNIT_RTOL: f64 = 1e-6;

/// Resistant baseline subtracted from the closure series before fitting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineCorrection {
    #[default]
    None,
    Median,
    ResistMean,
}

impl BaselineCorrection {
    /// Baseline estimate from the reference window, `None` when disabled.
    pub fn estimate(&self, reference: &[f64], opts: &RobustOptions) -> Option<f64> {
        match self {
            BaselineCorrection::None => None,
            BaselineCorrection::Median => Some(median(reference)),
            BaselineCorrection::ResistMean => Some(resist_mean(reference, opts)),
        }
    }
}

/// Calibration for one gas.
///
/// `unit` and `output_unit` are mixing-ratio scales (1e-6 for ppm); the
/// multiplier converts input to output and must equal `unit / output_unit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpeciesConfig {
    pub name: String,
    /// Concentration column, defaults to `name`.
    #[serde(default)]
    pub column: Option<String>,
    pub unit: f64,
    pub output_unit: f64,
    #[serde(default)]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub baseline_correction: BaselineCorrection,
}

impl SpeciesConfig {
    pub fn new(name: impl Into<String>, unit: f64, output_unit: f64) -> Self {
        Self {
            name: name.into(),
            column: None,
            unit,
            output_unit,
            multiplier: Some(unit / output_unit),
            baseline_correction: BaselineCorrection::None,
        }
    }

    pub fn column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    /// Validated multiplier; NaN before `validate` has passed.
    pub fn multiplier(&self) -> f64 {
        self.multiplier.unwrap_or(f64::NAN)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let multiplier = self
            .multiplier
            .ok_or_else(|| ConfigError::MissingMultiplier { species: self.name.clone() })?;
        let expected = self.unit / self.output_unit;
        let consistent = expected.is_finite()
            && multiplier.is_finite()
            && (multiplier - expected).abs() <= UNIT_RTOL * expected.abs();
        if !consistent {
            return Err(ConfigError::UnitMismatch {
                species: self.name.clone(),
                multiplier,
                expected,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_multiplier() {
        let co2 = SpeciesConfig::new("co2", 1e-6, 1e-6);
        assert!(co2.validate().is_ok());
        assert_eq!(co2.multiplier(), 1.0);

        let mut ch4 = SpeciesConfig::new("ch4", 1e-9, 1e-6);
        assert!(ch4.validate().is_ok());
        ch4.multiplier = None;
        assert!(matches!(ch4.validate(), Err(ConfigError::MissingMultiplier { .. })));
        ch4.multiplier = Some(1.0);
        assert!(matches!(ch4.validate(), Err(ConfigError::UnitMismatch { .. })));
    }

    #[test]
    fn test_from_json() {
        let s: SpeciesConfig = serde_json::from_str(
            r#"{"name": "h2o", "column": "H2O_ppt", "unit": 1e-3, "output_unit": 1e-3,
                "multiplier": 1.0, "baseline_correction": "resist_mean"}"#,
        )
        .unwrap();
        assert_eq!(s.column(), "H2O_ppt");
        assert_eq!(s.baseline_correction, BaselineCorrection::ResistMean);
        assert!(s.validate().is_ok());

        assert!(serde_json::from_str::<SpeciesConfig>(
            r#"{"name": "x", "unit": 1, "output_unit": 1, "scale": 2}"#
        )
        .is_err());
    }

    #[test]
    fn test_baseline_estimate() {
        let opts = RobustOptions::default();
        let reference = [400.0, 401.0, 399.0, 400.0, 900.0];
        assert_eq!(BaselineCorrection::None.estimate(&reference, &opts), None);
        assert_eq!(BaselineCorrection::Median.estimate(&reference, &opts), Some(400.0));
        let rm = BaselineCorrection::ResistMean.estimate(&reference, &opts).unwrap();
        assert!((rm - 400.0).abs() < 1e-9);
    }
}
