use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitKind {
    Linear,
    Exponential,
}

impl std::fmt::Display for FitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitKind::Linear => write!(f, "Linear"),
            FitKind::Exponential => write!(f, "Exponential"),
        }
    }
}

impl FitKind {
    /// Number of fitted parameters.
    pub fn n_params(&self) -> usize {
        match self {
            FitKind::Linear => 2,
            FitKind::Exponential => 3,
        }
    }
}

/// Which candidate fit feeds the flux.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitSelection {
    /// Exponential when it converged and beats the linear adjusted R² by
    /// more than `margin`, linear otherwise.
    PreferNonlinear { margin: f64 },
    Linear,
    Exponential,
}

impl Default for FitSelection {
    fn default() -> Self {
        FitSelection::PreferNonlinear { margin: 0.0 }
    }
}
