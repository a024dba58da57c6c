use crate::constants::{R_GAS, T_0};
use crate::errorcode::{QualityFlag, QualityMask};
use crate::flux::fitter::FitResult;
use crate::species::SpeciesConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChamberGeometry {
    /// m²
    pub area: f64,
    pub area_std: f64,
    /// m³
    pub volume: f64,
}

impl ChamberGeometry {
    pub fn is_degenerate(&self) -> bool {
        !(self.area.is_finite() && self.area > 0.0 && self.volume.is_finite() && self.volume > 0.0)
    }
}

/// Conditions inside the chamber during a visit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Environment {
    /// Pa
    pub pressure: f64,
    /// °C
    pub temperature: f64,
}

impl Environment {
    pub fn is_complete(&self) -> bool {
        self.pressure.is_finite() && self.temperature.is_finite()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluxEstimate {
    pub flux: f64,
    pub se: f64,
    pub flags: QualityMask,
}

/// Ideal-gas conversion of a concentration rate into a surface flux.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FluxCalculator {
    /// Combine the relative area uncertainty with the slope error in
    /// quadrature. Off by default, the error then reflects the fit only.
    pub propagate_area_uncertainty: bool,
}

impl FluxCalculator {
    pub fn new(propagate_area_uncertainty: bool) -> Self {
        Self { propagate_area_uncertainty }
    }

    /// `flux = dC/dt · P·V / (R·T·A) · multiplier`
    ///
    /// Degenerate geometry or missing conditions only flag the estimate, the
    /// arithmetic still runs and whatever comes out non-finite becomes NaN.
    pub fn compute(
        &self,
        fit: &FitResult,
        geometry: &ChamberGeometry,
        env: &Environment,
        species: &SpeciesConfig,
    ) -> FluxEstimate {
        let mut flags = QualityMask::default();
        if geometry.is_degenerate() {
            flags |= QualityFlag::DegenerateGeometry;
        }
        if !env.is_complete() {
            flags |= QualityFlag::MissingEnvironment;
        }
        if !fit.is_valid {
            return FluxEstimate { flux: f64::NAN, se: f64::NAN, flags };
        }

        let t_k = env.temperature + T_0;
        let factor = env.pressure * geometry.volume / (R_GAS * t_k * geometry.area)
            * species.multiplier();

        let flux = fit.slope * factor;
        let mut se = fit.se_slope * factor.abs();
        if self.propagate_area_uncertainty && geometry.area_std.is_finite() && flux != 0.0 {
            let rel_slope = fit.se_slope / fit.slope;
            let rel_area = geometry.area_std / geometry.area;
            se = flux.abs() * (rel_slope.powi(2) + rel_area.powi(2)).sqrt();
        }

        FluxEstimate {
            flux: if flux.is_finite() { flux } else { f64::NAN },
            se: if se.is_finite() { se } else { f64::NAN },
            flags,
        }
    }
}
