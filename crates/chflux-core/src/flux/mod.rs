pub mod fiterror;
pub mod fitkind;
pub mod fitter;
pub mod fluxcalc;
pub mod record;
pub mod timelag;

pub use fiterror::{FitError, FitOutcome};
pub use fitkind::{FitKind, FitSelection};
pub use fitter::{CurveFitter, FitOptions, FitPair, FitResult};
pub use fluxcalc::{ChamberGeometry, Environment, FluxCalculator, FluxEstimate};
pub use record::{standard_to_utc, FluxRecord};
pub use timelag::{LagEstimate, TimelagEstimator};
