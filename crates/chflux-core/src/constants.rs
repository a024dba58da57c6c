//! Physical constants used in the flux calculation.

/// Zero Celsius in kelvin.
pub const T_0: f64 = 273.15;
/// Standard atmospheric pressure, Pa.
pub const ATM: f64 = 101_325.0;
/// Molar gas constant, J mol⁻¹ K⁻¹.
pub const R_GAS: f64 = 8.314_459_8;
/// Air concentration at STP, mol m⁻³.
pub const AIR_CONC_STP: f64 = ATM / (R_GAS * T_0);

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Float tolerance when comparing instants in seconds.
pub const TIME_EPS: f64 = 1e-6;
