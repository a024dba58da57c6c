//! Chamber gas flux engine.
//!
//! Resolves which chamber schedule and slot applies to a timestamp, cuts the
//! concentration series into per-chamber closure windows, fits linear and
//! saturating-exponential rise models and converts the fitted rate into a
//! surface flux with its standard error.

pub mod config;
pub mod constants;
pub mod cycle;
pub mod error;
pub mod errorcode;
pub mod flux;
pub mod processevent;
pub mod processor;
pub mod schedule;
pub mod species;
pub mod stats;
pub mod timeseries;
pub mod types;
