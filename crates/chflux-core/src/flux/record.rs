use crate::errorcode::QualityMask;
use crate::flux::fitkind::FitKind;
use crate::flux::fitter::FitResult;
use crate::types::Seconds;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};

use std::fmt;

/// One output row: a flux for one species at one chamber visit.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxRecord {
    /// Closure start without lag, standard-time seconds.
    pub timestamp: Seconds,
    pub timestamp_utc: Option<DateTime<Utc>>,
    pub cycle_start: Seconds,
    pub schedule_id: String,
    pub chamber_id: u32,
    pub chamber_label: String,
    pub species: String,
    /// Position of `species` in the configured species list.
    pub species_index: usize,
    pub flux: f64,
    pub se: f64,
    pub timelag: Seconds,
    pub model: FitKind,
    /// R² of the selected fit.
    pub quality: f64,
    pub n_points: usize,
    pub outliers: usize,
    pub baseline: f64,
    pub temperature: f64,
    pub pressure: f64,
    pub flow: Option<f64>,
    pub par: Option<f64>,
    pub flags: QualityMask,
    pub linear: FitResult,
    pub exponential: FitResult,
}

impl FluxRecord {
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_clean()
    }

    pub fn selected_fit(&self) -> &FitResult {
        match self.model {
            FitKind::Linear => &self.linear,
            FitKind::Exponential => &self.exponential,
        }
    }
}

impl fmt::Display for FluxRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} ch{} {}: flux {} ± {} ({}, r2 {}) [{}]",
            self.timestamp, self.chamber_id, self.species, self.flux, self.se, self.model,
            self.quality, self.flags
        )
    }
}

/// UTC instant of a standard-time timestamp at a fixed offset, in hours.
pub fn standard_to_utc(t: Seconds, utc_offset_hours: f64) -> Option<DateTime<Utc>> {
    if !t.is_finite() {
        return None;
    }
    let offset = FixedOffset::east_opt((utc_offset_hours * 3600.0).round() as i32)?;
    let secs = t.floor();
    let nanos = ((t - secs) * 1e9).round().min(999_999_999.0) as u32;
    let local: NaiveDateTime = DateTime::from_timestamp(secs as i64, nanos)?.naive_utc();
    local.and_local_timezone(offset).single().map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::parse_datetime;
    use chrono::TimeZone;

    #[test]
    fn test_standard_to_utc() {
        let t = parse_datetime("2024-07-01 12:00:00").unwrap();
        let utc = standard_to_utc(t, 2.0).unwrap();
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 7, 1, 10, 0, 0).unwrap());

        let west = standard_to_utc(t, -5.0).unwrap();
        assert_eq!(west, Utc.with_ymd_and_hms(2024, 7, 1, 17, 0, 0).unwrap());

        assert!(standard_to_utc(f64::NAN, 0.0).is_none());
        assert!(standard_to_utc(t, 30.0).is_none());
    }
}
