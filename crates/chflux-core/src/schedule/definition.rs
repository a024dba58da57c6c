use crate::constants::{SECONDS_PER_DAY, TIME_EPS};
use crate::error::ConfigError;
use crate::types::Seconds;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum UnitOfTime {
    Second,
    Minute,
    Hour,
    Day,
}

impl UnitOfTime {
    pub fn seconds(&self) -> f64 {
        match self {
            UnitOfTime::Second => 1.0,
            UnitOfTime::Minute => 60.0,
            UnitOfTime::Hour => 3600.0,
            UnitOfTime::Day => SECONDS_PER_DAY,
        }
    }
}

impl FromStr for UnitOfTime {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "second" | "sec" | "s" => Ok(UnitOfTime::Second),
            "minute" | "min" | "m" => Ok(UnitOfTime::Minute),
            "hour" | "hr" | "h" => Ok(UnitOfTime::Hour),
            "day" | "d" => Ok(UnitOfTime::Day),
            other => Err(ConfigError::UnitOfTime(other.to_owned())),
        }
    }
}

impl TryFrom<String> for UnitOfTime {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<UnitOfTime> for String {
    fn from(u: UnitOfTime) -> Self {
        u.to_string()
    }
}

impl fmt::Display for UnitOfTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UnitOfTime::Second => "second",
            UnitOfTime::Minute => "minute",
            UnitOfTime::Hour => "hour",
            UnitOfTime::Day => "day",
        };
        write!(f, "{}", s)
    }
}

/// Schedule validity bound: fractional day of year or a datetime string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleBound {
    Doy(f64),
    DateTime(String),
}

impl ScheduleBound {
    /// Seconds on the standard-time clock. DOY 0.0 is Jan 1 00:00 of
    /// `reference_year`; larger values run on into the following years.
    pub fn to_seconds(&self, reference_year: i32) -> Result<Seconds, ConfigError> {
        match self {
            ScheduleBound::Doy(doy) => doy_to_seconds(*doy, reference_year),
            ScheduleBound::DateTime(s) => parse_datetime(s),
        }
    }
}

pub fn doy_to_seconds(doy: f64, year: i32) -> Result<Seconds, ConfigError> {
    if !doy.is_finite() {
        return Err(ConfigError::ScheduleBound(format!("day of year {}", doy)));
    }
    let origin = NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ConfigError::ScheduleBound(format!("reference year {}", year)))?;
    Ok(origin.and_utc().timestamp() as f64 + doy * SECONDS_PER_DAY)
}

/// Parses a naive standard-time datetime string into seconds.
pub fn parse_datetime(s: &str) -> Result<Seconds, ConfigError> {
    let formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%d-%m-%Y %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ];

    for fmt in &formats {
        if let Ok(naive_dt) = NaiveDateTime::parse_from_str(s.trim(), fmt) {
            let dt = naive_dt.and_utc();
            return Ok(dt.timestamp() as f64 + f64::from(dt.timestamp_subsec_nanos()) * 1e-9);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc().timestamp() as f64);
        }
    }
    Err(ConfigError::ScheduleBound(format!("unrecognized datetime format: {}", s)))
}

/// One chamber schedule in the flat parallel-array layout, one entry per
/// chamber in each array. Offsets and lags are in `unit_of_time`.
#[allow(non_snake_case)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSchedule {
    pub schedule_start: ScheduleBound,
    pub schedule_end: ScheduleBound,
    pub n_ch: usize,
    pub smpl_cycle_len: f64,
    pub n_cycle_per_day: usize,
    pub unit_of_time: UnitOfTime,
    pub ch_no: Vec<u32>,
    pub A_ch: Vec<f64>,
    #[serde(default)]
    pub A_ch_std: Vec<f64>,
    pub V_ch: Vec<f64>,
    #[serde(default)]
    pub ch_label: Vec<String>,
    #[serde(default)]
    pub is_leaf_chamber: Vec<bool>,
    #[serde(default)]
    pub flowmeter_no: Vec<Option<u32>>,
    #[serde(default)]
    pub TC_no: Vec<Option<u32>>,
    #[serde(default)]
    pub PAR_no: Vec<Option<u32>>,
    pub ch_start: Vec<f64>,
    pub ch_o_b: Vec<f64>,
    pub ch_cls: Vec<f64>,
    pub ch_o_a: Vec<f64>,
    pub ch_end: Vec<f64>,
    pub ch_atm_a: Vec<f64>,
    #[serde(default)]
    pub optimize_timelag: Vec<bool>,
    #[serde(default)]
    pub timelag_nominal: Vec<f64>,
    #[serde(default)]
    pub timelag_upper_limit: Vec<f64>,
    #[serde(default)]
    pub timelag_lower_limit: Vec<f64>,
}

/// Offsets from the cycle start, seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhaseOffsets {
    pub ch_start: Seconds,
    pub ch_o_b: Seconds,
    pub ch_cls: Seconds,
    pub ch_o_a: Seconds,
    pub ch_end: Seconds,
    pub ch_atm_a: Seconds,
}

impl PhaseOffsets {
    pub fn as_array(&self) -> [Seconds; 6] {
        [self.ch_start, self.ch_o_b, self.ch_cls, self.ch_o_a, self.ch_end, self.ch_atm_a]
    }

    fn check_monotonic(&self) -> Result<(), String> {
        const NAMES: [&str; 6] = ["ch_start", "ch_o_b", "ch_cls", "ch_o_a", "ch_end", "ch_atm_a"];
        let v = self.as_array();
        if let Some(i) = v.iter().position(|x| !x.is_finite()) {
            return Err(format!("{} is not finite", NAMES[i]));
        }
        for i in 1..v.len() {
            if v[i] < v[i - 1] {
                return Err(format!("{} ({}) < {} ({})", NAMES[i], v[i], NAMES[i - 1], v[i - 1]));
            }
        }
        Ok(())
    }
}

/// Time-lag handling for one chamber, seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimelagPolicy {
    pub optimize: bool,
    pub nominal: Seconds,
    pub lower: Seconds,
    pub upper: Seconds,
}

impl TimelagPolicy {
    pub fn max_abs(&self) -> Seconds {
        let mut m = self.nominal.abs();
        if self.optimize {
            m = m.max(self.lower.abs()).max(self.upper.abs());
        }
        if m.is_finite() {
            m
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChamberSlot {
    pub ch_no: u32,
    pub label: String,
    pub is_leaf: bool,
    /// Chamber area, m².
    pub area: f64,
    pub area_std: f64,
    /// Chamber volume, m³.
    pub volume: f64,
    pub flowmeter_no: Option<u32>,
    pub tc_no: Option<u32>,
    pub par_no: Option<u32>,
    pub phases: PhaseOffsets,
    pub timelag: TimelagPolicy,
}

/// A validated schedule with its slots in chamber order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScheduleDefinition {
    pub id: String,
    pub start: Seconds,
    /// Exclusive end. Infinite when the set leaves the final schedule open.
    pub end: Seconds,
    pub smpl_cycle_len: Seconds,
    pub n_cycle_per_day: usize,
    pub slots: Vec<ChamberSlot>,
}

fn check_len<T>(
    schedule: &str,
    field: &'static str,
    v: &[T],
    expected: usize,
    optional: bool,
) -> Result<bool, ConfigError> {
    if v.len() == expected {
        return Ok(true);
    }
    if optional && v.is_empty() {
        return Ok(false);
    }
    Err(ConfigError::FieldLengthMismatch {
        schedule: schedule.to_owned(),
        field,
        found: v.len(),
        expected,
    })
}

impl ScheduleDefinition {
    /// Normalizes the flat layout into per-chamber slots and validates it.
    pub fn from_raw(
        id: impl Into<String>,
        raw: &RawSchedule,
        reference_year: i32,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        let invalid = |reason: String| ConfigError::InvalidSchedule { schedule: id.clone(), reason };

        let n = raw.ch_no.len();
        if n != raw.n_ch {
            return Err(ConfigError::SlotCountMismatch {
                schedule: id.clone(),
                declared: raw.n_ch,
                found: n,
            });
        }

        check_len(&id, "A_ch", &raw.A_ch, n, false)?;
        check_len(&id, "V_ch", &raw.V_ch, n, false)?;
        check_len(&id, "ch_start", &raw.ch_start, n, false)?;
        check_len(&id, "ch_o_b", &raw.ch_o_b, n, false)?;
        check_len(&id, "ch_cls", &raw.ch_cls, n, false)?;
        check_len(&id, "ch_o_a", &raw.ch_o_a, n, false)?;
        check_len(&id, "ch_end", &raw.ch_end, n, false)?;
        check_len(&id, "ch_atm_a", &raw.ch_atm_a, n, false)?;
        let has_area_std = check_len(&id, "A_ch_std", &raw.A_ch_std, n, true)?;
        let has_label = check_len(&id, "ch_label", &raw.ch_label, n, true)?;
        let has_leaf = check_len(&id, "is_leaf_chamber", &raw.is_leaf_chamber, n, true)?;
        let has_flow = check_len(&id, "flowmeter_no", &raw.flowmeter_no, n, true)?;
        let has_tc = check_len(&id, "TC_no", &raw.TC_no, n, true)?;
        let has_par = check_len(&id, "PAR_no", &raw.PAR_no, n, true)?;
        let has_opt = check_len(&id, "optimize_timelag", &raw.optimize_timelag, n, true)?;
        let has_nom = check_len(&id, "timelag_nominal", &raw.timelag_nominal, n, true)?;
        let has_upper = check_len(&id, "timelag_upper_limit", &raw.timelag_upper_limit, n, true)?;
        let has_lower = check_len(&id, "timelag_lower_limit", &raw.timelag_lower_limit, n, true)?;

        let unit = raw.unit_of_time.seconds();
        let start = raw.schedule_start.to_seconds(reference_year)?;
        let end = raw.schedule_end.to_seconds(reference_year)?;
        if end <= start {
            return Err(invalid(format!("schedule end {} is not after start {}", end, start)));
        }

        let smpl_cycle_len = raw.smpl_cycle_len * unit;
        if !(smpl_cycle_len.is_finite() && smpl_cycle_len > 0.0) {
            return Err(invalid(format!("cycle length {} must be positive", raw.smpl_cycle_len)));
        }
        if raw.n_cycle_per_day == 0 {
            return Err(invalid("n_cycle_per_day must be at least 1".to_owned()));
        }
        if raw.n_cycle_per_day as f64 * smpl_cycle_len > SECONDS_PER_DAY + TIME_EPS {
            return Err(invalid(format!(
                "{} cycles of {} s do not fit in one day",
                raw.n_cycle_per_day, smpl_cycle_len
            )));
        }

        let mut slots = Vec::with_capacity(n);
        for i in 0..n {
            let phases = PhaseOffsets {
                ch_start: raw.ch_start[i] * unit,
                ch_o_b: raw.ch_o_b[i] * unit,
                ch_cls: raw.ch_cls[i] * unit,
                ch_o_a: raw.ch_o_a[i] * unit,
                ch_end: raw.ch_end[i] * unit,
                ch_atm_a: raw.ch_atm_a[i] * unit,
            };
            phases.check_monotonic().map_err(|detail| ConfigError::NonMonotonicPhases {
                schedule: id.clone(),
                chamber: raw.ch_no[i],
                detail,
            })?;
            if phases.ch_start < 0.0 || phases.ch_atm_a > smpl_cycle_len + TIME_EPS {
                return Err(invalid(format!(
                    "chamber {} phase offsets fall outside the {} s cycle",
                    raw.ch_no[i], smpl_cycle_len
                )));
            }

            let nominal = if has_nom { raw.timelag_nominal[i] * unit } else { 0.0 };
            slots.push(ChamberSlot {
                ch_no: raw.ch_no[i],
                label: if has_label { raw.ch_label[i].clone() } else { format!("ch_{}", raw.ch_no[i]) },
                is_leaf: has_leaf && raw.is_leaf_chamber[i],
                area: raw.A_ch[i],
                area_std: if has_area_std { raw.A_ch_std[i] } else { 0.0 },
                volume: raw.V_ch[i],
                flowmeter_no: if has_flow { raw.flowmeter_no[i] } else { None },
                tc_no: if has_tc { raw.TC_no[i] } else { None },
                par_no: if has_par { raw.PAR_no[i] } else { None },
                phases,
                timelag: TimelagPolicy {
                    optimize: has_opt && raw.optimize_timelag[i],
                    nominal,
                    lower: if has_lower { raw.timelag_lower_limit[i] * unit } else { nominal },
                    upper: if has_upper { raw.timelag_upper_limit[i] * unit } else { nominal },
                },
            });
        }

        Ok(Self { id, start, end, smpl_cycle_len, n_cycle_per_day: raw.n_cycle_per_day, slots })
    }

    /// Largest lag magnitude any slot may apply.
    pub fn max_lag(&self) -> Seconds {
        self.slots.iter().map(|s| s.timelag.max_abs()).fold(0.0, f64::max)
    }

    pub fn slot(&self, ch_no: u32) -> Option<&ChamberSlot> {
        self.slots.iter().find(|s| s.ch_no == ch_no)
    }
}
