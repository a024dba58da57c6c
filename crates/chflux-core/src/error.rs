use crate::types::Seconds;

/// Fatal configuration problems. These abort a run before any data is touched.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid schedule {schedule}: {reason}")]
    InvalidSchedule { schedule: String, reason: String },
    #[error("schedule {schedule}, chamber {chamber}: phase offsets are not monotonic ({detail})")]
    NonMonotonicPhases { schedule: String, chamber: u32, detail: String },
    #[error("schedule {schedule} declares {declared} chambers but has {found} slots")]
    SlotCountMismatch { schedule: String, declared: usize, found: usize },
    #[error("schedule {schedule}: field `{field}` has {found} entries, expected {expected}")]
    FieldLengthMismatch { schedule: String, field: &'static str, found: usize, expected: usize },
    #[error("schedules {first} and {second} overlap")]
    OverlappingSchedules { first: String, second: String },
    #[error("gap between schedules {first} and {second}")]
    ScheduleGap { first: String, second: String },
    #[error("species {species}: missing multiplier")]
    MissingMultiplier { species: String },
    #[error("species {species}: multiplier {multiplier} does not match unit/output_unit = {expected}")]
    UnitMismatch { species: String, multiplier: f64, expected: f64 },
    #[error("unknown unit of time: {0}")]
    UnitOfTime(String),
    #[error("cannot parse schedule bound: {0}")]
    ScheduleBound(String),
    #[error("column `{0}` not found in input data")]
    MissingColumn(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Msg(String),
}

/// No schedule covers a timestamp.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("no chamber schedule matches timestamp {timestamp}")]
    NoMatchingSchedule { timestamp: Seconds },
    #[error("no chamber schedule covers [{start}, {end})")]
    UncoveredRange { start: Seconds, end: Seconds },
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("column `{column}` has {found} values, time index has {expected}")]
    LengthMismatch { column: String, found: usize, expected: usize },
    #[error("time index is not sorted at position {0}")]
    Unsorted(usize),
    #[error("non-finite timestamp at position {0}")]
    NonFiniteTime(usize),
}

#[derive(thiserror::Error, Debug)]
pub enum ChfluxError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("table error: {0}")]
    Table(#[from] TableError),
}

pub type Result<T> = std::result::Result<T, ChfluxError>;
