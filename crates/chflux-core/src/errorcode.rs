use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Diagnostic codes attached to a flux row. None of them abort a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityFlag {
    InsufficientData,
    FitNonConvergence,
    TimelagFallback,
    OutlierSegment,
    DegenerateGeometry,
    MissingEnvironment,
    IncompleteCycle,
}

impl QualityFlag {
    pub const INSUFFICIENT_DATA: u16 = 1 << 0;
    pub const FIT_NON_CONVERGENCE: u16 = 1 << 1;
    pub const TIMELAG_FALLBACK: u16 = 1 << 2;
    pub const OUTLIER_SEGMENT: u16 = 1 << 3;
    pub const DEGENERATE_GEOMETRY: u16 = 1 << 4;
    pub const MISSING_ENVIRONMENT: u16 = 1 << 5;
    pub const INCOMPLETE_CYCLE: u16 = 1 << 6;

    pub fn to_mask(&self) -> u16 {
        match self {
            QualityFlag::InsufficientData => Self::INSUFFICIENT_DATA,
            QualityFlag::FitNonConvergence => Self::FIT_NON_CONVERGENCE,
            QualityFlag::TimelagFallback => Self::TIMELAG_FALLBACK,
            QualityFlag::OutlierSegment => Self::OUTLIER_SEGMENT,
            QualityFlag::DegenerateGeometry => Self::DEGENERATE_GEOMETRY,
            QualityFlag::MissingEnvironment => Self::MISSING_ENVIRONMENT,
            QualityFlag::IncompleteCycle => Self::INCOMPLETE_CYCLE,
        }
    }

    pub fn all() -> &'static [QualityFlag] {
        use QualityFlag::*;
        &[
            InsufficientData,
            FitNonConvergence,
            TimelagFallback,
            OutlierSegment,
            DegenerateGeometry,
            MissingEnvironment,
            IncompleteCycle,
        ]
    }

    pub fn from_mask(mask: u16) -> Vec<QualityFlag> {
        Self::all().iter().copied().filter(|flag| mask & flag.to_mask() != 0).collect()
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QualityMask(pub u16);

impl BitOr for QualityFlag {
    type Output = QualityMask;
    fn bitor(self, rhs: Self) -> Self::Output {
        QualityMask(self.to_mask() | rhs.to_mask())
    }
}

impl BitOrAssign<QualityFlag> for QualityMask {
    fn bitor_assign(&mut self, rhs: QualityFlag) {
        self.0 |= rhs.to_mask();
    }
}

impl BitOrAssign<QualityMask> for QualityMask {
    fn bitor_assign(&mut self, rhs: QualityMask) {
        self.0 |= rhs.0;
    }
}

impl From<QualityFlag> for QualityMask {
    fn from(flag: QualityFlag) -> Self {
        QualityMask(flag.to_mask())
    }
}

impl QualityMask {
    pub fn contains(&self, flag: QualityFlag) -> bool {
        self.0 & flag.to_mask() != 0
    }
    pub fn is_clean(&self) -> bool {
        self.0 == 0
    }
    pub fn flags(&self) -> Vec<QualityFlag> {
        QualityFlag::from_mask(self.0)
    }
}

impl fmt::Display for QualityFlag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let message = match self {
            QualityFlag::InsufficientData => "Too few valid points to fit",
            QualityFlag::FitNonConvergence => "Nonlinear fit did not converge",
            QualityFlag::TimelagFallback => "Time lag search failed, nominal lag used",
            QualityFlag::OutlierSegment => "Outliers in fit residuals",
            QualityFlag::DegenerateGeometry => "Chamber area or volume is degenerate",
            QualityFlag::MissingEnvironment => "No temperature or pressure for the visit",
            QualityFlag::IncompleteCycle => "Cycle extends past the processed range",
        };
        write!(f, "{}", message)
    }
}

impl fmt::Display for QualityMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let labels: Vec<String> = self.flags().iter().map(|flag| flag.to_string()).collect();
        write!(f, "{}", labels.join("; "))
    }
}
