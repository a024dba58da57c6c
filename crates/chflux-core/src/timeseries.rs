use crate::error::TableError;
use crate::types::{EqualLen, FastMap, Seconds};

use std::ops::Range;

/// Time-indexed table of named `f64` columns.
///
/// `time` is strictly finite and non-decreasing; missing measurements are
/// NaN in the value columns.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct TimeSeries {
    pub time: Vec<Seconds>,
    pub columns: FastMap<String, Vec<f64>>,
}

impl EqualLen for TimeSeries {
    fn validate_lengths(&self) -> bool {
        let n = self.time.len();
        self.columns.values().all(|c| c.len() == n)
    }
}

impl TimeSeries {
    pub fn new(time: Vec<Seconds>) -> Self {
        Self { time, columns: FastMap::default() }
    }

    pub fn with_column(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.columns.insert(name.into(), values);
        self
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn validate(&self) -> Result<(), TableError> {
        if !self.validate_lengths() {
            let expected = self.time.len();
            if let Some((name, col)) = self.columns.iter().find(|(_, c)| c.len() != expected) {
                return Err(TableError::LengthMismatch {
                    column: name.clone(),
                    found: col.len(),
                    expected,
                });
            }
        }
        if let Some(i) = self.time.iter().position(|t| !t.is_finite()) {
            return Err(TableError::NonFiniteTime(i));
        }
        if let Some(i) = self.time.windows(2).position(|w| w[1] < w[0]) {
            return Err(TableError::Unsorted(i + 1));
        }
        Ok(())
    }

    pub fn first_time(&self) -> Option<Seconds> {
        self.time.first().copied()
    }

    pub fn last_time(&self) -> Option<Seconds> {
        self.time.last().copied()
    }

    /// Row indices with `start <= t < end`.
    pub fn range(&self, start: Seconds, end: Seconds) -> Range<usize> {
        let lo = self.time.partition_point(|&t| t < start);
        let hi = self.time.partition_point(|&t| t < end).max(lo);
        lo..hi
    }

    /// Row indices with `start <= t <= end`.
    pub fn range_inclusive(&self, start: Seconds, end: Seconds) -> Range<usize> {
        let lo = self.time.partition_point(|&t| t < start);
        let hi = self.time.partition_point(|&t| t <= end).max(lo);
        lo..hi
    }

    /// Time and values of one column inside `[start, end]`.
    pub fn window(&self, name: &str, start: Seconds, end: Seconds) -> Option<(&[f64], &[f64])> {
        let col = self.columns.get(name)?;
        let r = self.range_inclusive(start, end);
        Some((&self.time[r.clone()], &col[r]))
    }

    /// Owned sub-table of the rows in `[start, end)`.
    pub fn slice(&self, start: Seconds, end: Seconds) -> TimeSeries {
        let r = self.range(start, end);
        TimeSeries {
            time: self.time[r.clone()].to_vec(),
            columns: self
                .columns
                .iter()
                .map(|(k, v)| (k.clone(), v[r.clone()].to_vec()))
                .collect(),
        }
    }
}
