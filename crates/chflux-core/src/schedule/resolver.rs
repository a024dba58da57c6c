use crate::constants::{SECONDS_PER_DAY, TIME_EPS};
use crate::error::{ConfigError, ResolutionError};
use crate::schedule::definition::{ChamberSlot, RawSchedule, ScheduleDefinition};
use crate::types::Seconds;

use serde::{Deserialize, Serialize};

use std::collections::BTreeMap;

/// How the end of the last schedule in a set is treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalEnd {
    #[default]
    Exclusive,
    Inclusive,
    OpenEnded,
}

/// Contiguous, non-overlapping schedules sorted by start.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleSet {
    schedules: Vec<ScheduleDefinition>,
    final_end: FinalEnd,
}

/// Where a timestamp lands inside the schedule set.
#[derive(Debug, Clone, Copy)]
pub struct SlotLookup<'a> {
    pub schedule: &'a ScheduleDefinition,
    /// Start of the cycle containing the timestamp, `None` in the idle time
    /// after the last cycle of a day.
    pub cycle_start: Option<Seconds>,
    pub slot: Option<&'a ChamberSlot>,
}

impl ScheduleSet {
    pub fn new(
        mut schedules: Vec<ScheduleDefinition>,
        final_end: FinalEnd,
    ) -> Result<Self, ConfigError> {
        if schedules.is_empty() {
            return Err(ConfigError::Msg("no chamber schedules configured".to_owned()));
        }
        schedules.sort_by(|a, b| a.start.total_cmp(&b.start));

        for i in 1..schedules.len() {
            let (prev_end, next_start) = (schedules[i - 1].end, schedules[i].start);
            if next_start < prev_end - TIME_EPS {
                return Err(ConfigError::OverlappingSchedules {
                    first: schedules[i - 1].id.clone(),
                    second: schedules[i].id.clone(),
                });
            }
            if next_start > prev_end + TIME_EPS {
                return Err(ConfigError::ScheduleGap {
                    first: schedules[i - 1].id.clone(),
                    second: schedules[i].id.clone(),
                });
            }
            // snap sub-tolerance seams so boundaries compare exactly
            schedules[i - 1].end = next_start;
        }

        if final_end == FinalEnd::OpenEnded {
            if let Some(last) = schedules.last_mut() {
                last.end = f64::INFINITY;
            }
        }

        Ok(Self { schedules, final_end })
    }

    /// Reads a JSON object of schedule id to flat schedule.
    pub fn from_json(
        text: &str,
        reference_year: i32,
        final_end: FinalEnd,
    ) -> Result<Self, ConfigError> {
        let raw: BTreeMap<String, RawSchedule> = serde_json::from_str(text)?;
        let schedules = raw
            .iter()
            .map(|(id, r)| ScheduleDefinition::from_raw(id.clone(), r, reference_year))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(schedules, final_end)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ScheduleDefinition> {
        self.schedules.iter()
    }

    pub fn len(&self) -> usize {
        self.schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn final_end(&self) -> FinalEnd {
        self.final_end
    }

    /// Covered time span of the whole set.
    pub fn span(&self) -> (Seconds, Seconds) {
        let start = self.schedules.first().map_or(f64::NAN, |s| s.start);
        let end = self.schedules.last().map_or(f64::NAN, |s| s.end);
        (start, end)
    }

    pub fn max_lag(&self) -> Seconds {
        self.schedules.iter().map(ScheduleDefinition::max_lag).fold(0.0, f64::max)
    }

    /// Schedules whose validity window intersects `[start, end)`.
    pub fn overlapping(
        &self,
        start: Seconds,
        end: Seconds,
    ) -> impl Iterator<Item = &ScheduleDefinition> + '_ {
        self.schedules.iter().filter(move |s| s.start < end && s.end > start)
    }

    /// Parts of `[start, end)` no schedule covers.
    pub fn uncovered(&self, start: Seconds, end: Seconds) -> Vec<(Seconds, Seconds)> {
        let mut gaps = Vec::new();
        let (first, last) = self.span();
        if start < first {
            gaps.push((start, end.min(first)));
        }
        if end > last {
            gaps.push((start.max(last), end));
        }
        gaps
    }

    /// Schedule active at `t`. Windows are start-inclusive, so a boundary
    /// instant belongs to the later schedule.
    pub fn resolve(&self, t: Seconds) -> Result<&ScheduleDefinition, ResolutionError> {
        let no_match = ResolutionError::NoMatchingSchedule { timestamp: t };
        if !t.is_finite() {
            return Err(no_match);
        }
        let idx = self.schedules.partition_point(|s| s.start <= t);
        if idx == 0 {
            return Err(no_match);
        }
        let candidate = &self.schedules[idx - 1];
        if t < candidate.end {
            return Ok(candidate);
        }
        let is_last = idx == self.schedules.len();
        if is_last && self.final_end == FinalEnd::Inclusive && t <= candidate.end {
            return Ok(candidate);
        }
        Err(no_match)
    }

    /// Schedule, cycle start and chamber slot active at `t`.
    pub fn resolve_slot(&self, t: Seconds) -> Result<SlotLookup<'_>, ResolutionError> {
        let schedule = self.resolve(t)?;
        let since_start = t - schedule.start;
        let day_origin = schedule.start + (since_start / SECONDS_PER_DAY).floor() * SECONDS_PER_DAY;
        let k = ((t - day_origin) / schedule.smpl_cycle_len).floor();

        if k < 0.0 || k as usize >= schedule.n_cycle_per_day {
            return Ok(SlotLookup { schedule, cycle_start: None, slot: None });
        }
        let cycle_start = day_origin + k * schedule.smpl_cycle_len;
        let offset = t - cycle_start;
        let slot = schedule
            .slots
            .iter()
            .find(|s| s.phases.ch_start <= offset && offset < s.phases.ch_end);

        Ok(SlotLookup { schedule, cycle_start: Some(cycle_start), slot })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::definition::tests::six_chamber_raw;

    fn two_schedules(final_end: FinalEnd) -> ScheduleSet {
        let a = ScheduleDefinition::from_raw("a", &six_chamber_raw(0.0, 10.0), 2024).unwrap();
        let b = ScheduleDefinition::from_raw("b", &six_chamber_raw(10.0, 20.0), 2024).unwrap();
        ScheduleSet::new(vec![b, a], final_end).unwrap()
    }

    #[test]
    fn test_boundary_belongs_to_later_schedule() {
        let set = two_schedules(FinalEnd::Exclusive);
        let boundary = set.iter().nth(1).unwrap().start;
        assert_eq!(set.resolve(boundary).unwrap().id, "b");
        assert_eq!(set.resolve(boundary - 1e-3).unwrap().id, "a");
    }

    #[test]
    fn test_final_end_policies() {
        let (start, end) = two_schedules(FinalEnd::Exclusive).span();
        assert!(matches!(
            two_schedules(FinalEnd::Exclusive).resolve(end),
            Err(ResolutionError::NoMatchingSchedule { .. })
        ));
        assert_eq!(two_schedules(FinalEnd::Inclusive).resolve(end).unwrap().id, "b");
        assert!(two_schedules(FinalEnd::Inclusive).resolve(end + 1.0).is_err());
        assert_eq!(two_schedules(FinalEnd::OpenEnded).resolve(end + 1e7).unwrap().id, "b");
        assert!(two_schedules(FinalEnd::OpenEnded).resolve(start - 1.0).is_err());
    }

    #[test]
    fn test_overlap_and_gap_rejected() {
        let a = ScheduleDefinition::from_raw("a", &six_chamber_raw(0.0, 10.0), 2024).unwrap();
        let b = ScheduleDefinition::from_raw("b", &six_chamber_raw(9.0, 20.0), 2024).unwrap();
        assert!(matches!(
            ScheduleSet::new(vec![a.clone(), b], FinalEnd::Exclusive),
            Err(ConfigError::OverlappingSchedules { .. })
        ));
        let c = ScheduleDefinition::from_raw("c", &six_chamber_raw(11.0, 20.0), 2024).unwrap();
        assert!(matches!(
            ScheduleSet::new(vec![a, c], FinalEnd::Exclusive),
            Err(ConfigError::ScheduleGap { .. })
        ));
    }

    #[test]
    fn test_resolve_slot() {
        let set = two_schedules(FinalEnd::Exclusive);
        let s = set.iter().next().unwrap().start;

        // second cycle of the day, 20 minutes in: chamber 2
        let hit = set.resolve_slot(s + 5400.0 + 1200.0).unwrap();
        assert_eq!(hit.cycle_start, Some(s + 5400.0));
        assert_eq!(hit.slot.map(|c| c.ch_no), Some(2));

        // 16 cycles of 90 minutes cover the whole day, the next day restarts
        let next_day = set.resolve_slot(s + SECONDS_PER_DAY + 10.0).unwrap();
        assert_eq!(next_day.cycle_start, Some(s + SECONDS_PER_DAY));
        assert_eq!(next_day.slot.map(|c| c.ch_no), Some(1));
    }

    #[test]
    fn test_idle_time_after_last_cycle() {
        let mut raw = six_chamber_raw(0.0, 2.0);
        raw.n_cycle_per_day = 10;
        let def = ScheduleDefinition::from_raw("a", &raw, 2024).unwrap();
        let set = ScheduleSet::new(vec![def], FinalEnd::Exclusive).unwrap();
        let s = set.span().0;
        let idle = set.resolve_slot(s + 10.0 * 5400.0 + 60.0).unwrap();
        assert!(idle.cycle_start.is_none());
        assert!(idle.slot.is_none());
    }

    #[test]
    fn test_from_json_and_uncovered() {
        let mut map = BTreeMap::new();
        map.insert("first", six_chamber_raw(0.0, 1.0));
        map.insert("second", six_chamber_raw(1.0, 2.0));
        let text = serde_json::to_string(&map).unwrap();
        let set = ScheduleSet::from_json(&text, 2024, FinalEnd::Exclusive).unwrap();
        assert_eq!(set.len(), 2);

        let (start, end) = set.span();
        assert!(set.uncovered(start, end).is_empty());
        assert_eq!(set.uncovered(start - 10.0, end), vec![(start - 10.0, start)]);
        assert_eq!(set.overlapping(start, start + 10.0).count(), 1);
    }
}
