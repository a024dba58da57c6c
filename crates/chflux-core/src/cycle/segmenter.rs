use crate::constants::{SECONDS_PER_DAY, TIME_EPS};
use crate::schedule::{ChamberSlot, ScheduleDefinition};
use crate::types::Seconds;

/// Absolute phase instants of one chamber visit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhaseWindows {
    pub start: Seconds,
    pub open_before: Seconds,
    pub close: Seconds,
    pub open_after: Seconds,
    pub end: Seconds,
    pub atm: Seconds,
}

impl PhaseWindows {
    pub fn shifted(&self, lag: Seconds) -> Self {
        Self {
            start: self.start + lag,
            open_before: self.open_before + lag,
            close: self.close + lag,
            open_after: self.open_after + lag,
            end: self.end + lag,
            atm: self.atm + lag,
        }
    }

    /// Concentration rise, both ends included.
    pub fn closure(&self) -> (Seconds, Seconds) {
        (self.close, self.open_after)
    }

    /// Open-before reference phase, end excluded.
    pub fn baseline(&self) -> (Seconds, Seconds) {
        (self.open_before, self.close)
    }

    pub fn as_array(&self) -> [Seconds; 6] {
        [self.start, self.open_before, self.close, self.open_after, self.end, self.atm]
    }
}

/// One instantiation of a schedule cycle.
#[derive(Debug, Clone)]
pub struct ResolvedCycle<'a> {
    pub schedule: &'a ScheduleDefinition,
    pub start: Seconds,
    /// Chamber visits with their absolute phase instants. Visits that would
    /// run past the schedule end are left out, the next schedule owns them.
    pub visits: Vec<(&'a ChamberSlot, PhaseWindows)>,
    /// False when the cycle runs past either end of the requested range.
    pub is_complete: bool,
    /// True when visits were cut at the schedule end.
    pub truncated: bool,
}

impl<'a> ResolvedCycle<'a> {
    pub fn end(&self) -> Seconds {
        self.start + self.schedule.smpl_cycle_len
    }

    /// First and last instant any kept visit touches.
    pub fn extent(&self) -> (Seconds, Seconds) {
        let phases = self.visits.iter().flat_map(|(_, w)| w.as_array());
        let (lo, hi) = phases.fold((self.start, self.start), |(lo, hi), t| (lo.min(t), hi.max(t)));
        (lo, hi)
    }

    pub fn slots(&self) -> impl Iterator<Item = (&'a ChamberSlot, &PhaseWindows)> + '_ {
        self.visits.iter().map(|(slot, w)| (*slot, w))
    }
}

/// Lazy walk over the cycles of one schedule that overlap a range.
#[derive(Debug, Clone)]
pub struct Cycles<'a> {
    schedule: &'a ScheduleDefinition,
    range_start: Seconds,
    range_end: Seconds,
    limit: Seconds,
    day_origin: Seconds,
    k: usize,
}

impl<'a> Cycles<'a> {
    fn next_start(&self) -> Seconds {
        self.day_origin + self.k as f64 * self.schedule.smpl_cycle_len
    }

    fn advance(&mut self) {
        self.k += 1;
        if self.k >= self.schedule.n_cycle_per_day {
            self.k = 0;
            self.day_origin += SECONDS_PER_DAY;
        }
    }
}

impl<'a> Iterator for Cycles<'a> {
    type Item = ResolvedCycle<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.schedule.smpl_cycle_len;
        loop {
            let start = self.next_start();
            if start >= self.limit || start >= self.range_end {
                return None;
            }
            self.advance();
            if start + len <= self.range_start {
                continue;
            }

            let limit = self.limit + TIME_EPS;
            let mut truncated = false;
            let schedule = self.schedule;
            let visits: Vec<(&'a ChamberSlot, PhaseWindows)> = schedule
                .slots
                .iter()
                .filter_map(|s| {
                    let p = &s.phases;
                    let w = PhaseWindows {
                        start: start + p.ch_start,
                        open_before: start + p.ch_o_b,
                        close: start + p.ch_cls,
                        open_after: start + p.ch_o_a,
                        end: start + p.ch_end,
                        atm: start + p.ch_atm_a,
                    };
                    if w.as_array().iter().any(|&t| t > limit) {
                        truncated = true;
                        None
                    } else {
                        Some((s, w))
                    }
                })
                .collect();
            if visits.is_empty() {
                continue;
            }

            return Some(ResolvedCycle {
                schedule,
                start,
                visits,
                is_complete: start >= self.range_start && start + len <= self.range_end,
                truncated,
            });
        }
    }
}

/// Cycles of `schedule` overlapping `[range_start, range_end)`.
///
/// Starts are laid out from each day origin (`schedule.start + d * 86400`)
/// and never reach the schedule end. The iterator is `Clone`, so a walk can
/// be restarted from any point.
pub fn segment(
    schedule: &ScheduleDefinition,
    range_start: Seconds,
    range_end: Seconds,
) -> Cycles<'_> {
    let len = schedule.smpl_cycle_len;
    // jump to the day holding the first candidate instead of walking from the schedule start
    let first_day = if range_start > schedule.start {
        ((range_start - len - schedule.start) / SECONDS_PER_DAY).floor().max(0.0)
    } else {
        0.0
    };
    Cycles {
        schedule,
        range_start,
        range_end,
        limit: schedule.end,
        day_origin: schedule.start + first_day * SECONDS_PER_DAY,
        k: 0,
    }
}
