use crate::errorcode::QualityMask;
use crate::types::Seconds;

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    Schedule(ScheduleEvent),
    Progress(ProgressEvent),
    Visit(VisitEvent),
    Done(Result<usize, String>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleEvent {
    /// Data in this range has no schedule and was skipped.
    Uncovered { start: Seconds, end: Seconds },
    NoCycles { start: Seconds, end: Seconds },
    /// Visits of the cycle at `start` past the end of `schedule` were dropped.
    CycleCut { schedule: String, start: Seconds, visits: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted { chunks: usize, cycles: usize },
    ChunkStarted { index: usize, start: Seconds, end: Seconds, cycles: usize },
    ChunkDone { index: usize, rows: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum VisitEvent {
    TimelagFallback { timestamp: Seconds, chamber: u32 },
    Flagged { timestamp: Seconds, chamber: u32, species: String, flags: QualityMask },
}

pub trait ProcessEventSink {
    fn on_schedule_event(&mut self, ev: &ScheduleEvent);
    fn on_progress_event(&mut self, ev: &ProgressEvent);
    fn on_visit_event(&mut self, ev: &VisitEvent);
    fn on_done(&mut self, res: &Result<usize, String>);

    fn handle(&mut self, ev: &ProcessEvent) {
        match ev {
            ProcessEvent::Schedule(e) => self.on_schedule_event(e),
            ProcessEvent::Progress(e) => self.on_progress_event(e),
            ProcessEvent::Visit(e) => self.on_visit_event(e),
            ProcessEvent::Done(res) => self.on_done(res),
        }
    }
}

/// Forwards events to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProcessEventSink for LogSink {
    fn on_schedule_event(&mut self, ev: &ScheduleEvent) {
        match ev {
            ScheduleEvent::Uncovered { start, end } => {
                log::warn!("No chamber schedule covers [{}, {}), skipped", start, end);
            },
            ScheduleEvent::NoCycles { start, end } => {
                log::info!("No cycles between {} and {}", start, end);
            },
            ScheduleEvent::CycleCut { schedule, start, visits } => {
                log::debug!("Cycle at {} keeps {} visits before the end of {}", start, visits, schedule);
            },
        }
    }

    fn on_progress_event(&mut self, ev: &ProgressEvent) {
        match ev {
            ProgressEvent::RunStarted { chunks, cycles } => {
                log::info!("Processing {} cycles in {} chunks", cycles, chunks);
            },
            ProgressEvent::ChunkStarted { index, start, end, cycles } => {
                log::debug!("Chunk {}: [{}, {}) with {} cycles", index, start, end, cycles);
            },
            ProgressEvent::ChunkDone { index, rows } => {
                log::debug!("Chunk {} produced {} rows", index, rows);
            },
        }
    }

    fn on_visit_event(&mut self, ev: &VisitEvent) {
        match ev {
            VisitEvent::TimelagFallback { timestamp, chamber } => {
                log::debug!("Chamber {} at {}: time lag search failed, nominal used", chamber, timestamp);
            },
            VisitEvent::Flagged { timestamp, chamber, species, flags } => {
                log::debug!("Chamber {} {} at {}: {}", chamber, species, timestamp, flags);
            },
        }
    }

    fn on_done(&mut self, res: &Result<usize, String>) {
        match res {
            Ok(rows) => log::info!("Finished, {} flux rows", rows),
            Err(e) => log::error!("Processing failed: {}", e),
        }
    }
}

impl ProcessEventSink for Vec<ProcessEvent> {
    fn on_schedule_event(&mut self, ev: &ScheduleEvent) {
        self.push(ProcessEvent::Schedule(ev.clone()));
    }
    fn on_progress_event(&mut self, ev: &ProgressEvent) {
        self.push(ProcessEvent::Progress(ev.clone()));
    }
    fn on_visit_event(&mut self, ev: &VisitEvent) {
        self.push(ProcessEvent::Visit(ev.clone()));
    }
    fn on_done(&mut self, res: &Result<usize, String>) {
        self.push(ProcessEvent::Done(res.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_sink_collects_in_order() {
        let mut sink: Vec<ProcessEvent> = Vec::new();
        sink.handle(&ProcessEvent::Progress(ProgressEvent::RunStarted { chunks: 1, cycles: 2 }));
        sink.handle(&ProcessEvent::Done(Ok(12)));
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[1], ProcessEvent::Done(Ok(12)));

        // the log sink never panics without an installed logger
        LogSink.handle(&ProcessEvent::Done(Err("boom".to_owned())));
    }
}
