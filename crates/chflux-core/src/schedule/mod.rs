pub mod definition;
pub mod resolver;

pub use definition::{
    parse_datetime, ChamberSlot, PhaseOffsets, RawSchedule, ScheduleBound, ScheduleDefinition,
    TimelagPolicy, UnitOfTime,
};
pub use resolver::{FinalEnd, ScheduleSet, SlotLookup};
