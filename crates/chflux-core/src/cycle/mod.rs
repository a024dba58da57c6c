pub mod segmenter;

pub use segmenter::{segment, Cycles, PhaseWindows, ResolvedCycle};
