use crate::config::{Chunking, RunConfig, UnscheduledPolicy};
use crate::constants::{SECONDS_PER_DAY, TIME_EPS};
use crate::cycle::{segment, PhaseWindows, ResolvedCycle};
use crate::error::{ConfigError, ResolutionError, Result};
use crate::errorcode::{QualityFlag, QualityMask};
use crate::flux::{
    standard_to_utc, ChamberGeometry, CurveFitter, Environment, FitError, FluxCalculator,
    FluxRecord, TimelagEstimator,
};
use crate::processevent::{
    ProcessEvent, ProcessEventSink, ProgressEvent, ScheduleEvent, VisitEvent,
};
use crate::schedule::{ChamberSlot, ScheduleSet};
use crate::stats::{count_outliers, median, median_spacing, resist_mean};
use crate::timeseries::TimeSeries;
use crate::types::Seconds;

use itertools::Itertools;
use rayon::prelude::*;

/// Input tables for one run.
#[derive(Debug, Default, Clone)]
pub struct Datasets {
    /// Gas analyzer output, one column per species.
    pub concentration: TimeSeries,
    /// Temperature, pressure, flow and PAR columns.
    pub biomet: TimeSeries,
}

struct ChunkPlan<'s> {
    index: usize,
    cycles: Vec<ResolvedCycle<'s>>,
    /// Rows of the input tables this chunk may touch, `[lo, hi)`.
    read: (Seconds, Seconds),
}

struct ChunkOutput {
    rows: Vec<FluxRecord>,
    events: Vec<ProcessEvent>,
}

pub struct Processor<'a> {
    config: &'a RunConfig,
    schedules: &'a ScheduleSet,
    fitter: CurveFitter,
    lag: TimelagEstimator,
    calc: FluxCalculator,
}

impl<'a> Processor<'a> {
    pub fn new(config: &'a RunConfig, schedules: &'a ScheduleSet) -> Result<Self> {
        config.validate()?;
        let fitter = CurveFitter::new(config.fit);
        Ok(Self {
            config,
            schedules,
            fitter,
            lag: TimelagEstimator::new(fitter),
            calc: FluxCalculator::new(config.propagate_area_uncertainty),
        })
    }

    /// Processes chunks one after another, chunked per the configuration.
    pub fn run(&self, data: &Datasets, sink: &mut dyn ProcessEventSink) -> Result<Vec<FluxRecord>> {
        self.run_chunked(data, self.config.chunking, sink)
    }

    pub fn run_chunked(
        &self,
        data: &Datasets,
        chunking: Chunking,
        sink: &mut dyn ProcessEventSink,
    ) -> Result<Vec<FluxRecord>> {
        let chunks = match self.plan(data, chunking, sink) {
            Ok(chunks) => chunks,
            Err(e) => {
                sink.on_done(&Err(e.to_string()));
                return Err(e);
            },
        };
        let mut rows = Vec::new();
        for chunk in &chunks {
            let out = self.run_chunk(chunk, data, chunking);
            Self::report(chunk, &out, sink);
            rows.extend(out.rows);
        }
        Ok(Self::finish(rows, sink))
    }

    /// Same output as [`Processor::run`], with chunks spread over the rayon
    /// pool and merged in chunk order.
    pub fn run_parallel(
        &self,
        data: &Datasets,
        sink: &mut dyn ProcessEventSink,
    ) -> Result<Vec<FluxRecord>> {
        let chunking = self.config.chunking;
        let chunks = match self.plan(data, chunking, sink) {
            Ok(chunks) => chunks,
            Err(e) => {
                sink.on_done(&Err(e.to_string()));
                return Err(e);
            },
        };
        let outputs: Vec<ChunkOutput> =
            chunks.par_iter().map(|chunk| self.run_chunk(chunk, data, chunking)).collect();

        let mut rows = Vec::new();
        for (chunk, out) in chunks.iter().zip(outputs) {
            Self::report(chunk, &out, sink);
            rows.extend(out.rows);
        }
        Ok(Self::finish(rows, sink))
    }

    fn report(chunk: &ChunkPlan, out: &ChunkOutput, sink: &mut dyn ProcessEventSink) {
        let start = chunk.cycles.first().map_or(f64::NAN, |c| c.start);
        let end = chunk.cycles.last().map_or(f64::NAN, |c| c.end());
        sink.on_progress_event(&ProgressEvent::ChunkStarted {
            index: chunk.index,
            start,
            end,
            cycles: chunk.cycles.len(),
        });
        for ev in &out.events {
            sink.handle(ev);
        }
        sink.on_progress_event(&ProgressEvent::ChunkDone { index: chunk.index, rows: out.rows.len() });
    }

    fn finish(mut rows: Vec<FluxRecord>, sink: &mut dyn ProcessEventSink) -> Vec<FluxRecord> {
        rows.sort_by(|a, b| {
            a.timestamp
                .total_cmp(&b.timestamp)
                .then(a.chamber_id.cmp(&b.chamber_id))
                .then(a.species_index.cmp(&b.species_index))
        });
        sink.on_done(&Ok(rows.len()));
        rows
    }

    /* =================== Planning =================== */

    fn check_columns(&self, data: &Datasets) -> Result<()> {
        for species in &self.config.species {
            if !data.concentration.has_column(species.column()) {
                return Err(ConfigError::MissingColumn(species.column().to_owned()).into());
            }
        }
        for name in self.config.columns.required(self.schedules) {
            if !data.biomet.has_column(&name) {
                return Err(ConfigError::MissingColumn(name).into());
            }
        }
        Ok(())
    }

    fn chunk_key(chunking: Chunking, origin: Seconds, t: Seconds) -> i64 {
        match chunking {
            Chunking::Disabled => 0,
            Chunking::Daily => (t / SECONDS_PER_DAY).floor() as i64,
            Chunking::Seconds(n) => ((t - origin) / n).floor() as i64,
        }
    }

    fn plan(
        &self,
        data: &Datasets,
        chunking: Chunking,
        sink: &mut dyn ProcessEventSink,
    ) -> Result<Vec<ChunkPlan<'a>>> {
        if let Chunking::Seconds(n) = chunking {
            if !(n.is_finite() && n > 0.0) {
                return Err(ConfigError::Msg(format!("chunk length {} s must be positive", n)).into());
            }
        }
        data.concentration.validate()?;
        data.biomet.validate()?;
        self.check_columns(data)?;

        let (Some(first), Some(last)) =
            (data.concentration.first_time(), data.concentration.last_time())
        else {
            sink.on_schedule_event(&ScheduleEvent::NoCycles { start: f64::NAN, end: f64::NAN });
            return Ok(Vec::new());
        };
        // the last sample stands for one sampling interval
        let dt = median_spacing(&data.concentration.time).unwrap_or(TIME_EPS);
        let (range_start, range_end) = (first, last + dt);

        for (start, end) in self.schedules.uncovered(range_start, range_end) {
            match self.config.unscheduled {
                UnscheduledPolicy::Fail => {
                    return Err(ResolutionError::UncoveredRange { start, end }.into());
                },
                UnscheduledPolicy::Skip => {
                    sink.on_schedule_event(&ScheduleEvent::Uncovered { start, end });
                },
            }
        }

        let schedules: &'a ScheduleSet = self.schedules;
        let cycles: Vec<ResolvedCycle<'a>> = schedules
            .overlapping(range_start, range_end)
            .flat_map(|s| segment(s, range_start, range_end))
            .collect();
        if cycles.is_empty() {
            sink.on_schedule_event(&ScheduleEvent::NoCycles { start: range_start, end: range_end });
        }
        for c in cycles.iter().filter(|c| c.truncated) {
            sink.on_schedule_event(&ScheduleEvent::CycleCut {
                schedule: c.schedule.id.clone(),
                start: c.start,
                visits: c.visits.len(),
            });
        }

        let max_lag = self.schedules.max_lag();
        let grouped = cycles
            .into_iter()
            .chunk_by(|c| Self::chunk_key(chunking, range_start, c.start));
        let chunks: Vec<ChunkPlan<'a>> = (&grouped)
            .into_iter()
            .enumerate()
            .map(|(index, (_, group))| {
                let cycles: Vec<ResolvedCycle<'a>> = group.collect();
                let lo = cycles.iter().map(|c| c.extent().0).fold(f64::INFINITY, f64::min);
                let hi = cycles.iter().map(|c| c.extent().1).fold(f64::NEG_INFINITY, f64::max);
                ChunkPlan { index, cycles, read: (lo - max_lag, hi + max_lag + 1.0) }
            })
            .collect();

        sink.on_progress_event(&ProgressEvent::RunStarted {
            chunks: chunks.len(),
            cycles: chunks.iter().map(|c| c.cycles.len()).sum(),
        });
        Ok(chunks)
    }

    /* =================== Chunk and visit processing =================== */

    fn run_chunk(&self, chunk: &ChunkPlan, data: &Datasets, chunking: Chunking) -> ChunkOutput {
        let mut out = ChunkOutput { rows: Vec::new(), events: Vec::new() };
        if chunking == Chunking::Disabled {
            for cycle in &chunk.cycles {
                self.process_cycle(cycle, &data.concentration, &data.biomet, &mut out);
            }
        } else {
            let (lo, hi) = chunk.read;
            let conc = data.concentration.slice(lo, hi);
            let biomet = data.biomet.slice(lo, hi);
            for cycle in &chunk.cycles {
                self.process_cycle(cycle, &conc, &biomet, &mut out);
            }
        }
        out
    }

    fn process_cycle(
        &self,
        cycle: &ResolvedCycle,
        conc: &TimeSeries,
        biomet: &TimeSeries,
        out: &mut ChunkOutput,
    ) {
        for (slot, windows) in cycle.slots() {
            self.process_visit(cycle, slot, windows, conc, biomet, out);
        }
    }

    fn window_mean(&self, series: &TimeSeries, column: &str, window: (Seconds, Seconds)) -> f64 {
        series
            .window(column, window.0, window.1)
            .map_or(f64::NAN, |(_, v)| resist_mean(v, &self.config.robust))
    }

    fn environment(
        &self,
        slot: &ChamberSlot,
        biomet: &TimeSeries,
        window: (Seconds, Seconds),
    ) -> Environment {
        let columns = &self.config.columns;
        let temperature = columns
            .temperature_for(slot)
            .map_or(f64::NAN, |col| self.window_mean(biomet, &col, window));
        let pressure = match &columns.pressure {
            Some(col) => self.window_mean(biomet, col, window),
            None => self.config.site.pressure,
        };
        Environment { pressure, temperature }
    }

    fn process_visit(
        &self,
        cycle: &ResolvedCycle,
        slot: &ChamberSlot,
        windows: &PhaseWindows,
        conc: &TimeSeries,
        biomet: &TimeSeries,
        out: &mut ChunkOutput,
    ) {
        let config = self.config;
        let timestamp = windows.close;
        let reference = &config.species[config.reference_species()];
        let lag = self.lag.estimate(conc, reference.column(), &slot.timelag, windows);
        let lagged = windows.shifted(lag.lag);

        let mut visit_flags = QualityMask::default();
        if lag.fallback {
            visit_flags |= QualityFlag::TimelagFallback;
            out.events.push(ProcessEvent::Visit(VisitEvent::TimelagFallback {
                timestamp,
                chamber: slot.ch_no,
            }));
        }
        if !cycle.is_complete {
            visit_flags |= QualityFlag::IncompleteCycle;
        }

        // environment is logged on the chamber's own clock, no lag
        let closure = windows.closure();
        let env = self.environment(slot, biomet, closure);
        let flow = config
            .columns
            .flow_for(slot)
            .map(|col| self.window_mean(biomet, &col, closure));
        let par = config
            .columns
            .par_for(slot)
            .map(|col| self.window_mean(biomet, &col, closure));
        let area = match config.columns.leaf_area_for(slot) {
            Some(col) => self.window_mean(biomet, &col, closure),
            None => slot.area,
        };
        let geometry = ChamberGeometry { area, area_std: slot.area_std, volume: slot.volume };

        for (species_index, species) in config.species.iter().enumerate() {
            let mut flags = visit_flags;
            let column = species.column();
            let (t, c) = conc.window(column, lagged.close, lagged.open_after).unwrap_or((&[][..], &[][..]));

            let (b0, b1) = lagged.baseline();
            let reference_values = conc.window(column, b0, b1).map_or(&[][..], |(bt, bv)| {
                // baseline window excludes the closure instant itself
                let n = bt.partition_point(|&x| x < b1);
                &bv[..n]
            });
            let baseline = species
                .baseline_correction
                .estimate(reference_values, &config.robust)
                .unwrap_or(f64::NAN);
            let corrected: Vec<f64> = if baseline.is_finite() {
                c.iter().map(|v| v - baseline).collect()
            } else {
                c.to_vec()
            };

            let pair = self.fitter.fit_pair(t, &corrected);
            let selected = pair.select(config.fit.selection);
            match &selected.error {
                None => {},
                Some(FitError::NonConvergence { .. }) => flags |= QualityFlag::FitNonConvergence,
                Some(_) => flags |= QualityFlag::InsufficientData,
            }

            let outliers = if selected.is_valid {
                let scale = median(&corrected.iter().map(|v| v.abs()).collect::<Vec<_>>());
                let floor = 1e-9 * scale.max(1.0);
                count_outliers(&selected.residuals, config.outlier_k, floor)
            } else {
                0
            };
            if outliers > 0 {
                flags |= QualityFlag::OutlierSegment;
            }

            let estimate = self.calc.compute(selected, &geometry, &env, species);
            flags |= estimate.flags;

            if !flags.is_clean() {
                out.events.push(ProcessEvent::Visit(VisitEvent::Flagged {
                    timestamp,
                    chamber: slot.ch_no,
                    species: species.name.clone(),
                    flags,
                }));
            }

            out.rows.push(FluxRecord {
                timestamp,
                timestamp_utc: standard_to_utc(timestamp, config.site.utc_offset),
                cycle_start: cycle.start,
                schedule_id: cycle.schedule.id.clone(),
                chamber_id: slot.ch_no,
                chamber_label: slot.label.clone(),
                species: species.name.clone(),
                species_index,
                flux: estimate.flux,
                se: estimate.se,
                timelag: lag.lag,
                model: selected.kind,
                quality: selected.r2,
                n_points: selected.n,
                outliers,
                baseline,
                temperature: env.temperature,
                pressure: env.pressure,
                flow,
                par,
                flags,
                linear: pair.linear.clone(),
                exponential: pair.exponential.clone(),
            });
        }
    }
}
