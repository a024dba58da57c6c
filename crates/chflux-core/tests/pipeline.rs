use chflux_core::config::{Chunking, RunConfig};
use chflux_core::constants::{R_GAS, T_0};
use chflux_core::errorcode::QualityFlag;
use chflux_core::flux::{FitKind, FluxRecord};
use chflux_core::processevent::{ProcessEvent, ProgressEvent};
use chflux_core::processor::{Datasets, Processor};
use chflux_core::schedule::{parse_datetime, ScheduleSet};
use chflux_core::timeseries::TimeSeries;

use serde_json::json;

const CYCLE: f64 = 5400.0;
const SLOT: f64 = 900.0;
const LAG: f64 = 12.0;
const CO2_RATES: [f64; 6] = [0.05, -0.02, 0.03, 0.08, -0.01, 0.04];
const CH4_RATES: [f64; 6] = [0.5, 0.2, -0.3, 0.1, 0.7, -0.4];
const AREA: f64 = 0.0625;
const VOLUME: f64 = 0.0125;
const TEMP_C: f64 = 15.0;

fn schedule_json(start: f64, end: f64) -> serde_json::Value {
    let base: Vec<f64> = (0..6).map(|i| SLOT * i as f64).collect();
    let add = |d: f64| base.iter().map(|b| b + d).collect::<Vec<f64>>();
    json!({
        "schedule_start": start,
        "schedule_end": end,
        "n_ch": 6,
        "smpl_cycle_len": CYCLE,
        "n_cycle_per_day": 16,
        "unit_of_time": "s",
        "ch_no": [1, 2, 3, 4, 5, 6],
        "A_ch": vec![AREA; 6],
        "A_ch_std": vec![0.0; 6],
        "V_ch": vec![VOLUME; 6],
        "ch_label": ["SC1", "SC2", "LC3", "SC4", "SC5", "SC6"],
        "is_leaf_chamber": [false, false, true, false, false, false],
        "flowmeter_no": [1, 2, 3, 4, 5, 6],
        "TC_no": [1, 2, 3, 4, 5, 6],
        "PAR_no": [null, null, 1, null, null, null],
        "ch_start": base.clone(),
        "ch_o_b": base.clone(),
        "ch_cls": add(60.0),
        "ch_o_a": add(180.0),
        "ch_end": add(SLOT),
        "ch_atm_a": add(SLOT),
        "optimize_timelag": [false, false, true, false, false, false],
        "timelag_nominal": vec![LAG; 6],
        "timelag_upper_limit": [LAG, LAG, 30.0, LAG, LAG, LAG],
        "timelag_lower_limit": [LAG, LAG, 0.0, LAG, LAG, LAG]
    })
}

fn config() -> RunConfig {
    RunConfig::from_value(&json!({
        "site": {"utc_offset": 2.0, "doy_reference_year": 2024},
        "species": [
            {"name": "co2", "column": "CO2", "unit": 1e-6, "output_unit": 1e-6,
             "multiplier": 1.0, "baseline_correction": "median"},
            {"name": "ch4", "column": "CH4", "unit": 1e-9, "output_unit": 1e-9,
             "multiplier": 1.0}
        ],
        "columns": {"flow": "flow_{}", "par": "PAR_{}"}
    }))
    .unwrap()
}

fn schedules(config: &RunConfig) -> ScheduleSet {
    let text = json!({"winter": schedule_json(0.0, 1.0), "spring": schedule_json(1.0, 2.0)});
    config.load_schedules(&text.to_string()).unwrap()
}

fn origin() -> f64 {
    parse_datetime("2024-01-01 00:00:00").unwrap()
}

/// Flat ambient air, a linear rise over the lagged closure, flat again.
fn conc_at(t: f64, rates: &[f64; 6], ambient: f64) -> f64 {
    let in_cycle = (t - origin()).rem_euclid(CYCLE);
    let slot = ((in_cycle / SLOT).floor() as usize).min(5);
    let o = in_cycle - SLOT * slot as f64 - LAG;
    if (60.0..=180.0).contains(&o) {
        ambient + rates[slot] * (o - 60.0)
    } else {
        ambient
    }
}

fn datasets(days: usize) -> Datasets {
    let n = days * 86_400;
    let t0 = origin();
    let time: Vec<f64> = (0..n).map(|i| t0 + i as f64).collect();
    let co2 = time.iter().map(|&t| conc_at(t, &CO2_RATES, 420.0)).collect();
    let ch4 = time.iter().map(|&t| conc_at(t, &CH4_RATES, 1950.0)).collect();

    let mut biomet = TimeSeries::new(time.clone());
    for k in 1..=6 {
        biomet.columns.insert(format!("T_ch_{}", k), vec![TEMP_C; n]);
        biomet.columns.insert(format!("flow_{}", k), vec![2.0; n]);
    }
    biomet.columns.insert("PAR_1".to_owned(), vec![350.0; n]);

    Datasets {
        concentration: TimeSeries::new(time).with_column("CO2", co2).with_column("CH4", ch4),
        biomet,
    }
}

fn expected_flux(rate: f64) -> f64 {
    rate * 101_325.0 * VOLUME / (R_GAS * (TEMP_C + T_0) * AREA)
}

fn fingerprint(rows: &[FluxRecord]) -> Vec<(u64, u32, usize, u64, u64, u64, u16)> {
    rows.iter()
        .map(|r| {
            (
                r.timestamp.to_bits(),
                r.chamber_id,
                r.species_index,
                r.flux.to_bits(),
                r.se.to_bits(),
                r.timelag.to_bits(),
                r.flags.0,
            )
        })
        .collect()
}

#[test]
fn six_chambers_ninety_minute_cycles() {
    let config = config();
    let schedules = schedules(&config);
    let data = datasets(2);
    let processor = Processor::new(&config, &schedules).unwrap();

    let mut events: Vec<ProcessEvent> = Vec::new();
    let rows = processor.run(&data, &mut events).unwrap();

    // 16 cycles a day, six chambers, two species
    assert_eq!(rows.len(), 2 * 16 * 6 * 2);
    assert!(matches!(events.last(), Some(ProcessEvent::Done(Ok(384)))));

    for cycle in rows.chunks(12) {
        let start = cycle[0].cycle_start;
        assert!(cycle.iter().all(|r| r.cycle_start == start));
        let chambers: Vec<u32> = cycle.iter().map(|r| r.chamber_id).collect();
        assert_eq!(chambers, vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6]);
    }

    for r in &rows {
        let slot = (r.chamber_id - 1) as usize;
        let rate = if r.species == "co2" { CO2_RATES[slot] } else { CH4_RATES[slot] };
        assert!(r.flags.is_clean(), "{}", r);
        assert!((r.quality - 1.0).abs() < 1e-9, "{}", r);
        assert_eq!(r.model, FitKind::Linear);
        assert_eq!(r.timelag, LAG);
        assert_eq!(r.n_points, 121);
        assert_eq!(r.flux.signum(), rate.signum());
        let expected = expected_flux(rate);
        assert!((r.flux - expected).abs() < 1e-9 * expected.abs(), "{} vs {}", r.flux, expected);
        assert_eq!(r.timestamp, r.cycle_start + SLOT * slot as f64 + 60.0);
        assert_eq!(r.temperature, TEMP_C);
        assert_eq!(r.flow, Some(2.0));
    }

    let co2 = rows.iter().find(|r| r.species == "co2").unwrap();
    assert_eq!(co2.baseline, 420.0);
    assert!(rows.iter().find(|r| r.species == "ch4").unwrap().baseline.is_nan());
    assert_eq!(rows[4].par, Some(350.0));
    assert_eq!(rows[0].par, None);

    let first_utc = rows[0].timestamp_utc.unwrap();
    assert_eq!(first_utc.to_rfc3339(), "2023-12-31T22:01:00+00:00");
    assert_eq!(rows[0].schedule_id, "winter");
    assert_eq!(rows.last().unwrap().schedule_id, "spring");
}

#[test]
fn chunking_does_not_change_results() {
    let config = config();
    let schedules = schedules(&config);
    let data = datasets(2);
    let processor = Processor::new(&config, &schedules).unwrap();

    let whole = processor.run_chunked(&data, Chunking::Disabled, &mut Vec::<ProcessEvent>::new());
    let whole = fingerprint(&whole.unwrap());

    let mut events: Vec<ProcessEvent> = Vec::new();
    let daily = processor.run_chunked(&data, Chunking::Daily, &mut events).unwrap();
    assert_eq!(fingerprint(&daily), whole);
    let chunks = events
        .iter()
        .filter(|e| matches!(e, ProcessEvent::Progress(ProgressEvent::ChunkDone { .. })))
        .count();
    assert_eq!(chunks, 2);

    // chunk edges that fall in the middle of cycles
    let odd = processor
        .run_chunked(&data, Chunking::Seconds(3.0 * CYCLE + 1234.5), &mut Vec::<ProcessEvent>::new())
        .unwrap();
    assert_eq!(fingerprint(&odd), whole);
}

#[test]
fn parallel_matches_sequential() {
    let mut config = config();
    config.chunking = Chunking::Seconds(4.0 * CYCLE);
    let schedules = schedules(&config);
    let data = datasets(2);
    let processor = Processor::new(&config, &schedules).unwrap();

    let seq = processor.run(&data, &mut Vec::<ProcessEvent>::new()).unwrap();
    let mut events: Vec<ProcessEvent> = Vec::new();
    let par = processor.run_parallel(&data, &mut events).unwrap();
    assert_eq!(fingerprint(&par), fingerprint(&seq));
    assert!(matches!(events.last(), Some(ProcessEvent::Done(Ok(_)))));
}

#[test]
fn spike_in_closure_is_flagged() {
    let config = config();
    let schedules = schedules(&config);
    let mut data = datasets(1);
    // chamber 4 of the first cycle, in the middle of its lagged closure
    let idx = (3.0 * SLOT + LAG + 120.0) as usize;
    data.concentration.columns.get_mut("CO2").unwrap()[idx] += 50.0;

    let rows = Processor::new(&config, &schedules).unwrap().run(&data, &mut Vec::<ProcessEvent>::new());
    let rows = rows.unwrap();
    let hit = rows.iter().find(|r| r.chamber_id == 4 && r.species == "co2").unwrap();
    assert!(hit.flags.contains(QualityFlag::OutlierSegment));
    assert!(hit.outliers >= 1);
    let clean = rows.iter().find(|r| r.chamber_id == 4 && r.species == "ch4").unwrap();
    assert!(clean.flags.is_clean());
}

#[test]
fn doy_schedules_roll_over_the_year() {
    let config = RunConfig::from_value(&json!({
        "site": {"doy_reference_year": 2023},
        "species": [{"name": "co2", "unit": 1e-6, "output_unit": 1e-6, "multiplier": 1.0}]
    }))
    .unwrap();
    let text = json!({"late": schedule_json(360.0, 365.0), "early": schedule_json(365.0, 370.0)});
    let set = config.load_schedules(&text.to_string()).unwrap();

    let new_year = parse_datetime("2024-01-02 12:00:00").unwrap();
    assert_eq!(set.resolve(new_year).unwrap().id, "early");
    let old_year = parse_datetime("2023-12-30 12:00:00").unwrap();
    assert_eq!(set.resolve(old_year).unwrap().id, "late");
    let names: Vec<&str> = set.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(names, vec!["late", "early"]);
}
