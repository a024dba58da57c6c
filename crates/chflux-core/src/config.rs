use crate::constants::ATM;
use crate::error::ConfigError;
use crate::flux::{FitOptions, FitSelection};
use crate::schedule::{ChamberSlot, FinalEnd, ScheduleSet};
use crate::species::SpeciesConfig;
use crate::stats::RobustOptions;
use crate::types::Seconds;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use std::collections::HashSet;

/* =================== Configuration types =================== */

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SiteConfig {
    /// Fallback air pressure, Pa, used when no pressure column is mapped.
    pub pressure: f64,
    /// Hours east of UTC of the site's standard time. No DST.
    pub utc_offset: f64,
    /// Year that day-of-year schedule bounds count from.
    pub doy_reference_year: i32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { pressure: ATM, utc_offset: 0.0, doy_reference_year: 1970 }
    }
}

/// Biomet column names. `{}` in a template is replaced by the sensor number
/// a chamber slot carries (`TC_no`, `flowmeter_no`, `PAR_no`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ColumnMap {
    pub temperature: String,
    /// Used for chambers without a thermocouple.
    pub ambient_temperature: Option<String>,
    pub pressure: Option<String>,
    pub flow: Option<String>,
    pub par: Option<String>,
    /// Time-varying leaf area, m², for leaf chambers. Filled with `ch_no`.
    pub leaf_area: Option<String>,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            temperature: "T_ch_{}".to_owned(),
            ambient_temperature: None,
            pressure: None,
            flow: None,
            par: None,
            leaf_area: None,
        }
    }
}

fn fill(template: &str, n: u32) -> String {
    template.replace("{}", &n.to_string())
}

impl ColumnMap {
    pub fn temperature_for(&self, slot: &ChamberSlot) -> Option<String> {
        match slot.tc_no {
            Some(n) => Some(fill(&self.temperature, n)),
            None => self.ambient_temperature.clone(),
        }
    }

    pub fn flow_for(&self, slot: &ChamberSlot) -> Option<String> {
        Some(fill(self.flow.as_deref()?, slot.flowmeter_no?))
    }

    pub fn par_for(&self, slot: &ChamberSlot) -> Option<String> {
        Some(fill(self.par.as_deref()?, slot.par_no?))
    }

    /// Leaf chambers read their area from this column instead of `A_ch`.
    pub fn leaf_area_for(&self, slot: &ChamberSlot) -> Option<String> {
        if !slot.is_leaf {
            return None;
        }
        Some(fill(self.leaf_area.as_deref()?, slot.ch_no))
    }

    /// Every biomet column the slots of `schedules` will read.
    pub fn required(&self, schedules: &ScheduleSet) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |name: Option<String>| {
            if let Some(n) = name {
                if seen.insert(n.clone()) {
                    out.push(n);
                }
            }
        };
        push(self.pressure.clone());
        for slot in schedules.iter().flat_map(|s| s.slots.iter()) {
            push(self.temperature_for(slot));
            push(self.flow_for(slot));
            push(self.par_for(slot));
            push(self.leaf_area_for(slot));
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TimelagOptions {
    /// Species whose series drives the lag search; the first configured
    /// species when unset. The lag found applies to every species.
    pub reference_species: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chunking {
    #[default]
    Disabled,
    /// Calendar days on the standard-time clock.
    Daily,
    Seconds(Seconds),
}

/// What to do with data no schedule covers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnscheduledPolicy {
    #[default]
    Skip,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct RunConfig {
    pub site: SiteConfig,
    pub species: Vec<SpeciesConfig>,
    pub columns: ColumnMap,
    pub fit: FitOptions,
    pub timelag: TimelagOptions,
    pub robust: RobustOptions,
    pub chunking: Chunking,
    pub unscheduled: UnscheduledPolicy,
    pub final_end: FinalEnd,
    pub propagate_area_uncertainty: bool,
    /// Tukey fence multiplier for the residual outlier screen.
    pub outlier_k: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            species: Vec::new(),
            columns: ColumnMap::default(),
            fit: FitOptions::default(),
            timelag: TimelagOptions::default(),
            robust: RobustOptions::default(),
            chunking: Chunking::default(),
            unscheduled: UnscheduledPolicy::default(),
            final_end: FinalEnd::default(),
            propagate_area_uncertainty: false,
            outlier_k: 3.0,
        }
    }
}

/* =================== Loading =================== */

/// Recursively overlays `overrides` onto `base`. Objects merge key by key,
/// anything else replaces the base value.
pub fn merge_json(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(k) {
                    Some(existing) => merge_json(existing, v),
                    None => {
                        b.insert(k.clone(), v.clone());
                    },
                }
            }
        },
        (b, o) => *b = o.clone(),
    }
}

impl RunConfig {
    /// Defaults overlaid with `text`, then validated. Unknown keys are
    /// rejected at any depth.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let overrides: Value = serde_json::from_str(text)?;
        Self::from_value(&overrides)
    }

    pub fn from_value(overrides: &Value) -> Result<Self, ConfigError> {
        if !overrides.is_object() {
            return Err(ConfigError::Msg("configuration must be a JSON object".to_owned()));
        }
        let mut merged = serde_json::to_value(RunConfig::default())?;
        merge_json(&mut merged, overrides);
        let config: RunConfig = serde_json::from_value(merged)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_schedules(&self, text: &str) -> Result<ScheduleSet, ConfigError> {
        ScheduleSet::from_json(text, self.site.doy_reference_year, self.final_end)
    }

    /// Index of the species the lag search runs on.
    pub fn reference_species(&self) -> usize {
        self.timelag
            .reference_species
            .as_deref()
            .and_then(|name| self.species.iter().position(|s| s.name == name))
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let msg = |s: String| -> Result<(), ConfigError> { Err(ConfigError::Msg(s)) };

        if self.species.is_empty() {
            return msg("at least one species must be configured".to_owned());
        }
        let mut names = HashSet::new();
        for species in &self.species {
            if !names.insert(species.name.as_str()) {
                return msg(format!("species {} is configured twice", species.name));
            }
            species.validate()?;
        }
        if let Some(name) = &self.timelag.reference_species {
            if !names.contains(name.as_str()) {
                return msg(format!("time lag reference species {} is not configured", name));
            }
        }

        if !(self.site.pressure.is_finite() && self.site.pressure > 0.0) {
            return msg(format!("site pressure {} Pa must be positive", self.site.pressure));
        }
        if !(self.site.utc_offset.is_finite() && self.site.utc_offset.abs() <= 24.0) {
            return msg(format!("utc offset {} h is out of range", self.site.utc_offset));
        }
        if let Chunking::Seconds(n) = self.chunking {
            if !(n.is_finite() && n > 0.0) {
                return msg(format!("chunk length {} s must be positive", n));
            }
        }
        if self.fit.max_iter == 0 {
            return msg("fit.max_iter must be at least 1".to_owned());
        }
        if let FitSelection::PreferNonlinear { margin } = self.fit.selection {
            if !margin.is_finite() {
                return msg("fit selection margin must be finite".to_owned());
            }
        }
        if !(self.robust.n_sigma.is_finite() && self.robust.n_sigma > 0.0) {
            return msg(format!("robust.n_sigma {} must be positive", self.robust.n_sigma));
        }
        if !(self.outlier_k.is_finite() && self.outlier_k > 0.0) {
            return msg(format!("outlier_k {} must be positive", self.outlier_k));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::definition::tests::six_chamber_raw;
    use crate::schedule::ScheduleDefinition;
    use serde_json::json;

    const MINIMAL: &str = r#"{
        "species": [{"name": "co2", "unit": 1e-6, "output_unit": 1e-6, "multiplier": 1.0}]
    }"#;

    #[test]
    fn test_defaults_survive_merge() {
        let cfg = RunConfig::from_json(MINIMAL).unwrap();
        assert_eq!(cfg.site.pressure, ATM);
        assert_eq!(cfg.fit.min_points, 3);
        assert_eq!(cfg.chunking, Chunking::Disabled);
        assert_eq!(cfg.unscheduled, UnscheduledPolicy::Skip);
        assert!(!cfg.propagate_area_uncertainty);
    }

    #[test]
    fn test_nested_override() {
        let cfg = RunConfig::from_json(
            r#"{
            "species": [{"name": "co2", "unit": 1e-6, "output_unit": 1e-6, "multiplier": 1.0}],
            "site": {"utc_offset": 2},
            "fit": {"selection": "linear"},
            "chunking": {"seconds": 3600},
            "unscheduled": "fail"
        }"#,
        )
        .unwrap();
        assert_eq!(cfg.site.utc_offset, 2.0);
        assert_eq!(cfg.site.pressure, ATM);
        assert_eq!(cfg.fit.selection, FitSelection::Linear);
        assert_eq!(cfg.fit.max_iter, 200);
        assert_eq!(cfg.chunking, Chunking::Seconds(3600.0));
        assert_eq!(cfg.unscheduled, UnscheduledPolicy::Fail);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let top = json!({"species": [], "colour": "red"});
        assert!(matches!(RunConfig::from_value(&top), Err(ConfigError::Json(_))));

        let nested = json!({
            "species": [{"name": "co2", "unit": 1e-6, "output_unit": 1e-6, "multiplier": 1.0}],
            "site": {"altitude": 100}
        });
        assert!(matches!(RunConfig::from_value(&nested), Err(ConfigError::Json(_))));
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(RunConfig::from_json("{}"), Err(ConfigError::Msg(_))));
        assert!(RunConfig::from_json("[1, 2]").is_err());

        let missing = r#"{"species": [{"name": "n2o", "unit": 1e-9, "output_unit": 1e-9}]}"#;
        assert!(matches!(
            RunConfig::from_json(missing),
            Err(ConfigError::MissingMultiplier { .. })
        ));

        let bad_chunk = json!({
            "species": [{"name": "co2", "unit": 1e-6, "output_unit": 1e-6, "multiplier": 1.0}],
            "chunking": {"seconds": -1}
        });
        assert!(RunConfig::from_value(&bad_chunk).is_err());

        let bad_ref = json!({
            "species": [{"name": "co2", "unit": 1e-6, "output_unit": 1e-6, "multiplier": 1.0}],
            "timelag": {"reference_species": "ch4"}
        });
        assert!(RunConfig::from_value(&bad_ref).is_err());
    }

    #[test]
    fn test_merge_json() {
        let mut base = json!({"a": {"b": 1, "c": [1, 2]}, "d": "x"});
        merge_json(&mut base, &json!({"a": {"c": [3]}, "e": true}));
        assert_eq!(base, json!({"a": {"b": 1, "c": [3]}, "d": "x", "e": true}));
    }

    #[test]
    fn test_column_templates() {
        let def = ScheduleDefinition::from_raw("s", &six_chamber_raw(0.0, 1.0), 2024).unwrap();
        let set = ScheduleSet::new(vec![def], FinalEnd::Exclusive).unwrap();
        let columns = ColumnMap {
            flow: Some("F{}".to_owned()),
            pressure: Some("P_air".to_owned()),
            ..ColumnMap::default()
        };
        let slot = &set.iter().next().unwrap().slots[1];
        assert_eq!(columns.temperature_for(slot).as_deref(), Some("T_ch_2"));
        assert_eq!(columns.flow_for(slot).as_deref(), Some("F2"));
        assert_eq!(columns.par_for(slot), None);

        let required = columns.required(&set);
        assert_eq!(required.len(), 13);
        assert_eq!(required[0], "P_air");
    }
}
