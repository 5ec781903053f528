// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Powerhouse.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder in inverter entity patterns, replaced by the 1-based inverter number
pub const INVERTER_NUMBER_PLACEHOLDER: &str = "{}";

// ============= Entity Map =============

/// Home Assistant entity ids the controller reads and writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntityMap {
    /// When this boolean is on, the controller never issues commands
    pub manual_override: String,
    pub solar_generation: String,
    /// Smoothed solar generation used for decisions
    pub solar_generation_average: String,
    pub load: String,
    pub load_average: String,
    pub charger_state: String,
    pub charger_voltage: String,
    /// e.g. `switch.powerhouse_inverter_{}_switch_0`
    pub inverter_switch_pattern: String,
    /// e.g. `sensor.powerhouse_inverter_{}_switch_0_power`
    pub inverter_power_pattern: String,
}

impl Default for EntityMap {
    fn default() -> Self {
        Self {
            manual_override: "input_boolean.powerhouse_control_manual".to_owned(),
            solar_generation: "sensor.powerhouse_solar_charger_solar_power".to_owned(),
            solar_generation_average: "sensor.powerhouse_solar_charger_solar_power_average"
                .to_owned(),
            load: "sensor.powerwall_load_now".to_owned(),
            load_average: "sensor.powerwall_load_now_average".to_owned(),
            charger_state: "sensor.powerhouse_solar_charger_charge_state".to_owned(),
            charger_voltage: "sensor.powerhouse_solar_charger_battery_voltage".to_owned(),
            inverter_switch_pattern: "switch.powerhouse_inverter_{}_switch_0".to_owned(),
            inverter_power_pattern: "sensor.powerhouse_inverter_{}_switch_0_power".to_owned(),
        }
    }
}

impl EntityMap {
    /// Switch entity of the inverter with ordinal `index` (0-based)
    pub fn inverter_switch(&self, index: usize) -> String {
        expand_pattern(&self.inverter_switch_pattern, index)
    }

    /// Power sensor of the inverter with ordinal `index` (0-based)
    pub fn inverter_power(&self, index: usize) -> String {
        expand_pattern(&self.inverter_power_pattern, index)
    }

    /// All entities the controller subscribes to
    pub fn subscriptions(&self, inverter_count: usize) -> Vec<String> {
        let mut ids = vec![
            self.manual_override.clone(),
            self.solar_generation_average.clone(),
            self.solar_generation.clone(),
            self.load.clone(),
            self.charger_state.clone(),
            self.charger_voltage.clone(),
        ];
        for index in 0..inverter_count {
            ids.push(self.inverter_switch(index));
            ids.push(self.inverter_power(index));
        }
        ids
    }
}

fn expand_pattern(pattern: &str, index: usize) -> String {
    pattern.replacen(INVERTER_NUMBER_PLACEHOLDER, &(index + 1).to_string(), 1)
}

// ============= Control Settings =============

/// Tuning of the hysteresis controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlSettings {
    pub inverter_count: usize,
    /// Rated output of a single inverter (watts)
    pub power_per_inverter_w: f64,
    /// Enable one more unit when `expected + enable_margin * per_unit < generation`
    pub enable_margin: f64,
    /// Disable one unit when `expected - disable_margin * per_unit > generation`
    pub disable_margin: f64,
    /// Pause after every evaluation
    pub cooldown: Duration,
}

impl Default for ControlSettings {
    fn default() -> Self {
        Self {
            inverter_count: 9,
            power_per_inverter_w: 250.0,
            enable_margin: 1.5,
            disable_margin: 0.5,
            cooldown: Duration::from_secs(5),
        }
    }
}

// ============= Moving Averages =============

/// One moving average: `output` receives the mean of `input` over `window`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AverageSpec {
    pub input: String,
    pub output: String,
    pub window: Duration,
}

impl AverageSpec {
    pub fn new(input: impl Into<String>, output: impl Into<String>, window: Duration) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            window,
        }
    }

    /// Default averages for the given entity map
    pub fn defaults(entities: &EntityMap) -> Vec<Self> {
        vec![
            Self::new(
                entities.load.clone(),
                entities.load_average.clone(),
                Duration::from_secs(60),
            ),
            Self::new(
                entities.solar_generation.clone(),
                entities.solar_generation_average.clone(),
                Duration::from_secs(15 * 60),
            ),
            Self::new(
                entities.charger_voltage.clone(),
                format!("{}_1", entities.charger_voltage),
                Duration::from_secs(60),
            ),
        ]
    }
}

// ============= Controller Config =============

/// Everything the core needs at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    pub entities: EntityMap,
    pub control: ControlSettings,
    pub averages: Vec<AverageSpec>,
    /// Log commands instead of sending them
    pub dry_run: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let entities = EntityMap::default();
        let averages = AverageSpec::defaults(&entities);
        Self {
            entities,
            control: ControlSettings::default(),
            averages,
            dry_run: false,
        }
    }
}

impl ControllerConfig {
    pub fn subscriptions(&self) -> Vec<String> {
        self.entities.subscriptions(self.control.inverter_count)
    }

    /// Output keys of all averages; these are derived locally, not reported upstream
    pub fn derived_keys(&self) -> Vec<String> {
        self.averages.iter().map(|a| a.output.clone()).collect()
    }
}
