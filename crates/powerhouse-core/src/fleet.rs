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

use powerhouse_types::{HaValue, Snapshot, WorldState, coerce_bool};
use rand::Rng;

use crate::actuator::InverterActuator;
use crate::config::{ControlSettings, EntityMap};
use crate::traits::InverterFleet;

// ============= Inverter Unit =============

/// Switch position as last reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    On,
    Off,
    /// Unavailable or missing
    Unknown,
}

impl SwitchState {
    /// Unreadable text and zero read as off, like every other boolean
    fn from_value(value: Option<&HaValue>) -> Self {
        if coerce_bool(value, false) {
            Self::On
        } else if coerce_bool(value, true) {
            Self::Unknown
        } else {
            Self::Off
        }
    }
}

/// Derived, read-only view of one inverter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InverterUnit {
    pub index: usize,
    pub switch: SwitchState,
    /// Reported power; negative while inverting. `None` when not a real number.
    pub output_power: Option<f64>,
}

impl InverterUnit {
    /// Read unit `index` out of a world state
    pub fn read(state: &WorldState, entities: &EntityMap, index: usize) -> Self {
        let switch = SwitchState::from_value(state.get(&entities.inverter_switch(index)));
        let output_power = state
            .get(&entities.inverter_power(index))
            .and_then(HaValue::as_number);
        Self {
            index,
            switch,
            output_power,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.output_power.is_some_and(|p| p < 0.0)
    }

    pub fn is_enabled(&self) -> bool {
        self.switch == SwitchState::On
    }

    /// Definitively off; unknown switches are never treated as off
    pub fn is_off(&self) -> bool {
        self.switch == SwitchState::Off
    }

    /// Enabled but not yet inverting
    pub fn is_idle(&self) -> bool {
        !self.is_generating() && self.is_enabled()
    }

    /// Counts towards the expected inverting power
    pub fn is_active(&self) -> bool {
        self.is_generating() || self.is_enabled()
    }
}

/// Read every unit of the fleet
pub fn read_units(state: &WorldState, entities: &EntityMap, count: usize) -> Vec<InverterUnit> {
    (0..count)
        .map(|index| InverterUnit::read(state, entities, index))
        .collect()
}

// ============= Snapshot Fleet =============

/// [`InverterFleet`] backed by one control snapshot
pub struct SnapshotFleet<'a, R: Rng + ?Sized> {
    snapshot: &'a Snapshot,
    entities: &'a EntityMap,
    settings: &'a ControlSettings,
    actuator: &'a InverterActuator,
    rng: &'a mut R,
    units: Vec<InverterUnit>,
}

impl<'a, R: Rng + ?Sized> SnapshotFleet<'a, R> {
    pub fn new(
        snapshot: &'a Snapshot,
        entities: &'a EntityMap,
        settings: &'a ControlSettings,
        actuator: &'a InverterActuator,
        rng: &'a mut R,
    ) -> Self {
        let units = read_units(snapshot, entities, settings.inverter_count);
        Self {
            snapshot,
            entities,
            settings,
            actuator,
            rng,
            units,
        }
    }

    pub fn units(&self) -> &[InverterUnit] {
        &self.units
    }

    pub fn active_count(&self) -> usize {
        self.units.iter().filter(|u| u.is_active()).count()
    }
}

impl<R: Rng + ?Sized> std::fmt::Debug for SnapshotFleet<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotFleet")
            .field("units", &self.units)
            .finish_non_exhaustive()
    }
}

impl<R: Rng + ?Sized> InverterFleet for SnapshotFleet<'_, R> {
    fn average_solar_generation(&self) -> f64 {
        self.snapshot.number(&self.entities.solar_generation_average)
    }

    fn current_solar_generation(&self) -> f64 {
        self.snapshot.number(&self.entities.solar_generation)
    }

    fn power_per_inverter(&self) -> f64 {
        self.settings.power_per_inverter_w
    }

    fn expected_inverting_power(&self) -> f64 {
        let active = u32::try_from(self.active_count()).unwrap_or(u32::MAX);
        f64::from(active) * self.power_per_inverter()
    }

    fn enable_inverters(&mut self, count: usize) -> usize {
        self.actuator.enable(&self.units, count, &mut *self.rng)
    }

    fn disable_inverters(&mut self, count: usize) -> usize {
        self.actuator.disable(&self.units, count, &mut *self.rng)
    }
}
