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

//! Which inverters to toggle once the controller has decided how many.
//!
//! Selection is uniformly random so wear spreads across the whole fleet
//! instead of cycling the same few units.

use powerhouse_types::ServiceCall;
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::EntityMap;
use crate::fleet::InverterUnit;
use crate::traits::CommandSink;

/// Pick up to `count` distinct units that are definitively off
pub fn select_for_enable<R: Rng + ?Sized>(
    units: &[InverterUnit],
    count: usize,
    rng: &mut R,
) -> Vec<usize> {
    let candidates: Vec<usize> = units
        .iter()
        .filter(|u| u.is_off())
        .map(|u| u.index)
        .collect();
    candidates.choose_multiple(rng, count).copied().collect()
}

/// Pick up to `count` distinct running units, idle ones before generating ones
pub fn select_for_disable<R: Rng + ?Sized>(
    units: &[InverterUnit],
    count: usize,
    rng: &mut R,
) -> Vec<usize> {
    let (mut generating, mut idle): (Vec<usize>, Vec<usize>) = (Vec::new(), Vec::new());
    for unit in units {
        if unit.is_generating() {
            generating.push(unit.index);
        } else if unit.is_enabled() {
            idle.push(unit.index);
        }
    }

    idle.shuffle(rng);
    generating.shuffle(rng);
    idle.into_iter().chain(generating).take(count).collect()
}

/// Issues switch commands for the units chosen by the selection policy
#[derive(Clone)]
pub struct InverterActuator {
    sink: Arc<dyn CommandSink>,
    entities: EntityMap,
}

impl std::fmt::Debug for InverterActuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InverterActuator")
            .field("sink", &self.sink.name())
            .finish_non_exhaustive()
    }
}

impl InverterActuator {
    pub fn new(sink: Arc<dyn CommandSink>, entities: EntityMap) -> Self {
        Self { sink, entities }
    }

    /// Turn on up to `count` units. Returns the number of commands queued.
    pub fn enable<R: Rng + ?Sized>(
        &self,
        units: &[InverterUnit],
        count: usize,
        rng: &mut R,
    ) -> usize {
        let chosen = select_for_enable(units, count, rng);
        if chosen.len() < count {
            warn!(
                "⚠️ [ACTUATOR] Asked to enable {} inverters, only {} are off",
                count,
                chosen.len()
            );
        }
        let mut issued = 0;
        for index in chosen {
            info!("⚡ [ACTUATOR] Enable inverter {}", index + 1);
            if self.issue(ServiceCall::switch_on(self.entities.inverter_switch(index))) {
                issued += 1;
            }
        }
        issued
    }

    /// Turn off up to `count` units. Returns the number of commands queued.
    pub fn disable<R: Rng + ?Sized>(
        &self,
        units: &[InverterUnit],
        count: usize,
        rng: &mut R,
    ) -> usize {
        let mut issued = 0;
        for index in select_for_disable(units, count, rng) {
            info!("🔻 [ACTUATOR] Disable inverter {}", index + 1);
            if self.issue(ServiceCall::switch_off(self.entities.inverter_switch(index))) {
                issued += 1;
            }
        }
        issued
    }

    fn issue(&self, call: ServiceCall) -> bool {
        match self.sink.submit(call) {
            Ok(()) => true,
            Err(e) => {
                warn!("❌ [ACTUATOR] {} rejected command: {}", self.sink.name(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::SwitchState;
    use crate::test_support::RecordingSink;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;

    fn unit(index: usize, switch: SwitchState, power: Option<f64>) -> InverterUnit {
        InverterUnit {
            index,
            switch,
            output_power: power,
        }
    }

    fn generating(index: usize) -> InverterUnit {
        unit(index, SwitchState::On, Some(-200.0))
    }

    fn idle(index: usize) -> InverterUnit {
        unit(index, SwitchState::On, Some(0.0))
    }

    fn off(index: usize) -> InverterUnit {
        unit(index, SwitchState::Off, Some(0.0))
    }

    #[test]
    fn test_enable_only_picks_units_that_are_off() {
        let units = vec![idle(0), off(1), generating(2), off(3), unit(4, SwitchState::Unknown, None)];
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let chosen = select_for_enable(&units, 1, &mut rng);
            assert_eq!(chosen.len(), 1);
            assert!(chosen[0] == 1 || chosen[0] == 3);
        }
    }

    #[test]
    fn test_enable_without_replacement() {
        let units = vec![off(0), off(1), off(2)];
        let mut rng = StdRng::seed_from_u64(1);

        let chosen = select_for_enable(&units, 3, &mut rng);
        let distinct: HashSet<_> = chosen.iter().collect();
        assert_eq!(distinct.len(), 3);
    }

    #[test]
    fn test_enable_under_supply_issues_fewer() {
        let units = vec![off(0), idle(1)];
        let mut rng = StdRng::seed_from_u64(3);

        assert_eq!(select_for_enable(&units, 4, &mut rng), vec![0]);
    }

    #[test]
    fn test_disable_prefers_idle_units() {
        let units = vec![generating(0), idle(1), generating(2), idle(3), off(4)];
        let mut rng = StdRng::seed_from_u64(11);

        for _ in 0..50 {
            let chosen: HashSet<_> = select_for_disable(&units, 2, &mut rng).into_iter().collect();
            assert_eq!(chosen, HashSet::from([1, 3]));
        }
    }

    #[test]
    fn test_disable_falls_back_to_generating_units() {
        let units = vec![generating(0), generating(1), generating(2), off(3)];
        let mut rng = StdRng::seed_from_u64(5);

        for _ in 0..50 {
            let chosen = select_for_disable(&units, 2, &mut rng);
            assert_eq!(chosen.len(), 2);
            assert_ne!(chosen[0], chosen[1]);
            assert!(chosen.iter().all(|i| [0, 1, 2].contains(i)));
        }
    }

    #[test]
    fn test_disable_exhausts_idle_then_generating() {
        let units = vec![generating(0), idle(1)];
        let mut rng = StdRng::seed_from_u64(9);

        let chosen = select_for_disable(&units, 5, &mut rng);
        assert_eq!(chosen, vec![1, 0]);
    }

    #[test]
    fn test_disable_spreads_choices_across_fleet() {
        let units: Vec<_> = (0..6).map(idle).collect();
        let mut rng = StdRng::seed_from_u64(42);

        let seen: HashSet<_> = (0..200)
            .flat_map(|_| select_for_disable(&units, 1, &mut rng))
            .collect();
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_actuator_issues_switch_commands() {
        let sink = Arc::new(RecordingSink::default());
        let actuator = InverterActuator::new(sink.clone(), EntityMap::default());
        let units = vec![off(0), idle(1)];
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(actuator.enable(&units, 1, &mut rng), 1);
        assert_eq!(actuator.disable(&units, 1, &mut rng), 1);

        let calls = sink.calls();
        assert_eq!(
            calls,
            vec![
                ServiceCall::switch_on("switch.powerhouse_inverter_1_switch_0"),
                ServiceCall::switch_off("switch.powerhouse_inverter_2_switch_0"),
            ]
        );
    }

    #[test]
    fn test_actuator_counts_only_accepted_commands() {
        let sink = Arc::new(RecordingSink::rejecting());
        let actuator = InverterActuator::new(sink, EntityMap::default());
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(actuator.enable(&[off(0), off(1)], 2, &mut rng), 0);
    }
}
