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

//! Deadband controller matching the number of running inverters to the
//! smoothed solar generation.
//!
//! At most one unit is toggled per evaluation. After every evaluation the
//! loop cools down for a fixed window during which incoming snapshots are
//! drained without being looked at.

use powerhouse_types::Snapshot;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::actuator::InverterActuator;
use crate::config::{ControlSettings, ControllerConfig, EntityMap};
use crate::fleet::SnapshotFleet;
use crate::traits::{CommandSink, InverterFleet};

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Enable,
    Disable,
    Hold,
}

/// Deadband width in multiples of one inverter's rated power
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub enable_margin: f64,
    pub disable_margin: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            enable_margin: 1.5,
            disable_margin: 0.5,
        }
    }
}

impl From<&ControlSettings> for Thresholds {
    fn from(settings: &ControlSettings) -> Self {
        Self {
            enable_margin: settings.enable_margin,
            disable_margin: settings.disable_margin,
        }
    }
}

/// Pure decision: enable when generation exceeds the running capacity by
/// more than `enable_margin` units, disable when it falls short by more than
/// `disable_margin` units.
pub fn decide(generation: f64, expected: f64, per_unit: f64, thresholds: Thresholds) -> Decision {
    if expected + thresholds.enable_margin * per_unit < generation {
        Decision::Enable
    } else if expected - thresholds.disable_margin * per_unit > generation {
        Decision::Disable
    } else {
        Decision::Hold
    }
}

/// Evaluate the fleet once and toggle at most one unit
pub fn balance<F: InverterFleet + ?Sized>(fleet: &mut F, thresholds: Thresholds) -> Decision {
    let generation = fleet.average_solar_generation();
    let expected = fleet.expected_inverting_power();
    let per_unit = fleet.power_per_inverter();
    let decision = decide(generation, expected, per_unit, thresholds);

    match decision {
        Decision::Enable => {
            info!(
                "☀️ [CONTROL] Generation {:.0} W above capacity {:.0} W, enabling one inverter",
                generation, expected
            );
            fleet.enable_inverters(1);
        }
        Decision::Disable => {
            info!(
                "🌥️ [CONTROL] Generation {:.0} W below capacity {:.0} W, disabling one inverter",
                generation, expected
            );
            fleet.disable_inverters(1);
        }
        Decision::Hold => debug!(
            "[CONTROL] Holding: generation {:.0} W (now {:.0} W), capacity {:.0} W",
            generation,
            fleet.current_solar_generation(),
            expected
        ),
    }
    decision
}

// ============= Control Loop =============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    /// Waiting for the next snapshot
    Idle,
    Evaluating,
    /// Post-decision pause, snapshots are discarded
    Cooling,
}

#[derive(Debug)]
pub struct ControlLoop {
    settings: ControlSettings,
    entities: EntityMap,
    actuator: InverterActuator,
    rng: StdRng,
    state: ControlState,
}

impl ControlLoop {
    pub fn new(config: &ControllerConfig, sink: Arc<dyn CommandSink>) -> Self {
        Self {
            settings: config.control.clone(),
            entities: config.entities.clone(),
            actuator: InverterActuator::new(sink, config.entities.clone()),
            rng: StdRng::from_entropy(),
            state: ControlState::Idle,
        }
    }

    /// Replace the selection RNG (deterministic tests)
    #[must_use]
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    /// Run one evaluation against `snapshot`. Returns `None` without touching
    /// the fleet while manual control is switched on.
    pub fn evaluate(&mut self, snapshot: &Snapshot) -> Option<Decision> {
        if snapshot.flag(&self.entities.manual_override, false) {
            debug!("✋ [CONTROL] Manual control active, skipping evaluation");
            return None;
        }

        self.set_state(ControlState::Evaluating);
        let thresholds = Thresholds::from(&self.settings);
        let mut fleet = SnapshotFleet::new(
            snapshot,
            &self.entities,
            &self.settings,
            &self.actuator,
            &mut self.rng,
        );
        Some(balance(&mut fleet, thresholds))
    }

    /// Consume snapshots until cancelled or the queue closes. Starts with
    /// one cool-down window so the first decision sees settled averages.
    pub async fn run(mut self, mut snapshots: mpsc::Receiver<Snapshot>, cancel: CancellationToken) {
        info!(
            "🎛️ [CONTROL] Starting: {} inverters x {} W, cool-down {:?}",
            self.settings.inverter_count, self.settings.power_per_inverter_w, self.settings.cooldown
        );

        if self.cool_down(&mut snapshots, &cancel).await {
            loop {
                self.set_state(ControlState::Idle);
                let snapshot = tokio::select! {
                    () = cancel.cancelled() => break,
                    snapshot = snapshots.recv() => match snapshot {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };

                if self.evaluate(&snapshot).is_none() {
                    continue;
                }
                if !self.cool_down(&mut snapshots, &cancel).await {
                    break;
                }
            }
        }
        info!("🛑 [CONTROL] Stopped");
    }

    /// Drain snapshots for one cool-down window. Returns false when the loop
    /// should stop instead.
    async fn cool_down(
        &mut self,
        snapshots: &mut mpsc::Receiver<Snapshot>,
        cancel: &CancellationToken,
    ) -> bool {
        self.set_state(ControlState::Cooling);
        let sleep = tokio::time::sleep(self.settings.cooldown);
        tokio::pin!(sleep);

        let mut drained = 0usize;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return false,
                () = &mut sleep => {
                    trace!("[CONTROL] Cool-down over, discarded {} snapshots", drained);
                    return true;
                }
                snapshot = snapshots.recv() => {
                    if snapshot.is_none() {
                        return false;
                    }
                    drained += 1;
                }
            }
        }
    }

    fn set_state(&mut self, state: ControlState) {
        if self.state != state {
            trace!("[CONTROL] {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }
}
