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

//! Powerhouse control core.
//!
//! Owns the world state, derives moving averages from it and runs the
//! inverter balancing loop. Everything talks through tokio channels; the
//! Home Assistant connection lives in `powerhouse-adapters`.

pub mod actuator;
pub mod averages;
pub mod config;
pub mod control;
pub mod debug;
pub mod errors;
pub mod fleet;
pub mod synchronizer;
pub mod traits;

#[cfg(test)]
mod test_support;

pub use actuator::{InverterActuator, select_for_disable, select_for_enable};
pub use averages::{AverageEngine, AverageSeries, AverageUpdate};
pub use config::{AverageSpec, ControlSettings, ControllerConfig, EntityMap};
pub use control::{ControlLoop, ControlState, Decision, Thresholds, balance, decide};
pub use debug::DryRunSink;
pub use errors::{ControlError, ControlResult};
pub use fleet::{InverterUnit, SnapshotFleet, SwitchState, read_units};
pub use synchronizer::{Dispatcher, StateSynchronizer};
pub use traits::{CommandSink, InverterFleet};
