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

pub mod command;
pub mod event;
pub mod state;
pub mod value;

pub use command::ServiceCall;
pub use event::{EntityUpdate, StateEvent, TelemetryEvent};
pub use state::{Snapshot, WorldState};
pub use value::{HaValue, MISSING, UNAVAILABLE, UNPARSEABLE, coerce_bool, coerce_f64, coerce_i64};
