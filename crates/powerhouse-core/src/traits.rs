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

//! Seams between the controller and the outside world.
//!
//! The core never talks to Home Assistant directly. Commands leave through a
//! [`CommandSink`] (implemented by the websocket adapter), and the control
//! algorithm sees the plant only through an [`InverterFleet`].

use powerhouse_types::ServiceCall;

use crate::errors::ControlResult;

/// Fire-and-forget outbound command queue
pub trait CommandSink: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    /// Queue a service call. Must not block.
    fn submit(&self, call: ServiceCall) -> ControlResult<()>;
}

/// View of the inverter plant used by the balancing decision
pub trait InverterFleet {
    /// Smoothed solar generation (watts)
    fn average_solar_generation(&self) -> f64;

    /// Instantaneous solar generation (watts)
    fn current_solar_generation(&self) -> f64;

    /// Rated output of one inverter (watts)
    fn power_per_inverter(&self) -> f64;

    /// Units enabled or generating, times the per-unit rating
    fn expected_inverting_power(&self) -> f64;

    /// Turn on up to `count` units that are currently off. Returns how many commands were issued.
    fn enable_inverters(&mut self, count: usize) -> usize;

    /// Turn off up to `count` running units. Returns how many commands were issued.
    fn disable_inverters(&mut self, count: usize) -> usize;
}
