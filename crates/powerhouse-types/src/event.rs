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

use crate::value::HaValue;

/// A single entity update carried by a subscription event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityUpdate {
    /// Initial value for a newly seen entity
    Addition { entity_id: String, value: HaValue },
    /// Delta for a known entity. `None` means the delta did not touch the state.
    Change {
        entity_id: String,
        value: Option<HaValue>,
    },
}

impl EntityUpdate {
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Addition { entity_id, .. } | Self::Change { entity_id, .. } => entity_id,
        }
    }
}

/// One subscription event: additions first, then changes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateEvent {
    pub updates: Vec<EntityUpdate>,
}

impl StateEvent {
    pub fn new(updates: Vec<EntityUpdate>) -> Self {
        Self { updates }
    }

    /// True when the event carries at least one addition (a bulk baseline
    /// always does after a fresh subscription)
    pub fn has_additions(&self) -> bool {
        self.updates
            .iter()
            .any(|u| matches!(u, EntityUpdate::Addition { .. }))
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}

/// Everything the connection layer hands to the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// Authentication succeeded on a fresh connection; the next addition
    /// event is a full baseline.
    SessionStarted,
    /// Entity additions/changes from the subscription
    State(StateEvent),
    /// Acknowledgement of a previously sent command
    CommandResult {
        id: Option<u64>,
        success: bool,
        error: Option<String>,
    },
}
