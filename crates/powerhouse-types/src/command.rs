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
use std::fmt;

/// A Home Assistant service call targeting a set of entities
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub entity_ids: Vec<String>,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        entity_ids: Vec<String>,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            entity_ids,
        }
    }

    /// `switch.turn_on` for a single entity
    pub fn switch_on(entity_id: impl Into<String>) -> Self {
        Self::new("switch", "turn_on", vec![entity_id.into()])
    }

    /// `switch.turn_off` for a single entity
    pub fn switch_off(entity_id: impl Into<String>) -> Self {
        Self::new("switch", "turn_off", vec![entity_id.into()])
    }
}

impl fmt::Display for ServiceCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} -> {}",
            self.domain,
            self.service,
            self.entity_ids.join(", ")
        )
    }
}
