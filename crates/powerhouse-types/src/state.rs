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

use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;

use crate::event::{EntityUpdate, StateEvent};
use crate::value::{HaValue, coerce_bool, coerce_f64};

/// Authoritative entity id -> last known value map.
///
/// Owned by exactly one task. Everyone else reads [`Snapshot`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorldState {
    entities: BTreeMap<String, HaValue>,
    revision: u64,
}

impl WorldState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity_id: &str) -> Option<&HaValue> {
        self.entities.get(entity_id)
    }

    pub fn contains(&self, entity_id: &str) -> bool {
        self.entities.contains_key(entity_id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HaValue)> {
        self.entities.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of mutations applied so far
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Numeric view of an entity (see [`coerce_f64`] for sentinels)
    pub fn number(&self, entity_id: &str) -> f64 {
        coerce_f64(self.get(entity_id))
    }

    /// Boolean view of an entity (see [`coerce_bool`])
    pub fn flag(&self, entity_id: &str, when_unavailable: bool) -> bool {
        coerce_bool(self.get(entity_id), when_unavailable)
    }

    /// Last-write-wins insert of a single value
    pub fn set(&mut self, entity_id: impl Into<String>, value: HaValue) {
        self.entities.insert(entity_id.into(), value);
        self.revision += 1;
    }

    /// Fold an event into the map. Additions overwrite, changes without a new
    /// value are no-ops. Returns the number of keys written.
    pub fn apply(&mut self, event: &StateEvent) -> usize {
        let mut written = 0;
        for update in &event.updates {
            match update {
                EntityUpdate::Addition { entity_id, value }
                | EntityUpdate::Change {
                    entity_id,
                    value: Some(value),
                } => {
                    self.entities.insert(entity_id.clone(), value.clone());
                    written += 1;
                }
                EntityUpdate::Change { value: None, .. } => {}
            }
        }
        if written > 0 {
            self.revision += 1;
        }
        written
    }

    /// Replace the upstream part of the map with a fresh baseline.
    ///
    /// Keys for which `retain` returns true survive; every other key not
    /// present in `event` is dropped.
    pub fn rebuild(&mut self, event: &StateEvent, retain: impl Fn(&str) -> bool) -> usize {
        let before = self.entities.len();
        self.entities.retain(|k, _| retain(k));
        let dropped = before - self.entities.len();
        let written = self.apply(event);
        if written == 0 && dropped > 0 {
            self.revision += 1;
        }
        written
    }

    /// Independent, immutable copy of the current map
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            state: Arc::new(self.clone()),
        }
    }
}

/// Immutable point-in-time copy of a [`WorldState`]
#[derive(Debug, Clone)]
pub struct Snapshot {
    state: Arc<WorldState>,
}

impl Deref for Snapshot {
    type Target = WorldState;

    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl From<WorldState> for Snapshot {
    fn from(state: WorldState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }
}
