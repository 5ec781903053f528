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

//! Websocket API message shapes.
//!
//! Only the subset the controller needs is modelled. Everything else is
//! parsed as [`InboundMessage::Unknown`] and dropped by the reader.

use powerhouse_types::{EntityUpdate, HaValue, ServiceCall, StateEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::ha::errors::HaResult;

// ============= Inbound =============

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    AuthRequired {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthOk {
        #[serde(default)]
        ha_version: Option<String>,
    },
    AuthInvalid {
        #[serde(default)]
        message: Option<String>,
    },
    Event {
        #[serde(default)]
        id: Option<u64>,
        event: Value,
    },
    Result {
        #[serde(default)]
        id: Option<u64>,
        success: bool,
        #[serde(default)]
        error: Option<Value>,
    },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    pub fn parse(text: &str) -> HaResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Human-readable error text out of a `result` error payload
pub fn error_message(error: &Value) -> String {
    error
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), str::to_owned)
}

/// Decode a `subscribe_entities` event body.
///
/// `a` holds full states of newly seen entities (`{"s": state, ...}`), `c`
/// holds deltas where the new state, if any, sits under `"+"`. Entries
/// without a usable shape are skipped.
pub fn decode_state_event(event: &Value) -> StateEvent {
    let mut updates = Vec::new();

    if let Some(additions) = event.get("a").and_then(Value::as_object) {
        for (entity_id, entry) in additions {
            let Some(state) = entry.get("s") else {
                debug!("[HA WS] Addition for {} without state, skipped", entity_id);
                continue;
            };
            updates.push(EntityUpdate::Addition {
                entity_id: entity_id.clone(),
                value: HaValue::from_json(state),
            });
        }
    }

    if let Some(changes) = event.get("c").and_then(Value::as_object) {
        for (entity_id, entry) in changes {
            let value = entry
                .get("+")
                .and_then(|delta| delta.get("s"))
                .map(HaValue::from_json);
            updates.push(EntityUpdate::Change {
                entity_id: entity_id.clone(),
                value,
            });
        }
    }

    StateEvent::new(updates)
}

// ============= Outbound =============

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceTarget {
    pub entity_id: Vec<String>,
}

#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    Auth {
        access_token: String,
    },
    SubscribeEntities {
        entity_ids: Vec<String>,
    },
    CallService {
        domain: String,
        service: String,
        target: ServiceTarget,
    },
}

impl OutboundCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::SubscribeEntities { .. } => "subscribe_entities",
            Self::CallService { .. } => "call_service",
        }
    }

    /// Everything except the authentication handshake carries an id
    pub fn needs_id(&self) -> bool {
        !matches!(self, Self::Auth { .. })
    }

    /// Serialize to a wire frame, adding `id` when given
    pub fn to_frame(&self, id: Option<u64>) -> HaResult<String> {
        let mut frame = serde_json::to_value(self)?;
        if let (Some(id), Some(fields)) = (id, frame.as_object_mut()) {
            fields.insert("id".to_owned(), Value::from(id));
        }
        Ok(frame.to_string())
    }
}

impl std::fmt::Debug for OutboundCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auth { .. } => f.debug_struct("Auth").finish_non_exhaustive(),
            Self::SubscribeEntities { entity_ids } => f
                .debug_struct("SubscribeEntities")
                .field("entity_ids", entity_ids)
                .finish(),
            Self::CallService {
                domain,
                service,
                target,
            } => f
                .debug_struct("CallService")
                .field("domain", domain)
                .field("service", service)
                .field("target", target)
                .finish(),
        }
    }
}

impl From<ServiceCall> for OutboundCommand {
    fn from(call: ServiceCall) -> Self {
        Self::CallService {
            domain: call.domain,
            service: call.service,
            target: ServiceTarget {
                entity_id: call.entity_ids,
            },
        }
    }
}
