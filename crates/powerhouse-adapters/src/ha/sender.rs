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

use powerhouse_core::{CommandSink, ControlError, ControlResult};
use powerhouse_types::ServiceCall;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::ha::types::OutboundCommand;

/// Producer side of the single-writer outbound queue.
///
/// Commands queued while the connection is down are written after the next
/// successful authentication.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<OutboundCommand>,
}

impl CommandSender {
    pub(crate) fn new(tx: mpsc::Sender<OutboundCommand>) -> Self {
        Self { tx }
    }

    /// Queue a command without waiting for room
    pub fn send(&self, command: OutboundCommand) -> ControlResult<()> {
        let kind = command.kind();
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => ControlError::QueueFull(kind.to_owned()),
            TrySendError::Closed(_) => ControlError::QueueClosed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl CommandSink for CommandSender {
    fn name(&self) -> &str {
        "home-assistant"
    }

    fn submit(&self, call: ServiceCall) -> ControlResult<()> {
        debug!("[HA WS] Queueing {}", call);
        let label = call.to_string();
        self.send(OutboundCommand::from(call)).map_err(|e| match e {
            ControlError::QueueFull(_) => ControlError::QueueFull(label),
            ControlError::QueueClosed => ControlError::QueueClosed,
        })
    }
}
