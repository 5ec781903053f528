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

use powerhouse_types::ServiceCall;
use std::sync::Mutex;

use crate::errors::{ControlError, ControlResult};
use crate::traits::CommandSink;

/// Sink that remembers every accepted call
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<ServiceCall>>,
    reject: bool,
}

impl RecordingSink {
    pub fn rejecting() -> Self {
        Self {
            calls: Mutex::default(),
            reject: true,
        }
    }

    pub fn calls(&self) -> Vec<ServiceCall> {
        self.calls.lock().unwrap().clone()
    }
}

impl CommandSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn submit(&self, call: ServiceCall) -> ControlResult<()> {
        if self.reject {
            return Err(ControlError::QueueClosed);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}
