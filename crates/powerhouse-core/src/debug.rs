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
use tracing::info;

use crate::errors::ControlResult;
use crate::traits::CommandSink;

/// Command sink used in debug mode: logs what would be sent and drops it
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunSink;

impl CommandSink for DryRunSink {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn submit(&self, call: ServiceCall) -> ControlResult<()> {
        info!("🔍 DEBUG MODE: Would call {}", call);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_accepts_everything() {
        let sink = DryRunSink;
        assert!(sink.submit(ServiceCall::switch_on("switch.x")).is_ok());
        assert_eq!(sink.name(), "dry-run");
    }
}
