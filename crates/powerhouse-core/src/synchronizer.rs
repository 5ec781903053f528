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

//! World-state ownership and snapshot fan-out.
//!
//! The dispatcher task is the only owner of the [`WorldState`]. It folds
//! telemetry events and average updates into it and hands immutable
//! snapshots to the averaging engine (latest-wins watch channel) and to the
//! control loop (bounded queue, dropped when the loop is busy).

use powerhouse_types::{HaValue, Snapshot, StateEvent, TelemetryEvent, WorldState};
use std::collections::HashSet;
use tokio::sync::{mpsc, watch};
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::averages::AverageUpdate;

// ============= State Synchronizer =============

#[derive(Debug, Default)]
pub struct StateSynchronizer {
    state: WorldState,
    derived: HashSet<String>,
    awaiting_baseline: bool,
}

impl StateSynchronizer {
    /// `derived_keys` are entities written locally (moving averages). They
    /// survive a baseline rebuild after reconnect.
    pub fn new(derived_keys: impl IntoIterator<Item = String>) -> Self {
        Self {
            state: WorldState::new(),
            derived: derived_keys.into_iter().collect(),
            awaiting_baseline: false,
        }
    }

    pub fn state(&self) -> &WorldState {
        &self.state
    }

    /// Fold one telemetry event in. Returns a snapshot when the event
    /// carried state.
    pub fn handle(&mut self, event: TelemetryEvent) -> Option<Snapshot> {
        match event {
            TelemetryEvent::SessionStarted => {
                debug!("[SYNC] New session, next addition batch replaces upstream state");
                self.awaiting_baseline = true;
                None
            }
            TelemetryEvent::State(event) => Some(self.apply(&event)),
            TelemetryEvent::CommandResult {
                id,
                success: false,
                error,
            } => {
                warn!(
                    "❌ [SYNC] Command {} failed: {}",
                    id.map_or_else(|| "?".to_owned(), |id| id.to_string()),
                    error.as_deref().unwrap_or("no error details")
                );
                None
            }
            TelemetryEvent::CommandResult { id, .. } => {
                trace!("[SYNC] Command {:?} succeeded", id);
                None
            }
        }
    }

    /// Apply a state event and snapshot the result
    pub fn apply(&mut self, event: &StateEvent) -> Snapshot {
        let written = if self.awaiting_baseline && event.has_additions() {
            self.awaiting_baseline = false;
            let derived = &self.derived;
            let written = self.state.rebuild(event, |key| derived.contains(key));
            info!(
                "🔄 [SYNC] Rebuilt world state from baseline: {} entities",
                self.state.len()
            );
            written
        } else {
            self.state.apply(event)
        };
        trace!(
            "[SYNC] Applied {} of {} updates (revision {})",
            written,
            event.updates.len(),
            self.state.revision()
        );
        self.state.snapshot()
    }

    /// Store a derived average and snapshot the result
    pub fn set_average(&mut self, update: AverageUpdate) -> Snapshot {
        trace!("[SYNC] {} = {}", update.key, update.value);
        self.state.set(update.key, HaValue::Number(update.value));
        self.state.snapshot()
    }
}

// ============= Dispatcher =============

/// Main loop owning the [`StateSynchronizer`]
#[derive(Debug)]
pub struct Dispatcher {
    sync: StateSynchronizer,
    averages: watch::Sender<Option<Snapshot>>,
    control: mpsc::Sender<Snapshot>,
}

impl Dispatcher {
    pub fn new(
        sync: StateSynchronizer,
        averages: watch::Sender<Option<Snapshot>>,
        control: mpsc::Sender<Snapshot>,
    ) -> Self {
        Self {
            sync,
            averages,
            control,
        }
    }

    /// Run until cancelled or the telemetry stream ends
    pub async fn run(
        mut self,
        mut telemetry: mpsc::Receiver<TelemetryEvent>,
        mut average_updates: mpsc::Receiver<AverageUpdate>,
        cancel: CancellationToken,
    ) {
        info!("🚀 [SYNC] Dispatcher started");
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                event = telemetry.recv() => {
                    let Some(event) = event else {
                        info!("[SYNC] Telemetry stream ended");
                        break;
                    };
                    if let Some(snapshot) = self.sync.handle(event) {
                        self.averages.send_replace(Some(snapshot.clone()));
                        self.forward(snapshot);
                    }
                }
                Some(update) = average_updates.recv() => {
                    let snapshot = self.sync.set_average(update);
                    self.forward(snapshot);
                }
            }
        }
        info!("🛑 [SYNC] Dispatcher stopped");
    }

    fn forward(&self, snapshot: Snapshot) {
        match self.control.try_send(snapshot) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => trace!("[SYNC] Control loop busy, snapshot dropped"),
            Err(TrySendError::Closed(_)) => debug!("[SYNC] Control loop gone, snapshot dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerhouse_types::EntityUpdate;
    use std::time::Duration;

    fn addition(id: &str, value: f64) -> EntityUpdate {
        EntityUpdate::Addition {
            entity_id: id.to_owned(),
            value: HaValue::Number(value),
        }
    }

    fn change(id: &str, value: Option<f64>) -> EntityUpdate {
        EntityUpdate::Change {
            entity_id: id.to_owned(),
            value: value.map(HaValue::Number),
        }
    }

    fn state_event(updates: Vec<EntityUpdate>) -> TelemetryEvent {
        TelemetryEvent::State(StateEvent::new(updates))
    }

    #[test]
    fn test_snapshot_after_every_state_event() {
        let mut sync = StateSynchronizer::new([]);

        let first = sync
            .handle(state_event(vec![addition("sensor.a", 1.0)]))
            .unwrap();
        let second = sync
            .handle(state_event(vec![change("sensor.a", Some(2.0))]))
            .unwrap();

        assert_eq!(first.number("sensor.a"), 1.0);
        assert_eq!(second.number("sensor.a"), 2.0);
        assert!(second.revision() > first.revision());
    }

    #[test]
    fn test_results_produce_no_snapshot() {
        let mut sync = StateSynchronizer::new([]);
        let failed = TelemetryEvent::CommandResult {
            id: Some(4),
            success: false,
            error: Some("entity not found".to_owned()),
        };
        assert!(sync.handle(failed).is_none());
        assert!(sync.handle(TelemetryEvent::SessionStarted).is_none());
    }

    #[test]
    fn test_baseline_after_session_start_drops_stale_keys() {
        let mut sync = StateSynchronizer::new(["sensor.avg".to_owned()]);
        sync.handle(state_event(vec![
            addition("sensor.a", 1.0),
            addition("sensor.stale", 9.0),
        ]));
        sync.set_average(AverageUpdate {
            key: "sensor.avg".to_owned(),
            value: 3.0,
        });

        sync.handle(TelemetryEvent::SessionStarted);
        let snapshot = sync
            .handle(state_event(vec![addition("sensor.a", 5.0)]))
            .unwrap();

        assert_eq!(snapshot.number("sensor.a"), 5.0);
        assert!(!snapshot.contains("sensor.stale"));
        assert_eq!(snapshot.number("sensor.avg"), 3.0);
    }

    #[test]
    fn test_additions_without_session_start_merge() {
        let mut sync = StateSynchronizer::new([]);
        sync.handle(state_event(vec![addition("sensor.a", 1.0)]));
        let snapshot = sync
            .handle(state_event(vec![addition("sensor.b", 2.0)]))
            .unwrap();
        assert!(snapshot.contains("sensor.a"));
        assert!(snapshot.contains("sensor.b"));
    }

    #[test]
    fn test_changes_before_baseline_do_not_clear_state() {
        let mut sync = StateSynchronizer::new([]);
        sync.handle(state_event(vec![addition("sensor.a", 1.0)]));
        sync.handle(TelemetryEvent::SessionStarted);

        let snapshot = sync
            .handle(state_event(vec![change("sensor.b", Some(2.0))]))
            .unwrap();
        assert!(snapshot.contains("sensor.a"));

        // the next addition batch is still treated as the baseline
        let snapshot = sync
            .handle(state_event(vec![addition("sensor.c", 3.0)]))
            .unwrap();
        assert!(!snapshot.contains("sensor.a"));
        assert!(snapshot.contains("sensor.c"));
    }

    #[tokio::test]
    async fn test_dispatcher_fans_out_snapshots() {
        let (telemetry_tx, telemetry_rx) = mpsc::channel(8);
        let (average_tx, average_rx) = mpsc::channel(8);
        let (watch_tx, mut watch_rx) = watch::channel(None);
        let (control_tx, mut control_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher::new(StateSynchronizer::new([]), watch_tx, control_tx);
        let handle = tokio::spawn(dispatcher.run(telemetry_rx, average_rx, cancel.clone()));

        telemetry_tx
            .send(state_event(vec![addition("sensor.a", 7.0)]))
            .await
            .unwrap();
        let to_control = control_rx.recv().await.unwrap();
        assert_eq!(to_control.number("sensor.a"), 7.0);

        watch_rx.changed().await.unwrap();
        let to_averages = watch_rx.borrow_and_update().clone().unwrap();
        assert_eq!(to_averages.number("sensor.a"), 7.0);

        average_tx
            .send(AverageUpdate {
                key: "sensor.a_average".to_owned(),
                value: 6.5,
            })
            .await
            .unwrap();
        let merged = control_rx.recv().await.unwrap();
        assert_eq!(merged.number("sensor.a"), 7.0);
        assert_eq!(merged.number("sensor.a_average"), 6.5);

        // average updates are not fed back into the averaging engine
        let echoed = tokio::time::timeout(Duration::from_millis(50), watch_rx.changed()).await;
        assert!(echoed.is_err());

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_dispatcher_drops_snapshots_when_control_is_busy() {
        let (telemetry_tx, telemetry_rx) = mpsc::channel(8);
        let (_average_tx, average_rx) = mpsc::channel(8);
        let (watch_tx, watch_rx) = watch::channel(None);
        let (control_tx, mut control_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let dispatcher = Dispatcher::new(StateSynchronizer::new([]), watch_tx, control_tx);
        let handle = tokio::spawn(dispatcher.run(telemetry_rx, average_rx, cancel));

        for value in [1.0, 2.0, 3.0] {
            telemetry_tx
                .send(state_event(vec![change("sensor.a", Some(value))]))
                .await
                .unwrap();
        }
        drop(telemetry_tx);
        handle.await.unwrap();

        assert_eq!(control_rx.recv().await.unwrap().number("sensor.a"), 1.0);
        assert!(control_rx.try_recv().is_err());
        // the averaging engine always sees the newest state
        let latest = watch_rx.borrow().clone().unwrap();
        assert_eq!(latest.number("sensor.a"), 3.0);
    }
}
