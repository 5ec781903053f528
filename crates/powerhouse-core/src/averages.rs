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

//! Fixed-window moving averages over world-state signals.
//!
//! Each series keeps one sample per second in a circular buffer and updates
//! its mean in O(1) per tick. A series starts once the first snapshot
//! arrives, with the whole buffer filled with that first sample so the mean
//! does not ramp up from zero. Updates are only emitted when the mean moves.

use powerhouse_types::{Snapshot, WorldState};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::config::AverageSpec;

/// Sampling period of every series
pub const TICK: Duration = Duration::from_secs(1);

/// New value for a derived entity
#[derive(Debug, Clone, PartialEq)]
pub struct AverageUpdate {
    pub key: String,
    pub value: f64,
}

// ============= Average Series =============

/// Streaming mean over the last `window` seconds of one signal
#[derive(Debug, Clone)]
pub struct AverageSeries {
    spec: AverageSpec,
    records: Vec<f64>,
    average: f64,
    cursor: usize,
    last_emitted: Option<f64>,
}

impl AverageSeries {
    pub fn new(spec: AverageSpec) -> Self {
        Self {
            spec,
            records: Vec::new(),
            average: 0.0,
            cursor: 0,
            last_emitted: None,
        }
    }

    pub fn spec(&self) -> &AverageSpec {
        &self.spec
    }

    /// Number of samples held once initialized (window in whole seconds, at least one)
    pub fn window_len(&self) -> usize {
        usize::try_from(self.spec.window.as_secs())
            .unwrap_or(usize::MAX)
            .max(1)
    }

    pub fn is_initialized(&self) -> bool {
        !self.records.is_empty()
    }

    /// Current mean, `None` before the first sample
    pub fn average(&self) -> Option<f64> {
        self.is_initialized().then_some(self.average)
    }

    pub fn records(&self) -> &[f64] {
        &self.records
    }

    /// Fill the whole buffer with `value` and emit it
    pub fn seed(&mut self, value: f64) -> AverageUpdate {
        self.records = vec![value; self.window_len()];
        self.average = value;
        self.cursor = 0;
        self.last_emitted = Some(value);
        self.update()
    }

    /// Overwrite the oldest sample with `value`. Returns an update only when
    /// the mean differs from the last emitted one. Ignored before seeding.
    pub fn push(&mut self, value: f64) -> Option<AverageUpdate> {
        if !self.is_initialized() {
            return None;
        }

        let len = self.records.len();
        let weight = f64::from(u32::try_from(len).unwrap_or(u32::MAX));
        self.average += (value - self.records[self.cursor]) / weight;
        self.records[self.cursor] = value;
        self.cursor += 1;
        if self.cursor == len {
            self.cursor = 0;
        }

        if self.last_emitted == Some(self.average) {
            return None;
        }
        self.last_emitted = Some(self.average);
        Some(self.update())
    }

    fn update(&self) -> AverageUpdate {
        AverageUpdate {
            key: self.spec.output.clone(),
            value: self.average,
        }
    }
}

// ============= Average Engine =============

/// All configured series plus the one-second ticker driving them
#[derive(Debug)]
pub struct AverageEngine {
    series: Vec<AverageSeries>,
    tick: Duration,
}

impl AverageEngine {
    pub fn new(specs: &[AverageSpec]) -> Self {
        Self {
            series: specs.iter().cloned().map(AverageSeries::new).collect(),
            tick: TICK,
        }
    }

    pub fn series(&self) -> &[AverageSeries] {
        &self.series
    }

    /// Initialize every series that has not seen a snapshot yet
    pub fn seed(&mut self, state: &WorldState) -> Vec<AverageUpdate> {
        self.series
            .iter_mut()
            .filter(|s| !s.is_initialized())
            .map(|s| {
                let value = state.number(&s.spec.input);
                debug!(
                    "📈 [AVERAGES] Seeding {} with {} ({} samples)",
                    s.spec.output,
                    value,
                    s.window_len()
                );
                s.seed(value)
            })
            .collect()
    }

    /// Sample the latest state into every series. Without any state yet,
    /// nothing is sampled.
    pub fn tick(&mut self, state: Option<&WorldState>) -> Vec<AverageUpdate> {
        let Some(state) = state else {
            trace!("[AVERAGES] No snapshot yet, skipping tick");
            return Vec::new();
        };

        let mut updates = self.seed(state);
        for series in &mut self.series {
            let value = state.number(&series.spec.input);
            updates.extend(series.push(value));
        }
        updates
    }

    /// Run until cancelled. Only the most recent snapshot is ever sampled.
    pub async fn run(
        mut self,
        mut snapshots: watch::Receiver<Option<Snapshot>>,
        updates: mpsc::Sender<AverageUpdate>,
        cancel: CancellationToken,
    ) {
        info!(
            "📈 [AVERAGES] Starting {} moving averages",
            self.series.len()
        );
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut latest = snapshots.borrow_and_update().clone();
        let mut pending = latest.as_deref().map(|s| self.seed(s)).unwrap_or_default();

        loop {
            for update in pending.drain(..) {
                if updates.send(update).await.is_err() {
                    debug!("[AVERAGES] Update channel closed, stopping");
                    return;
                }
            }

            pending = tokio::select! {
                () = cancel.cancelled() => break,
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        debug!("[AVERAGES] Snapshot channel closed, stopping");
                        break;
                    }
                    latest = snapshots.borrow_and_update().clone();
                    latest.as_deref().map(|s| self.seed(s)).unwrap_or_default()
                }
                _ = ticker.tick() => self.tick(latest.as_deref()),
            };
        }
        info!("📈 [AVERAGES] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use powerhouse_types::HaValue;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn spec(window_secs: u64) -> AverageSpec {
        AverageSpec::new("sensor.in", "sensor.out", Duration::from_secs(window_secs))
    }

    fn state(value: f64) -> WorldState {
        let mut state = WorldState::new();
        state.set("sensor.in", HaValue::Number(value));
        state
    }

    fn mean(values: &[f64]) -> f64 {
        values.iter().sum::<f64>() / f64::from(u32::try_from(values.len()).unwrap())
    }

    #[test]
    fn test_seed_fills_buffer() {
        let mut series = AverageSeries::new(spec(60));
        assert_eq!(series.average(), None);

        let update = series.seed(420.0);

        assert_eq!(update.value, 420.0);
        assert_eq!(series.records().len(), 60);
        assert!(series.records().iter().all(|&v| v == 420.0));
    }

    #[test]
    fn test_push_before_seed_is_ignored() {
        let mut series = AverageSeries::new(spec(3));
        assert_eq!(series.push(10.0), None);
        assert!(!series.is_initialized());
    }

    #[test]
    fn test_running_mean_matches_buffer() {
        let mut series = AverageSeries::new(spec(15));
        let mut rng = StdRng::seed_from_u64(17);
        series.seed(rng.gen_range(-500.0..2500.0));

        for _ in 0..10_000 {
            series.push(rng.gen_range(-500.0..2500.0));
            let expected = mean(series.records());
            let actual = series.average().unwrap();
            let tolerance = 1e-9 * expected.abs().max(1.0);
            assert!(
                (actual - expected).abs() <= tolerance,
                "running mean {actual} drifted from {expected}"
            );
        }
    }

    #[test]
    fn test_emits_only_when_value_changes() {
        let mut series = AverageSeries::new(spec(3));
        series.seed(10.0);

        assert_eq!(series.push(10.0), None);
        let update = series.push(13.0).unwrap();
        assert_eq!(update.key, "sensor.out");
        assert_eq!(update.value, 11.0);
        // replaces the remaining 10.0 sample with another 10.0
        assert_eq!(series.push(10.0), None);
        assert_eq!(series.push(16.0).unwrap().value, 13.0);
    }

    #[test]
    fn test_sub_second_window_keeps_one_sample() {
        let mut series = AverageSeries::new(AverageSpec::new(
            "sensor.in",
            "sensor.out",
            Duration::from_millis(300),
        ));
        series.seed(1.0);
        assert_eq!(series.records().len(), 1);
        assert_eq!(series.push(5.0).unwrap().value, 5.0);
    }

    #[test]
    fn test_engine_skips_ticks_without_snapshot() {
        let mut engine = AverageEngine::new(&[spec(5)]);
        assert!(engine.tick(None).is_empty());
        assert!(!engine.series()[0].is_initialized());
    }

    #[test]
    fn test_engine_uses_sentinel_for_missing_input() {
        let mut engine = AverageEngine::new(&[spec(5)]);
        let updates = engine.seed(&WorldState::new());
        assert_eq!(updates[0].value, powerhouse_types::MISSING);
    }

    #[test]
    fn test_engine_seeds_on_first_tick_with_state() {
        let mut engine = AverageEngine::new(&[spec(5)]);
        let updates = engine.tick(Some(&state(50.0)));
        assert_eq!(
            updates,
            vec![AverageUpdate {
                key: "sensor.out".to_owned(),
                value: 50.0
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_samples_latest_snapshot_each_tick() {
        let (snapshot_tx, snapshot_rx) = watch::channel(None);
        let (update_tx, mut update_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let engine = AverageEngine::new(&[spec(2)]);
        let handle = tokio::spawn(engine.run(snapshot_rx, update_tx, cancel.clone()));

        snapshot_tx.send_replace(Some(state(100.0).snapshot()));
        assert_eq!(update_rx.recv().await.unwrap().value, 100.0);

        // several snapshots between ticks collapse to the latest
        snapshot_tx.send_replace(Some(state(900.0).snapshot()));
        snapshot_tx.send_replace(Some(state(200.0).snapshot()));

        assert_eq!(update_rx.recv().await.unwrap().value, 150.0);
        assert_eq!(update_rx.recv().await.unwrap().value, 200.0);

        // buffer is now all 200.0, further ticks do not move the mean
        let quiet = tokio::time::timeout(Duration::from_secs(10), update_rx.recv()).await;
        assert!(quiet.is_err());

        cancel.cancel();
        handle.await.unwrap();
    }
}
