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

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use config::AppConfig;
use powerhouse_adapters::{ConnectionHandle, ConnectionSettings, ConnectionState, connect};
use powerhouse_core::{
    AverageEngine, CommandSink, ControlLoop, ControllerConfig, Dispatcher, DryRunSink,
    StateSynchronizer,
};

/// Snapshots waiting for the control loop; older ones are dropped when full
const CONTROL_QUEUE: usize = 16;
const AVERAGE_QUEUE: usize = 64;

#[derive(Parser)]
#[command(name = "powerhouse")]
#[command(author, version, about = "Powerhouse - solar inverter fleet controller")]
struct Cli {
    /// Configuration file (default: /etc/powerhouse/config.toml, then ./config.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respects RUST_LOG; otherwise the configured log level applies once loaded
    let env_filter = EnvFilter::try_from_default_env();
    let rust_log_set = env_filter.is_ok();
    let builder = FmtSubscriber::builder()
        .with_env_filter(env_filter.unwrap_or_else(|_| EnvFilter::new("info")))
        .with_filter_reloading();
    let filter_handle = builder.reload_handle();
    tracing::subscriber::set_global_default(builder.finish())
        .context("setting default subscriber failed")?;

    let config = AppConfig::load(cli.config.as_deref())?;
    if !rust_log_set {
        let filter = EnvFilter::try_new(&config.system.log_level)
            .with_context(|| format!("Invalid log level '{}'", config.system.log_level))?;
        filter_handle
            .reload(filter)
            .context("Failed to apply log level")?;
    }

    let controller = ControllerConfig::from(&config);
    info!("🚀 Starting Powerhouse");
    info!("📋 Configuration Summary:");
    info!("   Home Assistant: {}", config.home_assistant.url);
    info!(
        "   Inverters: {} x {} W",
        controller.control.inverter_count, controller.control.power_per_inverter_w
    );
    info!(
        "   Margins: enable {} / disable {}, cool-down {:?}",
        controller.control.enable_margin,
        controller.control.disable_margin,
        controller.control.cooldown
    );
    for average in &controller.averages {
        info!(
            "   Average: {} -> {} over {:?}",
            average.input, average.output, average.window
        );
    }
    info!("   Debug mode: {}", config.is_debug_mode());

    run(&config, &controller).await
}

async fn run(config: &AppConfig, controller: &ControllerConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Shutdown requested"),
            Err(e) => error!("❌ Failed to listen for Ctrl-C: {}", e),
        }
        shutdown.cancel();
    });

    let ConnectionHandle {
        events,
        commands,
        state,
        supervisor,
    } = connect(ConnectionSettings::from(config), cancel.clone())
        .await
        .context("Failed to connect to Home Assistant")?;

    let sink: Arc<dyn CommandSink> = if controller.dry_run {
        info!("🔍 DEBUG MODE: Enabled (safe mode - no real changes will be made)");
        info!("🔍 Set debug_mode: false in config to enable production mode");
        Arc::new(DryRunSink)
    } else {
        Arc::new(commands)
    };

    let (average_tx, average_rx) = mpsc::channel(AVERAGE_QUEUE);
    let (snapshot_tx, snapshot_rx) = watch::channel(None);
    let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);

    let averages = tokio::spawn(AverageEngine::new(&controller.averages).run(
        snapshot_rx,
        average_tx,
        cancel.clone(),
    ));
    let control = tokio::spawn(ControlLoop::new(controller, sink).run(control_rx, cancel.clone()));
    tokio::spawn(log_connection_state(state));

    let dispatcher = Dispatcher::new(
        StateSynchronizer::new(controller.derived_keys()),
        snapshot_tx,
        control_tx,
    );
    dispatcher.run(events, average_rx, cancel.clone()).await;

    cancel.cancel();
    for (name, handle) in [
        ("averages", averages),
        ("control", control),
        ("connection", supervisor),
    ] {
        if let Err(e) = handle.await {
            warn!("⚠️ {} task ended abnormally: {}", name, e);
        }
    }
    info!("👋 Powerhouse stopped");
    Ok(())
}

async fn log_connection_state(mut state: watch::Receiver<ConnectionState>) {
    while state.changed().await.is_ok() {
        let current = *state.borrow_and_update();
        match current {
            ConnectionState::Reconnecting => warn!("🔄 Home Assistant connection lost"),
            ConnectionState::Connecting
            | ConnectionState::Connected
            | ConnectionState::ShuttingDown => debug!("Connection state: {:?}", current),
        }
    }
}
