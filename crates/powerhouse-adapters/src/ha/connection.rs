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

//! Connection Manager for the Home Assistant websocket API.
//!
//! One supervisor task owns the connection lifecycle:
//!
//! ```text
//! Connecting -> Connected -> (drop) -> Reconnecting -> Connecting -> ...
//!                    \-------------------(cancel)----> ShuttingDown
//! ```
//!
//! Each session splits the socket into a reader task and a writer. The
//! reader parses inbound frames and forwards them as [`TelemetryEvent`]s,
//! the writer is the only code that ever writes to the socket. Both share a
//! per-session cancellation scope so either side ending tears the session
//! down. The outbound queue and the correlation id counter outlive sessions.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use powerhouse_types::TelemetryEvent;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ha::errors::{HaError, HaResult};
use crate::ha::sender::CommandSender;
use crate::ha::types::{InboundMessage, OutboundCommand, decode_state_event, error_message};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_COMMAND_QUEUE: usize = 64;
const DEFAULT_EVENT_QUEUE: usize = 256;

// ============= Settings & Handle =============

#[derive(Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub access_token: String,
    /// Entities passed to `subscribe_entities` after every authentication
    pub subscriptions: Vec<String>,
    pub reconnect_delay: Duration,
    pub command_queue: usize,
    pub event_queue: usize,
}

impl ConnectionSettings {
    pub fn new(
        url: impl Into<String>,
        access_token: impl Into<String>,
        subscriptions: Vec<String>,
    ) -> Self {
        Self {
            url: url.into(),
            access_token: access_token.into(),
            subscriptions,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            command_queue: DEFAULT_COMMAND_QUEUE,
            event_queue: DEFAULT_EVENT_QUEUE,
        }
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    fn validate(&self) -> HaResult<()> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(HaError::InvalidUrl(self.url.clone()));
        }
        if self.command_queue == 0 || self.event_queue == 0 {
            return Err(HaError::ConfigError(
                "queue capacities must be non-zero".to_owned(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("url", &self.url)
            .field("subscriptions", &self.subscriptions.len())
            .field("reconnect_delay", &self.reconnect_delay)
            .finish_non_exhaustive()
    }
}

/// Lifecycle of the connection as seen by observers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Reconnecting,
    ShuttingDown,
}

/// Everything a caller gets back from [`connect`]
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Inbound telemetry in receipt order
    pub events: mpsc::Receiver<TelemetryEvent>,
    pub commands: CommandSender,
    pub state: watch::Receiver<ConnectionState>,
    /// Finishes once the root token is cancelled
    pub supervisor: JoinHandle<()>,
}

/// Dial Home Assistant and start the supervisor.
///
/// Only the first dial is reported to the caller. Every later failure is
/// retried after `reconnect_delay` until `cancel` fires.
pub async fn connect(
    settings: ConnectionSettings,
    cancel: CancellationToken,
) -> HaResult<ConnectionHandle> {
    settings.validate()?;
    info!("🔌 [HA WS] Connecting to {}", settings.url);
    let socket = dial(&settings.url).await?;

    let (event_tx, event_rx) = mpsc::channel(settings.event_queue);
    let (command_tx, command_rx) = mpsc::channel(settings.command_queue);
    let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

    let supervisor = Supervisor {
        settings,
        events: event_tx,
        state: state_tx,
        cancel,
    };
    let supervisor = tokio::spawn(supervisor.run(socket, command_rx));

    Ok(ConnectionHandle {
        events: event_rx,
        commands: CommandSender::new(command_tx),
        state: state_rx,
        supervisor,
    })
}

async fn dial(url: &str) -> HaResult<WsStream> {
    let (socket, response) = connect_async(url).await?;
    debug!("[HA WS] Handshake complete ({})", response.status());
    Ok(socket)
}

// ============= Supervisor =============

/// Reader -> writer handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handshake {
    AuthRequired,
    Authenticated,
}

struct Supervisor {
    settings: ConnectionSettings,
    events: mpsc::Sender<TelemetryEvent>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl Supervisor {
    async fn run(self, first: WsStream, mut outbound: mpsc::Receiver<OutboundCommand>) {
        let mut next_id = 1;
        let mut socket = Some(first);

        loop {
            let ws = match socket.take() {
                Some(ws) => ws,
                None => match self.redial().await {
                    Some(ws) => ws,
                    None => break,
                },
            };

            self.state.send_replace(ConnectionState::Connected);
            info!("✅ [HA WS] Connected to {}", self.settings.url);
            let reason = self.session(ws, &mut outbound, &mut next_id).await;

            if self.cancel.is_cancelled() {
                info!("🔌 [HA WS] Disconnected: {}", reason);
                break;
            }
            warn!("🔌 [HA WS] Disconnected: {}", reason);
            self.state.send_replace(ConnectionState::Reconnecting);
        }

        self.state.send_replace(ConnectionState::ShuttingDown);
        info!("🛑 [HA WS] Connection manager stopped");
    }

    /// Sleep, then dial until it works. `None` once cancelled.
    async fn redial(&self) -> Option<WsStream> {
        loop {
            info!(
                "🔄 [HA WS] Restarting connection in {:?}",
                self.settings.reconnect_delay
            );
            tokio::select! {
                () = self.cancel.cancelled() => return None,
                () = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }

            self.state.send_replace(ConnectionState::Connecting);
            let dialed = tokio::select! {
                () = self.cancel.cancelled() => return None,
                dialed = dial(&self.settings.url) => dialed,
            };
            match dialed {
                Ok(ws) => return Some(ws),
                Err(e) => {
                    warn!("❌ [HA WS] Reconnect failed: {}", e);
                    self.state.send_replace(ConnectionState::Reconnecting);
                }
            }
        }
    }

    /// Run one connection until either side stops. Returns why it ended.
    async fn session(
        &self,
        ws: WsStream,
        outbound: &mut mpsc::Receiver<OutboundCommand>,
        next_id: &mut u64,
    ) -> String {
        let scope = self.cancel.child_token();
        let (sink, source) = ws.split();
        let (handshake_tx, handshake_rx) = mpsc::channel(4);

        let reader = tokio::spawn(read_loop(
            source,
            self.events.clone(),
            handshake_tx,
            scope.clone(),
        ));
        let write_reason = write_loop(
            sink,
            handshake_rx,
            outbound,
            next_id,
            &self.settings,
            &scope,
        )
        .await;
        scope.cancel();

        let read_reason = reader
            .await
            .unwrap_or_else(|e| Some(format!("reader task failed: {e}")));
        read_reason
            .or(write_reason)
            .unwrap_or_else(|| "shutting down".to_owned())
    }
}

// ============= Writer =============

/// Single writer for the socket. Sends `auth` when asked, `subscribe_entities`
/// right after authentication, and only then drains queued commands.
/// Returns `Some(reason)` when the write side failed.
async fn write_loop(
    mut sink: WsSink,
    mut handshake: mpsc::Receiver<Handshake>,
    outbound: &mut mpsc::Receiver<OutboundCommand>,
    next_id: &mut u64,
    settings: &ConnectionSettings,
    scope: &CancellationToken,
) -> Option<String> {
    let mut authenticated = false;
    let mut outbound_open = true;

    loop {
        let command = tokio::select! {
            biased;
            () = scope.cancelled() => return None,
            signal = handshake.recv() => match signal {
                Some(Handshake::AuthRequired) => OutboundCommand::Auth {
                    access_token: settings.access_token.clone(),
                },
                Some(Handshake::Authenticated) => {
                    authenticated = true;
                    OutboundCommand::SubscribeEntities {
                        entity_ids: settings.subscriptions.clone(),
                    }
                }
                None => return None,
            },
            command = outbound.recv(), if authenticated && outbound_open => match command {
                Some(command) => command,
                None => {
                    debug!("[HA WS] Command queue closed");
                    outbound_open = false;
                    continue;
                }
            },
        };

        let id = command.needs_id().then(|| {
            let id = *next_id;
            *next_id += 1;
            id
        });
        let frame = match command.to_frame(id) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("⚠️ [HA WS] Could not encode {}: {}", command.kind(), e);
                continue;
            }
        };

        debug!("📤 [HA WS] Sending {} (id {:?})", command.kind(), id);
        let sent = tokio::select! {
            () = scope.cancelled() => return None,
            sent = sink.send(Message::Text(frame)) => sent,
        };
        if let Err(e) = sent {
            error!("❌ [HA WS] Error writing: {}", e);
            scope.cancel();
            return Some(format!("write failed: {e}"));
        }
    }
}

// ============= Reader =============

/// Parse inbound frames until the socket ends. Returns `Some(reason)` when
/// the read side ended the session.
async fn read_loop(
    mut source: WsSource,
    events: mpsc::Sender<TelemetryEvent>,
    handshake: mpsc::Sender<Handshake>,
    scope: CancellationToken,
) -> Option<String> {
    let reason = loop {
        let message = tokio::select! {
            () = scope.cancelled() => break None,
            message = source.next() => message,
        };

        let text = match message {
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Close(frame))) => {
                break Some(format!("closed by server ({frame:?})"));
            }
            Some(Ok(
                Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_),
            )) => continue,
            Some(Err(e)) => {
                error!("❌ [HA WS] Error reading: {}", e);
                break Some(format!("read failed: {e}"));
            }
            None => break Some("stream ended".to_owned()),
        };

        let inbound = match InboundMessage::parse(&text) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!("⚠️ [HA WS] Dropping malformed message: {}", e);
                continue;
            }
        };
        if let Err(reason) = dispatch(inbound, &text, &events, &handshake).await {
            break Some(reason);
        }
    };

    scope.cancel();
    reason
}

async fn dispatch(
    inbound: InboundMessage,
    raw: &str,
    events: &mpsc::Sender<TelemetryEvent>,
    handshake: &mpsc::Sender<Handshake>,
) -> Result<(), String> {
    match inbound {
        InboundMessage::AuthRequired { ha_version } => {
            debug!(
                "[HA WS] Authentication required (Home Assistant {})",
                ha_version.as_deref().unwrap_or("unknown")
            );
            signal(handshake, Handshake::AuthRequired).await
        }
        InboundMessage::AuthOk { .. } => {
            info!("🔑 [HA WS] Authenticated");
            forward(events, TelemetryEvent::SessionStarted).await?;
            signal(handshake, Handshake::Authenticated).await
        }
        InboundMessage::AuthInvalid { message } => {
            error!(
                "❌ [HA WS] Authentication rejected: {}",
                message.as_deref().unwrap_or("no reason given")
            );
            Err("authentication rejected".to_owned())
        }
        InboundMessage::Event { event, .. } => {
            let decoded = decode_state_event(&event);
            if decoded.is_empty() {
                debug!("[HA WS] Event without entity updates ignored");
                return Ok(());
            }
            forward(events, TelemetryEvent::State(decoded)).await
        }
        InboundMessage::Result { id, success, error } => {
            let result = TelemetryEvent::CommandResult {
                id,
                success,
                error: error.as_ref().map(error_message),
            };
            forward(events, result).await
        }
        InboundMessage::Unknown => {
            warn!("⚠️ [HA WS] Unknown message ignored: {}", raw);
            Ok(())
        }
    }
}

async fn forward(events: &mpsc::Sender<TelemetryEvent>, event: TelemetryEvent) -> Result<(), String> {
    events
        .send(event)
        .await
        .map_err(|_| "event consumer stopped".to_owned())
}

async fn signal(handshake: &mpsc::Sender<Handshake>, step: Handshake) -> Result<(), String> {
    handshake
        .send(step)
        .await
        .map_err(|_| "writer stopped".to_owned())
}
