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

//! Scriptable stand-in for the Home Assistant websocket API.

use anyhow::{Context, Result, bail};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value, json};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Listens on an ephemeral local port; every [`accept`](Self::accept) is one client session
#[derive(Debug)]
pub struct FakeHomeAssistant {
    listener: TcpListener,
    url: String,
}

impl FakeHomeAssistant {
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("ws://{}/api/websocket", listener.local_addr()?);
        Ok(Self { listener, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn accept(&self) -> Result<FakeSession> {
        let (tcp, _) = self.listener.accept().await?;
        let ws = accept_async(tcp).await.context("websocket handshake failed")?;
        Ok(FakeSession { ws })
    }
}

#[derive(Debug)]
pub struct FakeSession {
    ws: WebSocketStream<TcpStream>,
}

impl FakeSession {
    pub async fn send(&mut self, value: Value) -> Result<()> {
        self.ws.send(Message::Text(value.to_string())).await?;
        Ok(())
    }

    /// Next JSON frame from the client, `None` once it hung up (cleanly or not)
    pub async fn recv(&mut self) -> Result<Option<Value>> {
        loop {
            let message = tokio::time::timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .context("timed out waiting for the client")?;
            match message {
                Some(Ok(Message::Text(text))) => return Ok(Some(serde_json::from_str(&text)?)),
                Some(Ok(Message::Close(_)) | Err(_)) | None => return Ok(None),
                Some(Ok(
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_),
                )) => {}
            }
        }
    }

    /// Next frame of the given `type`, skipping everything else
    pub async fn recv_type(&mut self, kind: &str) -> Result<Value> {
        loop {
            match self.recv().await? {
                Some(frame) if frame["type"] == kind => return Ok(frame),
                Some(_) => {}
                None => bail!("client hung up while waiting for '{kind}'"),
            }
        }
    }

    /// Run the auth exchange and return the `subscribe_entities` frame
    pub async fn authenticate(&mut self, token: &str) -> Result<Value> {
        self.send(json!({"type": "auth_required", "ha_version": "2024.6.0"}))
            .await?;
        let auth = self.recv_type("auth").await?;
        if auth["access_token"] != token {
            self.send(json!({"type": "auth_invalid", "message": "Invalid access token"}))
                .await?;
            bail!("client sent the wrong token: {auth}");
        }
        if auth.get("id").is_some() {
            bail!("auth frame must not carry an id: {auth}");
        }
        self.send(json!({"type": "auth_ok", "ha_version": "2024.6.0"}))
            .await?;

        let subscribe = self.recv_type("subscribe_entities").await?;
        let id = subscribe["id"].clone();
        self.send(json!({"id": id, "type": "result", "success": true, "result": null}))
            .await?;
        Ok(subscribe)
    }

    /// Send an `a` (addition) event for the subscription `id`
    pub async fn send_additions(&mut self, id: &Value, states: &[(&str, Value)]) -> Result<()> {
        let additions: Map<String, Value> = states
            .iter()
            .map(|(entity, state)| ((*entity).to_owned(), json!({"s": state, "a": {}})))
            .collect();
        self.send(json!({"id": id, "type": "event", "event": {"a": additions}}))
            .await
    }

    /// Send a `c` (change) event for the subscription `id`
    pub async fn send_changes(&mut self, id: &Value, states: &[(&str, Value)]) -> Result<()> {
        let changes: Map<String, Value> = states
            .iter()
            .map(|(entity, state)| ((*entity).to_owned(), json!({"+": {"s": state}})))
            .collect();
        self.send(json!({"id": id, "type": "event", "event": {"c": changes}}))
            .await
    }

    /// Close the socket from the server side
    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
