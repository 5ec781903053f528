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

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Home Assistant websocket error types
#[derive(Error, Debug)]
pub enum HaError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid websocket URL: {0}")]
    InvalidUrl(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Connection closed before {0}")]
    ConnectionClosed(&'static str),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type HaResult<T> = Result<T, HaError>;
