// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

//! Message types exchanged between the tunnel daemon and its clients over
//! the command socket.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod codec;

pub use codec::{read_message, write_message, ProtocolError, MAX_MESSAGE_SIZE};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    Connect,
    Disconnect,
    Status,
    Info,
    Ping(PingRequest),
    ListenToStateChanges,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingRequest {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    Connect(ConnectResponse),
    Disconnect(DisconnectResponse),
    Status(StatusResponse),
    Info(InfoResponse),
    Ping(PingResponse),
    StateChange(StatusResponse),
    Error(ErrorResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
    ConnectionFailed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::NotConnected => write!(f, "not connected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnecting => write!(f, "disconnecting"),
            ConnectionStatus::ConnectionFailed => write!(f, "connection failed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: ConnectionStatus,
    pub details: Option<ConnectionDetails>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionDetails {
    pub endpoint: String,
    pub connected_at_unix: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub version: String,
    pub platform: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub success: bool,
    pub latency_ms: Option<u64>,
    pub method: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
