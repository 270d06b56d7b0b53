// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::{net::SocketAddr, os::fd::AsRawFd};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpSocket, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use super::{ConnectionData, ErrorStateReason, TunnelSettings};
use crate::{pinger, protect::SocketProtector};

pub(super) enum TunnelMonitorEvent {
    Up(ConnectionData),
    Down(ErrorStateReason),
}

pub(super) struct TunnelMonitorHandle {
    cancel_token: CancellationToken,
    handle: JoinHandle<()>,
}

impl TunnelMonitorHandle {
    pub(super) fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub(super) fn into_join_handle(self) -> JoinHandle<()> {
        self.handle
    }
}

#[derive(Debug, thiserror::Error)]
enum EstablishError {
    #[error("failed to create socket: {0}")]
    CreateSocket(std::io::Error),

    #[error("timed out connecting to {endpoint}")]
    Timeout { endpoint: SocketAddr },

    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: SocketAddr,
        source: std::io::Error,
    },
}

/// Task owning the upstream tunnel connection.
///
/// Establishes the connection, reports `Up`/`Down` to the owning state, and
/// keeps watching the socket for closure and liveness afterwards.
pub(super) struct TunnelMonitor;

impl TunnelMonitor {
    pub(super) fn start(
        event_sender: mpsc::UnboundedSender<TunnelMonitorEvent>,
        tunnel_settings: TunnelSettings,
        protector: SocketProtector,
    ) -> TunnelMonitorHandle {
        let cancel_token = CancellationToken::new();
        let monitor_token = cancel_token.clone();
        let handle = tokio::spawn(async move {
            Self::run(monitor_token, event_sender, tunnel_settings, protector).await;
        });
        TunnelMonitorHandle {
            cancel_token,
            handle,
        }
    }

    async fn run(
        cancel_token: CancellationToken,
        event_sender: mpsc::UnboundedSender<TunnelMonitorEvent>,
        tunnel_settings: TunnelSettings,
        protector: SocketProtector,
    ) {
        let stream = tokio::select! {
            _ = cancel_token.cancelled() => return,
            result = Self::establish(&tunnel_settings, &protector) => match result {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::error!("Failed to establish tunnel: {err}");
                    let _ = event_sender.send(TunnelMonitorEvent::Down(
                        ErrorStateReason::EstablishFailure,
                    ));
                    return;
                }
            }
        };

        let connection_data = ConnectionData {
            endpoint: tunnel_settings.endpoint,
            connected_at: time::OffsetDateTime::now_utc(),
        };
        if event_sender
            .send(TunnelMonitorEvent::Up(connection_data))
            .is_err()
        {
            return;
        }

        Self::watch(stream, cancel_token, tunnel_settings, event_sender).await;
    }

    async fn establish(
        tunnel_settings: &TunnelSettings,
        protector: &SocketProtector,
    ) -> Result<TcpStream, EstablishError> {
        let endpoint = tunnel_settings.endpoint;
        let socket = match endpoint {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(EstablishError::CreateSocket)?;

        // The upstream socket must not be routed through the tunnel itself,
        // otherwise its traffic loops straight back into it.
        if let Err(err) = protector.protect(socket.as_raw_fd()) {
            tracing::warn!("Failed to protect tunnel socket, continuing unprotected: {err}");
        }

        tokio::time::timeout(tunnel_settings.connect_timeout, socket.connect(endpoint))
            .await
            .map_err(|_| EstablishError::Timeout { endpoint })?
            .map_err(|source| EstablishError::Connect { endpoint, source })
    }

    async fn watch(
        mut stream: TcpStream,
        cancel_token: CancellationToken,
        tunnel_settings: TunnelSettings,
        event_sender: mpsc::UnboundedSender<TunnelMonitorEvent>,
    ) {
        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + tunnel_settings.keepalive_interval,
            tunnel_settings.keepalive_interval,
        );
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut failures = 0u32;
        let mut buf = [0u8; 64];

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    let _ = stream.shutdown().await;
                    break;
                }
                result = stream.read(&mut buf) => match result {
                    // Anything the peer sends counts as liveness.
                    Ok(n) if n > 0 => failures = 0,
                    Ok(_) => {
                        tracing::info!("Tunnel closed by peer");
                        let _ = event_sender
                            .send(TunnelMonitorEvent::Down(ErrorStateReason::TunnelDown));
                        break;
                    }
                    Err(err) => {
                        tracing::error!("Tunnel read error: {err}");
                        let _ = event_sender
                            .send(TunnelMonitorEvent::Down(ErrorStateReason::TunnelDown));
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    match pinger::tcp_probe(
                        tunnel_settings.endpoint,
                        tunnel_settings.connect_timeout,
                    )
                    .await
                    {
                        Ok(latency) => {
                            tracing::trace!("Keepalive probe took {} ms", latency.as_millis());
                            failures = 0;
                        }
                        Err(err) => {
                            failures += 1;
                            tracing::warn!(
                                "Keepalive probe failed ({failures}/{}): {err}",
                                tunnel_settings.max_keepalive_failures
                            );
                            if failures >= tunnel_settings.max_keepalive_failures {
                                let _ = event_sender.send(TunnelMonitorEvent::Down(
                                    ErrorStateReason::KeepaliveFailure,
                                ));
                                break;
                            }
                        }
                    }
                }
            }
        }
    }
}
