// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use tokio::{
    net::UnixStream,
    sync::{broadcast, mpsc, oneshot},
};
use tracing::{debug, info, warn};

use tunnel_proto::{
    codec::ProtocolError, read_message, write_message, ConnectResponse, ConnectionDetails,
    ConnectionStatus, DisconnectResponse, ErrorResponse, InfoResponse, PingResponse, Request,
    Response, StatusResponse,
};

use tunnel_lib::pinger::PingReport;

use crate::service::{
    ConnectResult, DisconnectResult, PingArgs, ServiceCommand, StatusResult, TunnelStateChange,
};

pub(super) struct CommandInterfaceConnectionHandler {
    command_tx: mpsc::UnboundedSender<ServiceCommand>,
    state_changes_tx: broadcast::Sender<TunnelStateChange>,
}

impl CommandInterfaceConnectionHandler {
    pub(super) fn new(
        command_tx: mpsc::UnboundedSender<ServiceCommand>,
        state_changes_tx: broadcast::Sender<TunnelStateChange>,
    ) -> Self {
        Self {
            command_tx,
            state_changes_tx,
        }
    }

    pub(super) async fn handle(self, mut socket: UnixStream) {
        loop {
            let request = match read_message::<Request, _>(&mut socket).await {
                Ok(request) => request,
                Err(ProtocolError::ConnectionClosed) => {
                    debug!("Client disconnected");
                    return;
                }
                Err(err) => {
                    warn!("Failed to read request: {err}");
                    return;
                }
            };
            debug!("Received request: {:?}", request);

            let response = match request {
                Request::Connect => Response::Connect(ConnectResponse {
                    success: self.handle_connect().await.is_success(),
                }),
                Request::Disconnect => Response::Disconnect(DisconnectResponse {
                    success: self.handle_disconnect().await.is_success(),
                }),
                Request::Status => Response::Status(self.handle_status().await.into()),
                Request::Info => Response::Info(self.handle_info().await),
                Request::Ping(ping_request) => {
                    let args = PingArgs {
                        host: ping_request.host,
                        port: ping_request.port,
                    };
                    match self.handle_ping(args).await {
                        Ok(report) => Response::Ping(ping_response(report)),
                        Err(message) => Response::Error(ErrorResponse { message }),
                    }
                }
                Request::ListenToStateChanges => {
                    self.handle_listen_to_state_changes(&mut socket).await;
                    return;
                }
            };

            if let Err(err) = write_message(&mut socket, &response).await {
                warn!("Failed to write response: {err}");
                return;
            }
        }
    }

    async fn handle_connect(&self) -> ConnectResult {
        info!("Starting tunnel");
        let (tx, rx) = oneshot::channel();
        let result = self
            .send_and_wait(ServiceCommand::Connect(tx), rx)
            .await
            .unwrap_or_else(|| ConnectResult::Fail("Service unavailable".to_owned()));
        match result {
            ConnectResult::Success => info!("Tunnel start requested"),
            ConnectResult::Fail(ref err) => info!("Tunnel failed to start: {err}"),
        };
        result
    }

    async fn handle_disconnect(&self) -> DisconnectResult {
        info!("Stopping tunnel");
        let (tx, rx) = oneshot::channel();
        let result = self
            .send_and_wait(ServiceCommand::Disconnect(tx), rx)
            .await
            .unwrap_or_else(|| DisconnectResult::Fail("Service unavailable".to_owned()));
        match result {
            DisconnectResult::Success => info!("Tunnel stop requested"),
            DisconnectResult::Fail(ref err) => warn!("Tunnel failed to stop: {err}"),
        };
        result
    }

    async fn handle_status(&self) -> StatusResult {
        let (tx, rx) = oneshot::channel();
        let status = self
            .send_and_wait(ServiceCommand::Status(tx), rx)
            .await
            .unwrap_or_else(|| StatusResult::ConnectionFailed("Service unavailable".to_owned()));
        debug!("Tunnel status: {status}");
        status
    }

    async fn handle_info(&self) -> InfoResponse {
        let (tx, rx) = oneshot::channel();
        match self.send_and_wait(ServiceCommand::Info(tx), rx).await {
            Some(info) => InfoResponse {
                version: info.version,
                platform: info.platform,
            },
            None => InfoResponse {
                version: "unknown".to_owned(),
                platform: "unknown".to_owned(),
            },
        }
    }

    async fn handle_ping(&self, args: PingArgs) -> Result<PingReport, String> {
        let (tx, rx) = oneshot::channel();
        match self.send_and_wait(ServiceCommand::Ping(tx, args), rx).await {
            Some(Ok(report)) => Ok(report),
            Some(Err(err)) => Err(err.to_string()),
            None => Err("Service unavailable".to_owned()),
        }
    }

    async fn handle_listen_to_state_changes(&self, socket: &mut UnixStream) {
        let mut state_changes_rx = self.state_changes_tx.subscribe();
        info!("Client subscribed to state changes");
        loop {
            match state_changes_rx.recv().await {
                Ok(state_change) => {
                    let response = Response::StateChange(state_change.into());
                    if let Err(err) = write_message(socket, &response).await {
                        debug!("State change listener went away: {err}");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("State change listener lagged, skipped {skipped} updates");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn send_and_wait<T>(
        &self,
        command: ServiceCommand,
        rx: oneshot::Receiver<T>,
    ) -> Option<T> {
        if self.command_tx.send(command).is_err() {
            warn!("Tunnel service is no longer running");
            return None;
        }
        rx.await.ok()
    }
}

impl From<StatusResult> for StatusResponse {
    fn from(status: StatusResult) -> Self {
        match status {
            StatusResult::NotConnected => StatusResponse {
                status: ConnectionStatus::NotConnected,
                details: None,
                error: None,
            },
            StatusResult::Connecting => StatusResponse {
                status: ConnectionStatus::Connecting,
                details: None,
                error: None,
            },
            StatusResult::Connected(details) => StatusResponse {
                status: ConnectionStatus::Connected,
                details: Some(ConnectionDetails {
                    endpoint: details.endpoint.to_string(),
                    connected_at_unix: details.since.unix_timestamp(),
                }),
                error: None,
            },
            StatusResult::Disconnecting => StatusResponse {
                status: ConnectionStatus::Disconnecting,
                details: None,
                error: None,
            },
            StatusResult::ConnectionFailed(reason) => StatusResponse {
                status: ConnectionStatus::ConnectionFailed,
                details: None,
                error: Some(reason),
            },
        }
    }
}

impl From<TunnelStateChange> for StatusResponse {
    fn from(state_change: TunnelStateChange) -> Self {
        match state_change {
            TunnelStateChange::NotConnected => StatusResponse {
                status: ConnectionStatus::NotConnected,
                details: None,
                error: None,
            },
            TunnelStateChange::Connecting => StatusResponse {
                status: ConnectionStatus::Connecting,
                details: None,
                error: None,
            },
            TunnelStateChange::Connected => StatusResponse {
                status: ConnectionStatus::Connected,
                details: None,
                error: None,
            },
            TunnelStateChange::Disconnecting => StatusResponse {
                status: ConnectionStatus::Disconnecting,
                details: None,
                error: None,
            },
            TunnelStateChange::ConnectionFailed(reason) => StatusResponse {
                status: ConnectionStatus::ConnectionFailed,
                details: None,
                error: Some(reason),
            },
        }
    }
}

fn ping_response(report: PingReport) -> PingResponse {
    PingResponse {
        success: report.success,
        latency_ms: report.latency.map(|latency| latency.as_millis() as u64),
        method: report.method.to_string(),
        error: report.error,
    }
}
