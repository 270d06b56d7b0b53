// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, net::SocketAddr, path::PathBuf, sync::Arc};

use sysinfo::System;
use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use tunnel_lib::{
    pinger::{self, PingError, PingOptions, PingReport},
    tunnel_state_machine::{
        TunnelCommand, TunnelEvent, TunnelSettings, TunnelState, TunnelStateMachine,
    },
    ServiceControl, SocketProtector, TunnelServiceController,
};

use crate::config::{
    create_config_file, read_config_file, ConfigSetupError, TunnelServiceConfig,
};

pub(crate) enum ServiceCommand {
    Connect(oneshot::Sender<ConnectResult>),
    Disconnect(oneshot::Sender<DisconnectResult>),
    Status(oneshot::Sender<StatusResult>),
    Info(oneshot::Sender<InfoResult>),
    Ping(oneshot::Sender<Result<PingReport, PingError>>, PingArgs),
}

impl fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceCommand::Connect(_) => write!(f, "Connect"),
            ServiceCommand::Disconnect(_) => write!(f, "Disconnect"),
            ServiceCommand::Status(_) => write!(f, "Status"),
            ServiceCommand::Info(_) => write!(f, "Info"),
            ServiceCommand::Ping(_, args) => write!(f, "Ping {{ {args:?} }}"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct PingArgs {
    pub(crate) host: String,
    pub(crate) port: u16,
}

#[derive(Debug)]
pub(crate) enum ConnectResult {
    Success,
    Fail(String),
}

impl ConnectResult {
    pub(crate) fn is_success(&self) -> bool {
        matches!(self, ConnectResult::Success)
    }
}

#[derive(Debug)]
pub(crate) enum DisconnectResult {
    Success,
    Fail(String),
}

impl DisconnectResult {
    pub(crate) fn is_success(&self) -> bool {
        matches!(self, DisconnectResult::Success)
    }
}

// Respond with the current state of the tunnel service. This is almost the
// same as TunnelState, but it's conceptually not the same thing, so we keep
// them separate.
#[derive(Clone, Debug)]
pub(crate) enum StatusResult {
    NotConnected,
    Connecting,
    Connected(Box<ConnectedDetails>),
    Disconnecting,
    ConnectionFailed(String),
}

#[derive(Clone, Debug)]
pub(crate) struct ConnectedDetails {
    pub(crate) endpoint: SocketAddr,
    pub(crate) since: time::OffsetDateTime,
}

impl fmt::Display for ConnectedDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint: {}, since: {}", self.endpoint, self.since)
    }
}

impl From<TunnelState> for StatusResult {
    fn from(state: TunnelState) -> Self {
        match state {
            TunnelState::Disconnected => StatusResult::NotConnected,
            TunnelState::Connecting => StatusResult::Connecting,
            TunnelState::Connected { connection_data } => {
                StatusResult::Connected(Box::new(ConnectedDetails {
                    endpoint: connection_data.endpoint,
                    since: connection_data.connected_at,
                }))
            }
            TunnelState::Disconnecting { .. } => StatusResult::Disconnecting,
            TunnelState::Error(reason) => {
                StatusResult::ConnectionFailed(format!("Error state: {:?}", reason))
            }
        }
    }
}

impl fmt::Display for StatusResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusResult::NotConnected => write!(f, "NotConnected"),
            StatusResult::Connecting => write!(f, "Connecting"),
            StatusResult::Connected(details) => write!(f, "Connected({})", details),
            StatusResult::Disconnecting => write!(f, "Disconnecting"),
            StatusResult::ConnectionFailed(reason) => write!(f, "ConnectionFailed({})", reason),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct InfoResult {
    pub(crate) version: String,
    pub(crate) platform: String,
}

#[derive(Clone, Debug)]
pub(crate) enum TunnelStateChange {
    NotConnected,
    Connecting,
    Connected,
    Disconnecting,
    ConnectionFailed(String),
}

impl From<TunnelState> for TunnelStateChange {
    fn from(state: TunnelState) -> Self {
        match state {
            TunnelState::Disconnected => Self::NotConnected,
            TunnelState::Connecting => Self::Connecting,
            TunnelState::Connected { .. } => Self::Connected,
            TunnelState::Disconnecting { .. } => Self::Disconnecting,
            TunnelState::Error(reason) => {
                Self::ConnectionFailed(format!("Error state: {:?}", reason))
            }
        }
    }
}

pub(crate) struct TunnelService {
    // Commands from the command interface, like the socket listener that
    // relays client requests.
    command_rx: mpsc::UnboundedReceiver<ServiceCommand>,

    state_changes_tx: broadcast::Sender<TunnelStateChange>,

    // Service control seam in front of the state machine.
    controller: Arc<dyn ServiceControl>,

    // Command channel for pushing settings into the state machine.
    command_sender: mpsc::UnboundedSender<TunnelCommand>,

    // Event channel for receiving events from the state machine.
    event_receiver: mpsc::UnboundedReceiver<TunnelEvent>,

    config_file: PathBuf,

    // Last known tunnel state.
    tunnel_state: TunnelState,

    // Tunnel state machine handle.
    state_machine_handle: JoinHandle<()>,

    // Service shutdown token.
    shutdown_token: CancellationToken,
}

impl TunnelService {
    pub(crate) fn spawn(
        state_changes_tx: broadcast::Sender<TunnelStateChange>,
        command_rx: mpsc::UnboundedReceiver<ServiceCommand>,
        config_file: PathBuf,
        shutdown_token: CancellationToken,
    ) -> JoinHandle<()> {
        tracing::info!("Starting tunnel service");
        tokio::spawn(async {
            let service = TunnelService::new(state_changes_tx, command_rx, config_file, shutdown_token);
            match service.run().await {
                Ok(()) => {
                    tracing::info!("Tunnel service has successfully exited");
                }
                Err(e) => {
                    tracing::error!("Tunnel service has exited with error: {:?}", e);
                }
            }
        })
    }

    fn new(
        state_changes_tx: broadcast::Sender<TunnelStateChange>,
        command_rx: mpsc::UnboundedReceiver<ServiceCommand>,
        config_file: PathBuf,
        shutdown_token: CancellationToken,
    ) -> Self {
        let (command_sender, command_receiver) = mpsc::unbounded_channel();
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (state_watch_tx, state_watch_rx) = watch::channel(TunnelState::Disconnected);

        let protector = SocketProtector::default();

        let state_machine_handle = TunnelStateMachine::spawn(
            command_receiver,
            event_sender,
            state_watch_tx,
            TunnelSettings::default(),
            protector.clone(),
            shutdown_token.child_token(),
        );

        let controller: Arc<dyn ServiceControl> = Arc::new(TunnelServiceController::new(
            command_sender.clone(),
            state_watch_rx,
            protector,
        ));

        Self {
            command_rx,
            state_changes_tx,
            controller,
            command_sender,
            event_receiver,
            config_file,
            tunnel_state: TunnelState::Disconnected,
            state_machine_handle,
            shutdown_token,
        }
    }

    async fn run(mut self) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                Some(command) = self.command_rx.recv() => {
                    tracing::debug!("Received command: {command}");
                    self.handle_service_command(command).await;
                }
                Some(event) = self.event_receiver.recv() => {
                    match event {
                        TunnelEvent::NewState(new_state) => {
                            self.tunnel_state = new_state.clone();
                            let state_change = TunnelStateChange::from(new_state);
                            if let Err(e) = self.state_changes_tx.send(state_change) {
                                tracing::debug!("No listeners for state change: {}", e);
                            }
                        }
                    }
                }
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Received shutdown signal");
                    break;
                }
                else => {
                    tracing::warn!("Event loop is interrupted");
                    break;
                }
            }
        }

        tracing::info!("Exiting tunnel service run loop");

        if let Err(e) = self.state_machine_handle.await {
            tracing::error!("Failed to join on state machine handle: {}", e);
        }

        Ok(())
    }

    async fn handle_service_command(&mut self, command: ServiceCommand) {
        match command {
            ServiceCommand::Connect(tx) => {
                let result = self.handle_connect().await;
                let _ = tx.send(result);
            }
            ServiceCommand::Disconnect(tx) => {
                let result = self.handle_disconnect().await;
                let _ = tx.send(result);
            }
            ServiceCommand::Status(tx) => {
                let result = self.handle_status().await;
                let _ = tx.send(result);
            }
            ServiceCommand::Info(tx) => {
                let result = self.handle_info().await;
                let _ = tx.send(result);
            }
            ServiceCommand::Ping(tx, args) => {
                // Probing can take several seconds, keep the command loop
                // responsive while it runs.
                tokio::spawn(async move {
                    let result =
                        pinger::probe_host(&args.host, args.port, PingOptions::default()).await;
                    let _ = tx.send(result);
                });
            }
        }
    }

    fn try_setup_config(&self) -> Result<TunnelServiceConfig, ConfigSetupError> {
        // If the config file does not exist, create it
        let config = if self.config_file.exists() {
            read_config_file(&self.config_file)
                .map_err(|err| {
                    tracing::error!("Failed to read config file, using defaults: {err}");
                })
                .unwrap_or_default()
        } else {
            create_config_file(&self.config_file, TunnelServiceConfig::default())?
        };
        Ok(config)
    }

    async fn handle_connect(&mut self) -> ConnectResult {
        let config = match self.try_setup_config() {
            Ok(config) => config,
            Err(err) => {
                return ConnectResult::Fail(err.to_string());
            }
        };
        tracing::info!("Using config: {}", config);

        let tunnel_settings = TunnelSettings::from(&config);
        if self
            .command_sender
            .send(TunnelCommand::SetTunnelSettings(tunnel_settings))
            .is_err()
        {
            tracing::error!("Failed to send tunnel settings to the state machine");
            return ConnectResult::Fail("Internal error".to_owned());
        }

        self.controller.start_service();
        match self.controller.service_handle() {
            Some(_) => ConnectResult::Success,
            None => ConnectResult::Fail("Tunnel state machine is not running".to_owned()),
        }
    }

    async fn handle_disconnect(&mut self) -> DisconnectResult {
        self.controller.stop_service();
        match self.controller.service_handle() {
            Some(_) => DisconnectResult::Success,
            None => DisconnectResult::Fail("Tunnel state machine is not running".to_owned()),
        }
    }

    async fn handle_status(&self) -> StatusResult {
        StatusResult::from(self.tunnel_state.clone())
    }

    async fn handle_info(&self) -> InfoResult {
        // Construct the platform string similar to how user agents are
        // constructed in web browsers
        let name = System::name().unwrap_or("unknown".to_string());
        let os_long = System::long_os_version().unwrap_or("unknown".to_string());
        let arch = System::cpu_arch().unwrap_or("unknown".to_string());

        InfoResult {
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: format!("{}; {}; {}", name, os_long, arch),
        }
    }
}
