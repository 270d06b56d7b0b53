// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::tunnel_state_machine::{
    states::{ConnectedState, DisconnectingState, ErrorState},
    tunnel_monitor::{TunnelMonitor, TunnelMonitorEvent, TunnelMonitorHandle},
    ActionAfterDisconnect, NextTunnelState, SharedState, TunnelCommand, TunnelState,
    TunnelStateHandler,
};

pub struct ConnectingState {
    monitor_handle: TunnelMonitorHandle,
    monitor_event_receiver: mpsc::UnboundedReceiver<TunnelMonitorEvent>,
}

impl ConnectingState {
    pub fn enter(shared_state: &mut SharedState) -> (Box<dyn TunnelStateHandler>, TunnelState) {
        let (monitor_event_sender, monitor_event_receiver) = mpsc::unbounded_channel();
        let monitor_handle = TunnelMonitor::start(
            monitor_event_sender,
            shared_state.tunnel_settings.clone(),
            shared_state.protector.clone(),
        );

        (
            Box::new(Self {
                monitor_handle,
                monitor_event_receiver,
            }),
            TunnelState::Connecting,
        )
    }
}

#[async_trait::async_trait]
impl TunnelStateHandler for ConnectingState {
    async fn handle_event(
        mut self: Box<Self>,
        shutdown_token: &CancellationToken,
        command_rx: &'async_trait mut mpsc::UnboundedReceiver<TunnelCommand>,
        shared_state: &'async_trait mut SharedState,
    ) -> NextTunnelState {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                NextTunnelState::NewState(DisconnectingState::enter(
                    ActionAfterDisconnect::Nothing,
                    self.monitor_handle,
                ))
            }
            Some(monitor_event) = self.monitor_event_receiver.recv() => {
                match monitor_event {
                    TunnelMonitorEvent::Up(connection_data) => {
                        NextTunnelState::NewState(ConnectedState::enter(
                            connection_data,
                            self.monitor_handle,
                            self.monitor_event_receiver,
                        ))
                    }
                    TunnelMonitorEvent::Down(reason) => {
                        NextTunnelState::NewState(ErrorState::enter(reason))
                    }
                }
            }
            Some(command) = command_rx.recv() => {
                match command {
                    TunnelCommand::Connect => NextTunnelState::SameState(self),
                    TunnelCommand::Disconnect => {
                        NextTunnelState::NewState(DisconnectingState::enter(
                            ActionAfterDisconnect::Nothing,
                            self.monitor_handle,
                        ))
                    },
                    TunnelCommand::SetTunnelSettings(tunnel_settings) => {
                        if shared_state.tunnel_settings == tunnel_settings {
                            NextTunnelState::SameState(self)
                        } else {
                            shared_state.tunnel_settings = tunnel_settings;
                            NextTunnelState::NewState(DisconnectingState::enter(
                                ActionAfterDisconnect::Reconnect,
                                self.monitor_handle,
                            ))
                        }
                    }
                }
            }
            else => NextTunnelState::Finished
        }
    }
}
