// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::tunnel_state_machine::{
    states::DisconnectingState,
    tunnel_monitor::{TunnelMonitorEvent, TunnelMonitorHandle},
    ActionAfterDisconnect, ConnectionData, ErrorStateReason, NextTunnelState, SharedState,
    TunnelCommand, TunnelState, TunnelStateHandler,
};

pub struct ConnectedState {
    monitor_handle: TunnelMonitorHandle,
    monitor_event_receiver: mpsc::UnboundedReceiver<TunnelMonitorEvent>,
}

impl ConnectedState {
    pub fn enter(
        connection_data: ConnectionData,
        monitor_handle: TunnelMonitorHandle,
        monitor_event_receiver: mpsc::UnboundedReceiver<TunnelMonitorEvent>,
    ) -> (Box<dyn TunnelStateHandler>, TunnelState) {
        (
            Box::new(Self {
                monitor_handle,
                monitor_event_receiver,
            }),
            TunnelState::Connected { connection_data },
        )
    }
}

#[async_trait::async_trait]
impl TunnelStateHandler for ConnectedState {
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
            monitor_event = self.monitor_event_receiver.recv() => {
                match monitor_event {
                    Some(TunnelMonitorEvent::Down(reason)) => {
                        NextTunnelState::NewState(DisconnectingState::enter(
                            ActionAfterDisconnect::Error(reason),
                            self.monitor_handle,
                        ))
                    }
                    Some(TunnelMonitorEvent::Up(_)) => NextTunnelState::SameState(self),
                    None => {
                        tracing::info!("Tunnel went down unexpectedly.");
                        NextTunnelState::NewState(DisconnectingState::enter(
                            ActionAfterDisconnect::Error(ErrorStateReason::TunnelDown),
                            self.monitor_handle,
                        ))
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
