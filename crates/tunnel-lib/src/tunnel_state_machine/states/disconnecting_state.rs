use futures::future::{Fuse, FutureExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::tunnel_state_machine::{
    states::{ConnectingState, DisconnectedState, ErrorState},
    tunnel_monitor::TunnelMonitorHandle,
    ActionAfterDisconnect, NextTunnelState, SharedState, TunnelCommand, TunnelState,
    TunnelStateHandler,
};

pub struct DisconnectingState {
    after_disconnect: ActionAfterDisconnect,
    wait_handle: Fuse<JoinHandle<()>>,
}

impl DisconnectingState {
    pub fn enter(
        after_disconnect: ActionAfterDisconnect,
        monitor_handle: TunnelMonitorHandle,
    ) -> (Box<dyn TunnelStateHandler>, TunnelState) {
        monitor_handle.cancel();
        let wait_handle = monitor_handle.into_join_handle().fuse();

        (
            Box::new(Self {
                after_disconnect,
                wait_handle,
            }),
            TunnelState::Disconnecting { after_disconnect },
        )
    }

    fn next_state(
        after_disconnect: ActionAfterDisconnect,
        shared_state: &mut SharedState,
    ) -> NextTunnelState {
        match after_disconnect {
            ActionAfterDisconnect::Nothing => NextTunnelState::NewState(DisconnectedState::enter()),
            ActionAfterDisconnect::Error(reason) => {
                NextTunnelState::NewState(ErrorState::enter(reason))
            }
            ActionAfterDisconnect::Reconnect => {
                NextTunnelState::NewState(ConnectingState::enter(shared_state))
            }
        }
    }
}

#[async_trait::async_trait]
impl TunnelStateHandler for DisconnectingState {
    async fn handle_event(
        mut self: Box<Self>,
        shutdown_token: &CancellationToken,
        command_rx: &'async_trait mut mpsc::UnboundedReceiver<TunnelCommand>,
        shared_state: &'async_trait mut SharedState,
    ) -> NextTunnelState {
        tokio::select! {
            _ = shutdown_token.cancelled() => {
                if let Err(e) = (&mut self.wait_handle).await {
                    tracing::error!("Failed to join on tunnel monitor: {e}");
                }
                NextTunnelState::NewState(DisconnectedState::enter())
            }
            result = (&mut self.wait_handle) => {
                if let Err(e) = result {
                    tracing::error!("Failed to join on tunnel monitor: {e}");
                }
                Self::next_state(self.after_disconnect, shared_state)
            }
            Some(command) = command_rx.recv() => {
                match command {
                    TunnelCommand::Connect => {
                        self.after_disconnect = ActionAfterDisconnect::Reconnect;
                    },
                    TunnelCommand::Disconnect => {
                        self.after_disconnect = ActionAfterDisconnect::Nothing;
                    },
                    TunnelCommand::SetTunnelSettings(tunnel_settings) => {
                        shared_state.tunnel_settings = tunnel_settings;
                    }
                }
                NextTunnelState::SameState(self)
            }
            else => NextTunnelState::Finished
        }
    }
}
