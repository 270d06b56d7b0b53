// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

mod states;
mod tunnel_monitor;

use std::{net::SocketAddr, time::Duration};

use states::DisconnectedState;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::protect::SocketProtector;

#[async_trait::async_trait]
trait TunnelStateHandler: Send {
    async fn handle_event(
        mut self: Box<Self>,
        shutdown_token: &CancellationToken,
        command_rx: &'async_trait mut mpsc::UnboundedReceiver<TunnelCommand>,
        shared_state: &'async_trait mut SharedState,
    ) -> NextTunnelState;
}

enum NextTunnelState {
    NewState((Box<dyn TunnelStateHandler>, TunnelState)),
    SameState(Box<dyn TunnelStateHandler>),
    Finished,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelCommand {
    Connect,
    Disconnect,
    SetTunnelSettings(TunnelSettings),
}

/// Settings for the upstream tunnel connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    pub endpoint: SocketAddr,
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    pub max_keepalive_failures: u32,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            endpoint: SocketAddr::from(([127, 0, 0, 1], 1080)),
            connect_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(30),
            max_keepalive_failures: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionData {
    pub endpoint: SocketAddr,
    pub connected_at: time::OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStateReason {
    EstablishFailure,
    TunnelDown,
    KeepaliveFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionAfterDisconnect {
    Nothing,
    Error(ErrorStateReason),
    Reconnect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelState {
    Disconnected,
    Connecting,
    Connected { connection_data: ConnectionData },
    Disconnecting { after_disconnect: ActionAfterDisconnect },
    Error(ErrorStateReason),
}

#[derive(Debug)]
pub enum TunnelEvent {
    NewState(TunnelState),
}

struct SharedState {
    tunnel_settings: TunnelSettings,
    protector: SocketProtector,
}

pub struct TunnelStateMachine {
    current_state_handler: Box<dyn TunnelStateHandler>,
    command_receiver: mpsc::UnboundedReceiver<TunnelCommand>,
    event_sender: mpsc::UnboundedSender<TunnelEvent>,
    state_watch_tx: watch::Sender<TunnelState>,
    shared_state: SharedState,
    shutdown_token: CancellationToken,
}

impl TunnelStateMachine {
    pub fn spawn(
        command_receiver: mpsc::UnboundedReceiver<TunnelCommand>,
        event_sender: mpsc::UnboundedSender<TunnelEvent>,
        state_watch_tx: watch::Sender<TunnelState>,
        tunnel_settings: TunnelSettings,
        protector: SocketProtector,
        shutdown_token: CancellationToken,
    ) -> JoinHandle<()> {
        let (current_state_handler, _) = DisconnectedState::enter();

        let tunnel_state_machine = Self {
            current_state_handler,
            command_receiver,
            event_sender,
            state_watch_tx,
            shared_state: SharedState {
                tunnel_settings,
                protector,
            },
            shutdown_token,
        };

        tokio::spawn(tunnel_state_machine.run())
    }

    async fn run(mut self) {
        loop {
            let next_state = self
                .current_state_handler
                .handle_event(
                    &self.shutdown_token,
                    &mut self.command_receiver,
                    &mut self.shared_state,
                )
                .await;

            match next_state {
                NextTunnelState::NewState((new_state_handler, new_state)) => {
                    self.current_state_handler = new_state_handler;

                    tracing::debug!("New tunnel state: {:?}", new_state);
                    let _ = self.state_watch_tx.send(new_state.clone());
                    let _ = self.event_sender.send(TunnelEvent::NewState(new_state));
                }
                NextTunnelState::SameState(same_state) => {
                    self.current_state_handler = same_state;
                }
                NextTunnelState::Finished => break,
            }
        }

        tracing::debug!("Tunnel state machine exited");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    struct TestMachine {
        command_tx: mpsc::UnboundedSender<TunnelCommand>,
        event_rx: mpsc::UnboundedReceiver<TunnelEvent>,
        shutdown_token: CancellationToken,
        handle: JoinHandle<()>,
    }

    impl TestMachine {
        fn spawn(tunnel_settings: TunnelSettings) -> Self {
            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let (state_watch_tx, _state_watch_rx) = watch::channel(TunnelState::Disconnected);
            let shutdown_token = CancellationToken::new();
            let handle = TunnelStateMachine::spawn(
                command_rx,
                event_tx,
                state_watch_tx,
                tunnel_settings,
                SocketProtector::default(),
                shutdown_token.clone(),
            );
            Self {
                command_tx,
                event_rx,
                shutdown_token,
                handle,
            }
        }

        async fn next_state(&mut self) -> TunnelState {
            let event = tokio::time::timeout(Duration::from_secs(5), self.event_rx.recv())
                .await
                .expect("timed out waiting for a state change")
                .expect("event channel closed");
            let TunnelEvent::NewState(state) = event;
            state
        }

        async fn shutdown(self) {
            self.shutdown_token.cancel();
            tokio::time::timeout(Duration::from_secs(5), self.handle)
                .await
                .expect("timed out waiting for the state machine to exit")
                .expect("state machine panicked");
        }
    }

    fn settings_for(endpoint: SocketAddr) -> TunnelSettings {
        TunnelSettings {
            endpoint,
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(3600),
            max_keepalive_failures: 3,
        }
    }

    #[tokio::test]
    async fn connect_and_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut machine = TestMachine::spawn(settings_for(listener.local_addr().unwrap()));

        machine.command_tx.send(TunnelCommand::Connect).unwrap();
        assert_eq!(machine.next_state().await, TunnelState::Connecting);
        assert!(matches!(
            machine.next_state().await,
            TunnelState::Connected { .. }
        ));

        machine.command_tx.send(TunnelCommand::Disconnect).unwrap();
        assert_eq!(
            machine.next_state().await,
            TunnelState::Disconnecting {
                after_disconnect: ActionAfterDisconnect::Nothing
            }
        );
        assert_eq!(machine.next_state().await, TunnelState::Disconnected);

        machine.shutdown().await;
    }

    #[tokio::test]
    async fn redundant_commands_are_absorbed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut machine = TestMachine::spawn(settings_for(listener.local_addr().unwrap()));

        // Disconnect while already disconnected does not change state.
        machine.command_tx.send(TunnelCommand::Disconnect).unwrap();

        machine.command_tx.send(TunnelCommand::Connect).unwrap();
        assert_eq!(machine.next_state().await, TunnelState::Connecting);
        assert!(matches!(
            machine.next_state().await,
            TunnelState::Connected { .. }
        ));

        // Connect while already connected does not change state either.
        machine.command_tx.send(TunnelCommand::Connect).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            machine.event_rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));

        machine.shutdown().await;
    }

    #[tokio::test]
    async fn failed_connect_enters_error_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = listener.local_addr().unwrap();
        drop(listener);

        let mut machine = TestMachine::spawn(settings_for(endpoint));

        machine.command_tx.send(TunnelCommand::Connect).unwrap();
        assert_eq!(machine.next_state().await, TunnelState::Connecting);
        assert_eq!(
            machine.next_state().await,
            TunnelState::Error(ErrorStateReason::EstablishFailure)
        );

        // The error state is left via an explicit disconnect.
        machine.command_tx.send(TunnelCommand::Disconnect).unwrap();
        assert_eq!(machine.next_state().await, TunnelState::Disconnected);

        machine.shutdown().await;
    }

    #[tokio::test]
    async fn peer_close_is_detected() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut machine = TestMachine::spawn(settings_for(listener.local_addr().unwrap()));

        machine.command_tx.send(TunnelCommand::Connect).unwrap();
        assert_eq!(machine.next_state().await, TunnelState::Connecting);
        assert!(matches!(
            machine.next_state().await,
            TunnelState::Connected { .. }
        ));

        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);
        drop(listener);

        assert_eq!(
            machine.next_state().await,
            TunnelState::Disconnecting {
                after_disconnect: ActionAfterDisconnect::Error(ErrorStateReason::TunnelDown)
            }
        );
        assert_eq!(
            machine.next_state().await,
            TunnelState::Error(ErrorStateReason::TunnelDown)
        );

        machine.shutdown().await;
    }

    #[tokio::test]
    async fn settings_change_triggers_reconnect() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let second = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut machine = TestMachine::spawn(settings_for(first.local_addr().unwrap()));

        machine.command_tx.send(TunnelCommand::Connect).unwrap();
        assert_eq!(machine.next_state().await, TunnelState::Connecting);
        assert!(matches!(
            machine.next_state().await,
            TunnelState::Connected { .. }
        ));

        let new_settings = settings_for(second.local_addr().unwrap());
        machine
            .command_tx
            .send(TunnelCommand::SetTunnelSettings(new_settings.clone()))
            .unwrap();

        assert_eq!(
            machine.next_state().await,
            TunnelState::Disconnecting {
                after_disconnect: ActionAfterDisconnect::Reconnect
            }
        );
        assert_eq!(machine.next_state().await, TunnelState::Connecting);
        match machine.next_state().await {
            TunnelState::Connected { connection_data } => {
                assert_eq!(connection_data.endpoint, new_settings.endpoint);
            }
            state => panic!("unexpected state: {state:?}"),
        }

        machine.shutdown().await;
    }
}
