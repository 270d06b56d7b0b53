// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

//! Capability contract between the background tunnel service and its host.

use std::os::fd::RawFd;

use tokio::sync::{mpsc, watch};

use crate::{
    protect::SocketProtector,
    tunnel_state_machine::{TunnelCommand, TunnelState},
};

/// The capability set a background tunnel service exposes so a caller can
/// control it without knowing its concrete type.
///
/// Lifecycle requests are fire-and-forget: [`start_service`] and
/// [`stop_service`] return nothing, and their outcome is observed through
/// [`service_handle`] and the state it exposes. Repeated start or stop
/// requests are absorbed by the running service. All operations are
/// non-blocking and safe to call from any thread.
///
/// [`start_service`]: ServiceControl::start_service
/// [`stop_service`]: ServiceControl::stop_service
/// [`service_handle`]: ServiceControl::service_handle
pub trait ServiceControl: Send + Sync {
    /// Exclude a socket from tunneled routing, returning whether the
    /// platform accepted the exclusion.
    fn protect_socket(&self, socket: RawFd) -> bool;

    /// The handle of the running service, or `None` when the service has
    /// shut down.
    fn service_handle(&self) -> Option<ServiceHandle>;

    /// Request the service to establish the tunnel.
    fn start_service(&self);

    /// Request the service to tear the tunnel down.
    fn stop_service(&self);
}

/// Opaque reference to a running tunnel service.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    command_sender: mpsc::UnboundedSender<TunnelCommand>,
    state_rx: watch::Receiver<TunnelState>,
}

impl ServiceHandle {
    /// Last known tunnel state.
    pub fn state(&self) -> TunnelState {
        self.state_rx.borrow().clone()
    }

    /// Whether the underlying service has stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.command_sender.is_closed()
    }
}

/// Concrete [`ServiceControl`] adapter sitting in front of the tunnel state
/// machine.
pub struct TunnelServiceController {
    command_sender: mpsc::UnboundedSender<TunnelCommand>,
    state_rx: watch::Receiver<TunnelState>,
    protector: SocketProtector,
}

impl TunnelServiceController {
    pub fn new(
        command_sender: mpsc::UnboundedSender<TunnelCommand>,
        state_rx: watch::Receiver<TunnelState>,
        protector: SocketProtector,
    ) -> Self {
        Self {
            command_sender,
            state_rx,
            protector,
        }
    }

    fn send_command(&self, command: TunnelCommand) {
        if self.command_sender.send(command).is_err() {
            tracing::error!("Tunnel state machine is no longer running");
        }
    }
}

impl ServiceControl for TunnelServiceController {
    fn protect_socket(&self, socket: RawFd) -> bool {
        match self.protector.protect(socket) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("Failed to protect socket {socket}: {err}");
                false
            }
        }
    }

    fn service_handle(&self) -> Option<ServiceHandle> {
        if self.command_sender.is_closed() {
            return None;
        }
        Some(ServiceHandle {
            command_sender: self.command_sender.clone(),
            state_rx: self.state_rx.clone(),
        })
    }

    fn start_service(&self) {
        self.send_command(TunnelCommand::Connect);
    }

    fn stop_service(&self) {
        self.send_command(TunnelCommand::Disconnect);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };

    use tokio::net::TcpListener;
    use tokio_util::sync::CancellationToken;

    use crate::tunnel_state_machine::{TunnelEvent, TunnelSettings, TunnelStateMachine};

    async fn next_state(event_rx: &mut mpsc::UnboundedReceiver<TunnelEvent>) -> TunnelState {
        let event = tokio::time::timeout(Duration::from_secs(5), event_rx.recv())
            .await
            .expect("timed out waiting for a state change")
            .expect("event channel closed");
        let TunnelEvent::NewState(state) = event;
        state
    }

    // Minimal conforming implementer, checking the contract shapes without
    // a tunnel behind them.
    struct MockService {
        running: AtomicBool,
    }

    impl ServiceControl for MockService {
        fn protect_socket(&self, socket: RawFd) -> bool {
            socket >= 0
        }

        fn service_handle(&self) -> Option<ServiceHandle> {
            None
        }

        fn start_service(&self) {
            self.running.store(true, Ordering::SeqCst);
        }

        fn stop_service(&self) {
            self.running.store(false, Ordering::SeqCst);
        }
    }

    #[test]
    fn protect_socket_depends_only_on_its_input() {
        let service = MockService {
            running: AtomicBool::new(false),
        };
        let service: &dyn ServiceControl = &service;

        assert_eq!(service.protect_socket(3), service.protect_socket(3));
        assert!(!service.protect_socket(-1));
        assert!(!service.protect_socket(-1));
    }

    #[test]
    fn lifecycle_requests_have_no_return_value() {
        let service = MockService {
            running: AtomicBool::new(false),
        };

        service.start_service();
        assert!(service.running.load(Ordering::SeqCst));
        service.stop_service();
        assert!(!service.running.load(Ordering::SeqCst));
        assert!(service.service_handle().is_none());
    }

    #[tokio::test]
    async fn controller_drives_the_state_machine() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let tunnel_settings = TunnelSettings {
            endpoint: listener.local_addr().unwrap(),
            connect_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(3600),
            max_keepalive_failures: 3,
        };

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let (state_watch_tx, state_watch_rx) = watch::channel(TunnelState::Disconnected);
        let shutdown_token = CancellationToken::new();

        let machine_handle = TunnelStateMachine::spawn(
            command_rx,
            event_tx,
            state_watch_tx,
            tunnel_settings,
            SocketProtector::default(),
            shutdown_token.clone(),
        );

        let controller =
            TunnelServiceController::new(command_tx, state_watch_rx, SocketProtector::default());

        let handle = controller.service_handle().expect("service is running");
        assert_eq!(handle.state(), TunnelState::Disconnected);

        controller.start_service();
        assert_eq!(next_state(&mut event_rx).await, TunnelState::Connecting);
        assert!(matches!(
            next_state(&mut event_rx).await,
            TunnelState::Connected { .. }
        ));
        assert!(matches!(handle.state(), TunnelState::Connected { .. }));

        controller.stop_service();
        assert!(matches!(
            next_state(&mut event_rx).await,
            TunnelState::Disconnecting { .. }
        ));
        assert_eq!(next_state(&mut event_rx).await, TunnelState::Disconnected);

        shutdown_token.cancel();
        tokio::time::timeout(Duration::from_secs(5), machine_handle)
            .await
            .expect("timed out waiting for the state machine to exit")
            .expect("state machine panicked");

        assert!(controller.service_handle().is_none());
        assert!(handle.is_closed());
    }
}
