// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    fs,
    path::{Path, PathBuf},
};

use tokio::{
    net::UnixListener,
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::connection_handler::CommandInterfaceConnectionHandler;
use crate::service::{ServiceCommand, TunnelStateChange};

pub(crate) fn start_command_interface(
    state_changes_tx: broadcast::Sender<TunnelStateChange>,
    socket_path: PathBuf,
    shutdown_token: CancellationToken,
) -> (JoinHandle<()>, mpsc::UnboundedReceiver<ServiceCommand>) {
    // Channel to send commands to the tunnel service
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let command_interface = CommandInterface::new(command_tx, state_changes_tx, &socket_path);
        if let Err(err) = command_interface.listen(shutdown_token).await {
            error!("Command interface exited with error: {err}");
        }
    });

    (handle, command_rx)
}

struct CommandInterface {
    command_tx: mpsc::UnboundedSender<ServiceCommand>,
    state_changes_tx: broadcast::Sender<TunnelStateChange>,
    socket_path: PathBuf,
}

impl CommandInterface {
    fn new(
        command_tx: mpsc::UnboundedSender<ServiceCommand>,
        state_changes_tx: broadcast::Sender<TunnelStateChange>,
        socket_path: &Path,
    ) -> Self {
        Self {
            command_tx,
            state_changes_tx,
            socket_path: socket_path.to_path_buf(),
        }
    }

    async fn listen(self, shutdown_token: CancellationToken) -> std::io::Result<()> {
        self.remove_previous_socket_file();
        if let Some(parent) = self.socket_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(
            "Command interface listening on {}",
            self.socket_path.display()
        );

        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    info!("Shutting down command interface");
                    break;
                }
                result = listener.accept() => match result {
                    Ok((socket, _)) => {
                        let handler = CommandInterfaceConnectionHandler::new(
                            self.command_tx.clone(),
                            self.state_changes_tx.clone(),
                        );
                        tokio::spawn(async move { handler.handle(socket).await });
                    }
                    Err(err) => {
                        warn!("Failed to accept connection: {err}");
                    }
                }
            }
        }

        Ok(())
    }

    fn remove_previous_socket_file(&self) {
        match fs::remove_file(&self.socket_path) {
            Ok(_) => info!(
                "Removed previous command interface socket: {}",
                self.socket_path.display()
            ),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                error!("Failed to remove previous command interface socket: {err}");
            }
        }
    }
}

impl Drop for CommandInterface {
    fn drop(&mut self) {
        self.remove_previous_socket_file();
    }
}
