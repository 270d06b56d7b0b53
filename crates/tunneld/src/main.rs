// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

mod cli;
mod command_interface;
mod config;
mod logging;
mod runtime;
mod service;
mod shutdown_handler;

use clap::Parser;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::{cli::CliArgs, service::TunnelService};

fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _worker_guard = logging::setup_logging(args.log_to_file);
    runtime::new_runtime().block_on(run(args))
}

async fn run(args: CliArgs) -> anyhow::Result<()> {
    let config_file = args
        .config_file
        .clone()
        .unwrap_or_else(|| config::config_dir().join(config::DEFAULT_CONFIG_FILE));
    let socket_path = args
        .socket_path
        .clone()
        .unwrap_or_else(config::default_socket_path);

    let (state_changes_tx, _) = broadcast::channel(10);
    let shutdown_token = CancellationToken::new();

    let (command_handle, command_rx) = command_interface::start_command_interface(
        state_changes_tx.clone(),
        socket_path,
        shutdown_token.child_token(),
    );

    let service_handle = TunnelService::spawn(
        state_changes_tx,
        command_rx,
        config_file,
        shutdown_token.child_token(),
    );

    let mut shutdown_join_set = shutdown_handler::install(shutdown_token);

    if let Err(e) = service_handle.await {
        tracing::error!("Failed to join on tunnel service: {}", e);
    }

    if let Err(e) = command_handle.await {
        tracing::error!("Failed to join on command interface: {}", e);
    }

    shutdown_join_set.shutdown().await;

    Ok(())
}
