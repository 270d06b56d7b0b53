// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[clap(author = "Nymtech", version, about)]
pub(crate) struct CliArgs {
    /// Path of the unix socket the daemon listens on.
    #[arg(long)]
    pub(crate) socket_path: Option<PathBuf>,

    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Start the tunnel.
    Connect,
    /// Stop the tunnel.
    Disconnect,
    /// Get the current status of the tunnel.
    Status,
    /// Get info about the running daemon. Things like version and platform.
    Info,
    /// Measure reachability and latency of a host.
    Ping(PingArgs),
    /// Stream tunnel state changes until interrupted.
    ListenToStateChanges,
}

#[derive(Args)]
pub(crate) struct PingArgs {
    /// Host name or IP address to probe.
    pub(crate) host: String,

    /// Port used for the TCP probe.
    #[arg(long, default_value_t = 80)]
    pub(crate) port: u16,
}
