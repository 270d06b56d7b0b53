// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Clone, Debug)]
#[clap(author = "Nymtech", version, about)]
pub(crate) struct CliArgs {
    /// Path to the TOML config file describing the tunnel endpoint.
    #[arg(short, long, value_parser = check_path)]
    pub(crate) config_file: Option<PathBuf>,

    /// Path of the unix socket the command interface listens on.
    #[arg(long)]
    pub(crate) socket_path: Option<PathBuf>,

    /// Log to a file in the log directory instead of stderr.
    #[arg(long)]
    pub(crate) log_to_file: bool,
}

fn check_path(path: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path);
    if !path.exists() {
        return Err(format!("Path {:?} does not exist", path));
    }
    if !path.is_file() {
        return Err(format!("Path {:?} is not a file", path));
    }
    Ok(path)
}
