// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::path::Path;

use anyhow::{bail, Result};
use clap::Parser;

use tunnel_proto::{read_message, write_message, PingRequest, Request, Response};

use crate::cli::Command;

mod cli;
mod client;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::CliArgs::parse();
    let socket_path = args
        .socket_path
        .clone()
        .unwrap_or_else(client::default_socket_path);

    match args.command {
        Command::Connect => connect(&socket_path).await?,
        Command::Disconnect => disconnect(&socket_path).await?,
        Command::Status => status(&socket_path).await?,
        Command::Info => info(&socket_path).await?,
        Command::Ping(ref ping_args) => ping(&socket_path, ping_args).await?,
        Command::ListenToStateChanges => listen_to_state_changes(&socket_path).await?,
    }
    Ok(())
}

async fn connect(socket_path: &Path) -> Result<()> {
    let response = client::send_request(socket_path, Request::Connect).await?;
    match response {
        Response::Connect(response) => {
            if response.success {
                println!("Tunnel start requested");
            } else {
                bail!("Failed to start the tunnel");
            }
        }
        response => bail!("Unexpected response: {response:?}"),
    }
    Ok(())
}

async fn disconnect(socket_path: &Path) -> Result<()> {
    let response = client::send_request(socket_path, Request::Disconnect).await?;
    match response {
        Response::Disconnect(response) => {
            if response.success {
                println!("Tunnel stop requested");
            } else {
                bail!("Failed to stop the tunnel");
            }
        }
        response => bail!("Unexpected response: {response:?}"),
    }
    Ok(())
}

async fn status(socket_path: &Path) -> Result<()> {
    let response = client::send_request(socket_path, Request::Status).await?;
    match response {
        Response::Status(status) => {
            println!("Status: {}", status.status);
            if let Some(details) = status.details {
                println!("Endpoint: {}", details.endpoint);
                println!("Connected since (unix): {}", details.connected_at_unix);
            }
            if let Some(error) = status.error {
                println!("Error: {error}");
            }
        }
        response => bail!("Unexpected response: {response:?}"),
    }
    Ok(())
}

async fn info(socket_path: &Path) -> Result<()> {
    let response = client::send_request(socket_path, Request::Info).await?;
    match response {
        Response::Info(info) => {
            println!("Version: {}", info.version);
            println!("Platform: {}", info.platform);
        }
        response => bail!("Unexpected response: {response:?}"),
    }
    Ok(())
}

async fn ping(socket_path: &Path, ping_args: &cli::PingArgs) -> Result<()> {
    let request = Request::Ping(PingRequest {
        host: ping_args.host.clone(),
        port: ping_args.port,
    });
    let response = client::send_request(socket_path, request).await?;
    match response {
        Response::Ping(result) => {
            if result.success {
                let latency_ms = result.latency_ms.unwrap_or_default();
                println!(
                    "{} reachable via {} in {} ms",
                    ping_args.host, result.method, latency_ms
                );
            } else {
                println!(
                    "{} unreachable: {}",
                    ping_args.host,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
        }
        Response::Error(error) => bail!("Ping failed: {}", error.message),
        response => bail!("Unexpected response: {response:?}"),
    }
    Ok(())
}

async fn listen_to_state_changes(socket_path: &Path) -> Result<()> {
    let mut stream = client::connect(socket_path).await?;
    write_message(&mut stream, &Request::ListenToStateChanges).await?;
    println!("Listening to state changes, press Ctrl-C to stop");

    loop {
        let response: Response = match read_message(&mut stream).await {
            Ok(response) => response,
            Err(tunnel_proto::ProtocolError::ConnectionClosed) => {
                println!("Daemon closed the connection");
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        };
        match response {
            Response::StateChange(status) => {
                println!("State: {}", status.status);
                if let Some(error) = status.error {
                    println!("Error: {error}");
                }
            }
            response => bail!("Unexpected response: {response:?}"),
        }
    }
}
