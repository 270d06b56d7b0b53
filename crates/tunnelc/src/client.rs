// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::path::{Path, PathBuf};

use anyhow::Context;
use tokio::net::UnixStream;

use tunnel_proto::{read_message, write_message, Request, Response};

const DEFAULT_SOCKET_PATH: &str = "/var/run/tunneld.socket";

pub(crate) fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

pub(crate) async fn connect(socket_path: &Path) -> anyhow::Result<UnixStream> {
    UnixStream::connect(socket_path).await.with_context(|| {
        format!(
            "failed to connect to the daemon at {} (is tunneld running?)",
            socket_path.display()
        )
    })
}

pub(crate) async fn send_request(
    socket_path: &Path,
    request: Request,
) -> anyhow::Result<Response> {
    let mut stream = connect(socket_path).await?;
    write_message(&mut stream, &request)
        .await
        .context("failed to send request to the daemon")?;
    read_message(&mut stream)
        .await
        .context("failed to read response from the daemon")
}
