// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

//! Wire framing for the command socket.
//!
//! Messages are length-prefixed bincode:
//!
//! ```text
//! [4 bytes: message length (big-endian u32)]
//! [N bytes: bincode-serialized message]
//! ```

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single message. Requests and responses are tiny; this
/// mostly guards against garbage length prefixes.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("connection closed")]
    ConnectionClosed,
}

pub async fn write_message<T, W>(writer: &mut W, message: &T) -> Result<(), ProtocolError>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let bytes = bincode::serialize(message)?;
    if bytes.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: bytes.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    writer.write_all(&(bytes.len() as u32).to_be_bytes()).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<T, R>(reader: &mut R) -> Result<T, ProtocolError>
where
    T: DeserializeOwned,
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    if let Err(err) = reader.read_exact(&mut len_bytes).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(ProtocolError::ConnectionClosed);
        }
        return Err(err.into());
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = vec![0u8; len];
    if let Err(err) = reader.read_exact(&mut buf).await {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Err(ProtocolError::ConnectionClosed);
        }
        return Err(err.into());
    }
    Ok(bincode::deserialize(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{ConnectionStatus, Request, Response, StatusResponse};

    #[tokio::test]
    async fn round_trip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        write_message(&mut client, &Request::Status).await.unwrap();
        let request: Request = read_message(&mut server).await.unwrap();
        assert!(matches!(request, Request::Status));

        let response = Response::Status(StatusResponse {
            status: ConnectionStatus::NotConnected,
            details: None,
            error: None,
        });
        write_message(&mut server, &response).await.unwrap();
        let received: Response = read_message(&mut client).await.unwrap();
        assert!(matches!(
            received,
            Response::Status(StatusResponse {
                status: ConnectionStatus::NotConnected,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn oversized_length_prefix_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let len = (MAX_MESSAGE_SIZE as u32 + 1).to_be_bytes();
        tokio::io::AsyncWriteExt::write_all(&mut client, &len)
            .await
            .unwrap();

        let result = read_message::<Request, _>(&mut server).await;
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let (client, mut server) = tokio::io::duplex(4096);
        drop(client);

        let result = read_message::<Request, _>(&mut server).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn truncated_message_is_reported_as_closed() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        tokio::io::AsyncWriteExt::write_all(&mut client, &8u32.to_be_bytes())
            .await
            .unwrap();
        tokio::io::AsyncWriteExt::write_all(&mut client, &[0u8; 3])
            .await
            .unwrap();
        drop(client);

        let result = read_message::<Request, _>(&mut server).await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
