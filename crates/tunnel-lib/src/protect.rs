// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::os::fd::RawFd;

/// Mark applied to protected sockets. Policy routing excludes marked packets
/// from the tunnel table, so traffic on protected sockets reaches the
/// network directly instead of looping back into the tunnel.
pub const TUNNEL_FWMARK: u32 = 0x14d;

#[derive(Debug, thiserror::Error)]
pub enum ProtectSocketError {
    #[error("invalid socket descriptor: {0}")]
    InvalidDescriptor(RawFd),

    #[cfg(target_os = "linux")]
    #[error("failed to set fwmark on socket {socket}: {source}")]
    SetMark {
        socket: RawFd,
        source: nix::Error,
    },

    #[cfg(not(target_os = "linux"))]
    #[error("socket protection is not supported on this platform")]
    Unsupported,
}

/// Excludes individual sockets from tunneled routing.
#[derive(Debug, Clone)]
pub struct SocketProtector {
    fwmark: u32,
}

impl SocketProtector {
    pub fn new(fwmark: u32) -> Self {
        Self { fwmark }
    }

    pub fn fwmark(&self) -> u32 {
        self.fwmark
    }

    /// Mark the socket so that its traffic bypasses the tunnel.
    #[cfg(target_os = "linux")]
    pub fn protect(&self, socket: RawFd) -> Result<(), ProtectSocketError> {
        use std::os::fd::BorrowedFd;

        if socket < 0 {
            return Err(ProtectSocketError::InvalidDescriptor(socket));
        }

        // The caller keeps ownership of the descriptor for the duration of
        // the call, which is all the borrow needs to be valid for.
        let fd = unsafe { BorrowedFd::borrow_raw(socket) };
        nix::sys::socket::setsockopt(&fd, nix::sys::socket::sockopt::Mark, &self.fwmark)
            .map_err(|source| ProtectSocketError::SetMark { socket, source })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn protect(&self, socket: RawFd) -> Result<(), ProtectSocketError> {
        if socket < 0 {
            return Err(ProtectSocketError::InvalidDescriptor(socket));
        }
        Err(ProtectSocketError::Unsupported)
    }
}

impl Default for SocketProtector {
    fn default() -> Self {
        Self::new(TUNNEL_FWMARK)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_descriptor_is_rejected() {
        let protector = SocketProtector::default();
        let result = protector.protect(-1);
        assert!(matches!(
            result,
            Err(ProtectSocketError::InvalidDescriptor(-1))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn non_socket_descriptor_fails() {
        use std::os::fd::AsRawFd;

        let protector = SocketProtector::default();
        let file = tempfile::tempfile().unwrap();
        let result = protector.protect(file.as_raw_fd());
        assert!(matches!(result, Err(ProtectSocketError::SetMark { .. })));
    }
}
