// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

//! Building blocks for the background tunnel service: the service-control
//! capability contract, the tunnel lifecycle state machine, per-socket
//! protection and a connectivity prober.

pub mod pinger;
mod protect;
mod service_control;
pub mod tunnel_state_machine;

pub use protect::{ProtectSocketError, SocketProtector, TUNNEL_FWMARK};
pub use service_control::{ServiceControl, ServiceHandle, TunnelServiceController};
