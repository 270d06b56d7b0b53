// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

use std::{fmt, time::Duration};

#[derive(Debug, Clone)]
pub struct PingReport {
    pub success: bool,
    pub latency: Option<Duration>,
    pub method: PingMethod,
    pub error: Option<String>,
}

impl PingReport {
    pub(super) fn success(latency: Duration, method: PingMethod) -> Self {
        Self {
            success: true,
            latency: Some(latency),
            method,
            error: None,
        }
    }

    pub(super) fn failure(method: PingMethod, error: impl Into<String>) -> Self {
        Self {
            success: false,
            latency: None,
            method,
            error: Some(error.into()),
        }
    }
}

impl fmt::Display for PingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.success {
            let latency_ms = self
                .latency
                .map(|latency| latency.as_millis())
                .unwrap_or_default();
            write!(f, "{}: reachable in {} ms", self.method, latency_ms)
        } else {
            write!(
                f,
                "{}: unreachable ({})",
                self.method,
                self.error.as_deref().unwrap_or("unknown error")
            )
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMethod {
    Tcp,
    SystemPing,
    Resolution,
}

impl fmt::Display for PingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PingMethod::Tcp => write!(f, "tcp"),
            PingMethod::SystemPing => write!(f, "system-ping"),
            PingMethod::Resolution => write!(f, "resolution"),
        }
    }
}
