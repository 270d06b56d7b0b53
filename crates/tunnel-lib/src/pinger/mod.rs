// Copyright 2024 - Nym Technologies SA <contact@nymtech.net>
// SPDX-License-Identifier: GPL-3.0-only

//! Connectivity prober measuring reachability and latency of remote hosts.
//!
//! Probes run over plain TCP connects, with the system `ping` binary as a
//! fallback when enabled. All enabled methods run concurrently and the best
//! successful result wins.

use std::{
    net::SocketAddr,
    time::{Duration, Instant},
};

use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

mod types;

pub use types::{PingMethod, PingReport};

const DELAY_BETWEEN_ATTEMPTS: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum PingError {
    #[error("failed to resolve host {host}: {source}")]
    Resolve {
        host: String,
        source: std::io::Error,
    },

    #[error("host {host} did not resolve to any address")]
    NoAddresses { host: String },

    #[error("no probe methods enabled")]
    NoMethodsEnabled,

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("timed out connecting to {addr}")]
    Timeout { addr: SocketAddr },
}

#[derive(Debug, Clone)]
pub struct PingOptions {
    pub timeout: Duration,
    pub attempts: u32,
    pub use_tcp: bool,
    pub use_system_ping: bool,
}

impl Default for PingOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            attempts: 3,
            use_tcp: true,
            use_system_ping: true,
        }
    }
}

/// Single TCP connect probe, returning the time taken to establish the
/// connection.
pub async fn tcp_probe(addr: SocketAddr, timeout: Duration) -> Result<Duration, PingError> {
    let start = Instant::now();
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(start.elapsed()),
        Ok(Err(source)) => Err(PingError::Connect { addr, source }),
        Err(_) => Err(PingError::Timeout { addr }),
    }
}

/// Probe a host with all enabled methods and return the best result.
///
/// Methods run concurrently. The lowest-latency success wins; if nothing
/// succeeds the last failure is returned.
pub async fn probe_host(
    host: &str,
    port: u16,
    options: PingOptions,
) -> Result<PingReport, PingError> {
    if !options.use_tcp && !options.use_system_ping {
        return Err(PingError::NoMethodsEnabled);
    }

    let addr = resolve(host, port).await?;
    debug!("Probing {host} ({addr})");

    let (tcp_report, system_report) = tokio::join!(
        async {
            if options.use_tcp {
                Some(tcp_ping(addr, &options).await)
            } else {
                None
            }
        },
        async {
            if options.use_system_ping {
                Some(system_ping(host, &options).await)
            } else {
                None
            }
        },
    );

    let reports: Vec<PingReport> = [tcp_report, system_report].into_iter().flatten().collect();

    reports
        .iter()
        .filter(|report| report.success)
        .min_by_key(|report| report.latency)
        .or_else(|| reports.last())
        .cloned()
        .ok_or(PingError::NoMethodsEnabled)
}

/// Probe a batch of hosts concurrently.
pub async fn probe_many(
    hosts: &[(String, u16)],
    options: PingOptions,
) -> Vec<((String, u16), Result<PingReport, PingError>)> {
    let probes = hosts.iter().map(|(host, port)| {
        let options = options.clone();
        async move {
            let report = probe_host(host, *port, options).await;
            ((host.clone(), *port), report)
        }
    });
    futures::future::join_all(probes).await
}

/// Continuously probe a host on an interval until cancelled.
///
/// Reports are delivered over the returned channel; the task stops when the
/// cancellation token fires or the receiver is dropped.
pub fn spawn_monitor(
    host: String,
    port: u16,
    interval: Duration,
    options: PingOptions,
    shutdown_token: CancellationToken,
) -> (JoinHandle<()>, mpsc::UnboundedReceiver<PingReport>) {
    let (report_tx, report_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                _ = ticker.tick() => {
                    let report = match probe_host(&host, port, options.clone()).await {
                        Ok(report) => report,
                        Err(err) => {
                            warn!("Probe of {host} failed: {err}");
                            PingReport::failure(PingMethod::Resolution, err.to_string())
                        }
                    };
                    if report_tx.send(report).is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Ping monitor for {host} exiting");
    });
    (handle, report_rx)
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, PingError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| PingError::Resolve {
            host: host.to_string(),
            source,
        })?;
    addrs.next().ok_or_else(|| PingError::NoAddresses {
        host: host.to_string(),
    })
}

async fn tcp_ping(addr: SocketAddr, options: &PingOptions) -> PingReport {
    let attempts = options.attempts.max(1);
    let per_attempt_timeout = options.timeout / attempts;
    let mut total = Duration::ZERO;
    let mut successes = 0u32;
    let mut last_error = None;

    for attempt in 0..attempts {
        match tcp_probe(addr, per_attempt_timeout).await {
            Ok(latency) => {
                trace!("TCP probe of {addr} took {} ms", latency.as_millis());
                total += latency;
                successes += 1;
            }
            Err(err) => {
                last_error = Some(err);
            }
        }
        if attempt + 1 < attempts {
            tokio::time::sleep(DELAY_BETWEEN_ATTEMPTS).await;
        }
    }

    if successes > 0 {
        PingReport::success(total / successes, PingMethod::Tcp)
    } else {
        let error = last_error
            .map(|err| err.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        PingReport::failure(PingMethod::Tcp, error)
    }
}

async fn system_ping(host: &str, options: &PingOptions) -> PingReport {
    let timeout_secs = options.timeout.as_secs().max(1);
    let output = tokio::time::timeout(
        options.timeout + Duration::from_secs(1),
        tokio::process::Command::new("ping")
            .arg("-c")
            .arg("2")
            .arg("-W")
            .arg(timeout_secs.to_string())
            .arg(host)
            .output(),
    )
    .await;

    match output {
        Ok(Ok(output)) if output.status.success() => {
            let stdout = String::from_utf8_lossy(&output.stdout);
            match parse_ping_output(&stdout) {
                Some(latency) => PingReport::success(latency, PingMethod::SystemPing),
                None => PingReport::failure(
                    PingMethod::SystemPing,
                    "no latency found in ping output",
                ),
            }
        }
        Ok(Ok(output)) => PingReport::failure(
            PingMethod::SystemPing,
            format!("ping exited with {}", output.status),
        ),
        Ok(Err(err)) => {
            PingReport::failure(PingMethod::SystemPing, format!("failed to run ping: {err}"))
        }
        Err(_) => PingReport::failure(PingMethod::SystemPing, "ping timed out"),
    }
}

// Extracts latency from ping output, preferring the per-reply `time=` values
// and falling back to the min/avg/max summary line.
fn parse_ping_output(output: &str) -> Option<Duration> {
    let mut times_ms = Vec::new();
    for line in output.lines() {
        if let Some(pos) = line.find("time=") {
            let rest = &line[pos + "time=".len()..];
            if let Some(value) = rest.split_whitespace().next() {
                if let Ok(ms) = value.parse::<f64>() {
                    times_ms.push(ms);
                }
            }
        }
    }
    if !times_ms.is_empty() {
        let avg_ms = times_ms.iter().sum::<f64>() / times_ms.len() as f64;
        return Some(Duration::from_secs_f64(avg_ms / 1000.0));
    }

    // rtt min/avg/max/mdev = 0.045/0.055/0.067/0.011 ms
    for line in output.lines() {
        if !line.contains("min/avg/max") {
            continue;
        }
        let values = line.split('=').nth(1)?.trim();
        let avg_ms = values.split('/').nth(1)?.parse::<f64>().ok()?;
        return Some(Duration::from_secs_f64(avg_ms / 1000.0));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::net::TcpListener;

    fn tcp_only() -> PingOptions {
        PingOptions {
            timeout: Duration::from_secs(2),
            attempts: 2,
            use_tcp: true,
            use_system_ping: false,
        }
    }

    #[tokio::test]
    async fn tcp_probe_reaches_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let latency = tcp_probe(addr, Duration::from_secs(2)).await.unwrap();
        assert!(latency < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn tcp_probe_fails_on_closed_port() {
        // Bind and drop to get a port that is very likely closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = tcp_probe(addr, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(PingError::Connect { .. })));
    }

    #[tokio::test]
    async fn probe_host_returns_best_result() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let report = probe_host("127.0.0.1", port, tcp_only()).await.unwrap();
        assert!(report.success);
        assert_eq!(report.method, PingMethod::Tcp);
        assert!(report.latency.is_some());
    }

    #[tokio::test]
    async fn probe_host_without_methods_is_an_error() {
        let options = PingOptions {
            use_tcp: false,
            use_system_ping: false,
            ..Default::default()
        };
        let result = probe_host("127.0.0.1", 80, options).await;
        assert!(matches!(result, Err(PingError::NoMethodsEnabled)));
    }

    #[tokio::test]
    async fn probe_many_covers_all_hosts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let hosts = vec![
            ("127.0.0.1".to_string(), port),
            ("127.0.0.1".to_string(), port),
        ];
        let results = probe_many(&hosts, tcp_only()).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|(_, report)| report
            .as_ref()
            .map(|report| report.success)
            .unwrap_or(false)));
    }

    #[tokio::test]
    async fn monitor_delivers_reports_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let shutdown_token = CancellationToken::new();
        let (handle, mut report_rx) = spawn_monitor(
            "127.0.0.1".to_string(),
            port,
            Duration::from_millis(50),
            tcp_only(),
            shutdown_token.clone(),
        );

        for _ in 0..2 {
            let report = tokio::time::timeout(Duration::from_secs(5), report_rx.recv())
                .await
                .expect("timed out waiting for a report")
                .expect("report channel closed");
            assert!(report.success);
        }

        shutdown_token.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("timed out waiting for the monitor to exit")
            .expect("monitor panicked");
    }

    #[test]
    fn parse_individual_reply_times() {
        let output = "\
64 bytes from 127.0.0.1: icmp_seq=1 ttl=64 time=0.045 ms
64 bytes from 127.0.0.1: icmp_seq=2 ttl=64 time=0.055 ms";
        let latency = parse_ping_output(output).unwrap();
        assert!(latency >= Duration::from_micros(49) && latency <= Duration::from_micros(51));
    }

    #[test]
    fn parse_summary_line() {
        let output = "rtt min/avg/max/mdev = 0.045/0.050/0.055/0.005 ms";
        let latency = parse_ping_output(output).unwrap();
        assert!(latency >= Duration::from_micros(49) && latency <= Duration::from_micros(51));
    }

    #[test]
    fn parse_garbage_yields_nothing() {
        assert!(parse_ping_output("ping: unknown host").is_none());
    }
}
