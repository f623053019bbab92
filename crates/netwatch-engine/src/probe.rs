//! Single-target reachability checks.
//!
//! A probe answers one question with a bounded timeout: does this port accept
//! a connection, or does this host answer at all. Refused, unreachable, and
//! timed-out attempts all come back as `reachable = false`; callers cannot
//! tell a closed port from a filtered one.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{lookup_host, TcpStream};
use tokio::process::Command;
use tokio::task::JoinSet;
use tokio::time::{self, Instant};

use netwatch_core::ValidationError;

use crate::config::{EngineConfig, LivenessMethod};
use crate::error::{Result, ScanError};

/// Result of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub reachable: bool,
    pub elapsed: Duration,
}

/// The network seam used by the scanner and sweeper.
///
/// Implementations must release every socket or child process they open on
/// all exit paths, including timeout.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// TCP connect to `addr:port`, bounded by `timeout`.
    async fn probe_port(&self, addr: IpAddr, port: u16, timeout: Duration) -> ProbeOutcome;

    /// Host liveness check, bounded by `timeout`.
    async fn probe_host(&self, addr: IpAddr, timeout: Duration) -> ProbeOutcome;
}

/// Probes the real network: TCP connect for ports, ICMP echo with a TCP
/// fallback for hosts.
#[derive(Debug, Clone)]
pub struct NetProber {
    liveness: LivenessMethod,
    fallback_ports: Vec<u16>,
}

impl NetProber {
    pub fn new(liveness: LivenessMethod, fallback_ports: Vec<u16>) -> Self {
        Self {
            liveness,
            fallback_ports,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.liveness, config.fallback_ports.clone())
    }
}

#[async_trait]
impl Prober for NetProber {
    async fn probe_port(&self, addr: IpAddr, port: u16, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        let connect = time::timeout(timeout, TcpStream::connect(SocketAddr::new(addr, port)));
        // The stream, if any, is dropped right here.
        let reachable = matches!(connect.await, Ok(Ok(_)));
        ProbeOutcome {
            reachable,
            elapsed: start.elapsed(),
        }
    }

    async fn probe_host(&self, addr: IpAddr, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        let reachable = match self.liveness {
            LivenessMethod::Icmp => icmp_echo(addr, timeout).await.unwrap_or(false),
            LivenessMethod::Tcp => tcp_liveness(addr, &self.fallback_ports, timeout).await,
            LivenessMethod::Auto => match icmp_echo(addr, timeout).await {
                Some(alive) => alive,
                None => {
                    let remaining = timeout.saturating_sub(start.elapsed());
                    tcp_liveness(addr, &self.fallback_ports, remaining).await
                }
            },
        };
        ProbeOutcome {
            reachable,
            elapsed: start.elapsed(),
        }
    }
}

/// One ICMP echo through the system `ping` binary.
///
/// Returns `None` when ping could not be used at all (missing binary, no
/// permission to open a raw socket) so the caller can fall back.
async fn icmp_echo(addr: IpAddr, timeout: Duration) -> Option<bool> {
    let mut cmd = Command::new("ping");
    if cfg!(windows) {
        cmd.args(["-n", "1", "-w"])
            .arg(timeout.as_millis().max(1).to_string());
    } else {
        cmd.args(["-c", "1", "-n"]);
    }
    cmd.arg(addr.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(error = %e, "ping unavailable");
            return None;
        }
    };

    match time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => match status.code() {
            Some(0) => Some(true),
            Some(1) => Some(false),
            // iputils exits 2 on setup errors such as a denied raw socket.
            _ => None,
        },
        Ok(Err(_)) => Some(false),
        Err(_) => {
            let _ = child.kill().await;
            Some(false)
        }
    }
}

/// TCP liveness: the host is up if any fallback port completes a handshake
/// or actively refuses the connection.
async fn tcp_liveness(addr: IpAddr, ports: &[u16], timeout: Duration) -> bool {
    if ports.is_empty() || timeout.is_zero() {
        return false;
    }

    let mut attempts = JoinSet::new();
    for &port in ports {
        attempts.spawn(async move {
            TcpStream::connect(SocketAddr::new(addr, port))
                .await
                .map(drop)
        });
    }

    let answered = async {
        while let Some(joined) = attempts.join_next().await {
            match joined {
                Ok(Ok(())) => return true,
                Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => return true,
                _ => {}
            }
        }
        false
    };

    // Dropping the set aborts any connects still pending.
    time::timeout(timeout, answered).await.unwrap_or(false)
}

/// Resolve a host name or literal address, preferring IPv4.
///
/// A lookup that has not answered within `timeout` counts as unresolvable.
pub async fn resolve_host(host: &str, timeout: Duration) -> Result<IpAddr> {
    resolve_with(host, timeout, |name| async move {
        lookup_host((name.as_str(), 0))
            .await
            .map(|addrs| addrs.collect::<Vec<_>>())
    })
    .await
}

async fn resolve_with<F, Fut>(host: &str, timeout: Duration, lookup: F) -> Result<IpAddr>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = io::Result<Vec<SocketAddr>>>,
{
    let host = host.trim();
    if host.is_empty() {
        return Err(ValidationError::EmptyHost.into());
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let unresolvable = || ScanError::Unresolvable {
        host: host.to_string(),
    };
    let addrs = match time::timeout(timeout, lookup(host.to_string())).await {
        Ok(Ok(addrs)) => addrs,
        Ok(Err(e)) => {
            tracing::debug!(host, error = %e, "Host lookup failed");
            return Err(unresolvable());
        }
        Err(_) => {
            tracing::warn!(host, timeout_ms = timeout.as_millis() as u64, "Host lookup timed out");
            return Err(unresolvable());
        }
    };
    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .map(|a| a.ip())
        .ok_or_else(unresolvable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn closed_port() -> u16 {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn open_port_is_reachable() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = NetProber::new(LivenessMethod::Tcp, vec![]);

        let outcome = prober
            .probe_port(LOCALHOST, port, Duration::from_secs(2))
            .await;
        assert!(outcome.reachable);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let port = closed_port().await;
        let prober = NetProber::new(LivenessMethod::Tcp, vec![]);

        let outcome = prober
            .probe_port(LOCALHOST, port, Duration::from_secs(2))
            .await;
        assert!(!outcome.reachable);
    }

    #[tokio::test]
    async fn tcp_liveness_counts_refused_as_alive() {
        let port = closed_port().await;
        let prober = NetProber::new(LivenessMethod::Tcp, vec![port]);

        let outcome = prober.probe_host(LOCALHOST, Duration::from_secs(2)).await;
        assert!(outcome.reachable);
    }

    #[tokio::test]
    async fn tcp_liveness_without_ports_is_unreachable() {
        let prober = NetProber::new(LivenessMethod::Tcp, vec![]);
        let outcome = prober.probe_host(LOCALHOST, Duration::from_secs(1)).await;
        assert!(!outcome.reachable);
    }

    #[tokio::test]
    async fn resolve_literal_and_blank() {
        let timeout = Duration::from_secs(1);
        assert_eq!(resolve_host(" 127.0.0.1 ", timeout).await.unwrap(), LOCALHOST);
        let err = resolve_host("  ", timeout).await.unwrap_err();
        assert!(matches!(
            err,
            ScanError::Validation(ValidationError::EmptyHost)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_lookup_is_unresolvable_after_timeout() {
        let start = Instant::now();
        let err = resolve_with("stalled.internal", Duration::from_secs(2), |_| {
            std::future::pending::<io::Result<Vec<SocketAddr>>>()
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ScanError::Unresolvable { ref host } if host == "stalled.internal"));
        assert!(err.is_validation());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test]
    async fn lookup_prefers_ipv4_and_maps_failures() {
        let v6: SocketAddr = "[::1]:0".parse().unwrap();
        let v4: SocketAddr = "10.1.2.3:0".parse().unwrap();
        let addr = resolve_with("dual.internal", Duration::from_secs(1), |_| async move {
            Ok::<_, io::Error>(vec![v6, v4])
        })
        .await
        .unwrap();
        assert_eq!(addr, v4.ip());

        let err = resolve_with("missing.internal", Duration::from_secs(1), |_| async {
            Err::<Vec<SocketAddr>, _>(io::Error::new(io::ErrorKind::NotFound, "no such host"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Unresolvable { .. }));

        let err = resolve_with("empty.internal", Duration::from_secs(1), |_| async {
            Ok::<Vec<SocketAddr>, io::Error>(Vec::new())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ScanError::Unresolvable { .. }));
    }
}
