use oxport_common::types::{Protocol, ReachabilityResult, Target};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

pub const DEFAULT_TCP_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_UDP_TIMEOUT: Duration = Duration::from_secs(2);

/// Payload sent to UDP targets. A target is considered open only if it answers.
pub const UDP_PROBE_PAYLOAD: &[u8] = b"hello";

#[derive(Debug, Clone, Copy)]
pub struct ProbeSettings {
    /// Bound on name resolution plus TCP connect (and UDP resolution).
    pub tcp_timeout: Duration,
    /// Read deadline for the UDP echo, measured from the send attempt.
    pub udp_timeout: Duration,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            tcp_timeout: DEFAULT_TCP_TIMEOUT,
            udp_timeout: DEFAULT_UDP_TIMEOUT,
        }
    }
}

/// Concurrent reachability prober for a batch of targets.
#[derive(Debug, Clone, Default)]
pub struct ReachabilityProber {
    settings: ProbeSettings,
}

impl ReachabilityProber {
    pub fn new(settings: ProbeSettings) -> Self {
        Self { settings }
    }

    /// Probe every target concurrently and wait for all of them.
    ///
    /// Always returns exactly one result per input target. Probe failures are
    /// logged and reported as closed; they never abort the batch.
    pub async fn check_targets(&self, targets: &[Target]) -> Vec<ReachabilityResult> {
        let mut tasks = Vec::with_capacity(targets.len());

        for target in targets {
            let settings = self.settings;
            let probe_target = target.clone();
            let task = tokio::spawn(async move { probe(&probe_target, settings).await });
            tasks.push((target.clone(), task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (target, task) in tasks {
            let is_open = match task.await {
                Ok(is_open) => is_open,
                Err(e) => {
                    tracing::error!(endpoint = %target, error = %e, "Probe task panicked");
                    false
                }
            };
            results.push(ReachabilityResult { target, is_open });
        }

        results
    }
}

async fn probe(target: &Target, settings: ProbeSettings) -> bool {
    let outcome = match target.protocol {
        Protocol::Tcp => probe_tcp(target, settings.tcp_timeout).await,
        Protocol::Udp => probe_udp(target, settings.tcp_timeout, settings.udp_timeout).await,
    };

    match outcome {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(endpoint = %target, error = %e, "Target is not reachable");
            false
        }
    }
}

/// Connect to a TCP target; success means the handshake completed in time.
pub async fn probe_tcp(target: &Target, connect_timeout: Duration) -> io::Result<()> {
    let stream = timeout(connect_timeout, TcpStream::connect(target.address()))
        .await
        .map_err(|_| timed_out("connect", connect_timeout))??;
    drop(stream);
    Ok(())
}

/// Send [`UDP_PROBE_PAYLOAD`] and wait for any reply before the read deadline.
///
/// A silent listener and a closed port are indistinguishable here: both end in
/// a timeout or an ICMP-driven receive error.
pub async fn probe_udp(
    target: &Target,
    resolve_timeout: Duration,
    read_timeout: Duration,
) -> io::Result<()> {
    let remote = timeout(resolve_timeout, resolve(target))
        .await
        .map_err(|_| timed_out("resolve", resolve_timeout))??;

    let local: SocketAddr = if remote.is_ipv4() {
        "0.0.0.0:0".parse().map_err(invalid_input)?
    } else {
        "[::]:0".parse().map_err(invalid_input)?
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(remote).await?;

    let exchange = async {
        socket.send(UDP_PROBE_PAYLOAD).await?;
        let mut buffer = [0u8; 1024];
        socket.recv(&mut buffer).await
    };

    timeout(read_timeout, exchange)
        .await
        .map_err(|_| timed_out("response", read_timeout))??;
    Ok(())
}

async fn resolve(target: &Target) -> io::Result<SocketAddr> {
    tokio::net::lookup_host(target.address())
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))
}

fn timed_out(stage: &str, after: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("{stage} timed out after {after:?}"),
    )
}

fn invalid_input(e: std::net::AddrParseError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Instant;
    use tokio::net::TcpListener;

    async fn closed_tcp_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn tcp_probe_should_report_listening_socket_as_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let target = Target::new("127.0.0.1", port, Protocol::Tcp);
        assert!(probe_tcp(&target, DEFAULT_TCP_TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn tcp_check_should_reach_ipv6_loopback_listener() {
        // Hosts without IPv6 loopback cannot run this check.
        let Ok(listener) = TcpListener::bind("[::1]:0").await else {
            return;
        };
        let port = listener.local_addr().unwrap().port();

        let target = Target::new("::1", port, Protocol::Tcp);
        assert!(probe_tcp(&target, DEFAULT_TCP_TIMEOUT).await.is_ok());
    }

    #[tokio::test]
    async fn tcp_probe_should_report_closed_port_within_timeout() {
        let port = closed_tcp_port().await;
        let target = Target::new("127.0.0.1", port, Protocol::Tcp);

        let started = Instant::now();
        assert!(probe_tcp(&target, DEFAULT_TCP_TIMEOUT).await.is_err());
        assert!(started.elapsed() <= DEFAULT_TCP_TIMEOUT + Duration::from_millis(500));
    }

    #[tokio::test]
    async fn udp_probe_should_report_echo_service_as_open() {
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = echo.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut buf = [0u8; 64];
            if let Ok((len, peer)) = echo.recv_from(&mut buf).await {
                let _ = echo.send_to(&buf[..len], peer).await;
            }
        });

        let target = Target::new("127.0.0.1", port, Protocol::Udp);
        assert!(probe_udp(&target, DEFAULT_TCP_TIMEOUT, DEFAULT_UDP_TIMEOUT)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn udp_probe_should_report_silent_port_within_deadline() {
        // Bound but never read: no echo, no ICMP unreachable.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = silent.local_addr().unwrap().port();
        let target = Target::new("127.0.0.1", port, Protocol::Udp);

        let started = Instant::now();
        assert!(probe_udp(&target, DEFAULT_TCP_TIMEOUT, DEFAULT_UDP_TIMEOUT)
            .await
            .is_err());
        assert!(started.elapsed() <= DEFAULT_UDP_TIMEOUT + Duration::from_millis(500));
        drop(silent);
    }

    #[tokio::test]
    async fn check_targets_should_return_one_result_per_target() {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let third = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let targets = vec![
            Target::new("127.0.0.1", first.local_addr().unwrap().port(), Protocol::Tcp),
            Target::new("127.0.0.1", closed_tcp_port().await, Protocol::Tcp),
            Target::new("127.0.0.1", third.local_addr().unwrap().port(), Protocol::Tcp),
        ];

        let prober = ReachabilityProber::default();
        let results = prober.check_targets(&targets).await;

        assert_eq!(results.len(), targets.len());
        let by_target: HashMap<_, _> = results
            .iter()
            .map(|r| (r.target.clone(), r.is_open))
            .collect();
        assert_eq!(by_target[&targets[0]], true);
        assert_eq!(by_target[&targets[1]], false);
        assert_eq!(by_target[&targets[2]], true);
    }

    #[tokio::test]
    async fn check_targets_should_downgrade_resolution_failures() {
        let targets = vec![
            Target::new("host.invalid", 80, Protocol::Tcp),
            Target::new("host.invalid", 53, Protocol::Udp),
        ];

        let prober = ReachabilityProber::new(ProbeSettings {
            tcp_timeout: Duration::from_secs(2),
            udp_timeout: Duration::from_millis(200),
        });
        let results = prober.check_targets(&targets).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| !r.is_open));
    }

    #[tokio::test]
    async fn check_targets_should_handle_empty_batch() {
        let results = ReachabilityProber::default().check_targets(&[]).await;
        assert!(results.is_empty());
    }
}
