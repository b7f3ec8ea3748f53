//! Listening endpoint the optimizer connects to once per evaluation.
//!
//! Each round is one connection: the optimizer connects, sends a proposal
//! line, waits for the report line, and the connection is closed.
//!
//! ```text
//! AwaitingConnection --accept--> AwaitingLine --line--> AwaitingReport --report--> Closed
//!        ^                            |                                              |
//!        +------ timeout / EOF -------+------------- next wait_for_proposal ---------+
//! ```

use smac_types::{ProtocolError, RunConfig, SmacError, SmacResult};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Where the current round stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    AwaitingConnection,
    AwaitingLine,
    AwaitingReport,
    Closed,
}

impl ChannelState {
    fn name(self) -> &'static str {
        match self {
            Self::AwaitingConnection => "awaiting a connection",
            Self::AwaitingLine => "awaiting a proposal line",
            Self::AwaitingReport => "awaiting a report",
            Self::Closed => "closed",
        }
    }
}

/// Outcome of one bounded wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Proposal(String),
    /// Nothing arrived in time. Not an error: the caller re-checks whether
    /// the optimizer is still alive and waits again.
    Timeout,
}

#[derive(Debug)]
pub struct ProtocolChannel {
    listener: TcpListener,
    local_addr: SocketAddr,
    state: ChannelState,
    peer: Option<BufReader<TcpStream>>,
    report_timeout: Duration,
}

impl ProtocolChannel {
    /// Bind the first free port in `base_port .. base_port + port_range`.
    pub async fn bind(config: &RunConfig) -> SmacResult<Self> {
        let channel =
            Self::bind_range(config.bind_address, config.base_port, config.port_range).await?;
        Ok(channel.with_report_timeout(config.report_timeout()))
    }

    pub fn with_report_timeout(mut self, limit: Duration) -> Self {
        self.report_timeout = limit;
        self
    }

    pub fn report_timeout(&self) -> Duration {
        self.report_timeout
    }

    pub async fn bind_range(address: IpAddr, base_port: u16, port_range: u16) -> SmacResult<Self> {
        for offset in 0..port_range {
            let Some(port) = base_port.checked_add(offset) else {
                break;
            };
            match TcpListener::bind((address, port)).await {
                Ok(listener) => {
                    let local_addr = listener.local_addr()?;
                    info!(port = local_addr.port(), "protocol channel listening");
                    return Ok(Self {
                        listener,
                        local_addr,
                        state: ChannelState::AwaitingConnection,
                        peer: None,
                        report_timeout: RunConfig::default().report_timeout(),
                    });
                }
                Err(e) => debug!(port, error = %e, "port unavailable"),
            }
        }

        Err(SmacError::NoPortAvailable {
            base: base_port,
            count: port_range,
        })
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Accept one connection and read one line from it, all within `limit`.
    pub async fn wait_for_proposal(&mut self, limit: Duration) -> SmacResult<Incoming> {
        if self.state == ChannelState::AwaitingReport {
            return Err(ProtocolError::ChannelState {
                state: self.state.name(),
                operation: "wait for a proposal",
            }
            .into());
        }

        self.peer = None;
        self.state = ChannelState::AwaitingConnection;
        let deadline = Instant::now() + limit;

        let (stream, addr) = match timeout_at(deadline, self.listener.accept()).await {
            Err(_) => return Ok(Incoming::Timeout),
            Ok(accepted) => accepted?,
        };
        debug!(peer = %addr, "optimizer connected");
        self.state = ChannelState::AwaitingLine;

        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        match timeout_at(deadline, reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => {
                self.peer = Some(reader);
                self.state = ChannelState::AwaitingReport;
                Ok(Incoming::Proposal(line.trim_end().to_string()))
            }
            Ok(Ok(_)) => {
                debug!(peer = %addr, "optimizer closed the connection without a proposal");
                self.state = ChannelState::Closed;
                Ok(Incoming::Timeout)
            }
            Ok(Err(e)) => {
                warn!(peer = %addr, error = %e, "failed to read proposal");
                self.state = ChannelState::Closed;
                Ok(Incoming::Timeout)
            }
            Err(_) => {
                warn!(peer = %addr, "proposal line did not arrive in time");
                self.state = ChannelState::Closed;
                Ok(Incoming::Timeout)
            }
        }
    }

    /// Write `line` to the peer that sent the current proposal, then close
    /// the connection.
    pub async fn send_report(&mut self, line: &str) -> SmacResult<()> {
        if self.state != ChannelState::AwaitingReport {
            return Err(ProtocolError::ChannelState {
                state: self.state.name(),
                operation: "send a report",
            }
            .into());
        }
        self.state = ChannelState::Closed;
        let Some(reader) = self.peer.take() else {
            return Err(ProtocolError::ChannelState {
                state: ChannelState::AwaitingConnection.name(),
                operation: "send a report",
            }
            .into());
        };

        let mut stream = reader.into_inner();
        let payload = format!("{line}\n");
        let write = async {
            stream.write_all(payload.as_bytes()).await?;
            stream.flush().await?;
            stream.shutdown().await
        };
        match timeout(self.report_timeout, write).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "report write timed out",
                )
                .into())
            }
        }
        debug!(report = line, "report sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    async fn ephemeral() -> ProtocolChannel {
        ProtocolChannel::bind_range(LOCALHOST, 0, 1).await.unwrap()
    }

    #[tokio::test]
    async fn round_trip_over_one_connection() {
        let mut channel = ephemeral().await;
        let addr = channel.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"instance0 0 18000.0 2147483647 4 -x0 '1.5'\n")
                .await
                .unwrap();
            let mut reply = String::new();
            BufReader::new(stream).read_line(&mut reply).await.unwrap();
            reply
        });

        let incoming = channel.wait_for_proposal(Duration::from_secs(5)).await.unwrap();
        assert_eq!(
            incoming,
            Incoming::Proposal("instance0 0 18000.0 2147483647 4 -x0 '1.5'".to_string())
        );
        assert_eq!(channel.state(), ChannelState::AwaitingReport);

        channel
            .send_report("Result for ParamILS: SAT, 0.100000, 0, 2.000000, 4")
            .await
            .unwrap();
        assert_eq!(channel.state(), ChannelState::Closed);

        let reply = client.await.unwrap();
        assert_eq!(reply, "Result for ParamILS: SAT, 0.100000, 0, 2.000000, 4\n");
    }

    #[tokio::test]
    async fn report_timeout_comes_from_config() {
        let config = RunConfig::new()
            .with_ports(0, 1)
            .with_report_timeout(Duration::from_millis(750));
        let channel = ProtocolChannel::bind(&config).await.unwrap();
        assert_eq!(channel.report_timeout(), Duration::from_millis(750));
    }

    #[tokio::test]
    async fn idle_wait_times_out() {
        let mut channel = ephemeral().await;
        let incoming = channel
            .wait_for_proposal(Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(incoming, Incoming::Timeout);
        assert_eq!(channel.state(), ChannelState::AwaitingConnection);
    }

    #[tokio::test]
    async fn peer_closing_without_a_line_counts_as_timeout() {
        let mut channel = ephemeral().await;
        let addr = channel.local_addr();

        tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            drop(stream);
        });

        let incoming = channel.wait_for_proposal(Duration::from_secs(5)).await.unwrap();
        assert_eq!(incoming, Incoming::Timeout);
        assert_eq!(channel.state(), ChannelState::Closed);
    }

    #[tokio::test]
    async fn report_without_proposal_is_rejected() {
        let mut channel = ephemeral().await;
        let err = channel.send_report("Result for ParamILS: SAT, 1, 0, 1, 4").await;
        assert!(matches!(
            err,
            Err(SmacError::Protocol(ProtocolError::ChannelState { .. }))
        ));
    }

    #[tokio::test]
    async fn waiting_again_before_reporting_is_rejected() {
        let mut channel = ephemeral().await;
        let addr = channel.local_addr();

        tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(b"instance0 0 0 0 0\n").await.unwrap();
            // Hold the connection open until the test finishes.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        channel.wait_for_proposal(Duration::from_secs(5)).await.unwrap();
        let err = channel.wait_for_proposal(Duration::from_millis(10)).await;
        assert!(matches!(
            err,
            Err(SmacError::Protocol(ProtocolError::ChannelState { .. }))
        ));
    }

    #[tokio::test]
    async fn occupied_range_reports_no_port() {
        let blocker = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = blocker.local_addr().unwrap().port();

        match ProtocolChannel::bind_range(LOCALHOST, port, 1).await {
            Err(SmacError::NoPortAvailable { base, count }) => {
                assert_eq!(base, port);
                assert_eq!(count, 1);
            }
            other => panic!("expected NoPortAvailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn skips_occupied_ports() {
        let blocker = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = blocker.local_addr().unwrap().port();
        if port == u16::MAX {
            return;
        }

        // The neighbour may be taken by something else; only assert when it binds.
        if let Ok(channel) = ProtocolChannel::bind_range(LOCALHOST, port, 2).await {
            assert_eq!(channel.port(), port + 1);
        }
    }
}
