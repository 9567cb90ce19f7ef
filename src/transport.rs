//! # Upstream Transport Adapter
//!
//! One surface over the two transports a stream can target. TCP streams
//! split into owned read/write halves so the pump and writer tasks can
//! run independently; UDP streams share one ephemeral socket between both
//! sides, with the resolved peer address stored for every outbound
//! datagram. Dropping both halves releases the OS socket.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{lookup_host, TcpStream, UdpSocket};

use crate::protocol::CloseReason;

/// Largest chunk read from an upstream socket in one call. Also caps the
/// size of a received UDP datagram.
pub const READ_CHUNK: usize = 64 * 1024;

/// Why an upstream connect failed. Classification uses the structured
/// [`io::ErrorKind`], never error message text.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("connection refused")]
    Refused,

    #[error("connect timed out")]
    TimedOut,

    #[error("unreachable: {0}")]
    Unreachable(io::Error),
}

impl ConnectError {
    fn classify(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => Self::Refused,
            io::ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::Unreachable(err),
        }
    }

    /// The CLOSE reason reported to the client for this failure.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Refused => CloseReason::Refused,
            Self::TimedOut => CloseReason::Timeout,
            Self::Resolve(_) | Self::Unreachable(_) => CloseReason::Unreachable,
        }
    }
}

// ─── Transport Halves ───────────────────────────────────────────

/// Read side of an upstream transport, owned by the stream's pump task.
#[derive(Debug)]
pub enum UpstreamReader {
    Tcp(OwnedReadHalf),
    Udp(Arc<UdpSocket>),
}

/// Write side of an upstream transport, owned by the stream's writer task.
#[derive(Debug)]
pub enum UpstreamWriter {
    Tcp(OwnedWriteHalf),
    Udp(Arc<UdpSocket>, SocketAddr),
}

impl UpstreamReader {
    /// Reads the next chunk into `buf`. `None` means the TCP peer
    /// half-closed. UDP yields exactly one datagram per call and never
    /// reports EOF.
    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self {
            Self::Tcp(half) => match half.read(buf).await? {
                0 => Ok(None),
                n => Ok(Some(n)),
            },
            Self::Udp(sock) => {
                let (n, _) = sock.recv_from(buf).await?;
                Ok(Some(n))
            }
        }
    }
}

impl UpstreamWriter {
    /// Writes all of `data` upstream. For UDP, `data` becomes one
    /// datagram sent to the stored peer address.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        match self {
            Self::Tcp(half) => half.write_all(data).await,
            Self::Udp(sock, peer) => {
                sock.send_to(data, *peer).await?;
                Ok(())
            }
        }
    }
}

// ─── Connect Paths ──────────────────────────────────────────────

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ConnectError> {
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|_| ConnectError::Resolve(host.to_string()))?;
    addrs
        .next()
        .ok_or_else(|| ConnectError::Resolve(host.to_string()))
}

/// Resolves `host` and establishes a TCP connection to it.
pub async fn connect_tcp(
    host: &str,
    port: u16,
) -> Result<(UpstreamReader, UpstreamWriter), ConnectError> {
    let addr = resolve(host, port).await?;
    let stream = TcpStream::connect(addr)
        .await
        .map_err(ConnectError::classify)?;
    let (read_half, write_half) = stream.into_split();
    Ok((
        UpstreamReader::Tcp(read_half),
        UpstreamWriter::Tcp(write_half),
    ))
}

/// Resolves `host` and binds an ephemeral UDP socket for a flow to it.
/// No packets are sent at this stage.
pub async fn open_udp(
    host: &str,
    port: u16,
) -> Result<(UpstreamReader, UpstreamWriter), ConnectError> {
    let peer = resolve(host, port).await?;
    let bind_addr: SocketAddr = if peer.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let sock = Arc::new(
        UdpSocket::bind(bind_addr)
            .await
            .map_err(ConnectError::classify)?,
    );
    Ok((
        UpstreamReader::Udp(sock.clone()),
        UpstreamWriter::Udp(sock, peer),
    ))
}
