//! Datagram carrier for the control channel.
//!
//! The event loop only sees this trait, so simulators can substitute their
//! own carrier for a real socket.

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Socket failures
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// A single send or receive failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The carrier was closed locally
    #[error("transport is closed")]
    Closed,

    /// The control socket could not be set up
    #[error("cannot bind {addr}: {source}")]
    BindFailed {
        /// Requested local address
        addr: SocketAddr,
        /// Underlying socket error
        source: io::Error,
    },
}

impl TransportError {
    /// Whether the socket can keep being used after this error.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Async datagram carrier.
///
/// ```no_run
/// use wtp_transport::{AsyncUdpTransport, Transport, TransportConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let socket = AsyncUdpTransport::bind("0.0.0.0:0".parse()?, &TransportConfig::default()).await?;
/// socket.send_to(b"discovery", "255.255.255.255:5246".parse()?).await?;
///
/// let mut buf = vec![0u8; 1500];
/// let (len, from) = socket.recv_from(&mut buf).await?;
/// println!("{len} bytes from {from}");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one datagram to `addr`.
    async fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> TransportResult<usize>;

    /// Wait for the next datagram.
    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)>;

    /// Address the carrier is bound to.
    fn local_addr(&self) -> TransportResult<SocketAddr>;

    /// Refuse further sends and receives with [`TransportError::Closed`].
    async fn close(&self) -> TransportResult<()>;

    /// Counters since creation.
    fn stats(&self) -> TransportStats {
        TransportStats::default()
    }
}

/// Snapshot of datagram counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Datagrams handed to the network
    pub datagrams_sent: u64,
    /// Datagrams received
    pub datagrams_received: u64,
    /// Payload bytes sent
    pub bytes_sent: u64,
    /// Payload bytes received
    pub bytes_received: u64,
    /// Failed sends
    pub send_errors: u64,
    /// Failed receives
    pub recv_errors: u64,
}

/// Lock-free counters shared by clones of a carrier.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    datagrams_sent: AtomicU64,
    datagrams_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    send_errors: AtomicU64,
    recv_errors: AtomicU64,
}

impl Counters {
    pub(crate) fn sent(&self, result: &io::Result<usize>) {
        match result {
            Ok(len) => {
                self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(*len as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.send_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn received(&self, result: &io::Result<(usize, SocketAddr)>) {
        match result {
            Ok((len, _)) => {
                self.datagrams_received.fetch_add(1, Ordering::Relaxed);
                self.bytes_received.fetch_add(*len as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.recv_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub(crate) fn snapshot(&self) -> TransportStats {
        TransportStats {
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let counters = Counters::default();
        counters.sent(&Ok(100));
        counters.sent(&Ok(20));
        counters.sent(&Err(io::ErrorKind::HostUnreachable.into()));
        counters.received(&Ok((200, "192.0.2.1:5246".parse().unwrap())));

        let stats = counters.snapshot();
        assert_eq!(stats.datagrams_sent, 2);
        assert_eq!(stats.bytes_sent, 120);
        assert_eq!(stats.send_errors, 1);
        assert_eq!(stats.datagrams_received, 1);
        assert_eq!(stats.bytes_received, 200);
        assert_eq!(stats.recv_errors, 0);
    }

    #[test]
    fn test_error_classification() {
        let refused = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(TransportError::from(refused).is_transient());
        assert!(!TransportError::Closed.is_transient());

        let bind = TransportError::BindFailed {
            addr: "0.0.0.0:5246".parse().unwrap(),
            source: io::ErrorKind::AddrInUse.into(),
        };
        assert!(!bind.is_transient());
        assert!(bind.to_string().starts_with("cannot bind 0.0.0.0:5246"));
    }
}
