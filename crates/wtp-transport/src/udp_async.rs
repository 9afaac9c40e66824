//! Tokio UDP / UDP-Lite control socket.

use crate::transport::{Counters, Transport, TransportError, TransportResult, TransportStats};
use crate::{IPPROTO_UDPLITE, TransportConfig, TransportKind};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::UdpSocket;

/// Control socket shared between clones.
#[derive(Clone)]
pub struct AsyncUdpTransport {
    socket: Arc<UdpSocket>,
    kind: TransportKind,
    closed: Arc<AtomicBool>,
    counters: Arc<Counters>,
}

/// Configure and bind the raw socket before Tokio takes it over.
fn open_socket(addr: SocketAddr, config: &TransportConfig) -> io::Result<std::net::UdpSocket> {
    let protocol = match config.kind {
        TransportKind::Udp => Protocol::UDP,
        TransportKind::UdpLite => Protocol::from(IPPROTO_UDPLITE),
    };
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(protocol))?;
    socket.set_recv_buffer_size(config.recv_buffer_size)?;
    socket.set_send_buffer_size(config.send_buffer_size)?;
    // Discovery broadcasts only exist on IPv4
    if config.broadcast && addr.is_ipv4() {
        socket.set_broadcast(true)?;
    }
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    Ok(socket.into())
}

impl AsyncUdpTransport {
    /// Bind the control socket on `addr` (port 0 picks a free port).
    ///
    /// # Errors
    ///
    /// `BindFailed` if the socket cannot be created, configured or bound.
    pub async fn bind(addr: SocketAddr, config: &TransportConfig) -> TransportResult<Self> {
        let socket = open_socket(addr, config)
            .and_then(UdpSocket::from_std)
            .map_err(|source| TransportError::BindFailed { addr, source })?;

        if let Ok(local) = socket.local_addr() {
            tracing::debug!("Bound {:?} control socket on {}", config.kind, local);
        }
        Ok(Self {
            socket: Arc::new(socket),
            kind: config.kind,
            closed: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Datagram protocol of this socket.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    fn check_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Transport for AsyncUdpTransport {
    async fn send_to(&self, datagram: &[u8], addr: SocketAddr) -> TransportResult<usize> {
        self.check_open()?;
        let result = self.socket.send_to(datagram, addr).await;
        self.counters.sent(&result);
        Ok(result?)
    }

    async fn recv_from(&self, buf: &mut [u8]) -> TransportResult<(usize, SocketAddr)> {
        self.check_open()?;
        let result = self.socket.recv_from(buf).await;
        self.counters.received(&result);
        Ok(result?)
    }

    fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn stats(&self) -> TransportStats {
        self.counters.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn loopback() -> AsyncUdpTransport {
        AsyncUdpTransport::bind("127.0.0.1:0".parse().unwrap(), &TransportConfig::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_bind_picks_port() {
        let socket = loopback().await;
        assert_ne!(socket.local_addr().unwrap().port(), 0);
        assert_eq!(socket.kind(), TransportKind::Udp);
    }

    #[tokio::test]
    async fn test_exchange_counts_datagrams() {
        let ac = loopback().await;
        let wtp = loopback().await;

        let sent = wtp
            .send_to(b"Discovery", ac.local_addr().unwrap())
            .await
            .unwrap();
        assert_eq!(sent, 9);

        let mut buf = vec![0u8; 1500];
        let (len, from) = timeout(Duration::from_secs(1), ac.recv_from(&mut buf))
            .await
            .expect("datagram within a second")
            .unwrap();
        assert_eq!(&buf[..len], b"Discovery");
        assert_eq!(from, wtp.local_addr().unwrap());

        assert_eq!(wtp.stats().datagrams_sent, 1);
        assert_eq!(ac.stats().bytes_received, 9);
    }

    #[tokio::test]
    async fn test_closed_socket_refuses_io() {
        let socket = loopback().await;
        let clone = socket.clone();
        socket.close().await.unwrap();

        let result = clone.send_to(b"echo", "127.0.0.1:5246".parse().unwrap()).await;
        assert!(matches!(result, Err(TransportError::Closed)));
        let mut buf = [0u8; 16];
        assert!(matches!(
            clone.recv_from(&mut buf).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_address_in_use() {
        let first = loopback().await;
        let taken = first.local_addr().unwrap();
        let result = AsyncUdpTransport::bind(taken, &TransportConfig::default()).await;
        assert!(matches!(result, Err(TransportError::BindFailed { .. })));
    }
}
