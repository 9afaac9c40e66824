//! Tokio event loop for a [`Wtp`].
//!
//! One task, three suspension points: the next datagram, the next timer
//! deadline, and shutdown. All state changes happen inside the `Wtp`
//! callbacks between awaits.

use super::{Wtp, WtpState};
use crate::error::Result;
use std::future::Future;
use std::time::Instant;
use wtp_transport::{Transport, TransportError};

/// Largest datagram read from the socket.
const RECV_BUFFER_SIZE: usize = 65_535;

/// Drive `wtp` over `transport` until `shutdown` resolves.
///
/// On shutdown the WTP is torn down to `Dead`, any final datagrams are
/// flushed and the transport is closed.
///
/// # Errors
///
/// Returns `Error::Socket` if the socket fails in a way that cannot be
/// retried. Transient send and receive errors are logged and the loop
/// continues; lost datagrams are recovered by retransmission.
pub async fn run<T, F>(wtp: &mut Wtp, transport: &T, shutdown: F) -> Result<()>
where
    T: Transport + ?Sized,
    F: Future<Output = ()>,
{
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    tokio::pin!(shutdown);

    wtp.start(Instant::now());

    loop {
        flush(wtp, transport).await?;
        if wtp.state() == WtpState::Dead {
            break;
        }

        let deadline = wtp.poll_timeout();
        let timer = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            () = &mut shutdown => {
                tracing::info!("Shutdown requested");
                wtp.teardown(Instant::now());
            }
            received = transport.recv_from(&mut buf) => match received {
                Ok((len, from)) => wtp.handle_datagram(Instant::now(), from, &buf[..len]),
                Err(e) if e.is_transient() => tracing::warn!("Receive failed: {}", e),
                Err(e) => return Err(e.into()),
            },
            () = timer => wtp.handle_timeout(Instant::now()),
        }
    }

    flush(wtp, transport).await?;
    transport.close().await?;
    Ok(())
}

async fn flush<T>(wtp: &mut Wtp, transport: &T) -> Result<()>
where
    T: Transport + ?Sized,
{
    while let Some(transmit) = wtp.poll_transmit() {
        match transport
            .send_to(&transmit.contents, transmit.destination)
            .await
        {
            Ok(_) => {}
            Err(TransportError::Closed) => return Err(TransportError::Closed.into()),
            Err(e) => tracing::warn!("Send to {} failed: {}", transmit.destination, e),
        }
    }
    Ok(())
}
