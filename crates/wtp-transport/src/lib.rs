//! # WTP Transport
//!
//! Datagram transport for the WTP control channel.
//!
//! This crate provides:
//! - The async [`Transport`] trait the control-plane event loop drives
//! - A Tokio UDP / UDP-Lite socket built with `socket2`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod transport;
pub mod udp_async;

pub use transport::{Transport, TransportError, TransportResult, TransportStats};
pub use udp_async::AsyncUdpTransport;

/// CAPWAP control channel port.
pub const CAPWAP_CONTROL_PORT: u16 = 5246;

/// IANA protocol number for UDP-Lite.
pub const IPPROTO_UDPLITE: i32 = 136;

/// Datagram protocol carrying the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// Plain UDP.
    #[default]
    Udp,
    /// UDP-Lite (RFC 3828).
    UdpLite,
}

impl TransportKind {
    /// CAPWAP Transport Protocol element value.
    #[must_use]
    pub const fn wire_value(self) -> u8 {
        match self {
            Self::UdpLite => 1,
            Self::Udp => 2,
        }
    }

    /// Decode a CAPWAP Transport Protocol element value.
    #[must_use]
    pub const fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::UdpLite),
            2 => Some(Self::Udp),
            _ => None,
        }
    }
}

/// Socket configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Datagram protocol
    pub kind: TransportKind,
    /// Receive buffer size
    pub recv_buffer_size: usize,
    /// Send buffer size
    pub send_buffer_size: usize,
    /// Permit sending to broadcast addresses (discovery)
    pub broadcast: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Udp,
            recv_buffer_size: 256 * 1024,
            send_buffer_size: 256 * 1024,
            broadcast: true,
        }
    }
}
