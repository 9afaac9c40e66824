//! Error types for the WTP control plane.
//!
//! Errors are split by layer. Protocol violations from the network (bad
//! framing, stale sequences) never surface here: the reliable transport
//! silently discards them. What remains are local failures the state machine
//! has to react to and configuration problems the process has to report.

use std::borrow::Cow;
use thiserror::Error;

/// Main error type for the WTP control plane
#[derive(Debug, Error)]
pub enum Error {
    /// Fragment framing error
    #[error("fragment error: {0}")]
    Fragment(#[from] FragmentError),

    /// Message codec error
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Reliable control transport error
    #[error("control transport error: {0}")]
    Reliable(#[from] ReliableError),

    /// Security service error
    #[error("security error: {0}")]
    Crypto(#[from] wtp_crypto::CryptoError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Socket error
    #[error("socket error: {0}")]
    Socket(#[from] wtp_transport::TransportError),
}

impl Error {
    /// Whether the control plane can recover from this error on its own.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Reliable(e) => e.is_transient(),
            Self::Socket(e) => e.is_transient(),
            Self::Fragment(_) | Self::Codec(_) | Self::Crypto(_) => true,
            Self::Config(_) => false,
        }
    }
}

/// Fragment framing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragmentError {
    /// Datagram too short
    #[error("datagram too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Unknown preamble byte
    #[error("unknown preamble: 0x{0:02X}")]
    UnknownPreamble(u8),

    /// Declared payload length disagrees with the datagram
    #[error("payload length mismatch: header says {declared}, datagram carries {actual}")]
    LengthMismatch {
        /// Length in the header
        declared: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Fragment does not fit the message it belongs to
    #[error("malformed fragment: {0}")]
    Malformed(&'static str),

    /// Reassembled message would exceed the size limit
    #[error("message too large: {0} bytes")]
    TooLarge(usize),
}

/// Message codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Message too short
    #[error("message too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size
        expected: usize,
        /// Actual size
        actual: usize,
    },

    /// Element length runs past the end of the message
    #[error("element {element_type} declares {declared} bytes, {remaining} remain")]
    ElementOverrun {
        /// Element type
        element_type: u16,
        /// Declared length
        declared: usize,
        /// Bytes remaining
        remaining: usize,
    },

    /// Element value is invalid for its type
    #[error("invalid element {element_type}: {reason}")]
    InvalidElement {
        /// Element type
        element_type: u16,
        /// What was wrong
        reason: &'static str,
    },

    /// Element value too long to encode
    #[error("element {element_type} too long: {len} bytes")]
    ElementTooLong {
        /// Element type
        element_type: u16,
        /// Value length
        len: usize,
    },
}

/// Reliable control transport errors
#[derive(Debug, Error)]
pub enum ReliableError {
    /// A request is already awaiting its response
    #[error("transport busy: request {0} still pending")]
    TransportBusy(u8),

    /// No control session or security session not established
    #[error("control session not ready")]
    NotReady,

    /// Retransmission budget exhausted
    #[error("peer unreachable after {0} transmissions")]
    PeerUnreachable(u32),

    /// MTU leaves no room for payload
    #[error("mtu {mtu} too small, need more than {required} bytes of overhead")]
    MtuTooSmall {
        /// Configured MTU
        mtu: usize,
        /// Bytes consumed by framing and encryption
        required: usize,
    },

    /// Message exceeds the reassembly limit
    #[error("message too large: {len} bytes (max {max})")]
    MessageTooLarge {
        /// Message length
        len: usize,
        /// Largest message the peer will reassemble
        max: usize,
    },

    /// Channel encryption failed
    #[error("channel encryption failed: {0}")]
    Encrypt(wtp_crypto::CryptoError),
}

impl ReliableError {
    /// Whether retrying later can succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportBusy(_) | Self::PeerUnreachable(_))
    }
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Malformed AC host entry
    #[error("invalid AC address {0:?}")]
    InvalidHost(String),

    /// Out-of-range or inconsistent value
    #[error("invalid value for {field}: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// What was wrong
        reason: Cow<'static, str>,
    },
}

impl ConfigError {
    /// Create an invalid value error
    pub fn invalid(field: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias using the control plane's Error type
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FragmentError::TooShort {
            expected: 26,
            actual: 3,
        };
        assert_eq!(
            err.to_string(),
            "datagram too short: expected at least 26 bytes, got 3"
        );

        let err = ReliableError::PeerUnreachable(6);
        assert_eq!(err.to_string(), "peer unreachable after 6 transmissions");
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ReliableError::NotReady.into();
        assert!(matches!(err, Error::Reliable(ReliableError::NotReady)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::from(ReliableError::TransportBusy(3)).is_transient());
        assert!(Error::from(FragmentError::UnknownPreamble(9)).is_transient());
        assert!(!Error::from(ConfigError::invalid("mtu", "zero")).is_transient());
        assert!(!Error::from(wtp_transport::TransportError::Closed).is_transient());
    }
}
