//! Control session state.
//!
//! A control session exists from the moment the security session is
//! established until the next reset. It carries the identifiers both sides
//! stamp on every control fragment and the two sequence spaces: one for
//! WTP-initiated requests, one for AC-initiated requests.

use rand::RngCore;
use std::fmt;
use std::net::SocketAddr;
use wtp_transport::TransportKind;

/// Random 16-byte control session identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Draw a fresh identifier from the OS RNG.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Last sequence number received on an AC-initiated request.
///
/// Starts as `Initial`, which accepts any sequence for the first request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemoteSequence {
    /// No request processed yet
    #[default]
    Initial,
    /// Sequence of the last fully processed request
    Last(u8),
}

impl RemoteSequence {
    /// Wire value of the initial state.
    pub const SENTINEL: u8 = 0xFF;

    /// Whether `sequence` is the next new request.
    #[must_use]
    pub fn accepts(self, sequence: u8) -> bool {
        match self {
            Self::Initial => true,
            Self::Last(last) => sequence == last.wrapping_add(1),
        }
    }

    /// Whether `sequence` repeats the last processed request.
    #[must_use]
    pub fn is_repeat(self, sequence: u8) -> bool {
        self == Self::Last(sequence)
    }

    /// Raw value, with the sentinel for `Initial`.
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Initial => Self::SENTINEL,
            Self::Last(last) => last,
        }
    }
}

/// State of the single control session with the selected AC.
#[derive(Debug, Clone)]
pub struct ControlSession {
    id: SessionId,
    local_sequence: u8,
    remote_sequence: RemoteSequence,
    ac: SocketAddr,
    transport: TransportKind,
    mtu: usize,
}

impl ControlSession {
    /// Open a session with a fresh random identifier.
    #[must_use]
    pub fn new(ac: SocketAddr, transport: TransportKind, mtu: usize) -> Self {
        Self::with_id(SessionId::random(), ac, transport, mtu)
    }

    /// Open a session with a known identifier.
    #[must_use]
    pub fn with_id(id: SessionId, ac: SocketAddr, transport: TransportKind, mtu: usize) -> Self {
        Self {
            id,
            local_sequence: 0,
            remote_sequence: RemoteSequence::Initial,
            ac,
            transport,
            mtu,
        }
    }

    /// Session identifier
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Selected AC
    #[must_use]
    pub fn ac(&self) -> SocketAddr {
        self.ac
    }

    /// Datagram protocol
    #[must_use]
    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Path MTU
    #[must_use]
    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sequence the next new request will carry
    #[must_use]
    pub fn local_sequence(&self) -> u8 {
        self.local_sequence
    }

    /// Last AC request sequence
    #[must_use]
    pub fn remote_sequence(&self) -> RemoteSequence {
        self.remote_sequence
    }

    /// Consume the next local sequence number.
    pub(crate) fn next_local_sequence(&mut self) -> u8 {
        let sequence = self.local_sequence;
        self.local_sequence = self.local_sequence.wrapping_add(1);
        sequence
    }

    /// Record a fully processed AC request.
    pub(crate) fn set_remote_sequence(&mut self, sequence: u8) {
        self.remote_sequence = RemoteSequence::Last(sequence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ControlSession {
        ControlSession::new("192.0.2.1:5246".parse().unwrap(), TransportKind::Udp, 1400)
    }

    #[test]
    fn test_local_sequence_wraps() {
        let mut session = session();
        for expected in 0..=255u8 {
            assert_eq!(session.next_local_sequence(), expected);
        }
        assert_eq!(session.next_local_sequence(), 0);
    }

    #[test]
    fn test_remote_sequence_initial_accepts_any() {
        let remote = RemoteSequence::Initial;
        assert!(remote.accepts(0));
        assert!(remote.accepts(200));
        assert!(!remote.is_repeat(0xFF));
        assert_eq!(remote.as_u8(), RemoteSequence::SENTINEL);
    }

    #[test]
    fn test_remote_sequence_next_and_repeat() {
        let mut session = session();
        session.set_remote_sequence(255);
        let remote = session.remote_sequence();

        assert!(remote.accepts(0));
        assert!(!remote.accepts(1));
        assert!(!remote.accepts(255));
        assert!(remote.is_repeat(255));
    }

    #[test]
    fn test_session_ids_differ() {
        assert_ne!(SessionId::random(), SessionId::random());
    }

    #[test]
    fn test_session_id_display() {
        let id = SessionId::from_bytes([0x0F; 16]);
        assert_eq!(id.to_string(), "0f".repeat(16));
    }
}
