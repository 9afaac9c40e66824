//! The security service consumed by the WTP control plane.
//!
//! The control plane never sees keys or cipher state. It starts a handshake,
//! shuttles handshake datagrams in and out, polls for the outcome and then
//! uses `encrypt`/`decrypt` on control traffic.

use crate::CryptoError;
use crate::handshake::{Completed, Initiator, Psk, SessionKeys};
use rand_core::OsRng;
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Why a handshake failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Lost, malformed or out-of-order handshake traffic. Retriable.
    Handshake,
    /// The peer holds different credentials. Never retried against the same AC.
    Authentication,
}

impl From<&CryptoError> for FailureKind {
    fn from(err: &CryptoError) -> Self {
        if !err.is_retriable() {
            Self::Authentication
        } else {
            Self::Handshake
        }
    }
}

/// Handshake progress as seen by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStatus {
    /// No handshake started.
    Idle,
    /// Waiting for the peer.
    Handshaking,
    /// Channel ready for `encrypt`/`decrypt`.
    Established,
    /// Handshake aborted.
    Failed(FailureKind),
}

/// Which data channel protections a side accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DataChannelPolicy(u8);

impl DataChannelPolicy {
    /// No mode acceptable.
    pub const NONE: Self = Self(0);
    /// Cleartext data channel.
    pub const CLEAR: Self = Self(0x01);
    /// Encrypted data channel.
    pub const ENCRYPTED: Self = Self(0x02);
    /// Either mode.
    pub const BOTH: Self = Self(0x03);

    /// Decode from the wire, ignoring unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & Self::BOTH.0)
    }

    /// Wire representation.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Modes acceptable to both sides.
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Union of two policies.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Whether no mode is acceptable.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether all modes in `other` are acceptable.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Handshake and channel encryption for a single AC session.
///
/// Implementations are driven entirely by the caller and never block.
pub trait SecurityService: Send {
    /// Begin a new handshake with `peer`, discarding any previous session.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake cannot be started at all.
    fn start_handshake(&mut self, peer: SocketAddr) -> Result<(), CryptoError>;

    /// Feed a handshake message received from the peer.
    fn handle_handshake(&mut self, message: &[u8]);

    /// Next handshake message to send to the peer.
    fn poll_transmit(&mut self) -> Option<Vec<u8>>;

    /// Current handshake status.
    fn poll(&self) -> HandshakeStatus;

    /// Data channel policy advertised by the peer, once established.
    fn data_channel_policy(&self) -> Option<DataChannelPolicy>;

    /// Protect an outgoing control datagram.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` before the handshake completes.
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Unprotect an incoming control datagram.
    ///
    /// # Errors
    ///
    /// Fails with `InvalidState` before the handshake completes and with
    /// `DecryptionFailed` for forged or corrupted input.
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Bytes `encrypt` adds to each datagram.
    fn overhead(&self) -> usize;

    /// Drop all session state.
    fn close(&mut self);
}

enum PskState {
    Idle,
    Handshaking(Initiator),
    Established {
        keys: SessionKeys,
        policy: DataChannelPolicy,
    },
    Failed(FailureKind),
}

/// PSK-authenticated X25519 + XChaCha20-Poly1305 channel.
pub struct PskSecurityService {
    identity: String,
    psk: Psk,
    state: PskState,
    outgoing: VecDeque<Vec<u8>>,
    peer: Option<SocketAddr>,
}

impl PskSecurityService {
    /// Create a service for the given identity and key.
    #[must_use]
    pub fn new(identity: impl Into<String>, psk: Psk) -> Self {
        Self {
            identity: identity.into(),
            psk,
            state: PskState::Idle,
            outgoing: VecDeque::new(),
            peer: None,
        }
    }

    fn fail(&mut self, err: &CryptoError) {
        let kind = FailureKind::from(err);
        tracing::warn!("Handshake with {:?} failed: {}", self.peer, err);
        self.state = PskState::Failed(kind);
        self.outgoing.clear();
    }
}

impl SecurityService for PskSecurityService {
    fn start_handshake(&mut self, peer: SocketAddr) -> Result<(), CryptoError> {
        let mut initiator = Initiator::new(self.identity.as_bytes(), self.psk.clone())?;
        self.outgoing.clear();
        self.outgoing.push_back(initiator.start(&mut OsRng));
        self.state = PskState::Handshaking(initiator);
        self.peer = Some(peer);
        tracing::debug!("Handshake started with {}", peer);
        Ok(())
    }

    fn handle_handshake(&mut self, message: &[u8]) {
        let PskState::Handshaking(initiator) = &mut self.state else {
            tracing::debug!("Ignoring handshake message outside handshake");
            return;
        };
        match initiator.read_server_hello(message) {
            Ok(Completed {
                finished,
                keys,
                ac_policy,
            }) => {
                self.outgoing.push_back(finished);
                self.state = PskState::Established {
                    keys,
                    policy: ac_policy,
                };
                tracing::debug!("Handshake with {:?} established", self.peer);
            }
            Err(e) => self.fail(&e),
        }
    }

    fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.outgoing.pop_front()
    }

    fn poll(&self) -> HandshakeStatus {
        match &self.state {
            PskState::Idle => HandshakeStatus::Idle,
            PskState::Handshaking(_) => HandshakeStatus::Handshaking,
            PskState::Established { .. } => HandshakeStatus::Established,
            PskState::Failed(kind) => HandshakeStatus::Failed(*kind),
        }
    }

    fn data_channel_policy(&self) -> Option<DataChannelPolicy> {
        match &self.state {
            PskState::Established { policy, .. } => Some(*policy),
            _ => None,
        }
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.state {
            PskState::Established { keys, .. } => keys.seal(&mut OsRng, plaintext),
            _ => Err(CryptoError::InvalidState),
        }
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match &self.state {
            PskState::Established { keys, .. } => keys.open(ciphertext),
            _ => Err(CryptoError::InvalidState),
        }
    }

    fn overhead(&self) -> usize {
        SessionKeys::overhead()
    }

    fn close(&mut self) {
        self.state = PskState::Idle;
        self.outgoing.clear();
        self.peer = None;
    }
}

/// Cleartext control channel, used when security is disabled.
///
/// Establishes as soon as a handshake is requested and passes bytes through.
pub struct ClearSecurityService {
    established: bool,
    policy: DataChannelPolicy,
}

impl ClearSecurityService {
    /// Create a cleartext service advertising `policy` as the peer policy.
    #[must_use]
    pub fn new(policy: DataChannelPolicy) -> Self {
        Self {
            established: false,
            policy,
        }
    }
}

impl Default for ClearSecurityService {
    fn default() -> Self {
        Self::new(DataChannelPolicy::CLEAR)
    }
}

impl SecurityService for ClearSecurityService {
    fn start_handshake(&mut self, _peer: SocketAddr) -> Result<(), CryptoError> {
        self.established = true;
        Ok(())
    }

    fn handle_handshake(&mut self, _message: &[u8]) {}

    fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        None
    }

    fn poll(&self) -> HandshakeStatus {
        if self.established {
            HandshakeStatus::Established
        } else {
            HandshakeStatus::Idle
        }
    }

    fn data_channel_policy(&self) -> Option<DataChannelPolicy> {
        self.established.then_some(self.policy)
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.established {
            return Err(CryptoError::InvalidState);
        }
        Ok(plaintext.to_vec())
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.established {
            return Err(CryptoError::InvalidState);
        }
        Ok(ciphertext.to_vec())
    }

    fn overhead(&self) -> usize {
        0
    }

    fn close(&mut self) {
        self.established = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handshake::Responder;

    fn peer() -> SocketAddr {
        "192.0.2.1:5246".parse().unwrap()
    }

    fn psk(byte: u8) -> Psk {
        Psk::new(vec![byte; 32]).unwrap()
    }

    #[test]
    fn test_policy_intersection() {
        let both = DataChannelPolicy::BOTH;
        assert_eq!(
            both.intersect(DataChannelPolicy::CLEAR),
            DataChannelPolicy::CLEAR
        );
        assert!(
            DataChannelPolicy::CLEAR
                .intersect(DataChannelPolicy::ENCRYPTED)
                .is_empty()
        );
        assert!(both.contains(DataChannelPolicy::ENCRYPTED));
        assert_eq!(DataChannelPolicy::from_bits(0xFF), both);
    }

    #[test]
    fn test_psk_service_lifecycle() {
        let mut service = PskSecurityService::new("wtp-01", psk(5));
        let mut ac = Responder::new("wtp-01", psk(5), DataChannelPolicy::ENCRYPTED);
        assert_eq!(service.poll(), HandshakeStatus::Idle);
        assert!(service.encrypt(b"early").is_err());

        service.start_handshake(peer()).unwrap();
        assert_eq!(service.poll(), HandshakeStatus::Handshaking);

        let hello = service.poll_transmit().unwrap();
        let reply = ac.handle(&mut OsRng, &hello).unwrap().unwrap();
        service.handle_handshake(&reply);
        assert_eq!(service.poll(), HandshakeStatus::Established);
        assert_eq!(
            service.data_channel_policy(),
            Some(DataChannelPolicy::ENCRYPTED)
        );

        let finished = service.poll_transmit().unwrap();
        ac.handle(&mut OsRng, &finished).unwrap();

        let sealed = service.encrypt(b"join").unwrap();
        assert_eq!(sealed.len(), 4 + service.overhead());
        assert_eq!(ac.keys().unwrap().open(&sealed).unwrap(), b"join");

        service.close();
        assert_eq!(service.poll(), HandshakeStatus::Idle);
    }

    #[test]
    fn test_psk_service_auth_failure() {
        let mut service = PskSecurityService::new("wtp-01", psk(5));
        let mut ac = Responder::new("wtp-01", psk(6), DataChannelPolicy::BOTH);

        service.start_handshake(peer()).unwrap();
        let hello = service.poll_transmit().unwrap();
        let reply = ac.handle(&mut OsRng, &hello).unwrap().unwrap();
        service.handle_handshake(&reply);

        assert_eq!(
            service.poll(),
            HandshakeStatus::Failed(FailureKind::Authentication)
        );
        assert!(service.poll_transmit().is_none());
    }

    #[test]
    fn test_psk_service_garbage_is_handshake_failure() {
        let mut service = PskSecurityService::new("wtp-01", psk(5));
        service.start_handshake(peer()).unwrap();
        service.handle_handshake(&[0x42, 0x00]);
        assert_eq!(
            service.poll(),
            HandshakeStatus::Failed(FailureKind::Handshake)
        );
    }

    #[test]
    fn test_clear_service_passthrough() {
        let mut service = ClearSecurityService::default();
        assert!(service.encrypt(b"x").is_err());
        service.start_handshake(peer()).unwrap();
        assert_eq!(service.poll(), HandshakeStatus::Established);
        assert_eq!(service.encrypt(b"x").unwrap(), b"x");
        assert_eq!(service.decrypt(b"y").unwrap(), b"y");
        assert_eq!(service.overhead(), 0);
    }
}
