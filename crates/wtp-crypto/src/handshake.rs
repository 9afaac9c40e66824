//! Pre-shared-key authenticated X25519 handshake.
//!
//! ```text
//! WTP (initiator)                                   AC (responder)
//!   ClientHello  [identity, random, e_pub]   ------>
//!                <------  ServerHello [policy, random, e_pub, mac_ac]
//!   ClientFinished [mac_wtp]                 ------>
//! ```
//!
//! Both MACs are keyed with a key derived from the PSK and the ephemeral DH
//! secret and cover the transcript so far, so each side proves possession of
//! the PSK. A wrong PSK surfaces on the WTP as
//! [`CryptoError::AuthenticationFailed`] when `mac_ac` does not verify.
//!
//! Channel keys are derived once `mac_ac` is absorbed into the transcript; the
//! responder accepts the first authenticated control datagram as implicit
//! confirmation if `ClientFinished` is lost.

use crate::CryptoError;
use crate::aead::{ChannelKey, SEAL_OVERHEAD};
use crate::kdf::{Kdf, MAC_SIZE, Transcript, mac, verify_mac};
use crate::service::DataChannelPolicy;
use crate::x25519::EphemeralKey;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Handshake protocol version carried in `ClientHello`.
pub const HANDSHAKE_VERSION: u8 = 1;

/// Message type: `ClientHello`.
pub const CLIENT_HELLO: u8 = 0x01;
/// Message type: `ServerHello`.
pub const SERVER_HELLO: u8 = 0x02;
/// Message type: `ClientFinished`.
pub const CLIENT_FINISHED: u8 = 0x03;
/// Message type: alert.
pub const ALERT: u8 = 0x15;

/// Alert reason: credentials rejected.
pub const ALERT_AUTHENTICATION: u8 = 1;
/// Alert reason: protocol error.
pub const ALERT_HANDSHAKE: u8 = 2;

const RANDOM_SIZE: usize = 32;
const KEY_SIZE: usize = 32;
const MAX_IDENTITY_LEN: usize = 255;

const TRANSCRIPT_LABEL: &[u8] = b"capwap-wtp psk handshake v1";
const AUTH_CONTEXT: &str = "capwap-wtp 2024 psk authentication key";
const CHANNEL_CONTEXT: &str = "capwap-wtp 2024 control channel keys";
const AC_LABEL: &[u8] = b"ac finished";
const WTP_LABEL: &[u8] = b"wtp finished";
const CHANNEL_AAD: &[u8] = b"capwap-wtp control";

/// Pre-shared key material.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Psk(Vec<u8>);

impl Psk {
    /// Wrap raw key bytes.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPsk` if the key is empty.
    pub fn new(bytes: Vec<u8>) -> Result<Self, CryptoError> {
        if bytes.is_empty() {
            return Err(CryptoError::InvalidPsk("key is empty".into()));
        }
        Ok(Self(bytes))
    }

    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for Psk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Psk(..)")
    }
}

/// Directional channel keys produced by a completed handshake.
pub struct SessionKeys {
    send: ChannelKey,
    recv: ChannelKey,
}

impl SessionKeys {
    fn derive(psk: &Psk, shared: &[u8; 32], transcript: &[u8; 32], initiator: bool) -> Self {
        let mut okm = [0u8; 2 * KEY_SIZE];
        Kdf::new(CHANNEL_CONTEXT).derive(&[psk.as_bytes(), &shared[..], &transcript[..]], &mut okm);

        let mut wtp_to_ac = Zeroizing::new([0u8; KEY_SIZE]);
        let mut ac_to_wtp = Zeroizing::new([0u8; KEY_SIZE]);
        wtp_to_ac.copy_from_slice(&okm[..KEY_SIZE]);
        ac_to_wtp.copy_from_slice(&okm[KEY_SIZE..]);
        okm.zeroize();

        let (send, recv) = if initiator {
            (wtp_to_ac, ac_to_wtp)
        } else {
            (ac_to_wtp, wtp_to_ac)
        };
        Self {
            send: ChannelKey::new(send),
            recv: ChannelKey::new(recv),
        }
    }

    /// Seal an outgoing control datagram.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn seal<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.send.seal(rng, plaintext, CHANNEL_AAD)
    }

    /// Open an incoming control datagram.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` on authentication failure.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.recv.open(sealed, CHANNEL_AAD)
    }

    /// Bytes added by [`SessionKeys::seal`].
    #[must_use]
    pub const fn overhead() -> usize {
        SEAL_OVERHEAD
    }
}

fn auth_key(psk: &Psk, shared: &[u8; 32], identity: &[u8]) -> [u8; 32] {
    Kdf::new(AUTH_CONTEXT).derive_key(&[psk.as_bytes(), &shared[..], identity])
}

fn read_array<const N: usize>(bytes: &[u8], at: usize) -> Result<[u8; N], CryptoError> {
    bytes
        .get(at..at + N)
        .and_then(|s| s.try_into().ok())
        .ok_or_else(|| CryptoError::InvalidMessage(format!("truncated at offset {at}")))
}

/// Encode an alert for a failed handshake.
#[must_use]
pub fn alert(err: &CryptoError) -> Vec<u8> {
    let reason = if err.is_authentication() {
        ALERT_AUTHENTICATION
    } else {
        ALERT_HANDSHAKE
    };
    vec![ALERT, reason]
}

fn read_alert(message: &[u8]) -> CryptoError {
    match message.get(1) {
        Some(&ALERT_AUTHENTICATION) => CryptoError::AuthenticationFailed,
        _ => CryptoError::Handshake("peer aborted handshake".into()),
    }
}

/// Result of a completed initiator handshake.
pub struct Completed {
    /// `ClientFinished` to send to the AC.
    pub finished: Vec<u8>,
    /// Channel keys.
    pub keys: SessionKeys,
    /// Data channel policy advertised by the AC.
    pub ac_policy: DataChannelPolicy,
}

/// WTP side of the handshake.
pub struct Initiator {
    identity: Vec<u8>,
    psk: Psk,
    secret: Option<EphemeralKey>,
    transcript: Transcript,
}

impl Initiator {
    /// Create an initiator for the given identity and key.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidPsk` if the identity does not fit the wire
    /// format.
    pub fn new(identity: impl Into<Vec<u8>>, psk: Psk) -> Result<Self, CryptoError> {
        let identity = identity.into();
        if identity.len() > MAX_IDENTITY_LEN {
            return Err(CryptoError::InvalidPsk(format!(
                "identity too long: {} bytes",
                identity.len()
            )));
        }
        Ok(Self {
            identity,
            psk,
            secret: None,
            transcript: Transcript::new(TRANSCRIPT_LABEL),
        })
    }

    /// Build `ClientHello`, discarding any earlier attempt.
    pub fn start<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Vec<u8> {
        let secret = EphemeralKey::generate(rng);
        let mut random = [0u8; RANDOM_SIZE];
        rng.fill_bytes(&mut random);

        let mut hello = Vec::with_capacity(3 + self.identity.len() + RANDOM_SIZE + KEY_SIZE);
        hello.push(CLIENT_HELLO);
        hello.push(HANDSHAKE_VERSION);
        hello.push(self.identity.len() as u8);
        hello.extend_from_slice(&self.identity);
        hello.extend_from_slice(&random);
        hello.extend_from_slice(secret.public());

        self.transcript = Transcript::new(TRANSCRIPT_LABEL);
        self.transcript.absorb(&hello);
        self.secret = Some(secret);
        hello
    }

    /// Process the AC's reply to `ClientHello`.
    ///
    /// # Errors
    ///
    /// - `AuthenticationFailed` if the AC's MAC does not verify or the AC
    ///   rejected our identity.
    /// - `Handshake`/`InvalidMessage` on protocol errors.
    pub fn read_server_hello(&mut self, message: &[u8]) -> Result<Completed, CryptoError> {
        match message.first() {
            Some(&SERVER_HELLO) => {}
            Some(&ALERT) => return Err(read_alert(message)),
            _ => return Err(CryptoError::Handshake("expected ServerHello".into())),
        }
        let body_len = 2 + RANDOM_SIZE + KEY_SIZE;
        if message.len() != body_len + MAC_SIZE {
            return Err(CryptoError::InvalidMessage(format!(
                "ServerHello length {}",
                message.len()
            )));
        }
        let secret = self.secret.take().ok_or(CryptoError::InvalidState)?;
        let ac_policy = DataChannelPolicy::from_bits(message[1]);
        let peer: [u8; KEY_SIZE] = read_array(message, 2 + RANDOM_SIZE)?;
        let shared = secret.agree(&peer)?;

        let key = auth_key(&self.psk, &shared, &self.identity);
        self.transcript.absorb(&message[..body_len]);
        let expected = mac(&key, AC_LABEL, &self.transcript.hash());
        if !verify_mac(&expected, &message[body_len..]) {
            return Err(CryptoError::AuthenticationFailed);
        }
        self.transcript.absorb(&message[body_len..]);

        let th = self.transcript.hash();
        let mut finished = Vec::with_capacity(1 + MAC_SIZE);
        finished.push(CLIENT_FINISHED);
        finished.extend_from_slice(&mac(&key, WTP_LABEL, &th));

        Ok(Completed {
            finished,
            keys: SessionKeys::derive(&self.psk, &shared, &th, true),
            ac_policy,
        })
    }
}

/// Progress of a [`Responder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    /// Waiting for `ClientHello`.
    AwaitingHello,
    /// `ServerHello` sent, keys available, waiting for `ClientFinished`.
    AwaitingFinished,
    /// Peer proved possession of the PSK.
    Confirmed,
}

/// AC side of the handshake.
pub struct Responder {
    identity: Vec<u8>,
    psk: Psk,
    policy: DataChannelPolicy,
    state: ResponderState,
    expected_finished: [u8; MAC_SIZE],
    keys: Option<SessionKeys>,
}

impl Responder {
    /// Create a responder that accepts a single identity.
    #[must_use]
    pub fn new(identity: impl Into<Vec<u8>>, psk: Psk, policy: DataChannelPolicy) -> Self {
        Self {
            identity: identity.into(),
            psk,
            policy,
            state: ResponderState::AwaitingHello,
            expected_finished: [0u8; MAC_SIZE],
            keys: None,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ResponderState {
        self.state
    }

    /// Channel keys, once `ServerHello` has been produced.
    #[must_use]
    pub fn keys(&self) -> Option<&SessionKeys> {
        self.keys.as_ref()
    }

    /// Mark the handshake confirmed after an authenticated data datagram.
    pub fn confirm(&mut self) {
        if self.state == ResponderState::AwaitingFinished {
            self.state = ResponderState::Confirmed;
        }
    }

    /// Process a handshake message, returning the reply to send, if any.
    ///
    /// A new `ClientHello` restarts the handshake.
    ///
    /// # Errors
    ///
    /// Returns an error the caller should answer with [`alert`].
    pub fn handle<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        message: &[u8],
    ) -> Result<Option<Vec<u8>>, CryptoError> {
        match message.first() {
            Some(&CLIENT_HELLO) => self.read_client_hello(rng, message).map(Some),
            Some(&CLIENT_FINISHED) if self.state == ResponderState::AwaitingFinished => {
                if verify_mac(&self.expected_finished, &message[1..]) {
                    self.state = ResponderState::Confirmed;
                    Ok(None)
                } else {
                    Err(CryptoError::AuthenticationFailed)
                }
            }
            // Duplicate finished after implicit confirmation
            Some(&CLIENT_FINISHED) if self.state == ResponderState::Confirmed => Ok(None),
            _ => Err(CryptoError::Handshake("unexpected handshake message".into())),
        }
    }

    fn read_client_hello<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        hello: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        self.state = ResponderState::AwaitingHello;
        self.keys = None;

        if hello.get(1) != Some(&HANDSHAKE_VERSION) {
            return Err(CryptoError::Handshake("unsupported version".into()));
        }
        let id_len = *hello
            .get(2)
            .ok_or_else(|| CryptoError::InvalidMessage("truncated ClientHello".into()))?
            as usize;
        if hello.len() != 3 + id_len + RANDOM_SIZE + KEY_SIZE {
            return Err(CryptoError::InvalidMessage(format!(
                "ClientHello length {}",
                hello.len()
            )));
        }
        if hello[3..3 + id_len] != self.identity[..] {
            return Err(CryptoError::AuthenticationFailed);
        }
        let peer: [u8; KEY_SIZE] = read_array(hello, 3 + id_len + RANDOM_SIZE)?;

        let secret = EphemeralKey::generate(rng);
        let public = *secret.public();
        let shared = secret.agree(&peer)?;
        let key = auth_key(&self.psk, &shared, &self.identity);

        let mut transcript = Transcript::new(TRANSCRIPT_LABEL);
        transcript.absorb(hello);

        let mut reply = Vec::with_capacity(2 + RANDOM_SIZE + KEY_SIZE + MAC_SIZE);
        reply.push(SERVER_HELLO);
        reply.push(self.policy.bits());
        let mut random = [0u8; RANDOM_SIZE];
        rng.fill_bytes(&mut random);
        reply.extend_from_slice(&random);
        reply.extend_from_slice(&public);
        transcript.absorb(&reply);

        let ac_mac = mac(&key, AC_LABEL, &transcript.hash());
        reply.extend_from_slice(&ac_mac);
        transcript.absorb(&ac_mac);

        let th = transcript.hash();
        self.expected_finished = mac(&key, WTP_LABEL, &th);
        self.keys = Some(SessionKeys::derive(&self.psk, &shared, &th, false));
        self.state = ResponderState::AwaitingFinished;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn psk(byte: u8) -> Psk {
        Psk::new(vec![byte; 16]).unwrap()
    }

    fn pair(wtp_key: u8, ac_key: u8) -> (Initiator, Responder) {
        (
            Initiator::new("wtp-01", psk(wtp_key)).unwrap(),
            Responder::new("wtp-01", psk(ac_key), DataChannelPolicy::BOTH),
        )
    }

    #[test]
    fn test_handshake_establishes_matching_keys() {
        let (mut wtp, mut ac) = pair(1, 1);

        let hello = wtp.start(&mut OsRng);
        let server_hello = ac.handle(&mut OsRng, &hello).unwrap().unwrap();
        let done = wtp.read_server_hello(&server_hello).unwrap();
        assert_eq!(done.ac_policy, DataChannelPolicy::BOTH);

        assert!(ac.handle(&mut OsRng, &done.finished).unwrap().is_none());
        assert_eq!(ac.state(), ResponderState::Confirmed);

        let sealed = done.keys.seal(&mut OsRng, b"join").unwrap();
        assert_eq!(ac.keys().unwrap().open(&sealed).unwrap(), b"join");

        let reply = ac.keys().unwrap().seal(&mut OsRng, b"accepted").unwrap();
        assert_eq!(done.keys.open(&reply).unwrap(), b"accepted");
    }

    #[test]
    fn test_wrong_psk_is_authentication_failure() {
        let (mut wtp, mut ac) = pair(1, 2);

        let hello = wtp.start(&mut OsRng);
        let server_hello = ac.handle(&mut OsRng, &hello).unwrap().unwrap();
        let err = wtp.read_server_hello(&server_hello).err().unwrap();
        assert!(err.is_authentication());
    }

    #[test]
    fn test_unknown_identity_alert() {
        let mut wtp = Initiator::new("intruder", psk(1)).unwrap();
        let mut ac = Responder::new("wtp-01", psk(1), DataChannelPolicy::BOTH);

        let hello = wtp.start(&mut OsRng);
        let err = ac.handle(&mut OsRng, &hello).unwrap_err();
        let reply = alert(&err);

        let err = wtp.read_server_hello(&reply).err().unwrap();
        assert!(matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_truncated_server_hello() {
        let (mut wtp, mut ac) = pair(1, 1);
        let hello = wtp.start(&mut OsRng);
        let server_hello = ac.handle(&mut OsRng, &hello).unwrap().unwrap();

        let err = wtp
            .read_server_hello(&server_hello[..server_hello.len() - 1])
            .err()
            .unwrap();
        assert!(matches!(err, CryptoError::InvalidMessage(_)));

        // The ephemeral key is still there for the intact message
        let done = wtp.read_server_hello(&server_hello).unwrap();
        assert!(ac.handle(&mut OsRng, &done.finished).unwrap().is_none());
        assert_eq!(ac.state(), ResponderState::Confirmed);
    }

    #[test]
    fn test_server_hello_without_start() {
        let (mut wtp, mut ac) = pair(1, 1);
        let mut other = Initiator::new("wtp-01", psk(1)).unwrap();
        let hello = other.start(&mut OsRng);
        let server_hello = ac.handle(&mut OsRng, &hello).unwrap().unwrap();

        assert!(matches!(
            wtp.read_server_hello(&server_hello),
            Err(CryptoError::InvalidState)
        ));
    }

    #[test]
    fn test_restart_replaces_keys() {
        let (mut wtp, mut ac) = pair(1, 1);
        let first = wtp.start(&mut OsRng);
        let first_reply = ac.handle(&mut OsRng, &first).unwrap().unwrap();

        let second = wtp.start(&mut OsRng);
        let second_reply = ac.handle(&mut OsRng, &second).unwrap().unwrap();

        // The stale reply no longer matches the transcript
        assert!(wtp.read_server_hello(&first_reply).is_err());
        let _ = second_reply;
    }

    #[test]
    fn test_bad_finished_rejected() {
        let (mut wtp, mut ac) = pair(1, 1);
        let hello = wtp.start(&mut OsRng);
        ac.handle(&mut OsRng, &hello).unwrap();

        let mut bogus = vec![CLIENT_FINISHED];
        bogus.extend_from_slice(&[0u8; MAC_SIZE]);
        assert!(ac.handle(&mut OsRng, &bogus).unwrap_err().is_authentication());
    }

    #[test]
    fn test_empty_psk_rejected() {
        assert!(Psk::new(Vec::new()).is_err());
    }
}
