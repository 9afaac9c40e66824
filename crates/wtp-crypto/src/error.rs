//! Security errors.

use thiserror::Error;

/// Errors raised while securing the control channel
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Sealing a control datagram failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Control datagram did not authenticate
    #[error("decryption failed: authentication failure")]
    DecryptionFailed,

    /// Handshake message arrived out of order or was rejected by the peer
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Peer failed to prove knowledge of the pre-shared key
    #[error("peer authentication failed")]
    AuthenticationFailed,

    /// Operation needs an established channel
    #[error("channel not established")]
    InvalidState,

    /// Handshake message could not be parsed
    #[error("malformed handshake message: {0}")]
    InvalidMessage(String),

    /// Peer sent a low-order X25519 point
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Unusable identity or key material
    #[error("invalid pre-shared key: {0}")]
    InvalidPsk(String),
}

impl CryptoError {
    /// Whether this error means the peer holds different credentials.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }

    /// Whether trying the same AC again may succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        !matches!(self, Self::AuthenticationFailed | Self::InvalidPsk(_))
    }
}
