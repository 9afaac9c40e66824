//! Control datagram sealing with `XChaCha20-Poly1305`.
//!
//! A sealed datagram is `nonce || ciphertext || tag`. Nonces are random per
//! datagram, so retransmissions and reordering need no counter state.

use crate::CryptoError;
use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use rand_core::{CryptoRng, RngCore};
use zeroize::Zeroizing;

const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// Bytes added to every sealed datagram.
pub const SEAL_OVERHEAD: usize = NONCE_LEN + TAG_LEN;

/// One direction of the control channel.
pub struct ChannelKey {
    cipher: XChaCha20Poly1305,
}

impl ChannelKey {
    /// Key the cipher; the raw bytes are wiped afterwards.
    #[must_use]
    pub fn new(key: Zeroizing<[u8; 32]>) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new((&*key).into()),
        }
    }

    /// Seal `plaintext` under a fresh nonce.
    ///
    /// # Errors
    ///
    /// `EncryptionFailed` if the cipher rejects the input.
    pub fn seal<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_LEN];
        rng.fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    /// Open a datagram produced by [`ChannelKey::seal`].
    ///
    /// # Errors
    ///
    /// `DecryptionFailed` if the datagram is truncated or forged.
    pub fn open(&self, datagram: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if datagram.len() < SEAL_OVERHEAD {
            return Err(CryptoError::DecryptionFailed);
        }
        let (nonce, msg) = datagram.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg, aad })
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

impl std::fmt::Debug for ChannelKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ChannelKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    fn key(byte: u8) -> ChannelKey {
        ChannelKey::new(Zeroizing::new([byte; 32]))
    }

    #[test]
    fn test_seal_open() {
        let key = key(1);
        let sealed = key.seal(&mut OsRng, b"echo", b"ctl").unwrap();
        assert_eq!(sealed.len(), 4 + SEAL_OVERHEAD);
        assert_eq!(key.open(&sealed, b"ctl").unwrap(), b"echo");
    }

    #[test]
    fn test_retransmission_uses_fresh_nonce() {
        let key = key(1);
        let a = key.seal(&mut OsRng, b"join request", b"").unwrap();
        let b = key.seal(&mut OsRng, b"join request", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_direction_fails() {
        let sealed = key(1).seal(&mut OsRng, b"payload", b"").unwrap();
        assert!(matches!(
            key(2).open(&sealed, b""),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_open_tampered() {
        let key = key(1);
        let mut sealed = key.seal(&mut OsRng, b"echo", b"").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(key.open(&sealed, b"").is_err());
        assert!(key.open(&sealed[..SEAL_OVERHEAD - 1], b"").is_err());
    }
}
