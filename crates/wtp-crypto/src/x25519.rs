//! Ephemeral X25519 agreement for the PSK handshake.

use crate::error::CryptoError;
use rand_core::{CryptoRng, RngCore};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

/// Length of an encoded X25519 public value.
pub const PUBLIC_LEN: usize = 32;

/// One-shot key pair; consumed by [`EphemeralKey::agree`].
pub struct EphemeralKey {
    secret: EphemeralSecret,
    public: [u8; PUBLIC_LEN],
}

impl EphemeralKey {
    /// Fresh key pair for one handshake attempt.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let secret = EphemeralSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret).to_bytes();
        Self { secret, public }
    }

    /// Public value sent in the hello message.
    pub fn public(&self) -> &[u8; PUBLIC_LEN] {
        &self.public
    }

    /// Agree on a shared secret with the peer's public value.
    ///
    /// # Errors
    ///
    /// `InvalidPublicKey` when the peer sent a low-order point.
    pub fn agree(self, peer: &[u8; PUBLIC_LEN]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        let shared = self.secret.diffie_hellman(&PublicKey::from(*peer));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidPublicKey);
        }
        Ok(Zeroizing::new(shared.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_both_sides_agree() {
        let wtp = EphemeralKey::generate(&mut OsRng);
        let ac = EphemeralKey::generate(&mut OsRng);
        let (wtp_public, ac_public) = (*wtp.public(), *ac.public());

        let a = wtp.agree(&ac_public).unwrap();
        let b = ac.agree(&wtp_public).unwrap();
        assert_eq!(*a, *b);
    }

    #[test]
    fn test_identity_point_rejected() {
        let key = EphemeralKey::generate(&mut OsRng);
        assert!(matches!(
            key.agree(&[0u8; PUBLIC_LEN]),
            Err(CryptoError::InvalidPublicKey)
        ));
    }
}
