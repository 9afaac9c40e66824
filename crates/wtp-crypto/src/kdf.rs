//! BLAKE3 key derivation and transcript authentication.

use subtle::ConstantTimeEq;

/// BLAKE3 output size.
pub const MAC_SIZE: usize = 32;

/// BLAKE3 Key Derivation Function with context.
pub struct Kdf {
    context: &'static str,
}

impl Kdf {
    /// Create a KDF with a specific context string.
    #[must_use]
    pub fn new(context: &'static str) -> Self {
        Self { context }
    }

    /// Derive output from one or more pieces of input key material.
    pub fn derive(&self, ikm: &[&[u8]], output: &mut [u8]) {
        let mut hasher = blake3::Hasher::new_derive_key(self.context);
        for part in ikm {
            hasher.update(&(part.len() as u32).to_be_bytes());
            hasher.update(part);
        }
        let mut reader = hasher.finalize_xof();
        reader.fill(output);
    }

    /// Derive a 32-byte key.
    #[must_use]
    pub fn derive_key(&self, ikm: &[&[u8]]) -> [u8; 32] {
        let mut output = [0u8; 32];
        self.derive(ikm, &mut output);
        output
    }
}

/// Keyed BLAKE3 over a label and a transcript hash.
#[must_use]
pub fn mac(key: &[u8; 32], label: &[u8], transcript: &[u8; 32]) -> [u8; MAC_SIZE] {
    let mut hasher = blake3::Hasher::new_keyed(key);
    hasher.update(label);
    hasher.update(transcript);
    *hasher.finalize().as_bytes()
}

/// Constant-time MAC comparison.
#[must_use]
pub fn verify_mac(expected: &[u8; MAC_SIZE], received: &[u8]) -> bool {
    received.len() == MAC_SIZE && bool::from(expected[..].ct_eq(received))
}

/// Running hash of every handshake message.
#[derive(Clone)]
pub struct Transcript(blake3::Hasher);

impl Transcript {
    /// Start an empty transcript bound to the protocol label.
    #[must_use]
    pub fn new(label: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(label);
        Self(hasher)
    }

    /// Absorb a message.
    pub fn absorb(&mut self, message: &[u8]) {
        self.0.update(&(message.len() as u32).to_be_bytes());
        self.0.update(message);
    }

    /// Current transcript hash.
    #[must_use]
    pub fn hash(&self) -> [u8; 32] {
        *self.0.finalize().as_bytes()
    }
}
