//! # WTP Crypto
//!
//! Security boundary for the WTP control channel.
//!
//! This crate provides:
//! - The [`SecurityService`] trait the control plane drives
//! - A pre-shared-key authenticated X25519 handshake
//! - `XChaCha20-Poly1305` sealing of control datagrams
//! - A cleartext service for deployments with security disabled
//! - The AC-side [`handshake::Responder`] used by simulators and tests
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Key Exchange | X25519 | 128-bit |
//! | Authentication | keyed BLAKE3 over transcript | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | KDF | BLAKE3 derive-key | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod error;
pub mod handshake;
pub mod kdf;
pub mod service;
pub mod x25519;

pub use error::CryptoError;
pub use handshake::Psk;
pub use service::{
    ClearSecurityService, DataChannelPolicy, FailureKind, HandshakeStatus, PskSecurityService,
    SecurityService,
};
