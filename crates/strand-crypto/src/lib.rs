//! # Strand Crypto
//!
//! Cryptographic primitives for the Strand peer-to-peer substrate.
//!
//! This crate provides:
//! - Ed25519 identity keys with a self-describing wire encoding
//! - X25519 ephemeral key agreement for secure-channel handshakes
//! - BLAKE3 hashing and HKDF-style key stretching
//! - `XChaCha20-Poly1305` counter-nonce frame ciphers
//!
//! ## Cryptographic Suite
//!
//! | Function | Algorithm | Security Level |
//! |----------|-----------|----------------|
//! | Identity | Ed25519 | 128-bit |
//! | Key Exchange | X25519 | 128-bit |
//! | AEAD | XChaCha20-Poly1305 | 256-bit key |
//! | Hash | BLAKE3 | 128-bit collision |
//! | KDF | HKDF-BLAKE3 | 128-bit |

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod aead;
pub mod error;
pub mod hash;
pub mod keys;
pub mod x25519;

pub use error::CryptoError;
pub use keys::{KeyType, PrivateKey, PublicKey, Signature, generate_keypair};

/// Fill `buf` from the OS RNG.
pub fn random_bytes(buf: &mut [u8]) {
    use rand_core::RngCore;
    rand_core::OsRng.fill_bytes(buf);
}
