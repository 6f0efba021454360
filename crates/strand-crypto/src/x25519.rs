//! X25519 ephemeral key agreement.
//!
//! Every secure-channel handshake generates a fresh X25519 key pair, sends the public
//! half signed by the long-term identity key, and derives the session secret from the
//! agreement with the remote's ephemeral key.

use crate::CryptoError;
use rand_core::{CryptoRng, RngCore};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an X25519 public key on the wire.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Ephemeral X25519 secret used for a single handshake.
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct EphemeralSecret(x25519_dalek::StaticSecret);

/// X25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EphemeralPublic(x25519_dalek::PublicKey);

/// Output of a successful key agreement.
#[derive(ZeroizeOnDrop, Zeroize)]
pub struct SharedSecret([u8; 32]);

impl EphemeralSecret {
    /// Generate a new secret from the given RNG.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(rng))
    }

    /// Rebuild a secret from its raw scalar bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(x25519_dalek::StaticSecret::from(bytes))
    }

    /// Public half to send to the remote.
    #[must_use]
    pub fn public_key(&self) -> EphemeralPublic {
        EphemeralPublic(x25519_dalek::PublicKey::from(&self.0))
    }

    /// Agree on a shared secret with the remote's public key.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyAgreementFailed`] when the remote key is a low-order
    /// point, which would make the shared secret all zeros.
    pub fn agree(&self, remote: &EphemeralPublic) -> Result<SharedSecret, CryptoError> {
        let shared = self.0.diffie_hellman(&remote.0);
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreementFailed);
        }
        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl EphemeralPublic {
    /// Parse a public key received from the wire.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidKeyLength`] unless the slice is 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let raw: [u8; PUBLIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: PUBLIC_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(x25519_dalek::PublicKey::from(raw)))
    }

    /// Raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }
}

impl SharedSecret {
    /// Raw secret bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn test_agreement_is_symmetric() {
        let alice = EphemeralSecret::generate(&mut OsRng);
        let bob = EphemeralSecret::generate(&mut OsRng);

        let ab = alice.agree(&bob.public_key()).unwrap();
        let ba = bob.agree(&alice.public_key()).unwrap();

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_reject_low_order_point() {
        let secret = EphemeralSecret::generate(&mut OsRng);
        let zero = EphemeralPublic::from_slice(&[0u8; 32]).unwrap();

        assert_eq!(
            secret.agree(&zero).err(),
            Some(CryptoError::KeyAgreementFailed)
        );
    }

    #[test]
    fn test_public_from_slice_length() {
        assert!(EphemeralPublic::from_slice(&[1u8; 31]).is_err());
        let key = EphemeralPublic::from_slice(&[9u8; 32]).unwrap();
        assert_eq!(key.as_bytes(), &[9u8; 32]);
    }
}
