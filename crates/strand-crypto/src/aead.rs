//! `XChaCha20-Poly1305` framing cipher.
//!
//! A secure channel owns one [`FrameCipher`] per direction. Frames are sealed in order and
//! the nonce is derived from a per-direction counter, so a dropped, replayed or reordered
//! frame fails authentication on the receiving side.

use crate::CryptoError;
use crate::hash::DirectionKeys;
use chacha20poly1305::{
    XChaCha20Poly1305,
    aead::{Aead, KeyInit, Payload},
};
use zeroize::ZeroizeOnDrop;

/// Authentication tag size (16 bytes / 128 bits).
pub const TAG_SIZE: usize = 16;

/// XChaCha20-Poly1305 nonce size (24 bytes / 192 bits).
pub const NONCE_SIZE: usize = 24;

/// AEAD key size (32 bytes / 256 bits).
pub const KEY_SIZE: usize = 32;

/// XChaCha20-Poly1305 nonce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Nonce([u8; NONCE_SIZE]);

impl Nonce {
    /// Counter in the first 8 bytes (little-endian), salt in the remaining 16.
    #[must_use]
    pub fn from_counter(counter: u64, salt: &[u8; 16]) -> Self {
        let mut bytes = [0u8; NONCE_SIZE];
        bytes[..8].copy_from_slice(&counter.to_le_bytes());
        bytes[8..].copy_from_slice(salt);
        Self(bytes)
    }

    /// Raw nonce bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    fn as_generic(&self) -> &chacha20poly1305::XNonce {
        chacha20poly1305::XNonce::from_slice(&self.0)
    }
}

/// AEAD key, zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct AeadKey([u8; KEY_SIZE]);

impl AeadKey {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Encrypt and append the tag.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::EncryptionFailed` if AEAD encryption fails.
    pub fn encrypt(
        &self,
        nonce: &Nonce,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        XChaCha20Poly1305::new((&self.0).into())
            .encrypt(nonce.as_generic(), Payload { msg: plaintext, aad })
            .map_err(|_| CryptoError::EncryptionFailed)
    }

    /// Verify the trailing tag and decrypt.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` on authentication failure.
    pub fn decrypt(
        &self,
        nonce: &Nonce,
        ciphertext_and_tag: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if ciphertext_and_tag.len() < TAG_SIZE {
            return Err(CryptoError::DecryptionFailed);
        }
        XChaCha20Poly1305::new((&self.0).into())
            .decrypt(
                nonce.as_generic(),
                Payload {
                    msg: ciphertext_and_tag,
                    aad,
                },
            )
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}

/// One direction of an encrypted frame stream.
#[derive(ZeroizeOnDrop)]
pub struct FrameCipher {
    key: AeadKey,
    #[zeroize(skip)]
    salt: [u8; 16],
    #[zeroize(skip)]
    counter: u64,
}

impl FrameCipher {
    /// Build a cipher from stretched direction keys.
    #[must_use]
    pub fn new(keys: &DirectionKeys) -> Self {
        Self {
            key: AeadKey::new(keys.cipher_key),
            salt: keys.nonce_salt,
            counter: 0,
        }
    }

    /// Seal the next frame.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::NonceOverflow` once the counter is exhausted.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        self.key.encrypt(&nonce, plaintext, &[])
    }

    /// Open the next frame.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::DecryptionFailed` if the frame was tampered with or arrived
    /// out of order.
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let nonce = self.next_nonce()?;
        self.key.decrypt(&nonce, ciphertext, &[])
    }

    /// Frames processed so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.counter
    }

    fn next_nonce(&mut self) -> Result<Nonce, CryptoError> {
        if self.counter == u64::MAX {
            return Err(CryptoError::NonceOverflow);
        }
        let nonce = Nonce::from_counter(self.counter, &self.salt);
        self.counter += 1;
        Ok(nonce)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::stretch_keys;

    fn cipher_pair() -> (FrameCipher, FrameCipher) {
        let (keys, _) = stretch_keys(&[3u8; 32], b"test");
        (FrameCipher::new(&keys), FrameCipher::new(&keys))
    }

    #[test]
    fn test_seal_open_in_order() {
        let (mut tx, mut rx) = cipher_pair();
        for msg in [&b"one"[..], b"two", b""] {
            let ct = tx.seal(msg).unwrap();
            assert_eq!(ct.len(), msg.len() + TAG_SIZE);
            assert_eq!(rx.open(&ct).unwrap(), msg);
        }
        assert_eq!(tx.frames(), 3);
    }

    #[test]
    fn test_reordered_frame_rejected() {
        let (mut tx, mut rx) = cipher_pair();
        let _first = tx.seal(b"first").unwrap();
        let second = tx.seal(b"second").unwrap();

        assert_eq!(rx.open(&second), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_tampered_frame_rejected() {
        let (mut tx, mut rx) = cipher_pair();
        let mut ct = tx.seal(b"payload").unwrap();
        ct[0] ^= 0x01;

        assert_eq!(rx.open(&ct), Err(CryptoError::DecryptionFailed));
    }

    #[test]
    fn test_nonce_layout() {
        let nonce = Nonce::from_counter(1, &[0xAA; 16]);
        assert_eq!(nonce.as_bytes()[0], 1);
        assert_eq!(&nonce.as_bytes()[8..], &[0xAA; 16]);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn frames_open_in_order(frames in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..256), 1..8)) {
                let (mut tx, mut rx) = cipher_pair();
                for frame in &frames {
                    let sealed = tx.seal(frame).unwrap();
                    prop_assert_eq!(sealed.len(), frame.len() + TAG_SIZE);
                    prop_assert_eq!(&rx.open(&sealed).unwrap(), frame);
                }
            }
        }
    }
}
