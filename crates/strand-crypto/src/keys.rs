//! Long-term identity keys.
//!
//! A peer is identified by an Ed25519 key pair. Public keys travel over the wire in a small
//! protobuf-style record so that the key type is self-describing:
//!
//! ```text
//! 0x08 <key type>  0x12 <len> <key bytes>
//! ```
//!
//! The same framing is used for private keys when they are written to disk.

use crate::CryptoError;
use ed25519_dalek::{Signer, Verifier};
use rand_core::{CryptoRng, OsRng, RngCore};
use std::fmt;
use std::hash::{Hash, Hasher};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Tag of the key-type field in an encoded key.
const TYPE_FIELD_TAG: u8 = 0x08;

/// Tag of the key-data field in an encoded key.
const DATA_FIELD_TAG: u8 = 0x12;

/// Ed25519 raw key size, public and secret alike.
pub const ED25519_KEY_SIZE: usize = 32;

/// Ed25519 signature size.
pub const SIGNATURE_SIZE: usize = 64;

/// Supported key algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Ed25519 signing keys
    Ed25519,
}

impl KeyType {
    /// Wire code of this key type.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Ed25519 => 1,
        }
    }

    /// Look up a key type by its wire code.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedKeyType`] for unknown codes.
    pub fn from_code(code: u8) -> Result<Self, CryptoError> {
        match code {
            1 => Ok(Self::Ed25519),
            other => Err(CryptoError::UnsupportedKeyType(u64::from(other))),
        }
    }
}

/// Ed25519 signature (64 bytes)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_SIZE]);

impl Signature {
    /// Create a signature from a slice
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the slice is not exactly 64 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; SIGNATURE_SIZE] = slice
            .try_into()
            .map_err(|_| CryptoError::InvalidSignature)?;
        Ok(Self(bytes))
    }

    /// Raw signature bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_SIZE] {
        &self.0
    }
}

/// Private half of an identity key pair.
///
/// Zeroized on drop.
#[derive(Clone, ZeroizeOnDrop)]
pub struct PrivateKey {
    inner: ed25519_dalek::SigningKey,
}

impl PrivateKey {
    /// Generate a new random key from the given RNG.
    #[must_use]
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::generate(rng),
        }
    }

    /// Rebuild a key from its 32-byte seed.
    #[must_use]
    pub fn from_seed(seed: &[u8; ED25519_KEY_SIZE]) -> Self {
        Self {
            inner: ed25519_dalek::SigningKey::from_bytes(seed),
        }
    }

    /// Algorithm of this key.
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        KeyType::Ed25519
    }

    /// The matching public key.
    #[must_use]
    pub fn public(&self) -> PublicKey {
        PublicKey {
            inner: self.inner.verifying_key(),
        }
    }

    /// Sign a message. Ed25519 signing is deterministic.
    #[must_use]
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.inner.sign(message).to_bytes())
    }

    /// Encode the key in its typed record form.
    ///
    /// The output holds secret material; callers should zeroize it once written out.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut seed = self.inner.to_bytes();
        let out = encode_record(self.key_type(), &seed);
        seed.zeroize();
        out
    }

    /// Decode a key previously produced by [`PrivateKey::to_bytes`].
    ///
    /// # Errors
    ///
    /// Fails if the record is malformed or the key type is unsupported.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (key_type, data) = decode_record(bytes)?;
        match key_type {
            KeyType::Ed25519 => {
                let mut seed: [u8; ED25519_KEY_SIZE] =
                    data.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                        expected: ED25519_KEY_SIZE,
                        actual: data.len(),
                    })?;
                let key = Self::from_seed(&seed);
                seed.zeroize();
                Ok(key)
            }
        }
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey")
            .field("public", &self.public())
            .finish_non_exhaustive()
    }
}

/// Public half of an identity key pair.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKey {
    inner: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Algorithm of this key.
    #[must_use]
    pub fn key_type(&self) -> KeyType {
        KeyType::Ed25519
    }

    /// Raw 32-byte key, without the type record around it.
    #[must_use]
    pub fn raw(&self) -> [u8; ED25519_KEY_SIZE] {
        self.inner.to_bytes()
    }

    /// Encode the key in its typed record form. Peer ids are derived from these bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_record(self.key_type(), self.inner.as_bytes())
    }

    /// Decode a key from its typed record form.
    ///
    /// # Errors
    ///
    /// Fails if the record is malformed, the type is unsupported, or the bytes are not
    /// a valid curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let (key_type, data) = decode_record(bytes)?;
        match key_type {
            KeyType::Ed25519 => {
                let raw: [u8; ED25519_KEY_SIZE] =
                    data.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                        expected: ED25519_KEY_SIZE,
                        actual: data.len(),
                    })?;
                let inner = ed25519_dalek::VerifyingKey::from_bytes(&raw)
                    .map_err(|_| CryptoError::InvalidPublicKey)?;
                Ok(Self { inner })
            }
        }
    }

    /// Verify a signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::InvalidSignature`] if the signature does not authenticate
    /// the message under this key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        let sig = ed25519_dalek::Signature::from_bytes(signature.as_bytes());
        self.inner
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}

impl Hash for PublicKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.as_bytes().hash(state);
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.inner.as_bytes()[..8]))
    }
}

/// Generate a fresh identity key pair using the OS RNG.
#[must_use]
pub fn generate_keypair(key_type: KeyType) -> (PrivateKey, PublicKey) {
    match key_type {
        KeyType::Ed25519 => {
            let private = PrivateKey::generate(&mut OsRng);
            let public = private.public();
            (private, public)
        }
    }
}

fn encode_record(key_type: KeyType, data: &[u8]) -> Vec<u8> {
    // Both fields stay below 128, so each varint is a single byte.
    let mut out = Vec::with_capacity(4 + data.len());
    out.push(TYPE_FIELD_TAG);
    out.push(key_type.code());
    out.push(DATA_FIELD_TAG);
    out.push(data.len() as u8);
    out.extend_from_slice(data);
    out
}

fn decode_record(bytes: &[u8]) -> Result<(KeyType, &[u8]), CryptoError> {
    match bytes {
        [TYPE_FIELD_TAG, code, DATA_FIELD_TAG, len, rest @ ..] => {
            if *code & 0x80 != 0 || *len & 0x80 != 0 {
                return Err(CryptoError::MalformedKey("multi-byte varint"));
            }
            let key_type = KeyType::from_code(*code)?;
            if rest.len() != usize::from(*len) {
                return Err(CryptoError::MalformedKey("length mismatch"));
            }
            Ok((key_type, rest))
        }
        _ => Err(CryptoError::MalformedKey("unexpected field layout")),
    }
}
