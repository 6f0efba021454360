//! Self-certifying peer identifiers.

use crate::error::ParseError;
use crate::multihash::Multihash;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use strand_crypto::PublicKey;

/// Multihash of a peer's encoded public key.
///
/// Anyone holding the public key can recompute the id, so a peer id that matches a
/// presented key authenticates that key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(Multihash);

impl PeerId {
    /// Derive the id of a public key.
    #[must_use]
    pub fn from_public_key(key: &PublicKey) -> Self {
        Self(Multihash::blake3(&key.to_bytes()))
    }

    /// Wrap an already-parsed multihash.
    #[must_use]
    pub fn from_multihash(hash: Multihash) -> Self {
        Self(hash)
    }

    /// Parse the binary multihash form.
    ///
    /// # Errors
    ///
    /// Fails if the bytes are not a valid multihash.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        Multihash::from_bytes(bytes).map(Self)
    }

    /// Parse the base58 text form.
    ///
    /// # Errors
    ///
    /// Fails on invalid base58 or an invalid multihash.
    pub fn from_base58(text: &str) -> Result<Self, ParseError> {
        Multihash::from_base58(text).map(Self)
    }

    /// Binary multihash form.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// The underlying multihash.
    #[must_use]
    pub fn as_multihash(&self) -> &Multihash {
        &self.0
    }

    /// Base58 text form.
    #[must_use]
    pub fn to_base58(&self) -> String {
        self.0.to_base58()
    }

    /// Abbreviated form for logs: the last eight base58 characters.
    #[must_use]
    pub fn short(&self) -> String {
        let full = self.to_base58();
        let start = full.len().saturating_sub(8);
        full[start..].to_string()
    }

    /// Whether `key` hashes to this id.
    #[must_use]
    pub fn matches_public_key(&self, key: &PublicKey) -> bool {
        *self == Self::from_public_key(key)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.short())
    }
}

impl FromStr for PeerId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl Serialize for PeerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PeerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
