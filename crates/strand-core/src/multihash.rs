//! Self-describing hashes: `<varint code><varint length><digest>`.

use crate::error::ParseError;
use crate::varint;
use std::fmt;

/// Identity "hash": the digest is the input itself.
pub const IDENTITY: u64 = 0x00;

/// SHA2-256.
pub const SHA2_256: u64 = 0x12;

/// SHA2-512.
pub const SHA2_512: u64 = 0x13;

/// BLAKE3 with a 256-bit output. Used for peer ids.
pub const BLAKE3: u64 = 0x1e;

/// Largest digest accepted from the wire.
pub const MAX_DIGEST_LEN: usize = 64;

/// Expected digest length for a hash code, `None` for variable-length codes.
fn expected_len(code: u64) -> Result<Option<usize>, ParseError> {
    match code {
        IDENTITY => Ok(None),
        SHA2_256 => Ok(Some(32)),
        SHA2_512 => Ok(Some(64)),
        BLAKE3 => Ok(Some(32)),
        other => Err(ParseError::InvalidMultihash(
            format!("unsupported hash code 0x{other:x}").into(),
        )),
    }
}

/// An encoded multihash. Always holds a well-formed encoding.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Multihash {
    bytes: Vec<u8>,
}

impl Multihash {
    /// Wrap an existing digest.
    ///
    /// # Errors
    ///
    /// Fails if the code is unsupported or the digest length is wrong for it.
    pub fn wrap(code: u64, digest: &[u8]) -> Result<Self, ParseError> {
        check_digest_len(code, digest.len())?;
        let mut bytes = Vec::with_capacity(4 + digest.len());
        varint::encode_to(code, &mut bytes);
        varint::encode_to(digest.len() as u64, &mut bytes);
        bytes.extend_from_slice(digest);
        Ok(Self { bytes })
    }

    /// BLAKE3-256 multihash of `data`.
    #[must_use]
    pub fn blake3(data: &[u8]) -> Self {
        let digest = strand_crypto::hash::hash(data);
        let mut bytes = Vec::with_capacity(2 + digest.len());
        bytes.push(BLAKE3 as u8);
        bytes.push(digest.len() as u8);
        bytes.extend_from_slice(&digest);
        Self { bytes }
    }

    /// Parse a multihash occupying all of `bytes`.
    ///
    /// # Errors
    ///
    /// Fails on a malformed header, unsupported code, or trailing data.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let (hash, rest) = Self::from_bytes_partial(bytes)?;
        if !rest.is_empty() {
            return Err(ParseError::InvalidMultihash("trailing bytes".into()));
        }
        Ok(hash)
    }

    /// Parse a multihash from the front of `bytes`, returning the remainder.
    ///
    /// # Errors
    ///
    /// Fails on a malformed header, unsupported code, or a truncated digest.
    pub fn from_bytes_partial(bytes: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        let (code, rest) = varint::decode(bytes)?;
        let (len, rest) = varint::decode_usize(rest)?;
        check_digest_len(code, len)?;
        if rest.len() < len {
            return Err(ParseError::Truncated);
        }
        let consumed = bytes.len() - rest.len() + len;
        Ok((
            Self {
                bytes: bytes[..consumed].to_vec(),
            },
            &rest[len..],
        ))
    }

    /// Hash function code.
    #[must_use]
    pub fn code(&self) -> u64 {
        // Validated at construction.
        varint::decode(&self.bytes).map_or(0, |(code, _)| code)
    }

    /// The digest without its header.
    #[must_use]
    pub fn digest(&self) -> &[u8] {
        varint::decode(&self.bytes)
            .and_then(|(_, rest)| varint::decode_usize(rest))
            .map_or(&[][..], |(_, digest)| digest)
    }

    /// Full encoding.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume into the full encoding.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Base58 text form.
    #[must_use]
    pub fn to_base58(&self) -> String {
        bs58::encode(&self.bytes).into_string()
    }

    /// Parse the base58 text form.
    ///
    /// # Errors
    ///
    /// Fails if the text is not base58 or does not decode to a valid multihash.
    pub fn from_base58(text: &str) -> Result<Self, ParseError> {
        let bytes = bs58::decode(text)
            .into_vec()
            .map_err(|_| ParseError::InvalidBase58)?;
        Self::from_bytes(&bytes)
    }
}

fn check_digest_len(code: u64, len: usize) -> Result<(), ParseError> {
    if len > MAX_DIGEST_LEN {
        return Err(ParseError::InvalidMultihash("digest too long".into()));
    }
    match expected_len(code)? {
        Some(expected) if expected != len => Err(ParseError::InvalidMultihash(
            format!("digest length {len}, expected {expected}").into(),
        )),
        _ => Ok(()),
    }
}

impl fmt::Debug for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multihash(0x{:x}, {})", self.code(), hex::encode(self.digest()))
    }
}

impl fmt::Display for Multihash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}
