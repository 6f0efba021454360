//! Error types for the Strand core data model.

use std::borrow::Cow;
use thiserror::Error;

/// Core errors
#[derive(Debug, Error)]
pub enum Error {
    /// Address, multihash or record parsing error
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Mux frame error
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Peerstore error
    #[error("peerstore error: {0}")]
    Peerstore(#[from] PeerstoreError),

    /// Scope teardown error
    #[error("scope error: {0}")]
    Scope(#[from] ScopeError),

    /// Cryptographic error
    #[error("crypto error: {0}")]
    Crypto(#[from] strand_crypto::CryptoError),
}

/// Malformed multiaddr, multihash, peer id or record.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input was empty
    #[error("empty input")]
    Empty,

    /// Textual multiaddr did not start with `/`
    #[error("multiaddr must begin with '/'")]
    MissingLeadingSlash,

    /// `//` or a bare `/` where a protocol name was expected
    #[error("empty component")]
    EmptyComponent,

    /// Protocol name not in the registry
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// Protocol code not in the registry
    #[error("unknown protocol code: {0}")]
    UnknownCode(u64),

    /// Address body missing or invalid for its protocol
    #[error("bad address body for /{protocol}: {reason}")]
    BadAddressBody {
        /// Protocol name
        protocol: &'static str,
        /// What was wrong with the body
        reason: Cow<'static, str>,
    },

    /// Input ended in the middle of a field
    #[error("truncated input")]
    Truncated,

    /// Varint longer than 64 bits or not minimally encoded
    #[error("invalid varint")]
    InvalidVarint,

    /// Multihash with unknown code or wrong digest length
    #[error("invalid multihash: {0}")]
    InvalidMultihash(Cow<'static, str>),

    /// Base58 text could not be decoded
    #[error("invalid base58 encoding")]
    InvalidBase58,

    /// Protocol-buffer style record was malformed
    #[error("malformed record: {0}")]
    MalformedRecord(Cow<'static, str>),
}

impl ParseError {
    /// Build a [`ParseError::BadAddressBody`].
    pub fn bad_body(protocol: &'static str, reason: impl Into<Cow<'static, str>>) -> Self {
        Self::BadAddressBody {
            protocol,
            reason: reason.into(),
        }
    }
}

/// Stream-mux frame errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame too short to parse
    #[error("frame too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Invalid frame type byte
    #[error("invalid frame type: 0x{0:02X}")]
    InvalidFrameType(u8),

    /// Declared length does not match the payload
    #[error("payload length mismatch: header says {declared}, got {actual}")]
    LengthMismatch {
        /// Length in the header
        declared: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Payload larger than the negotiated maximum
    #[error("payload of {0} bytes exceeds the frame limit")]
    PayloadTooLarge(usize),
}

/// Peerstore mutation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeerstoreError {
    /// Key does not hash to the peer id it was stored under
    #[error("key does not match peer {peer}")]
    IdentityMismatch {
        /// Peer the key was offered for
        peer: String,
    },
}

/// Error returned by a scope's teardown, retained and returned by every `close`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ScopeError(pub Cow<'static, str>);

impl ScopeError {
    /// Build an error from a message.
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        Self(message.into())
    }
}

/// Result type for core operations
pub type Result<T> = std::result::Result<T, Error>;
