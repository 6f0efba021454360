//! Error types for the network layer.
//!
//! Errors are grouped by the layer that produced them and classified for retry logic.
//!
//! # Error Categories
//!
//! - **Transient**: may succeed later (unreachable peer, dial timeout, lost connection)
//! - **Permanent**: will not succeed without intervention (version mismatch, bad identity,
//!   unknown protocol)
//!
//! Stream-level errors surface through [`std::io::Error`] so the tokio I/O utilities compose:
//! `Reset` maps to `ConnectionReset`, writing after close to `BrokenPipe` and a lost
//! connection to `ConnectionAborted`.

use std::borrow::Cow;
use std::io;
use strand_core::{Multiaddr, ParseError, PeerId, PeerstoreError, ScopeError};
use strand_crypto::CryptoError;
use strand_transport::TransportError;
use thiserror::Error;

/// Errors that can occur in network operations
#[derive(Debug, Error)]
pub enum NetError {
    /// Raw transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed address, peer id or record
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Connection upgrade failed
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// Multiplexer or protocol dispatch failure
    #[error("mux error: {0}")]
    Mux(#[from] MuxError),

    /// Stream failure
    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    /// Relay routing failure
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Peer dial failure
    #[error("dial failed: {0}")]
    Dial(#[from] DialError),

    /// Peerstore identity check failed
    #[error("peerstore error: {0}")]
    Peerstore(#[from] PeerstoreError),

    /// Scope teardown error
    #[error("scope error: {0}")]
    Scope(#[from] ScopeError),

    /// I/O error on an established stream or connection
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Scope closed or operation cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// Operation timed out
    #[error("operation timed out: {0}")]
    Timeout(Cow<'static, str>),
}

impl NetError {
    /// Returns true if this error is transient and may succeed on retry
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            NetError::Transport(e) => e.is_transient(),
            NetError::Dial(e) => e.is_transient(),
            NetError::Stream(StreamError::ConnectionGone) => true,
            NetError::Mux(MuxError::ClosedByPeer | MuxError::Closed) => true,
            NetError::Handshake(HandshakeError::Timeout | HandshakeError::Io(_)) => true,
            NetError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Returns true if this error is permanent and will not succeed on retry
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        match self {
            NetError::Parse(_) | NetError::Peerstore(_) => true,
            NetError::Handshake(
                HandshakeError::VersionMismatch { .. }
                | HandshakeError::IdentityMismatch { .. }
                | HandshakeError::SelfConnection,
            ) => true,
            NetError::Mux(MuxError::UnknownProtocol(_) | MuxError::HeaderTooLong(_)) => true,
            NetError::Routing(RoutingError::RelayingFromSelf) => true,
            NetError::Dial(DialError::DialToSelf | DialError::NoAddresses(_)) => true,
            _ => false,
        }
    }

    /// Returns true if this error should trigger a retry with backoff
    #[must_use]
    pub fn should_retry(&self) -> bool {
        self.is_transient()
            && !matches!(
                self,
                NetError::Timeout(_) | NetError::Dial(DialError::Timeout | DialError::Backoff(_))
            )
    }

    /// Create a timeout error with static context (zero allocation)
    #[must_use]
    pub const fn timeout(context: &'static str) -> Self {
        NetError::Timeout(Cow::Borrowed(context))
    }
}

/// Version handshake and secure channel errors
#[derive(Debug, Error)]
pub enum HandshakeError {
    /// Protocol major versions differ
    #[error("protocol version mismatch: local {local}, remote {remote}")]
    VersionMismatch {
        /// Our protocol version
        local: String,
        /// Remote's protocol version
        remote: String,
    },

    /// Signature, key agreement or decryption failed
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    /// Handshake did not finish within the configured timeout
    #[error("handshake timed out")]
    Timeout,

    /// Remote key does not hash to the peer we meant to reach
    #[error("identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch {
        /// Peer we dialed
        expected: PeerId,
        /// Peer that answered
        actual: PeerId,
    },

    /// Remote presented our own identity
    #[error("connected to self")]
    SelfConnection,

    /// Handshake message could not be decoded
    #[error("malformed handshake message: {0}")]
    Malformed(Cow<'static, str>),

    /// Transport failed mid-handshake
    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),
}

impl From<ParseError> for HandshakeError {
    fn from(err: ParseError) -> Self {
        HandshakeError::Malformed(err.to_string().into())
    }
}

/// Multiplexer and protocol dispatch errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MuxError {
    /// No handler registered for the protocol tag and no default handler
    #[error("unknown protocol: {0:?}")]
    UnknownProtocol(String),

    /// Protocol tag longer than 255 bytes
    #[error("protocol tag of {0} bytes does not fit the 1-byte length header")]
    HeaderTooLong(usize),

    /// Remote closed the session
    #[error("session closed by peer")]
    ClosedByPeer,

    /// Session closed locally
    #[error("session closed")]
    Closed,

    /// Stream table is full
    #[error("too many open streams")]
    TooManyStreams,

    /// Peer violated the framing protocol
    #[error("protocol violation: {0}")]
    Protocol(Cow<'static, str>),
}

/// Per-stream errors
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StreamError {
    /// Stream was reset by either side
    #[error("stream reset")]
    Reset,

    /// Write after the write half was closed
    #[error("stream closed")]
    Closed,

    /// Underlying connection went away
    #[error("connection gone")]
    ConnectionGone,
}

impl StreamError {
    /// The `io::ErrorKind` this error surfaces as.
    #[must_use]
    pub fn kind(self) -> io::ErrorKind {
        match self {
            StreamError::Reset => io::ErrorKind::ConnectionReset,
            StreamError::Closed => io::ErrorKind::BrokenPipe,
            StreamError::ConnectionGone => io::ErrorKind::ConnectionAborted,
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

/// Relay routing errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// Relay destination is not directly connected
    #[error("no route to {0}")]
    NoRoute(PeerId),

    /// Relay header names us as the source
    #[error("refusing to relay a stream claiming to come from ourselves")]
    RelayingFromSelf,
}

/// Peer dial errors. Cloneable so concurrent dialers can share one outcome.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialError {
    /// Peerstore has no usable address for the peer
    #[error("no addresses for {0}")]
    NoAddresses(PeerId),

    /// Every candidate address failed
    #[error("all dials to {peer} failed: {}", format_attempts(.attempts))]
    AllDialsFailed {
        /// Peer being dialed
        peer: PeerId,
        /// Per-address failure reasons
        attempts: Vec<(Multiaddr, String)>,
    },

    /// Tried to dial the local peer
    #[error("dial to self attempted")]
    DialToSelf,

    /// Peer failed recently and is backing off
    #[error("peer {0} is in dial backoff")]
    Backoff(PeerId),

    /// Whole dial exceeded the configured timeout
    #[error("dial timed out")]
    Timeout,

    /// Network shut down during the dial
    #[error("dial cancelled")]
    Cancelled,
}

impl DialError {
    /// Returns true if a later dial may succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DialError::AllDialsFailed { .. } | DialError::Backoff(_) | DialError::Timeout
        )
    }
}

fn format_attempts(attempts: &[(Multiaddr, String)]) -> String {
    attempts
        .iter()
        .map(|(addr, err)| format!("{addr}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetError>;
