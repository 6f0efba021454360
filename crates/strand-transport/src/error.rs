//! Transport layer errors.

use std::io;
use strand_core::Multiaddr;
use thiserror::Error;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O error from the underlying socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Address cannot be used for this operation (e.g. dialing `0.0.0.0`)
    #[error("address rejected: {0}")]
    AddressRejected(Multiaddr),

    /// Address shape is not handled by this transport
    #[error("unsupported address: {0}")]
    UnsupportedAddress(Multiaddr),

    /// Remote could not be reached
    #[error("unreachable: {addr}: {reason}")]
    Unreachable {
        /// Address that was dialed
        addr: Multiaddr,
        /// Underlying cause
        reason: io::Error,
    },

    /// Listening socket could not be set up
    #[error("failed to listen on {addr}: {reason}")]
    ListenFailed {
        /// Requested listen address
        addr: Multiaddr,
        /// Underlying cause
        reason: io::Error,
    },

    /// Listener or transport was closed
    #[error("transport is closed")]
    Closed,

    /// No usable local interface address was found
    #[error("failed to resolve {0}")]
    Unresolvable(String),
}

impl TransportError {
    /// Check if the error is transient (worth trying again later)
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unreachable { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionAborted
            ),
            _ => false,
        }
    }
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
