//! # Strand Transport
//!
//! Raw byte-stream transports for the Strand networking stack.
//!
//! This crate provides:
//! - The [`Transport`] / [`Listener`] traits over multiaddrs
//! - A TCP implementation built on `socket2` and tokio
//! - Local interface enumeration and wildcard listen-address resolution
//! - Address usability and WAN-shareability filters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                 Network (handshake, secure channel, mux)        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │        Transport::dial / Listener::accept -> RawConnection      │
//! ├──────────────────────────────┬──────────────────────────────────┤
//! │         TcpTransport         │     addr / iface helpers         │
//! └──────────────────────────────┴──────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod addr;
pub mod error;
pub mod iface;
pub mod tcp;
pub mod transport;

pub use error::{TransportError, TransportResult};
pub use tcp::{TcpListenerHandle, TcpTransport};
pub use transport::{AsyncReadWrite, BoxedIo, Listener, RawConnection, Transport};

use serde::{Deserialize, Serialize};

/// TCP socket configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Disable Nagle's algorithm on every connection
    pub nodelay: bool,
    /// Set `SO_REUSEADDR` before binding
    pub reuse_address: bool,
    /// Receive buffer size (OS default when unset)
    pub recv_buffer_size: Option<usize>,
    /// Send buffer size (OS default when unset)
    pub send_buffer_size: Option<usize>,
    /// Pending-connection backlog passed to `listen(2)`
    pub listen_backlog: i32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true,
            reuse_address: true,
            recv_buffer_size: None,
            send_buffer_size: None,
            listen_backlog: 1024,
        }
    }
}
