//! # Strand Net
//!
//! Peer-to-peer networking on top of the Strand transports.
//!
//! This crate provides:
//! - Version handshake and an authenticated, encrypted secure channel
//! - A credit-windowed stream multiplexer
//! - [`Conn`] connections (TCP-backed or in-memory) grouped per peer
//! - Protocol dispatch on a one-byte-length stream header
//! - The [`Network`] facade: dialing with dedup and backoff, listeners, notifications
//! - Built-in Identify and Relay services
//! - [`MockNet`], an in-memory network of simulated peers for tests
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │        Network facade (dial, new_stream, handlers, notify)      │
//! ├────────────────┬─────────────────────┬──────────────────────────┤
//! │    Identify    │  ProtocolMux        │  Relay                   │
//! ├────────────────┴─────────────────────┴──────────────────────────┤
//! │                ConnGroup (one per remote peer)                  │
//! ├──────────────────────────────────┬──────────────────────────────┤
//! │ MuxedConn                        │ MockConn                     │
//! │  MuxSession (streams, windows)   │  tokio duplex pipes          │
//! │  SecureSession (XChaCha20)       │                              │
//! │  Version handshake               │                              │
//! ├──────────────────────────────────┼──────────────────────────────┤
//! │ strand-transport (TCP)           │ MockNet links                │
//! └──────────────────────────────────┴──────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod conn;
mod dial;
pub mod error;
pub mod group;
pub mod handshake;
pub mod identify;
pub mod mock;
pub mod muxer;
pub mod network;
pub mod notify;
pub mod protocol;
pub mod relay;
pub mod secure;
mod swarm;
mod wire;

pub use config::{DialConfig, HandshakeConfig, MuxConfig, NetworkConfig, PROTOCOL_VERSION};
pub use conn::{Conn, ConnId, ConnStats, Direction, MockConn, MuxedConn, Stream, StreamInfo};
pub use error::{
    DialError, HandshakeError, MuxError, NetError, Result, RoutingError, StreamError,
};
pub use group::ConnGroup;
pub use identify::{IDENTIFY_PROTOCOL, IdentifyMessage};
pub use mock::MockNet;
pub use network::{Connectedness, Network};
pub use notify::Notifiee;
pub use protocol::{ProtocolMux, StreamHandler, handler_fn};
pub use relay::{RELAY_PROTOCOL, Relay, RelayStats};
