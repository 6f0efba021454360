//! # Strand Core
//!
//! Data model shared by every layer of the Strand networking stack.
//!
//! This crate provides:
//! - Multiaddrs and multihashes (binary and text codecs)
//! - Self-certifying peer ids and the peerstore
//! - Lifecycle scopes with ordered, idempotent teardown
//! - Stream-multiplexer frame encoding
//! - Protocol-buffer style records used by handshakes and identify
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Peerstore                               │
//! │   (addresses with TTLs, keys, protocols, free-form metadata)    │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  PeerId            Multiaddr                    │
//! │   (multihash of a public key)  (/ip4/1.2.3.4/tcp/4001/...)     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  Multihash          Varint                      │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod error;
pub mod frame;
pub mod multiaddr;
pub mod multihash;
pub mod peer;
pub mod record;
pub mod scope;
pub mod varint;

pub use error::{Error, FrameError, ParseError, PeerstoreError, Result, ScopeError};
pub use frame::{FrameFlags, FrameHeader, FrameType, MUX_HEADER_SIZE, MuxFrame};
pub use multiaddr::{Component, Multiaddr, Protocol};
pub use multihash::Multihash;
pub use peer::{PeerId, PeerInfo, Peerstore};
pub use scope::{BoxFuture, Scope, Signal, Trigger};
