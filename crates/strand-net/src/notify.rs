//! Network event notifications.

use crate::conn::{Conn, Stream};
use crate::network::Network;
use std::sync::Arc;
use strand_core::Multiaddr;

/// Receives network events. Every method defaults to doing nothing.
///
/// Callbacks run inline on the task that produced the event and must not block.
pub trait Notifiee: Send + Sync {
    /// Started listening on `addr`
    fn listen(&self, _net: &Network, _addr: &Multiaddr) {}

    /// Stopped listening on `addr`
    fn listen_close(&self, _net: &Network, _addr: &Multiaddr) {}

    /// A connection was added
    fn connected(&self, _net: &Network, _conn: &Arc<dyn Conn>) {}

    /// A connection closed
    fn disconnected(&self, _net: &Network, _conn: &Arc<dyn Conn>) {}

    /// A stream was opened, in either direction
    fn opened_stream(&self, _net: &Network, _stream: &Stream) {}

    /// A stream was dropped
    fn closed_stream(&self, _net: &Network, _stream: &Stream) {}
}
