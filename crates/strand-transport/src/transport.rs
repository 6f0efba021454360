//! Transport trait abstraction.
//!
//! A transport turns a multiaddr into a raw, unauthenticated, bidirectional byte
//! stream, either by dialing out or by accepting on a listener. Everything above this
//! layer (handshake, encryption, multiplexing) is transport-agnostic.

use crate::error::TransportResult;
use async_trait::async_trait;
use std::fmt;
use strand_core::Multiaddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any tokio byte stream that can be boxed and moved between tasks.
pub trait AsyncReadWrite: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncReadWrite for T {}

/// Boxed byte stream.
pub type BoxedIo = Box<dyn AsyncReadWrite>;

/// A raw connection produced by a dial or an accept.
pub struct RawConnection {
    /// Byte stream
    pub io: BoxedIo,
    /// Concrete local address (never an unspecified IP)
    pub local_addr: Multiaddr,
    /// Remote address
    pub remote_addr: Multiaddr,
}

impl fmt::Debug for RawConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConnection")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .finish_non_exhaustive()
    }
}

/// Dial side of a transport.
///
/// # Examples
///
/// ```no_run
/// use strand_transport::{TcpTransport, Transport, TransportConfig};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let transport = TcpTransport::new(TransportConfig::default());
/// let listener = transport.listen(&"/ip4/127.0.0.1/tcp/0".parse()?).await?;
/// let conn = transport.dial(&listener.multiaddr()).await?;
/// println!("connected {} -> {}", conn.local_addr, conn.remote_addr);
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Whether this transport understands the shape of `addr`.
    fn can_dial(&self, addr: &Multiaddr) -> bool;

    /// Open a raw connection to `addr`.
    ///
    /// # Errors
    ///
    /// `AddressRejected` for unspecified IPs, `UnsupportedAddress` for shapes this
    /// transport does not handle, `Unreachable` when the remote cannot be reached.
    async fn dial(&self, addr: &Multiaddr) -> TransportResult<RawConnection>;

    /// Start accepting connections on `addr`.
    ///
    /// # Errors
    ///
    /// `ListenFailed` if the socket cannot be bound.
    async fn listen(&self, addr: &Multiaddr) -> TransportResult<Box<dyn Listener>>;
}

/// Accept side of a transport.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next inbound connection.
    ///
    /// # Errors
    ///
    /// `Closed` once [`Listener::close`] has been called. Other errors are per-accept and
    /// the listener remains usable.
    async fn accept(&self) -> TransportResult<RawConnection>;

    /// The bound address, with the actual port when `0` was requested.
    fn multiaddr(&self) -> Multiaddr;

    /// Stop accepting. Pending and future `accept` calls return `Closed`.
    fn close(&self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;
}
