//! TCP transport.
//!
//! Sockets are created through `socket2` so buffer sizes, address reuse and Nagle can be
//! configured before they are handed to tokio.

use crate::TransportConfig;
use crate::error::{TransportError, TransportResult};
use crate::transport::{Listener, RawConnection, Transport};
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use strand_core::Multiaddr;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;

/// TCP implementation of [`Transport`].
#[derive(Debug, Default)]
pub struct TcpTransport {
    config: TransportConfig,
    dials: AtomicU64,
}

impl TcpTransport {
    /// Create a transport with the given socket options.
    #[must_use]
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            dials: AtomicU64::new(0),
        }
    }

    /// Number of dial attempts made so far.
    #[must_use]
    pub fn dial_attempts(&self) -> u64 {
        self.dials.load(Ordering::Relaxed)
    }

    fn socket_for(&self, addr: &SocketAddr) -> io::Result<Socket> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
        if self.config.reuse_address {
            socket.set_reuse_address(true)?;
        }
        if let Some(size) = self.config.recv_buffer_size {
            socket.set_recv_buffer_size(size)?;
        }
        if let Some(size) = self.config.send_buffer_size {
            socket.set_send_buffer_size(size)?;
        }
        socket.set_nonblocking(true)?;
        Ok(socket)
    }

    fn tune(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_nodelay(self.config.nodelay)
    }
}

/// Resolve the socket address a dial should target, rejecting wildcard IPs.
fn dial_target(addr: &Multiaddr) -> TransportResult<SocketAddr> {
    if addr.is_ip_unspecified() {
        return Err(TransportError::AddressRejected(addr.clone()));
    }
    addr.to_tcp_socket_addr()
        .ok_or_else(|| TransportError::UnsupportedAddress(addr.clone()))
}

fn is_unreachable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable
            | io::ErrorKind::TimedOut
    )
}

fn raw_connection(stream: TcpStream) -> io::Result<RawConnection> {
    let local_addr = Multiaddr::from_tcp_socket_addr(stream.local_addr()?);
    let remote_addr = Multiaddr::from_tcp_socket_addr(stream.peer_addr()?);
    Ok(RawConnection {
        io: Box::new(stream),
        local_addr,
        remote_addr,
    })
}

#[async_trait]
impl Transport for TcpTransport {
    fn can_dial(&self, addr: &Multiaddr) -> bool {
        addr.to_tcp_socket_addr().is_some()
    }

    async fn dial(&self, addr: &Multiaddr) -> TransportResult<RawConnection> {
        let target = dial_target(addr)?;
        self.dials.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%addr, "tcp dial");

        let socket = self.socket_for(&target)?;
        let socket = TcpSocket::from_std_stream(socket.into());
        let stream = socket.connect(target).await.map_err(|e| {
            if is_unreachable(&e) {
                TransportError::Unreachable {
                    addr: addr.clone(),
                    reason: e,
                }
            } else {
                TransportError::Io(e)
            }
        })?;
        self.tune(&stream)?;
        Ok(raw_connection(stream)?)
    }

    async fn listen(&self, addr: &Multiaddr) -> TransportResult<Box<dyn Listener>> {
        let bind = addr
            .to_tcp_socket_addr()
            .ok_or_else(|| TransportError::UnsupportedAddress(addr.clone()))?;
        let failed = |reason: io::Error| TransportError::ListenFailed {
            addr: addr.clone(),
            reason,
        };

        let socket = self.socket_for(&bind).map_err(failed)?;
        socket.bind(&bind.into()).map_err(failed)?;
        socket.listen(self.config.listen_backlog).map_err(failed)?;
        let std_listener: std::net::TcpListener = socket.into();
        let listener = TcpListener::from_std(std_listener).map_err(failed)?;

        let local = listener.local_addr().map_err(failed)?;
        let multiaddr = Multiaddr::from_tcp_socket_addr(local);
        tracing::debug!(%multiaddr, "tcp listening");

        let (closed, _) = watch::channel(false);
        Ok(Box::new(TcpListenerHandle {
            listener,
            multiaddr,
            nodelay: self.config.nodelay,
            closed,
        }))
    }
}

/// Listener returned by [`TcpTransport::listen`].
#[derive(Debug)]
pub struct TcpListenerHandle {
    listener: TcpListener,
    multiaddr: Multiaddr,
    nodelay: bool,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl Listener for TcpListenerHandle {
    async fn accept(&self) -> TransportResult<RawConnection> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            res = self.listener.accept() => {
                let (stream, _) = res?;
                stream.set_nodelay(self.nodelay)?;
                Ok(raw_connection(stream)?)
            }
            _ = closed.wait_for(|c| *c) => Err(TransportError::Closed),
        }
    }

    fn multiaddr(&self) -> Multiaddr {
        self.multiaddr.clone()
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}
