//! Connections and streams.
//!
//! A [`Conn`] is an authenticated, multiplexed channel to one remote peer. Two variants
//! exist: [`MuxedConn`] runs the full upgrade pipeline over a raw transport connection,
//! and [`MockConn`] wires streams straight to an in-memory partner.
//!
//! ```text
//! RawConnection ─▶ version handshake ─▶ secure handshake ─▶ MuxSession ─▶ MuxedConn
//!                  (all phases bounded by the handshake timeout)
//! ```
//!
//! Streams opened by the remote are delivered to the handler installed with
//! [`Conn::set_stream_handler`]. Streams that arrive before a handler is installed are
//! held and delivered once it is.

use crate::config::NetworkConfig;
use crate::error::{HandshakeError, MuxError, NetError, Result, StreamError};
use crate::handshake::{VersionInfo, version_handshake};
use crate::muxer::{MuxSession, Role};
use crate::secure::secure_handshake;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Instant;
use strand_core::{Multiaddr, PeerId, Scope};
use strand_crypto::{PrivateKey, PublicKey};
use strand_transport::{BoxedIo, RawConnection};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Callback receiving each stream opened by the remote.
pub type InboundHandler = Arc<dyn Fn(BoxedIo) + Send + Sync>;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier. Later connections get larger ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

impl ConnId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value
    #[must_use]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side opened a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Opened locally
    Outbound,
    /// Opened by the remote
    Inbound,
}

/// A stream currently open on a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Connection-local stream number
    pub id: u64,
    /// Who opened it
    pub direction: Direction,
    /// When it was opened
    pub opened: Instant,
}

/// Connection statistics snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnStats {
    /// Payload bytes read across all streams
    pub bytes_read: u64,
    /// Payload bytes written across all streams
    pub bytes_written: u64,
    /// Streams opened locally
    pub streams_opened: u64,
    /// Streams opened by the remote
    pub streams_accepted: u64,
    /// Streams currently open
    pub streams_open: usize,
}

/// An authenticated, multiplexed connection to one peer.
#[async_trait]
pub trait Conn: Send + Sync + 'static {
    /// Process-unique id
    fn id(&self) -> ConnId;

    /// Our peer id
    fn local_peer(&self) -> &PeerId;

    /// Authenticated remote peer id
    fn remote_peer(&self) -> &PeerId;

    /// Remote identity key, when known
    fn remote_public_key(&self) -> Option<PublicKey>;

    /// Our concrete address on this connection
    fn local_multiaddr(&self) -> &Multiaddr;

    /// Remote address on this connection
    fn remote_multiaddr(&self) -> &Multiaddr;

    /// Open a new outbound stream.
    ///
    /// # Errors
    ///
    /// `Mux(Closed)`/`Mux(ClosedByPeer)` once the connection has ended.
    async fn new_stream(&self) -> Result<BoxedIo>;

    /// Install the handler for remotely opened streams.
    fn set_stream_handler(&self, handler: InboundHandler);

    /// Streams currently open
    fn streams(&self) -> Vec<StreamInfo>;

    /// Traffic counters
    fn stats(&self) -> ConnStats;

    /// Scope owning the connection's tasks
    fn scope(&self) -> &Scope;

    /// Whether the connection is closing or closed.
    fn is_closed(&self) -> bool {
        self.scope().is_closing()
    }

    /// Close every stream and the underlying transport.
    ///
    /// # Errors
    ///
    /// Returns the connection scope's teardown error, if any.
    async fn close(&self) -> Result<()> {
        self.scope().close().await.map_err(NetError::from)
    }
}

impl fmt::Debug for dyn Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("id", &self.id())
            .field("remote_peer", self.remote_peer())
            .field("remote_addr", self.remote_multiaddr())
            .finish()
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════════════
// Shared connection bookkeeping
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Counters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    streams_opened: AtomicU64,
    streams_accepted: AtomicU64,
    next_stream: AtomicU64,
    open: Mutex<HashMap<u64, StreamInfo>>,
}

#[derive(Default)]
struct HandlerSlot {
    handler: Option<InboundHandler>,
    pending: Vec<BoxedIo>,
}

/// State common to every connection variant.
struct ConnCore {
    id: ConnId,
    local_peer: PeerId,
    remote_peer: PeerId,
    remote_key: Option<PublicKey>,
    local_addr: Multiaddr,
    remote_addr: Multiaddr,
    scope: Scope,
    counters: Arc<Counters>,
    handler: Mutex<HandlerSlot>,
}

impl ConnCore {
    fn new(
        local_peer: PeerId,
        remote_peer: PeerId,
        remote_key: Option<PublicKey>,
        local_addr: Multiaddr,
        remote_addr: Multiaddr,
        parent: &Scope,
    ) -> Self {
        let id = ConnId::next();
        Self {
            id,
            scope: parent.child(format!("{id} to {}", remote_peer.short())),
            local_peer,
            remote_peer,
            remote_key,
            local_addr,
            remote_addr,
            counters: Arc::new(Counters::default()),
            handler: Mutex::new(HandlerSlot::default()),
        }
    }

    /// Wrap a stream so its traffic is counted and it shows up in `streams()`.
    fn track<T>(&self, io: T, direction: Direction) -> BoxedIo
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let key = self.counters.next_stream.fetch_add(1, Ordering::Relaxed);
        let counter = match direction {
            Direction::Outbound => &self.counters.streams_opened,
            Direction::Inbound => &self.counters.streams_accepted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        lock(&self.counters.open).insert(
            key,
            StreamInfo {
                id: key,
                direction,
                opened: Instant::now(),
            },
        );
        Box::new(CountingIo {
            inner: io,
            counters: Arc::clone(&self.counters),
            key,
        })
    }

    fn dispatch(&self, io: BoxedIo) {
        let handler = {
            let mut slot = lock(&self.handler);
            match &slot.handler {
                Some(h) => Arc::clone(h),
                None => {
                    slot.pending.push(io);
                    return;
                }
            }
        };
        handler(io);
    }

    fn set_handler(&self, handler: InboundHandler) {
        let pending = {
            let mut slot = lock(&self.handler);
            slot.handler = Some(Arc::clone(&handler));
            std::mem::take(&mut slot.pending)
        };
        for io in pending {
            handler(io);
        }
    }

    fn streams(&self) -> Vec<StreamInfo> {
        let mut streams: Vec<_> = lock(&self.counters.open).values().cloned().collect();
        streams.sort_by_key(|s| s.id);
        streams
    }

    fn stats(&self) -> ConnStats {
        let c = &self.counters;
        ConnStats {
            bytes_read: c.bytes_read.load(Ordering::Relaxed),
            bytes_written: c.bytes_written.load(Ordering::Relaxed),
            streams_opened: c.streams_opened.load(Ordering::Relaxed),
            streams_accepted: c.streams_accepted.load(Ordering::Relaxed),
            streams_open: lock(&c.open).len(),
        }
    }
}

struct CountingIo<T> {
    inner: T,
    counters: Arc<Counters>,
    key: u64,
}

impl<T: AsyncRead + Unpin> AsyncRead for CountingIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let res = Pin::new(&mut self.inner).poll_read(cx, buf);
        let n = buf.filled().len() - before;
        self.counters
            .bytes_read
            .fetch_add(n as u64, Ordering::Relaxed);
        res
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for CountingIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let res = Pin::new(&mut self.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &res {
            self.counters
                .bytes_written
                .fetch_add(*n as u64, Ordering::Relaxed);
        }
        res
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl<T> Drop for CountingIo<T> {
    fn drop(&mut self) {
        lock(&self.counters.open).remove(&self.key);
    }
}

macro_rules! delegate_core {
    () => {
        fn id(&self) -> ConnId {
            self.core.id
        }

        fn local_peer(&self) -> &PeerId {
            &self.core.local_peer
        }

        fn remote_peer(&self) -> &PeerId {
            &self.core.remote_peer
        }

        fn remote_public_key(&self) -> Option<PublicKey> {
            self.core.remote_key
        }

        fn local_multiaddr(&self) -> &Multiaddr {
            &self.core.local_addr
        }

        fn remote_multiaddr(&self) -> &Multiaddr {
            &self.core.remote_addr
        }

        fn set_stream_handler(&self, handler: InboundHandler) {
            self.core.set_handler(handler);
        }

        fn streams(&self) -> Vec<StreamInfo> {
            self.core.streams()
        }

        fn stats(&self) -> ConnStats {
            self.core.stats()
        }

        fn scope(&self) -> &Scope {
            &self.core.scope
        }
    };
}

// ═══════════════════════════════════════════════════════════════════════════
// Muxed connections
// ═══════════════════════════════════════════════════════════════════════════

/// Connection over a real transport: secure channel plus stream multiplexer.
pub struct MuxedConn {
    core: ConnCore,
    session: MuxSession,
}

impl MuxedConn {
    /// Upgrade a raw connection.
    ///
    /// Runs the version handshake, then the secure handshake, then starts the
    /// multiplexer. Any failure drops the raw connection. `expected` is the peer the
    /// dialer meant to reach; listeners pass `None`.
    ///
    /// # Errors
    ///
    /// `Handshake(Timeout)` when the phases do not finish within
    /// `config.handshake.timeout`, otherwise the failing phase's error.
    pub async fn upgrade(
        raw: RawConnection,
        local_key: &PrivateKey,
        expected: Option<&PeerId>,
        role: Role,
        config: &NetworkConfig,
        parent: &Scope,
    ) -> Result<Arc<Self>> {
        let RawConnection {
            mut io,
            local_addr,
            remote_addr,
        } = raw;
        let version = VersionInfo::local(config.agent_version.clone());

        let handshake = async {
            version_handshake(&mut io, &version).await?;
            secure_handshake(io, local_key, expected).await
        };
        let secure = tokio::time::timeout(config.handshake.timeout, handshake)
            .await
            .map_err(|_| HandshakeError::Timeout)?
            .inspect_err(|e| {
                tracing::debug!(remote = %remote_addr, error = %e, "connection upgrade failed");
            })?;

        let core = ConnCore::new(
            PeerId::from_public_key(&local_key.public()),
            secure.remote_peer,
            Some(secure.remote_key),
            local_addr,
            remote_addr,
            parent,
        );
        let session = MuxSession::new(
            secure.reader,
            secure.writer,
            role,
            config.mux.clone(),
            core.scope.clone(),
        );
        let conn = Arc::new(Self { core, session });

        let weak = Arc::downgrade(&conn);
        conn.core
            .scope
            .spawn(move |scope| accept_loop(weak, scope));

        tracing::debug!(
            conn = %conn.core.id,
            peer = %conn.core.remote_peer.short(),
            remote = %conn.core.remote_addr,
            ?role,
            "connection established"
        );
        Ok(conn)
    }

    /// Measure the round trip time of the underlying session.
    ///
    /// # Errors
    ///
    /// Fails once the session has ended.
    pub async fn ping(&self) -> Result<std::time::Duration> {
        Ok(self.session.ping().await?)
    }
}

async fn accept_loop(conn: Weak<MuxedConn>, scope: Scope) {
    let closing = scope.closing();
    loop {
        let Some(strong) = conn.upgrade() else { return };
        let accepted = tokio::select! {
            s = strong.session.accept() => s,
            () = closing.wait() => return,
        };
        match accepted {
            Ok(stream) => {
                let io = strong.core.track(stream, Direction::Inbound);
                strong.core.dispatch(io);
            }
            Err(e) => {
                tracing::debug!(conn = %strong.core.id, "connection ended: {}", e);
                scope.spawn_close();
                return;
            }
        }
    }
}

#[async_trait]
impl Conn for MuxedConn {
    delegate_core!();

    async fn new_stream(&self) -> Result<BoxedIo> {
        let stream = self.session.open_stream()?;
        Ok(self.core.track(stream, Direction::Outbound))
    }

    fn is_closed(&self) -> bool {
        self.core.scope.is_closing() || self.session.is_closed()
    }
}

impl fmt::Debug for MuxedConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxedConn")
            .field("id", &self.core.id)
            .field("remote_peer", &self.core.remote_peer)
            .field("session", &self.session)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// In-memory connections
// ═══════════════════════════════════════════════════════════════════════════

/// Buffer size of each in-memory stream direction.
const MOCK_STREAM_BUFFER: usize = 64 * 1024;

/// In-memory connection. Each stream is a tokio duplex pair whose far end is handed to
/// the partner connection.
pub struct MockConn {
    core: ConnCore,
    partner: Mutex<Weak<MockConn>>,
}

impl MockConn {
    /// Create both ends of an in-memory connection between `a` and `b`.
    ///
    /// Each end's scope is a child of the matching `*_scope`.
    pub fn pair(
        a: (&PeerId, &PublicKey, &Multiaddr, &Scope),
        b: (&PeerId, &PublicKey, &Multiaddr, &Scope),
    ) -> (Arc<Self>, Arc<Self>) {
        let a_end = Arc::new(Self {
            core: ConnCore::new(a.0.clone(), b.0.clone(), Some(*b.1), a.2.clone(), b.2.clone(), a.3),
            partner: Mutex::new(Weak::new()),
        });
        let b_end = Arc::new(Self {
            core: ConnCore::new(b.0.clone(), a.0.clone(), Some(*a.1), b.2.clone(), a.2.clone(), b.3),
            partner: Mutex::new(Weak::new()),
        });
        *lock(&a_end.partner) = Arc::downgrade(&b_end);
        *lock(&b_end.partner) = Arc::downgrade(&a_end);

        // Closing either end closes the other.
        for (this, other) in [(&a_end, &b_end), (&b_end, &a_end)] {
            let other = Arc::downgrade(other);
            this.core.scope.spawn(move |scope| async move {
                scope.closing().wait().await;
                if let Some(other) = other.upgrade() {
                    other.core.scope.spawn_close();
                }
            });
        }
        (a_end, b_end)
    }
}

#[async_trait]
impl Conn for MockConn {
    delegate_core!();

    async fn new_stream(&self) -> Result<BoxedIo> {
        if self.core.scope.is_closing() {
            return Err(MuxError::Closed.into());
        }
        let partner = lock(&self.partner).upgrade();
        let Some(partner) = partner.filter(|p| !p.core.scope.is_closing()) else {
            return Err(MuxError::ClosedByPeer.into());
        };
        let (local, remote) = tokio::io::duplex(MOCK_STREAM_BUFFER);
        let guard_local = ScopedIo::new(local, &self.core.scope);
        let guard_remote = ScopedIo::new(remote, &partner.core.scope);
        partner
            .core
            .dispatch(partner.core.track(guard_remote, Direction::Inbound));
        Ok(self.core.track(guard_local, Direction::Outbound))
    }
}

impl fmt::Debug for MockConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockConn")
            .field("id", &self.core.id)
            .field("remote_peer", &self.core.remote_peer)
            .finish()
    }
}

/// In-memory stream end that fails with `ConnectionGone` once its connection closes.
struct ScopedIo<T> {
    inner: T,
    closing: Pin<Box<dyn Future<Output = ()> + Send>>,
    gone: bool,
}

impl<T> ScopedIo<T> {
    fn new(inner: T, scope: &Scope) -> Self {
        let signal = scope.closing();
        Self {
            inner,
            closing: Box::pin(async move { signal.wait().await }),
            gone: false,
        }
    }

    fn check(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if !self.gone && self.closing.as_mut().poll(cx).is_ready() {
            self.gone = true;
        }
        if self.gone {
            Err(StreamError::ConnectionGone.into())
        } else {
            Ok(())
        }
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for ScopedIo<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        match Pin::new(&mut self.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) if buf.filled().len() > before => Poll::Ready(Ok(())),
            Poll::Ready(res) => Poll::Ready(res),
            Poll::Pending => match self.check(cx) {
                Ok(()) => Poll::Pending,
                Err(e) => Poll::Ready(Err(e)),
            },
        }
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for ScopedIo<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.check(cx)?;
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Streams handed to applications
// ═══════════════════════════════════════════════════════════════════════════

type CloseHook = Box<dyn FnOnce(&Stream) + Send>;

/// A byte stream to a peer, tagged with its connection and protocol.
pub struct Stream {
    io: BoxedIo,
    conn: Arc<dyn Conn>,
    protocol: Option<String>,
    on_close: Option<CloseHook>,
}

impl Stream {
    pub(crate) fn new(io: BoxedIo, conn: Arc<dyn Conn>) -> Self {
        Self {
            io,
            conn,
            protocol: None,
            on_close: None,
        }
    }

    pub(crate) fn set_protocol(&mut self, protocol: Option<String>) {
        self.protocol = protocol;
    }

    pub(crate) fn set_close_hook(&mut self, hook: CloseHook) {
        self.on_close = Some(hook);
    }

    /// Connection the stream runs on
    #[must_use]
    pub fn conn(&self) -> &Arc<dyn Conn> {
        &self.conn
    }

    /// Protocol tag the stream was opened or dispatched with
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Peer at the other end
    #[must_use]
    pub fn remote_peer(&self) -> &PeerId {
        self.conn.remote_peer()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("conn", &self.conn.id())
            .field("remote_peer", self.conn.remote_peer())
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl AsyncRead for Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl Drop for Stream {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strand_crypto::KeyType;
    use strand_transport::{TcpTransport, Transport, TransportConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::sync::mpsc;

    fn identity() -> (PrivateKey, PublicKey, PeerId) {
        strand_core::peer::generate(KeyType::Ed25519)
    }

    fn collect(conn: &Arc<dyn Conn>) -> mpsc::UnboundedReceiver<BoxedIo> {
        let (tx, rx) = mpsc::unbounded_channel();
        conn.set_stream_handler(Arc::new(move |io| {
            let _ = tx.send(io);
        }));
        rx
    }

    async fn tcp_pair(
        config: &NetworkConfig,
    ) -> (Arc<MuxedConn>, Arc<MuxedConn>, PeerId, PeerId) {
        let (ka, _, pa) = identity();
        let (kb, _, pb) = identity();
        let transport = TcpTransport::new(TransportConfig::default());
        let listener = transport
            .listen(&"/ip4/127.0.0.1/tcp/0".parse().unwrap())
            .await
            .unwrap();
        let raw_out = transport.dial(&listener.multiaddr()).await.unwrap();
        let raw_in = listener.accept().await.unwrap();

        let scope = Scope::new("test");
        let expected = pb.clone();
        let (out, inbound) = tokio::join!(
            MuxedConn::upgrade(raw_out, &ka, Some(&expected), Role::Dialer, config, &scope),
            MuxedConn::upgrade(raw_in, &kb, None, Role::Listener, config, &scope),
        );
        (out.unwrap(), inbound.unwrap(), pa, pb)
    }

    #[tokio::test]
    async fn test_muxed_conn_over_tcp() {
        let config = NetworkConfig::default();
        let (out, inbound, pa, pb) = tcp_pair(&config).await;
        assert_eq!(out.remote_peer(), &pb);
        assert_eq!(inbound.remote_peer(), &pa);
        assert_eq!(out.local_peer(), &pa);
        assert_eq!(out.remote_multiaddr(), inbound.local_multiaddr());

        let inbound: Arc<dyn Conn> = inbound;
        let mut incoming = collect(&inbound);

        let mut s = out.new_stream().await.unwrap();
        s.write_all(b"beep boop").await.unwrap();
        s.shutdown().await.unwrap();

        let mut r = incoming.recv().await.unwrap();
        let mut got = Vec::new();
        r.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"beep boop");
        r.write_all(b"ok").await.unwrap();
        r.shutdown().await.unwrap();

        let mut back = Vec::new();
        s.read_to_end(&mut back).await.unwrap();
        assert_eq!(back, b"ok");

        let stats = out.stats();
        assert_eq!(stats.bytes_written, 9);
        assert_eq!(stats.bytes_read, 2);
        assert_eq!(stats.streams_opened, 1);
        assert_eq!(inbound.stats().streams_accepted, 1);
        assert_eq!(out.streams().len(), 1);
        drop(s);
        assert!(out.streams().is_empty());

        assert!(out.ping().await.is_ok());
    }

    #[tokio::test]
    async fn test_streams_before_handler_are_held() {
        let config = NetworkConfig::default();
        let (out, inbound, _, _) = tcp_pair(&config).await;

        let mut s = out.new_stream().await.unwrap();
        s.write_all(b"early").await.unwrap();
        s.shutdown().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let inbound: Arc<dyn Conn> = inbound;
        let mut incoming = collect(&inbound);
        let mut r = incoming.recv().await.unwrap();
        let mut got = Vec::new();
        r.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"early");
    }

    #[tokio::test]
    async fn test_identity_mismatch_fails_upgrade() {
        let config = NetworkConfig::default();
        let (ka, _, _) = identity();
        let (kb, _, _) = identity();
        let (_, _, wrong) = identity();
        let transport = TcpTransport::new(TransportConfig::default());
        let listener = transport
            .listen(&"/ip4/127.0.0.1/tcp/0".parse().unwrap())
            .await
            .unwrap();
        let raw_out = transport.dial(&listener.multiaddr()).await.unwrap();
        let raw_in = listener.accept().await.unwrap();

        let scope = Scope::new("test");
        let (out, inbound) = tokio::join!(
            MuxedConn::upgrade(raw_out, &ka, Some(&wrong), Role::Dialer, &config, &scope),
            MuxedConn::upgrade(raw_in, &kb, None, Role::Listener, &config, &scope),
        );
        assert!(matches!(
            out.unwrap_err(),
            NetError::Handshake(HandshakeError::IdentityMismatch { .. })
        ));
        assert!(inbound.is_err());
    }

    #[tokio::test]
    async fn test_silent_peer_times_out() {
        let mut config = NetworkConfig::default();
        config.handshake.timeout = std::time::Duration::from_millis(100);
        let (ka, _, _) = identity();
        let (io, _far) = tokio::io::duplex(1024);
        let raw = RawConnection {
            io: Box::new(io),
            local_addr: "/ip4/127.0.0.1/tcp/1".parse().unwrap(),
            remote_addr: "/ip4/127.0.0.1/tcp/2".parse().unwrap(),
        };
        let err = MuxedConn::upgrade(raw, &ka, None, Role::Dialer, &config, &Scope::new("t"))
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::Handshake(HandshakeError::Timeout)));
    }

    #[tokio::test]
    async fn test_close_propagates_to_remote() {
        let config = NetworkConfig::default();
        let (out, inbound, _, _) = tcp_pair(&config).await;
        let inbound: Arc<dyn Conn> = inbound;
        let _incoming = collect(&inbound);

        out.close().await.unwrap();
        assert!(out.is_closed());
        assert!(out.new_stream().await.is_err());

        inbound.scope().closed().wait().await;
        assert!(inbound.is_closed());
    }

    fn mock_pair() -> (Arc<MockConn>, Arc<MockConn>) {
        let (_, ka, pa) = identity();
        let (_, kb, pb) = identity();
        let aa: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        let ab: Multiaddr = "/ip4/10.0.0.2/tcp/4001".parse().unwrap();
        let sa = Scope::new("a");
        let sb = Scope::new("b");
        MockConn::pair((&pa, &ka, &aa, &sa), (&pb, &kb, &ab, &sb))
    }

    #[tokio::test]
    async fn test_mock_conn_streams() {
        let (a, b) = mock_pair();
        assert_eq!(a.remote_peer(), b.local_peer());
        assert_eq!(a.remote_multiaddr(), b.local_multiaddr());

        let b_dyn: Arc<dyn Conn> = b.clone();
        let mut incoming = collect(&b_dyn);

        let mut s = a.new_stream().await.unwrap();
        s.write_all(b"hello").await.unwrap();
        s.shutdown().await.unwrap();
        let mut r = incoming.recv().await.unwrap();
        let mut got = Vec::new();
        r.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"hello");
        assert_eq!(b.stats().bytes_read, 5);
    }

    #[tokio::test]
    async fn test_mock_close_closes_partner_and_streams() {
        let (a, b) = mock_pair();
        let b_dyn: Arc<dyn Conn> = b.clone();
        let mut incoming = collect(&b_dyn);

        let mut s = a.new_stream().await.unwrap();
        let mut r = incoming.recv().await.unwrap();

        a.close().await.unwrap();
        b.scope().closed().wait().await;
        assert!(b.is_closed());

        let mut buf = [0u8; 1];
        let err = r.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        let err = s.write_all(b"x").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
        assert!(a.new_stream().await.is_err());
    }
}
