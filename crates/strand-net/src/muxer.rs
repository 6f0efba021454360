//! Stream multiplexer.
//!
//! Many ordered byte streams share one message channel (normally a secure session).
//! Frames are batched into channel messages by a writer task; a reader task decodes
//! them and routes each to its stream.
//!
//! ```text
//!   MuxedStream ──┐                                ┌──▶ MuxedStream
//!   MuxedStream ──┼─▶ frame queue ─▶ writer task ══╪══ reader task ─┼──▶ MuxedStream
//!   MuxedStream ──┘                                └──▶ accept backlog
//! ```
//!
//! Flow control is credit based. Each stream may have at most `initial_window` bytes
//! in flight; the receiver returns credit with `WindowUpdate` frames as the application
//! reads. A slow reader therefore stalls its own writer and nothing else. Streams
//! opened by the remote beyond `max_streams`, or while the accept backlog is full, are
//! reset immediately. Both ends must use the same [`MuxConfig`].
//!
//! The dialer of the underlying connection opens odd stream ids, the listener even.

use crate::config::MuxConfig;
use crate::error::{MuxError, StreamError};
use crate::wire::{MessageReader, MessageWriter};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};
use strand_core::{FrameType, MuxFrame, Scope};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::{mpsc, oneshot};

/// Target size of one batched channel message.
const WRITE_BATCH: usize = 64 * 1024;

/// Reset code sent when a stream is refused or aborted.
const RESET_REFUSED: u32 = 1;

/// Reset code for flow-control violations.
const RESET_FLOW: u32 = 2;

/// Go-away code for a normal shutdown.
const GO_AWAY_NORMAL: u32 = 0;

/// Which end of the underlying connection we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection; uses odd stream ids
    Dialer,
    /// Accepted the connection; uses even stream ids
    Listener,
}

impl Role {
    fn first_id(self) -> u32 {
        match self {
            Role::Dialer => 1,
            Role::Listener => 2,
        }
    }

    fn is_remote_id(self, id: u32) -> bool {
        id != 0 && (id % 2 == 1) == (self == Role::Listener)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ═══════════════════════════════════════════════════════════════════════════
// Per-stream state
// ═══════════════════════════════════════════════════════════════════════════

struct StreamState {
    recv: VecDeque<Vec<u8>>,
    head: usize,
    buffered: usize,
    unacked: usize,
    send_window: usize,
    local_fin: bool,
    remote_fin: bool,
    reset: bool,
    conn_gone: bool,
    dropped: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl StreamState {
    fn new(window: usize) -> Self {
        Self {
            recv: VecDeque::new(),
            head: 0,
            buffered: 0,
            unacked: 0,
            send_window: window,
            local_fin: false,
            remote_fin: false,
            reset: false,
            conn_gone: false,
            dropped: false,
            read_waker: None,
            write_waker: None,
        }
    }

    fn wake(&mut self) {
        if let Some(w) = self.read_waker.take() {
            w.wake();
        }
        if let Some(w) = self.write_waker.take() {
            w.wake();
        }
    }

    fn finished(&self) -> bool {
        self.reset || self.conn_gone || (self.local_fin && self.remote_fin)
    }
}

struct StreamShared {
    id: u32,
    state: Mutex<StreamState>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Session state
// ═══════════════════════════════════════════════════════════════════════════

struct Shared {
    config: MuxConfig,
    role: Role,
    frames: mpsc::UnboundedSender<MuxFrame>,
    streams: Mutex<HashMap<u32, Arc<StreamShared>>>,
    next_id: AtomicU32,
    closed: AtomicBool,
    remote_closed: AtomicBool,
    pings: Mutex<HashMap<u32, oneshot::Sender<()>>>,
    next_ping: AtomicU32,
}

impl Shared {
    fn send(&self, frame: MuxFrame) -> bool {
        self.frames.send(frame).is_ok()
    }

    fn lookup(&self, id: u32) -> Option<Arc<StreamShared>> {
        lock(&self.streams).get(&id).cloned()
    }

    fn remove(&self, id: u32) {
        lock(&self.streams).remove(&id);
    }

    fn window(&self) -> usize {
        self.config.initial_window as usize
    }

    fn closed_error(&self) -> MuxError {
        if self.remote_closed.load(Ordering::Acquire) {
            MuxError::ClosedByPeer
        } else {
            MuxError::Closed
        }
    }

    /// Mark the session dead and wake every stream.
    fn shut_down(&self) {
        self.closed.store(true, Ordering::Release);
        let streams: Vec<_> = lock(&self.streams).drain().map(|(_, s)| s).collect();
        for stream in streams {
            let mut st = lock(&stream.state);
            st.conn_gone = true;
            st.wake();
        }
        lock(&self.pings).clear();
    }

    fn reset_stream(&self, stream: &StreamShared, code: u32) {
        {
            let mut st = lock(&stream.state);
            st.reset = true;
            st.wake();
        }
        self.remove(stream.id);
        self.send(MuxFrame::reset(stream.id, code));
    }

    /// Route every frame in one channel message. `Ok(false)` means the peer said go-away.
    fn handle_message(
        self: &Arc<Self>,
        mut msg: &[u8],
        accept: &mpsc::Sender<MuxedStream>,
    ) -> Result<bool, MuxError> {
        while !msg.is_empty() {
            let (frame, used) = MuxFrame::decode(msg, self.config.max_frame_size)
                .map_err(|e| MuxError::Protocol(e.to_string().into()))?;
            msg = &msg[used..];
            if !self.handle_frame(frame, accept)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn handle_frame(
        self: &Arc<Self>,
        frame: MuxFrame,
        accept: &mpsc::Sender<MuxedStream>,
    ) -> Result<bool, MuxError> {
        let id = frame.stream_id();
        match frame.frame_type() {
            FrameType::StreamOpen => self.on_open(id, accept)?,
            FrameType::Data => self.on_data(id, frame),
            FrameType::StreamClose => self.on_close(id),
            FrameType::StreamReset => {
                if let Some(stream) = self.lookup(id) {
                    tracing::trace!(stream = id, code = frame.header.value, "stream reset by peer");
                    let mut st = lock(&stream.state);
                    st.reset = true;
                    st.wake();
                    drop(st);
                    self.remove(id);
                }
            }
            FrameType::WindowUpdate => {
                if let Some(stream) = self.lookup(id) {
                    let mut st = lock(&stream.state);
                    st.send_window = st.send_window.saturating_add(frame.header.value as usize);
                    if let Some(w) = st.write_waker.take() {
                        w.wake();
                    }
                }
            }
            FrameType::Ping => {
                self.send(MuxFrame::pong(frame.header.value));
            }
            FrameType::Pong => {
                if let Some(tx) = lock(&self.pings).remove(&frame.header.value) {
                    let _ = tx.send(());
                }
            }
            FrameType::GoAway => {
                tracing::debug!(code = frame.header.value, "peer sent go-away");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn on_open(
        self: &Arc<Self>,
        id: u32,
        accept: &mpsc::Sender<MuxedStream>,
    ) -> Result<(), MuxError> {
        if !self.role.is_remote_id(id) {
            return Err(MuxError::Protocol(
                format!("peer opened stream with our id {id}").into(),
            ));
        }
        let stream = {
            let mut streams = lock(&self.streams);
            if streams.contains_key(&id) {
                return Err(MuxError::Protocol(format!("stream {id} opened twice").into()));
            }
            if streams.len() >= self.config.max_streams {
                drop(streams);
                tracing::debug!(stream = id, "stream table full, refusing stream");
                self.send(MuxFrame::reset(id, RESET_REFUSED));
                return Ok(());
            }
            let stream = Arc::new(StreamShared {
                id,
                state: Mutex::new(StreamState::new(self.window())),
            });
            streams.insert(id, Arc::clone(&stream));
            stream
        };

        let muxed = MuxedStream {
            stream,
            session: Arc::clone(self),
        };
        if let Err(e) = accept.try_send(muxed) {
            let muxed = match e {
                mpsc::error::TrySendError::Full(s) | mpsc::error::TrySendError::Closed(s) => s,
            };
            tracing::debug!(stream = id, "accept backlog full, refusing stream");
            self.reset_stream(&muxed.stream, RESET_REFUSED);
        }
        Ok(())
    }

    fn on_data(&self, id: u32, frame: MuxFrame) {
        let Some(stream) = self.lookup(id) else {
            self.send(MuxFrame::reset(id, RESET_REFUSED));
            return;
        };
        let fin = frame.header.flags.is_fin();
        let mut st = lock(&stream.state);
        if st.reset {
            return;
        }
        if st.dropped || st.remote_fin {
            drop(st);
            self.reset_stream(&stream, RESET_REFUSED);
            return;
        }
        let len = frame.payload.len();
        if st.buffered + st.unacked + len > self.window() {
            drop(st);
            tracing::debug!(stream = id, "peer overran stream window");
            self.reset_stream(&stream, RESET_FLOW);
            return;
        }
        if len > 0 {
            st.recv.push_back(frame.payload);
            st.buffered += len;
        }
        st.remote_fin |= fin;
        if let Some(w) = st.read_waker.take() {
            w.wake();
        }
    }

    fn on_close(&self, id: u32) {
        let Some(stream) = self.lookup(id) else {
            return;
        };
        let mut st = lock(&stream.state);
        st.remote_fin = true;
        if let Some(w) = st.read_waker.take() {
            w.wake();
        }
        let done = st.local_fin;
        drop(st);
        if done {
            self.remove(id);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════════

/// A multiplexed session over one message channel.
///
/// The session's reader and writer tasks run on the scope passed to [`MuxSession::new`].
/// Closing that scope sends go-away and shuts the channel down.
pub struct MuxSession {
    shared: Arc<Shared>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<MuxedStream>>,
    scope: Scope,
}

impl MuxSession {
    /// Start a session over `reader`/`writer`, with tasks owned by `scope`.
    pub fn new<R, W>(reader: R, writer: W, role: Role, config: MuxConfig, scope: Scope) -> Self
    where
        R: MessageReader,
        W: MessageWriter,
    {
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog.max(1));
        let shared = Arc::new(Shared {
            config,
            role,
            frames: frames_tx,
            streams: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(role.first_id()),
            closed: AtomicBool::new(false),
            remote_closed: AtomicBool::new(false),
            pings: Mutex::new(HashMap::new()),
            next_ping: AtomicU32::new(1),
        });

        let read_shared = Arc::clone(&shared);
        scope.spawn(move |scope| read_loop(reader, read_shared, accept_tx, scope));
        let write_shared = Arc::clone(&shared);
        scope.spawn(move |scope| write_loop(writer, frames_rx, write_shared, scope));

        Self {
            shared,
            incoming: tokio::sync::Mutex::new(accept_rx),
            scope,
        }
    }

    /// Open a new outbound stream.
    ///
    /// # Errors
    ///
    /// `Closed`/`ClosedByPeer` once the session has ended, `TooManyStreams` when the
    /// stream table is full.
    pub fn open_stream(&self) -> Result<MuxedStream, MuxError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(self.shared.closed_error());
        }
        let stream = {
            let mut streams = lock(&self.shared.streams);
            if streams.len() >= self.shared.config.max_streams {
                return Err(MuxError::TooManyStreams);
            }
            let id = self.shared.next_id.fetch_add(2, Ordering::Relaxed);
            if id >= u32::MAX - 1 {
                return Err(MuxError::Protocol("stream ids exhausted".into()));
            }
            let stream = Arc::new(StreamShared {
                id,
                state: Mutex::new(StreamState::new(self.shared.window())),
            });
            streams.insert(id, Arc::clone(&stream));
            stream
        };
        if !self.shared.send(MuxFrame::open(stream.id)) {
            self.shared.remove(stream.id);
            return Err(self.shared.closed_error());
        }
        tracing::trace!(stream = stream.id, "opened stream");
        Ok(MuxedStream {
            stream,
            session: Arc::clone(&self.shared),
        })
    }

    /// Wait for the next stream opened by the remote.
    ///
    /// # Errors
    ///
    /// `ClosedByPeer` or `Closed` once the session has ended.
    pub async fn accept(&self) -> Result<MuxedStream, MuxError> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or_else(|| self.shared.closed_error())
    }

    /// Measure one round trip.
    ///
    /// # Errors
    ///
    /// Fails if the session ends before the pong arrives.
    pub async fn ping(&self) -> Result<Duration, MuxError> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(self.shared.closed_error());
        }
        let nonce = self.shared.next_ping.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pings).insert(nonce, tx);
        let start = Instant::now();
        if !self.shared.send(MuxFrame::ping(nonce)) {
            lock(&self.shared.pings).remove(&nonce);
            return Err(self.shared.closed_error());
        }
        rx.await.map_err(|_| self.shared.closed_error())?;
        Ok(start.elapsed())
    }

    /// Number of streams currently tracked.
    #[must_use]
    pub fn num_streams(&self) -> usize {
        lock(&self.shared.streams).len()
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Close the session: pending frames are flushed, then go-away is sent.
    pub async fn close(&self) {
        let _ = self.scope.close().await;
    }
}

impl std::fmt::Debug for MuxSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxSession")
            .field("role", &self.shared.role)
            .field("streams", &self.num_streams())
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn read_loop<R: MessageReader>(
    mut reader: R,
    shared: Arc<Shared>,
    accept: mpsc::Sender<MuxedStream>,
    scope: Scope,
) {
    let closing = scope.closing();
    let remote_ended = loop {
        let msg = tokio::select! {
            msg = reader.read_msg() => msg,
            () = closing.wait() => break false,
        };
        match msg {
            Ok(msg) => match shared.handle_message(&msg, &accept) {
                Ok(true) => {}
                Ok(false) => break true,
                Err(e) => {
                    tracing::warn!("closing session: {}", e);
                    break true;
                }
            },
            Err(e) => {
                if e.kind() != io::ErrorKind::UnexpectedEof {
                    tracing::debug!("session read failed: {}", e);
                }
                break true;
            }
        }
    };
    if remote_ended {
        shared.remote_closed.store(true, Ordering::Release);
    }
    shared.shut_down();
    drop(accept);
    scope.spawn_close();
}

async fn write_loop<W: MessageWriter>(
    mut writer: W,
    mut frames: mpsc::UnboundedReceiver<MuxFrame>,
    shared: Arc<Shared>,
    scope: Scope,
) {
    let closing = scope.closing();
    let mut batch = Vec::with_capacity(WRITE_BATCH);
    loop {
        tokio::select! {
            biased;
            frame = frames.recv() => {
                let Some(frame) = frame else { break };
                batch.extend_from_slice(&frame.encode());
                while batch.len() < WRITE_BATCH {
                    match frames.try_recv() {
                        Ok(frame) => batch.extend_from_slice(&frame.encode()),
                        Err(_) => break,
                    }
                }
                if let Err(e) = writer.write_msg(&batch).await {
                    tracing::debug!("session write failed: {}", e);
                    shared.shut_down();
                    scope.spawn_close();
                    return;
                }
                batch.clear();
            }
            () = closing.wait() => {
                while let Ok(frame) = frames.try_recv() {
                    batch.extend_from_slice(&frame.encode());
                    if batch.len() >= WRITE_BATCH {
                        if writer.write_msg(&batch).await.is_err() {
                            batch.clear();
                            break;
                        }
                        batch.clear();
                    }
                }
                if !shared.remote_closed.load(Ordering::Acquire) {
                    batch.extend_from_slice(&MuxFrame::go_away(GO_AWAY_NORMAL).encode());
                }
                if !batch.is_empty() {
                    let _ = writer.write_msg(&batch).await;
                }
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

// ═══════════════════════════════════════════════════════════════════════════
// Streams
// ═══════════════════════════════════════════════════════════════════════════

/// One multiplexed byte stream.
///
/// Dropping the stream half-closes it if it was not shut down already.
pub struct MuxedStream {
    stream: Arc<StreamShared>,
    session: Arc<Shared>,
}

impl MuxedStream {
    /// Stream id within the session.
    #[must_use]
    pub fn id(&self) -> u32 {
        self.stream.id
    }

    /// Abort the stream in both directions.
    pub fn reset(&self) {
        let already = lock(&self.stream.state).finished();
        if !already {
            self.session.reset_stream(&self.stream, RESET_REFUSED);
        }
    }

    fn state(&self) -> MutexGuard<'_, StreamState> {
        lock(&self.stream.state)
    }
}

impl std::fmt::Debug for MuxedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuxedStream").field("id", &self.id()).finish()
    }
}

impl AsyncRead for MuxedStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        let window = self.session.window();
        let mut guard = self.state();
        let st = &mut *guard;

        if !st.recv.is_empty() {
            let mut copied = 0;
            while buf.remaining() > 0 {
                let Some(front) = st.recv.front() else { break };
                let avail = &front[st.head..];
                let n = avail.len().min(buf.remaining());
                buf.put_slice(&avail[..n]);
                copied += n;
                if n == avail.len() {
                    st.recv.pop_front();
                    st.head = 0;
                } else {
                    st.head += n;
                }
            }
            st.buffered -= copied;
            st.unacked += copied;
            if st.unacked >= window / 2 && !st.remote_fin && !st.reset {
                let credit = u32::try_from(st.unacked).unwrap_or(u32::MAX);
                st.unacked = 0;
                self.session
                    .send(MuxFrame::window_update(self.stream.id, credit));
            }
            return Poll::Ready(Ok(()));
        }

        if st.reset {
            return Poll::Ready(Err(StreamError::Reset.into()));
        }
        if st.remote_fin {
            return Poll::Ready(Ok(()));
        }
        if st.conn_gone {
            return Poll::Ready(Err(StreamError::ConnectionGone.into()));
        }
        st.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for MuxedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut st = self.state();
        if st.reset {
            return Poll::Ready(Err(StreamError::Reset.into()));
        }
        if st.conn_gone {
            return Poll::Ready(Err(StreamError::ConnectionGone.into()));
        }
        if st.local_fin {
            return Poll::Ready(Err(StreamError::Closed.into()));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        if st.send_window == 0 {
            st.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let n = buf
            .len()
            .min(st.send_window)
            .min(self.session.config.max_frame_size);
        st.send_window -= n;
        drop(st);

        let frame = MuxFrame::data(self.stream.id, buf[..n].to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if !self.session.send(frame) {
            return Poll::Ready(Err(StreamError::ConnectionGone.into()));
        }
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let st = self.state();
        if st.reset {
            return Poll::Ready(Err(StreamError::Reset.into()));
        }
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut st = self.state();
        if st.local_fin {
            return Poll::Ready(Ok(()));
        }
        if st.reset {
            return Poll::Ready(Err(StreamError::Reset.into()));
        }
        if st.conn_gone {
            return Poll::Ready(Err(StreamError::ConnectionGone.into()));
        }
        st.local_fin = true;
        let done = st.remote_fin;
        drop(st);

        self.session.send(MuxFrame::close(self.stream.id));
        if done {
            self.session.remove(self.stream.id);
        }
        Poll::Ready(Ok(()))
    }
}

impl Drop for MuxedStream {
    fn drop(&mut self) {
        let mut st = self.state();
        st.dropped = true;
        st.recv.clear();
        if st.reset || st.conn_gone {
            drop(st);
            self.session.remove(self.stream.id);
            return;
        }
        let send_close = !st.local_fin;
        st.local_fin = true;
        let done = st.remote_fin;
        drop(st);

        if send_close {
            self.session.send(MuxFrame::close(self.stream.id));
        }
        if done {
            self.session.remove(self.stream.id);
        }
    }
}
