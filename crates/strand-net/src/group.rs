//! Per-peer connection groups.
//!
//! A node may hold several connections to the same peer (both sides dialed at once, a
//! redial after a network change). The group presents them as one: outbound streams go
//! to a deterministic `best()` member, and inbound streams from every member arrive on
//! one channel.
//!
//! ```text
//!  conn-3 ──┐
//!  conn-7 ──┼──▶ inbound channel ──▶ accept()
//!  conn-9 ──┘
//!     ▲
//!     └── best() = lowest live id
//! ```
//!
//! The group closes itself when its last member is removed.

use crate::conn::{Conn, ConnId, Stream};
use crate::error::{MuxError, NetError, Result};
use crate::protocol;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use strand_core::{PeerId, Scope};
use tokio::sync::{Mutex, mpsc};

/// All connections between one local and one remote peer.
pub struct ConnGroup {
    local: PeerId,
    remote: PeerId,
    conns: RwLock<BTreeMap<ConnId, Arc<dyn Conn>>>,
    inbound_tx: mpsc::UnboundedSender<Stream>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Stream>>,
    retired: AtomicBool,
    scope: Scope,
}

impl ConnGroup {
    /// Create an empty group whose scope is a child of `parent`.
    pub fn new(local: PeerId, remote: PeerId, parent: &Scope) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let scope = parent.child(format!("group {}", remote.short()));
        Arc::new(Self {
            local,
            remote,
            conns: RwLock::new(BTreeMap::new()),
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            retired: AtomicBool::new(false),
            scope,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<ConnId, Arc<dyn Conn>>> {
        self.conns.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<ConnId, Arc<dyn Conn>>> {
        self.conns.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Local peer of every member
    #[must_use]
    pub fn local_peer(&self) -> &PeerId {
        &self.local
    }

    /// Remote peer of every member
    #[must_use]
    pub fn remote_peer(&self) -> &PeerId {
        &self.remote
    }

    /// Add a connection.
    ///
    /// Its inbound streams start flowing into the group channel, and it is removed
    /// again when it closes.
    ///
    /// # Panics
    ///
    /// Panics with `PeerPairMismatch` if the connection is not between this group's
    /// local and remote peers.
    pub fn add(self: &Arc<Self>, conn: Arc<dyn Conn>) {
        if conn.local_peer() != &self.local || conn.remote_peer() != &self.remote {
            panic!(
                "PeerPairMismatch: group ({}, {}) cannot hold connection ({}, {})",
                self.local,
                self.remote,
                conn.local_peer(),
                conn.remote_peer()
            );
        }
        let id = conn.id();
        self.write().insert(id, Arc::clone(&conn));
        self.scope.add_child_scope(conn.scope().clone());

        let tx = self.inbound_tx.clone();
        let weak_conn = Arc::downgrade(&conn);
        conn.set_stream_handler(Arc::new(move |io| {
            if let Some(conn) = weak_conn.upgrade() {
                let _ = tx.send(Stream::new(io, conn));
            }
        }));

        let closed = conn.scope().closed();
        let group: Weak<Self> = Arc::downgrade(self);
        self.scope.spawn(move |scope| async move {
            let closing = scope.closing();
            tokio::select! {
                () = closed.wait() => {
                    if let Some(group) = group.upgrade() {
                        group.remove(id);
                    }
                }
                () = closing.wait() => {}
            }
        });
        tracing::trace!(conn = %id, peer = %self.remote.short(), "connection added to group");
    }

    /// Remove a connection. Removing the last one closes the group.
    pub fn remove(&self, id: ConnId) -> Option<Arc<dyn Conn>> {
        let (removed, now_empty) = {
            let mut conns = self.write();
            let removed = conns.remove(&id);
            (removed, conns.is_empty())
        };
        if removed.is_some() && now_empty {
            self.retired.store(true, Ordering::Release);
            tracing::debug!(peer = %self.remote.short(), "last connection removed, closing group");
            self.scope.spawn_close();
        }
        removed
    }

    /// Deterministic member choice: the live connection with the lowest id.
    #[must_use]
    pub fn best(&self) -> Option<Arc<dyn Conn>> {
        if self.is_closed() {
            return None;
        }
        self.read().values().find(|c| !c.is_closed()).cloned()
    }

    /// Snapshot of the members.
    #[must_use]
    pub fn conns(&self) -> Vec<Arc<dyn Conn>> {
        self.read().values().cloned().collect()
    }

    /// Whether `id` is a member.
    #[must_use]
    pub fn contains(&self, id: ConnId) -> bool {
        self.read().contains_key(&id)
    }

    /// Number of members
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the group has no members
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Open a stream on `best()` and write the protocol header.
    ///
    /// # Errors
    ///
    /// `Mux(Closed)` when the group has no live member, otherwise the stream open or
    /// header write error.
    pub async fn new_stream_with_protocol(&self, protocol: Option<&str>) -> Result<Stream> {
        let conn = self.best().ok_or(NetError::Mux(MuxError::Closed))?;
        let io = conn.new_stream().await?;
        let mut stream = Stream::new(io, conn);
        protocol::write_header(&mut stream, protocol).await?;
        stream.set_protocol(protocol.map(str::to_owned));
        Ok(stream)
    }

    /// Next inbound stream from any member. `None` once the group has closed.
    pub async fn accept(&self) -> Option<Stream> {
        let closing = self.scope.closing();
        let mut rx = self.inbound_rx.lock().await;
        tokio::select! {
            stream = rx.recv() => stream,
            () = closing.wait() => None,
        }
    }

    /// Scope owning the group and, through it, every member connection.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Whether the group is closing or closed. Set as soon as the last member is
    /// removed, before the scope finishes closing.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.retired.load(Ordering::Acquire) || self.scope.is_closing()
    }

    /// Close every member and the group.
    ///
    /// # Errors
    ///
    /// Returns the group scope's teardown error, if any.
    pub async fn close(&self) -> Result<()> {
        let res = self.scope.close().await;
        self.write().clear();
        res.map_err(NetError::from)
    }
}

impl std::fmt::Debug for ConnGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnGroup")
            .field("remote", &self.remote)
            .field("conns", &self.read().keys().collect::<Vec<_>>())
            .finish()
    }
}
