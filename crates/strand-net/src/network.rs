//! Network facade - the API application subsystems consume
//!
//! A [`Network`] owns everything a node needs to talk to peers: its identity and
//! peerstore, a backend that produces connections (TCP or in-memory), one
//! [`ConnGroup`] per connected peer, the protocol mux, and the built-in Identify and
//! Relay services.
//!
//! ```text
//!             dial_peer / new_stream                 inbound connection
//!                      │                                     │
//!          ┌───────────▼───────────┐                         │
//!          │ DialSync + DialBackoff│                         │
//!          └───────────┬───────────┘                         │
//!                      ▼                                     ▼
//!                Backend::dial ───────────▶ add_conn ◀── Backend::listen
//!                                              │
//!                        ┌─────────────────────┼────────────────────┐
//!                        ▼                     ▼                    ▼
//!                 ConnGroup (per peer)    Identify run        Notifiee::connected
//!                        │
//!              group.accept() ─▶ ProtocolMux::handle ─▶ StreamHandler
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use strand_core::Peerstore;
//! use strand_crypto::KeyType;
//! use strand_net::{Network, NetworkConfig, handler_fn};
//! use tokio::io::AsyncWriteExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (key, _, _) = strand_core::peer::generate(KeyType::Ed25519);
//! let config = NetworkConfig {
//!     listen_addrs: vec!["/ip4/127.0.0.1/tcp/4001".parse()?],
//!     ..NetworkConfig::default()
//! };
//! let net = Network::new(key, Arc::new(Peerstore::new()), config).await?;
//! net.set_handler("/chat", handler_fn(|mut stream| async move {
//!     let _ = stream.write_all(b"hello").await;
//! }))?;
//! # Ok(())
//! # }
//! ```

use crate::config::NetworkConfig;
use crate::conn::{Conn, Stream};
use crate::dial::{DialBackoff, DialSync};
use crate::error::{DialError, NetError, Result};
use crate::group::ConnGroup;
use crate::identify::{self, IdentifyService};
use crate::notify::Notifiee;
use crate::protocol::{ProtocolMux, StreamHandler};
use crate::relay::{self, Relay};
use crate::swarm::TcpBackend;
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use strand_core::{Multiaddr, PeerId, PeerInfo, Peerstore, Scope, Signal, Trigger};
use strand_crypto::PrivateKey;
use strand_transport::addr;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Whether a peer currently has a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectedness {
    /// At least one live connection
    Connected,
    /// No live connection
    NotConnected,
}

/// Produces connections for a [`Network`].
#[async_trait]
pub(crate) trait Backend: Send + Sync + 'static {
    /// Start accepting on `addr`, handing every upgraded connection to
    /// `Network::add_conn`. Returns the bound address.
    async fn listen(&self, net: &Network, addr: &Multiaddr) -> Result<Multiaddr>;

    /// Open an authenticated connection to `peer` at `addr`.
    async fn dial(&self, net: &Network, peer: &PeerId, addr: &Multiaddr) -> Result<Arc<dyn Conn>>;

    /// Bound listen addresses, possibly containing wildcard IPs
    fn listen_addresses(&self) -> Vec<Multiaddr>;

    /// Listen addresses with wildcard IPs expanded to interface addresses
    fn interface_listen_addresses(&self) -> Result<Vec<Multiaddr>>;
}

/// Network inner state
pub(crate) struct NetworkInner {
    /// Our peer id
    pub(crate) local: PeerId,
    /// Identity key, used to upgrade connections
    pub(crate) key: PrivateKey,
    /// Shared peer directory
    pub(crate) peerstore: Arc<Peerstore>,
    /// Network configuration
    pub(crate) config: NetworkConfig,
    /// Connection source
    pub(crate) backend: Box<dyn Backend>,
    /// Protocol handlers
    pub(crate) mux: ProtocolMux,
    /// Connection groups (remote peer -> group)
    pub(crate) groups: DashMap<PeerId, Arc<ConnGroup>>,
    /// In-flight dials
    pub(crate) dial_sync: DialSync,
    /// Recently failed peers
    pub(crate) backoff: DialBackoff,
    /// Identify runs and observed addresses
    pub(crate) identify: IdentifyService,
    /// Event subscribers
    pub(crate) notifiees: RwLock<Vec<Arc<dyn Notifiee>>>,
    /// Root of every task the network spawns
    pub(crate) scope: Scope,
}

/// A node's view of the peer-to-peer network. Cloning yields another handle.
#[derive(Clone)]
pub struct Network {
    pub(crate) inner: Arc<NetworkInner>,
}

/// Non-owning handle, held by tasks and handlers the network itself owns.
#[derive(Clone)]
pub(crate) struct WeakNetwork(Weak<NetworkInner>);

impl WeakNetwork {
    pub(crate) fn upgrade(&self) -> Option<Network> {
        self.0.upgrade().map(|inner| Network { inner })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Constructors
// ═══════════════════════════════════════════════════════════════════════════

impl Network {
    /// Create a TCP network and listen on `config.listen_addrs`.
    ///
    /// The key pair is recorded in `peerstore` under the local peer id.
    ///
    /// # Errors
    ///
    /// Fails if the key cannot be stored or any listen address cannot be bound.
    pub async fn new(key: PrivateKey, peerstore: Arc<Peerstore>, config: NetworkConfig) -> Result<Self> {
        let backend = TcpBackend::new(config.transport.clone());
        let local = PeerId::from_public_key(&key.public());
        let scope = Scope::new(format!("network {}", local.short()));
        let listen = config.listen_addrs.clone();
        let net = Self::with_backend(key, peerstore, config, Box::new(backend), scope)?;
        if let Err(e) = net.listen(&listen).await {
            let _ = net.close().await;
            return Err(e);
        }
        Ok(net)
    }

    /// Create a network over any backend, registering Identify and Relay.
    pub(crate) fn with_backend(
        key: PrivateKey,
        peerstore: Arc<Peerstore>,
        config: NetworkConfig,
        backend: Box<dyn Backend>,
        scope: Scope,
    ) -> Result<Self> {
        let public = key.public();
        let local = PeerId::from_public_key(&public);
        peerstore.add_pubkey(&local, public)?;
        peerstore.add_privkey(&local, key.clone())?;

        let inner = NetworkInner {
            backoff: DialBackoff::new(config.dial.backoff),
            identify: IdentifyService::new(config.identify_timeout),
            local,
            key,
            peerstore,
            config,
            backend,
            mux: ProtocolMux::new(),
            groups: DashMap::new(),
            dial_sync: DialSync::new(),
            notifiees: RwLock::new(Vec::new()),
            scope,
        };
        let net = Self {
            inner: Arc::new(inner),
        };

        net.inner
            .mux
            .set_handler(identify::IDENTIFY_PROTOCOL, identify::handler(net.downgrade()))?;
        net.inner
            .mux
            .set_handler(relay::RELAY_PROTOCOL, relay::handler(net.downgrade()))?;

        tracing::info!(peer = %net.inner.local, "network started");
        Ok(net)
    }

    pub(crate) fn downgrade(&self) -> WeakNetwork {
        WeakNetwork(Arc::downgrade(&self.inner))
    }

    /// Start listening on `addrs`.
    ///
    /// # Errors
    ///
    /// Stops at the first address that cannot be bound.
    pub async fn listen(&self, addrs: &[Multiaddr]) -> Result<()> {
        for addr in addrs {
            let bound = self.inner.backend.listen(self, addr).await?;
            tracing::info!(peer = %self.inner.local.short(), addr = %bound, "listening");
            for n in self.notifiees() {
                n.listen(self, &bound);
            }
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Identity and addresses
// ═══════════════════════════════════════════════════════════════════════════

impl Network {
    /// Our peer id
    #[must_use]
    pub fn local_peer(&self) -> &PeerId {
        &self.inner.local
    }

    /// The peerstore shared with the rest of the node
    #[must_use]
    pub fn peerstore(&self) -> &Arc<Peerstore> {
        &self.inner.peerstore
    }

    /// Effective configuration
    #[must_use]
    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// Bound listen addresses. May contain wildcard IPs.
    #[must_use]
    pub fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.inner.backend.listen_addresses()
    }

    /// Listen addresses with `0.0.0.0` / `::` expanded to every local interface.
    ///
    /// # Errors
    ///
    /// Fails if the interface list cannot be read.
    pub fn interface_listen_addresses(&self) -> Result<Vec<Multiaddr>> {
        self.inner.backend.interface_listen_addresses()
    }

    /// Interface listen addresses plus addresses peers currently observe us at.
    #[must_use]
    pub fn all_addresses(&self) -> Vec<Multiaddr> {
        let mut out = self.interface_listen_addresses().unwrap_or_default();
        for observed in self.inner.identify.own_observed_addrs() {
            if !out.contains(&observed) {
                out.push(observed);
            }
        }
        out
    }

    /// Scope every network task runs under. Closing it shuts the network down.
    #[must_use]
    pub fn scope(&self) -> &Scope {
        &self.inner.scope
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Protocol handlers
// ═══════════════════════════════════════════════════════════════════════════

impl Network {
    /// Register `handler` for streams opened with `protocol`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// `HeaderTooLong` if the tag does not fit the stream header.
    pub fn set_handler(&self, protocol: &str, handler: StreamHandler) -> Result<()> {
        self.inner.mux.set_handler(protocol, handler)
    }

    /// Unregister a handler. Returns whether one was registered.
    pub fn remove_handler(&self, protocol: &str) -> bool {
        self.inner.mux.remove_handler(protocol)
    }

    /// Handler for streams whose tag matches nothing, or that carry no tag.
    pub fn set_default_handler(&self, handler: Option<StreamHandler>) {
        self.inner.mux.set_default_handler(handler);
    }

    /// Tags with a registered handler, sorted.
    #[must_use]
    pub fn protocols(&self) -> Vec<String> {
        self.inner.mux.protocols()
    }

    /// Client side of the relay service.
    #[must_use]
    pub fn relay(&self) -> Relay<'_> {
        Relay::new(self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Connections
// ═══════════════════════════════════════════════════════════════════════════

impl Network {
    /// Connected peers
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .inner
            .groups
            .iter()
            .filter(|g| !g.is_closed() && !g.is_empty())
            .map(|g| g.key().clone())
            .collect();
        peers.sort();
        peers
    }

    /// Every live connection
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<dyn Conn>> {
        self.inner
            .groups
            .iter()
            .flat_map(|g| g.conns())
            .filter(|c| !c.is_closed())
            .collect()
    }

    /// Live connections to `peer`
    #[must_use]
    pub fn connections_to(&self, peer: &PeerId) -> Vec<Arc<dyn Conn>> {
        self.group(peer)
            .map(|g| g.conns().into_iter().filter(|c| !c.is_closed()).collect())
            .unwrap_or_default()
    }

    /// Whether `peer` has a live connection
    #[must_use]
    pub fn connectedness(&self, peer: &PeerId) -> Connectedness {
        if self.best_conn(peer).is_some() {
            Connectedness::Connected
        } else {
            Connectedness::NotConnected
        }
    }

    /// Close every connection to `peer`.
    ///
    /// # Errors
    ///
    /// Returns the group's teardown error, if any.
    pub async fn close_peer(&self, peer: &PeerId) -> Result<()> {
        let Some((_, group)) = self.inner.groups.remove(peer) else {
            return Ok(());
        };
        tracing::debug!(peer = %peer.short(), conns = group.len(), "closing peer");
        group.close().await
    }

    pub(crate) fn group(&self, peer: &PeerId) -> Option<Arc<ConnGroup>> {
        self.inner
            .groups
            .get(peer)
            .map(|g| Arc::clone(g.value()))
            .filter(|g| !g.is_closed())
    }

    fn best_conn(&self, peer: &PeerId) -> Option<Arc<dyn Conn>> {
        self.group(peer).and_then(|g| g.best())
    }

    /// Take ownership of a freshly established connection.
    ///
    /// Joins it to the peer's group, starts Identify on it and announces it.
    pub(crate) fn add_conn(&self, conn: Arc<dyn Conn>) {
        if self.inner.scope.is_closing() {
            conn.scope().spawn_close();
            return;
        }
        let remote = conn.remote_peer().clone();
        let (group, fresh) = match self.inner.groups.entry(remote.clone()) {
            Entry::Occupied(e) if !e.get().is_closed() => (Arc::clone(e.get()), false),
            Entry::Occupied(mut e) => {
                let group = self.new_group(&remote);
                e.insert(Arc::clone(&group));
                (group, true)
            }
            Entry::Vacant(v) => {
                let group = self.new_group(&remote);
                v.insert(Arc::clone(&group));
                (group, true)
            }
        };
        group.add(Arc::clone(&conn));

        if let Some(key) = conn.remote_public_key() {
            if let Err(e) = self.inner.peerstore.add_pubkey(&remote, key) {
                tracing::warn!(peer = %remote.short(), error = %e, "remote key rejected by peerstore");
            }
        }
        if fresh {
            self.spawn_dispatcher(&group);
        }
        self.watch_conn(&conn);

        tracing::debug!(
            conn = %conn.id(),
            peer = %remote.short(),
            remote = %conn.remote_multiaddr(),
            "connection added"
        );
        for n in self.notifiees() {
            n.connected(self, &conn);
        }
        self.inner.identify.start(self, &conn);
    }

    fn new_group(&self, remote: &PeerId) -> Arc<ConnGroup> {
        let group = ConnGroup::new(self.inner.local.clone(), remote.clone(), &self.inner.scope);

        let weak = self.downgrade();
        let watched = Arc::clone(&group);
        let remote = remote.clone();
        self.inner.scope.spawn(move |_| async move {
            watched.scope().closing().wait().await;
            if let Some(net) = weak.upgrade() {
                net.inner
                    .groups
                    .remove_if(&remote, |_, g| Arc::ptr_eq(g, &watched));
            }
        });
        group
    }

    /// Feed the group's inbound streams to the protocol mux, at most
    /// `inbound_streams_per_peer` at a time.
    fn spawn_dispatcher(&self, group: &Arc<ConnGroup>) {
        let weak = self.downgrade();
        let limit = Arc::new(Semaphore::new(self.inner.config.inbound_streams_per_peer.max(1)));
        let source = Arc::clone(group);
        group.scope().spawn(move |scope| async move {
            let closing = scope.closing();
            while let Some(mut stream) = source.accept().await {
                let permit = tokio::select! {
                    p = Arc::clone(&limit).acquire_owned() => p,
                    () = closing.wait() => return,
                };
                let Ok(permit) = permit else { return };
                let Some(net) = weak.upgrade() else { return };
                net.track_stream(&mut stream);

                scope.spawn(move |scope| async move {
                    let closing = scope.closing();
                    tokio::select! {
                        res = net.inner.mux.handle(stream) => {
                            if let Err(e) = res {
                                tracing::debug!(error = %e, "inbound stream dropped");
                            }
                        }
                        () = closing.wait() => {}
                    }
                    drop(permit);
                });
            }
        });
    }

    /// Announce the connection's close and forget its Identify state.
    fn watch_conn(&self, conn: &Arc<dyn Conn>) {
        let weak = self.downgrade();
        let conn = Arc::clone(conn);
        self.inner.scope.spawn(move |_| async move {
            conn.scope().closed().wait().await;
            let Some(net) = weak.upgrade() else { return };
            net.inner.identify.forget(conn.id());
            tracing::debug!(conn = %conn.id(), peer = %conn.remote_peer().short(), "connection closed");
            for n in net.notifiees() {
                n.disconnected(&net, &conn);
            }
        });
    }

    /// Hook `opened_stream` / `closed_stream` notifications onto a stream.
    fn track_stream(&self, stream: &mut Stream) {
        for n in self.notifiees() {
            n.opened_stream(self, stream);
        }
        let weak = self.downgrade();
        stream.set_close_hook(Box::new(move |s| {
            if let Some(net) = weak.upgrade() {
                for n in net.notifiees() {
                    n.closed_stream(&net, s);
                }
            }
        }));
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Dialing and streams
// ═══════════════════════════════════════════════════════════════════════════

impl Network {
    /// Ensure a connection to `peer`, dialing if needed.
    ///
    /// Returns once Identify has finished on the connection. Concurrent calls for the
    /// same peer share one dial.
    ///
    /// # Errors
    ///
    /// `DialToSelf`, `Backoff`, `NoAddresses`, `AllDialsFailed`, `Timeout` or
    /// `Cancelled`.
    pub async fn dial_peer(&self, peer: &PeerId) -> Result<Arc<dyn Conn>> {
        if peer == &self.inner.local {
            return Err(DialError::DialToSelf.into());
        }
        let conn = match self.best_conn(peer) {
            Some(conn) => conn,
            None => {
                if self.inner.backoff.is_backing_off(peer) {
                    return Err(DialError::Backoff(peer.clone()).into());
                }
                let net = self.clone();
                let target = peer.clone();
                self.inner
                    .dial_sync
                    .dial(peer, &self.inner.scope, move || async move {
                        net.dial_attempt(&target).await
                    })
                    .await?;
                self.best_conn(peer).ok_or(DialError::Cancelled)?
            }
        };
        self.identify_wait(&conn).wait().await;
        Ok(conn)
    }

    /// Add `info.addrs` to the peerstore and dial `info.id`.
    ///
    /// # Errors
    ///
    /// See [`Network::dial_peer`].
    pub async fn connect(&self, info: &PeerInfo) -> Result<Arc<dyn Conn>> {
        self.inner
            .peerstore
            .add_addresses(&info.id, &info.addrs, strand_core::peer::TEMP_ADDR_TTL);
        self.dial_peer(&info.id).await
    }

    /// Open a stream to `peer` for `protocol`, dialing on demand.
    ///
    /// # Errors
    ///
    /// Dial errors, or the stream open and header write errors.
    pub async fn new_stream(&self, protocol: &str, peer: &PeerId) -> Result<Stream> {
        self.dial_peer(peer).await?;
        let group = self.group(peer).ok_or(DialError::Cancelled)?;
        let mut stream = group.new_stream_with_protocol(Some(protocol)).await?;
        self.track_stream(&mut stream);
        Ok(stream)
    }

    /// One dial run for `peer`, executed by the leader of a [`DialSync`] slot.
    async fn dial_attempt(&self, peer: &PeerId) -> std::result::Result<(), DialError> {
        let timeout = self.inner.config.dial.timeout;
        let res = tokio::time::timeout(timeout, self.dial_addrs(peer))
            .await
            .unwrap_or(Err(DialError::Timeout));
        match res {
            Ok(conn) => {
                self.inner.backoff.clear(peer);
                self.add_conn(conn);
                Ok(())
            }
            Err(e) => {
                tracing::debug!(peer = %peer.short(), error = %e, "dial failed");
                self.inner.backoff.add(peer);
                Err(e)
            }
        }
    }

    /// Peer addresses worth dialing: usable shapes, minus our own addresses.
    fn candidate_addrs(&self, peer: &PeerId) -> Vec<Multiaddr> {
        let known = addr::filter_usable_addrs(&self.inner.peerstore.addresses(peer));
        let own = self.listen_addresses();
        let own_ifaces = self.interface_listen_addresses().unwrap_or_default();
        addr::subtract(&addr::subtract(&known, &own), &own_ifaces)
    }

    /// Dial every candidate address in parallel. The first success wins.
    async fn dial_addrs(&self, peer: &PeerId) -> std::result::Result<Arc<dyn Conn>, DialError> {
        let addrs = self.candidate_addrs(peer);
        if addrs.is_empty() {
            return Err(DialError::NoAddresses(peer.clone()));
        }
        tracing::debug!(peer = %peer.short(), addrs = addrs.len(), "dialing");

        let limit = Arc::new(Semaphore::new(self.inner.config.dial.max_parallel_addrs.max(1)));
        let mut attempts = JoinSet::new();
        for addr in addrs {
            let net = self.clone();
            let peer = peer.clone();
            let limit = Arc::clone(&limit);
            attempts.spawn(async move {
                let Ok(_permit) = limit.acquire_owned().await else {
                    return (addr, Err(NetError::Cancelled));
                };
                let res = net.inner.backend.dial(&net, &peer, &addr).await;
                (addr, res)
            });
        }

        let mut failures = Vec::new();
        let mut winner: Option<Arc<dyn Conn>> = None;
        while let Some(joined) = attempts.join_next().await {
            let Ok((addr, res)) = joined else { continue };
            match res {
                Ok(conn) if winner.is_none() => {
                    tracing::trace!(peer = %peer.short(), %addr, "dial succeeded");
                    winner = Some(conn);
                    attempts.abort_all();
                }
                Ok(extra) => extra.scope().spawn_close(),
                Err(e) => {
                    tracing::trace!(peer = %peer.short(), %addr, error = %e, "dial attempt failed");
                    failures.push((addr, e.to_string()));
                }
            }
        }
        winner.ok_or_else(|| DialError::AllDialsFailed {
            peer: peer.clone(),
            attempts: failures,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Identify, notifications, shutdown
// ═══════════════════════════════════════════════════════════════════════════

impl Network {
    /// Fires once Identify has completed or failed on `conn`. Starts Identify if it
    /// has not run on `conn` yet.
    #[must_use]
    pub fn identify_wait(&self, conn: &Arc<dyn Conn>) -> Signal {
        self.inner.identify.start(self, conn)
    }

    /// Addresses remote peers currently report seeing us at.
    #[must_use]
    pub fn own_observed_addrs(&self) -> Vec<Multiaddr> {
        self.inner.identify.own_observed_addrs()
    }

    /// Subscribe to network events.
    pub fn notify(&self, notifiee: Arc<dyn Notifiee>) {
        self.inner
            .notifiees
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notifiee);
    }

    /// Unsubscribe a notifiee previously passed to [`Network::notify`].
    pub fn stop_notify(&self, notifiee: &Arc<dyn Notifiee>) {
        self.inner
            .notifiees
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|n| !std::ptr::addr_eq(Arc::as_ptr(n), Arc::as_ptr(notifiee)));
    }

    pub(crate) fn notifiees(&self) -> Vec<Arc<dyn Notifiee>> {
        self.inner
            .notifiees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close every connection and listener and stop all network tasks.
    ///
    /// # Errors
    ///
    /// Returns the network scope's teardown error, if any.
    pub async fn close(&self) -> Result<()> {
        tracing::info!(peer = %self.inner.local.short(), "network shutting down");
        let res = self.inner.scope.close().await;
        self.inner.groups.clear();
        res.map_err(NetError::from)
    }
}

/// A signal that has already fired.
pub(crate) fn fired_signal() -> Signal {
    let trigger = Trigger::new();
    trigger.fire();
    trigger.signal()
}

impl std::fmt::Debug for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Network")
            .field("local", &self.inner.local)
            .field("peers", &self.peers().len())
            .field("listen", &self.listen_addresses())
            .finish()
    }
}
