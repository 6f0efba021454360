//! In-memory mock network for tests.
//!
//! A [`MockNet`] hosts any number of simulated peers, each with its own peerstore and
//! its own [`Network`] facade. Nothing touches a socket: connections are [`MockConn`]
//! pairs whose streams are tokio duplex pipes.
//!
//! Two peers can only connect once they are linked, the way two hosts need a shared
//! medium:
//!
//! ```text
//!   gen_peer ──▶ link_peers(a, b) ──▶ connect_peers(a, b) ──▶ streams
//!                     │                      │
//!                     │                      └─ a.dial_peer(b): identify, notifications
//!                     └─ addresses exchanged, dialing allowed
//! ```

use crate::config::NetworkConfig;
use crate::conn::{Conn, MockConn};
use crate::error::{NetError, Result};
use crate::network::{Backend, Network};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use strand_core::peer::PERMANENT_ADDR_TTL;
use strand_core::{Multiaddr, PeerId, Peerstore, Scope};
use strand_crypto::{KeyType, PrivateKey, PublicKey};
use strand_transport::TransportError;

/// A simulated peer.
#[derive(Clone)]
struct MockPeer {
    net: Network,
    addr: Multiaddr,
    key: PublicKey,
}

struct MockNetInner {
    peers: RwLock<BTreeMap<PeerId, MockPeer>>,
    /// Link counts keyed by the ordered peer pair
    links: Mutex<HashMap<(PeerId, PeerId), usize>>,
    next_host: AtomicU32,
    config: NetworkConfig,
    scope: Scope,
}

/// A set of simulated peers wired together in memory.
#[derive(Clone)]
pub struct MockNet {
    inner: Arc<MockNetInner>,
}

fn link_key(a: &PeerId, b: &PeerId) -> (PeerId, PeerId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

impl MockNet {
    /// Create an empty mock network. Every peer uses `config`.
    #[must_use]
    pub fn new(config: NetworkConfig) -> Self {
        Self {
            inner: Arc::new(MockNetInner {
                peers: RwLock::new(BTreeMap::new()),
                links: Mutex::new(HashMap::new()),
                next_host: AtomicU32::new(1),
                config,
                scope: Scope::new("mocknet"),
            }),
        }
    }

    fn peers_read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<PeerId, MockPeer>> {
        self.inner.peers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn links(&self) -> MutexGuard<'_, HashMap<(PeerId, PeerId), usize>> {
        self.inner.links.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self, id: &PeerId) -> Result<MockPeer> {
        self.peers_read()
            .get(id)
            .cloned()
            .ok_or_else(|| unreachable(id, "peer is not part of this mock network"))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Peers
    // ═══════════════════════════════════════════════════════════════════════

    /// Add a peer with a fresh Ed25519 key and a unique `10.x.y.z/tcp/4001` address.
    ///
    /// # Errors
    ///
    /// See [`MockNet::add_peer`].
    pub async fn gen_peer(&self) -> Result<Network> {
        let (key, _, _) = strand_core::peer::generate(KeyType::Ed25519);
        let host = self.inner.next_host.fetch_add(1, Ordering::Relaxed);
        let [_, b, c, d] = host.to_be_bytes();
        let addr: Multiaddr = format!("/ip4/10.{b}.{c}.{d}/tcp/4001").parse()?;
        self.add_peer(key, addr).await
    }

    /// Add a peer with the given identity listening at `addr`.
    ///
    /// # Errors
    ///
    /// Fails if the key cannot be recorded in the new peerstore.
    pub async fn add_peer(&self, key: PrivateKey, addr: Multiaddr) -> Result<Network> {
        let public = key.public();
        let id = PeerId::from_public_key(&public);
        let backend = MockBackend {
            mocknet: Arc::downgrade(&self.inner),
            local: id.clone(),
            listen: RwLock::new(Vec::new()),
        };
        let scope = self.inner.scope.child(format!("mock peer {}", id.short()));
        let net = Network::with_backend(
            key,
            Arc::new(Peerstore::new()),
            self.inner.config.clone(),
            Box::new(backend),
            scope,
        )?;
        net.listen(std::slice::from_ref(&addr)).await?;
        net.peerstore().add_address(&id, &addr, PERMANENT_ADDR_TTL);

        self.inner
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), MockPeer {
                net: net.clone(),
                addr,
                key: public,
            });
        tracing::debug!(peer = %id.short(), "mock peer added");
        Ok(net)
    }

    /// Every peer id, sorted
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers_read().keys().cloned().collect()
    }

    /// The network of one peer
    #[must_use]
    pub fn net(&self, peer: &PeerId) -> Option<Network> {
        self.peers_read().get(peer).map(|p| p.net.clone())
    }

    /// Every peer's network, in peer id order
    #[must_use]
    pub fn nets(&self) -> Vec<Network> {
        self.peers_read().values().map(|p| p.net.clone()).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Links
    // ═══════════════════════════════════════════════════════════════════════

    /// Link two peers, allowing them to dial each other. Each learns the other's
    /// address.
    ///
    /// # Errors
    ///
    /// Fails if either peer is not part of this mock network.
    pub fn link_peers(&self, a: &PeerId, b: &PeerId) -> Result<()> {
        let pa = self.peer(a)?;
        let pb = self.peer(b)?;
        *self.links().entry(link_key(a, b)).or_insert(0) += 1;
        pa.net.peerstore().add_address(b, &pb.addr, PERMANENT_ADDR_TTL);
        pb.net.peerstore().add_address(a, &pa.addr, PERMANENT_ADDR_TTL);
        Ok(())
    }

    /// Remove every link between two peers. Existing connections stay up.
    ///
    /// # Errors
    ///
    /// Fails if the peers were not linked.
    pub fn unlink_peers(&self, a: &PeerId, b: &PeerId) -> Result<()> {
        if self.links().remove(&link_key(a, b)).is_none() {
            return Err(unreachable(b, "peers are not linked"));
        }
        Ok(())
    }

    /// Link every pair of distinct peers.
    ///
    /// # Errors
    ///
    /// See [`MockNet::link_peers`].
    pub fn link_all(&self) -> Result<()> {
        let peers = self.peers();
        for (i, a) in peers.iter().enumerate() {
            for b in &peers[i + 1..] {
                self.link_peers(a, b)?;
            }
        }
        Ok(())
    }

    /// Number of links between two peers.
    #[must_use]
    pub fn links_between(&self, a: &PeerId, b: &PeerId) -> usize {
        self.links().get(&link_key(a, b)).copied().unwrap_or(0)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Connections
    // ═══════════════════════════════════════════════════════════════════════

    /// Have `a` dial `b`.
    ///
    /// # Errors
    ///
    /// Dial errors, including `Unreachable` when the peers are not linked.
    pub async fn connect_peers(&self, a: &PeerId, b: &PeerId) -> Result<Arc<dyn Conn>> {
        let net = self.peer(a)?.net;
        net.dial_peer(b).await
    }

    /// Close every connection between `a` and `b`.
    ///
    /// # Errors
    ///
    /// Returns the connection group's teardown error, if any.
    pub async fn disconnect_peers(&self, a: &PeerId, b: &PeerId) -> Result<()> {
        let net = self.peer(a)?.net;
        net.close_peer(b).await
    }

    /// Connect every peer to every other peer.
    ///
    /// # Errors
    ///
    /// Stops at the first failed dial.
    pub async fn connect_all_but_self(&self) -> Result<()> {
        let peers = self.peers();
        for (i, a) in peers.iter().enumerate() {
            for b in &peers[i + 1..] {
                self.connect_peers(a, b).await?;
            }
        }
        Ok(())
    }

    /// Close every peer's network.
    ///
    /// # Errors
    ///
    /// Returns the mock network scope's teardown error, if any.
    pub async fn close(&self) -> Result<()> {
        self.inner.scope.close().await.map_err(NetError::from)
    }
}

impl std::fmt::Debug for MockNet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockNet")
            .field("peers", &self.peers_read().len())
            .field("links", &self.links().len())
            .finish()
    }
}

fn unreachable(peer: &PeerId, reason: &str) -> NetError {
    TransportError::Unreachable {
        addr: Multiaddr::empty(),
        reason: io::Error::new(io::ErrorKind::NotConnected, format!("{}: {reason}", peer.short())),
    }
    .into()
}

/// Backend that wires connections through a [`MockNet`].
struct MockBackend {
    mocknet: Weak<MockNetInner>,
    local: PeerId,
    listen: RwLock<Vec<Multiaddr>>,
}

#[async_trait]
impl Backend for MockBackend {
    async fn listen(&self, _net: &Network, addr: &Multiaddr) -> Result<Multiaddr> {
        self.listen
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(addr.clone());
        Ok(addr.clone())
    }

    async fn dial(&self, net: &Network, peer: &PeerId, addr: &Multiaddr) -> Result<Arc<dyn Conn>> {
        let inner = self.mocknet.upgrade().ok_or(NetError::Cancelled)?;
        let mocknet = MockNet { inner };
        let remote = mocknet.peer(peer)?;
        if mocknet.links_between(&self.local, peer) == 0 {
            return Err(unreachable(peer, "no link"));
        }
        if &remote.addr != addr {
            return Err(TransportError::Unreachable {
                addr: addr.clone(),
                reason: io::Error::new(io::ErrorKind::ConnectionRefused, "nobody listens there"),
            }
            .into());
        }
        let local_addr = self
            .listen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .first()
            .cloned()
            .unwrap_or_else(Multiaddr::empty);
        let local_key = net.inner.key.public();

        let (local_end, remote_end) = MockConn::pair(
            (&self.local, &local_key, &local_addr, net.scope()),
            (peer, &remote.key, &remote.addr, remote.net.scope()),
        );
        remote.net.add_conn(remote_end);
        Ok(local_end)
    }

    fn listen_addresses(&self) -> Vec<Multiaddr> {
        self.listen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn interface_listen_addresses(&self) -> Result<Vec<Multiaddr>> {
        Ok(self.listen_addresses())
    }
}
