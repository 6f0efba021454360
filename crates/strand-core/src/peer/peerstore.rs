//! Thread-safe directory of known peers.
//!
//! Each peer record holds keys, a TTL-tagged address book and a free-form attribute bag.
//! Records live in a [`DashMap`]; every operation on one peer runs under that peer's
//! shard lock, so concurrent `add`/`set` calls on the same address are linearized and the
//! last writer wins.

use super::PeerId;
use crate::error::PeerstoreError;
use crate::multiaddr::Multiaddr;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use strand_crypto::{PrivateKey, PublicKey};

/// Addresses we are unsure about, e.g. relayed hints.
pub const TEMP_ADDR_TTL: Duration = Duration::from_secs(10);

/// Addresses learned from a content provider record.
pub const PROVIDER_ADDR_TTL: Duration = Duration::from_secs(10 * 60);

/// Addresses of a peer we were connected to a short while ago.
pub const RECENTLY_CONNECTED_ADDR_TTL: Duration = Duration::from_secs(10 * 60);

/// Our own addresses as reported by remote peers.
pub const OWN_OBSERVED_ADDR_TTL: Duration = Duration::from_secs(10 * 60);

/// Addresses that never expire.
pub const PERMANENT_ADDR_TTL: Duration = Duration::MAX;

/// Addresses of currently connected peers. Long enough to never expire in practice while
/// still losing to [`PERMANENT_ADDR_TTL`].
pub const CONNECTED_ADDR_TTL: Duration = Duration::from_secs(u64::MAX - 1);

/// Attribute key for the remote's protocol version.
pub const PROTOCOL_VERSION_KEY: &str = "ProtocolVersion";

/// Attribute key for the remote's agent string.
pub const AGENT_VERSION_KEY: &str = "AgentVersion";

/// Attribute key for the protocols a peer supports.
pub const PROTOCOLS_KEY: &str = "Protocols";

/// When an address entry stops being valid. TTLs too large for an `Instant` collapse to
/// `Forever`; the rank keeps permanent entries above connected ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Expiry {
    At(Instant),
    Forever(u8),
}

impl Expiry {
    fn from_ttl(ttl: Duration) -> Self {
        if ttl == PERMANENT_ADDR_TTL {
            return Self::Forever(1);
        }
        match Instant::now().checked_add(ttl) {
            Some(at) => Self::At(at),
            None => Self::Forever(0),
        }
    }

    fn is_expired(self, now: Instant) -> bool {
        matches!(self, Self::At(at) if at <= now)
    }
}

#[derive(Default)]
struct PeerRecord {
    public_key: Option<PublicKey>,
    private_key: Option<PrivateKey>,
    addrs: HashMap<Multiaddr, Expiry>,
    attrs: HashMap<String, Value>,
}

/// A peer id and its currently valid addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer id
    pub id: PeerId,
    /// Known addresses
    pub addrs: Vec<Multiaddr>,
}

/// In-memory peer directory shared by every subsystem of a node.
#[derive(Default)]
pub struct Peerstore {
    peers: DashMap<PeerId, PeerRecord>,
}

impl Peerstore {
    /// Create an empty peerstore.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Address book
    // ═══════════════════════════════════════════════════════════════════════

    /// Add one address. See [`Peerstore::add_addresses`].
    pub fn add_address(&self, peer: &PeerId, addr: &Multiaddr, ttl: Duration) {
        self.add_addresses(peer, std::slice::from_ref(addr), ttl);
    }

    /// Union `addrs` into the peer's address set.
    ///
    /// An address that is already present only has its TTL extended, never shortened.
    /// A zero TTL is a no-op.
    pub fn add_addresses(&self, peer: &PeerId, addrs: &[Multiaddr], ttl: Duration) {
        if ttl.is_zero() || addrs.is_empty() {
            return;
        }
        let expiry = Expiry::from_ttl(ttl);
        let mut record = self.peers.entry(peer.clone()).or_default();
        for addr in addrs {
            record
                .addrs
                .entry(addr.clone())
                .and_modify(|current| *current = (*current).max(expiry))
                .or_insert(expiry);
        }
    }

    /// Set the TTL of exactly these addresses, replacing any previous TTL.
    ///
    /// A zero TTL removes them.
    pub fn set_addresses(&self, peer: &PeerId, addrs: &[Multiaddr], ttl: Duration) {
        if ttl.is_zero() {
            if let Some(mut record) = self.peers.get_mut(peer) {
                for addr in addrs {
                    record.addrs.remove(addr);
                }
            }
            return;
        }
        let expiry = Expiry::from_ttl(ttl);
        let mut record = self.peers.entry(peer.clone()).or_default();
        for addr in addrs {
            record.addrs.insert(addr.clone(), expiry);
        }
    }

    /// Drop every address of a peer.
    pub fn clear_addresses(&self, peer: &PeerId) {
        if let Some(mut record) = self.peers.get_mut(peer) {
            record.addrs.clear();
        }
    }

    /// Currently valid addresses, sorted. Expired entries are evicted on the way.
    #[must_use]
    pub fn addresses(&self, peer: &PeerId) -> Vec<Multiaddr> {
        let Some(mut record) = self.peers.get_mut(peer) else {
            return Vec::new();
        };
        let now = Instant::now();
        record.addrs.retain(|_, expiry| !expiry.is_expired(now));
        let mut out: Vec<Multiaddr> = record.addrs.keys().cloned().collect();
        out.sort();
        out
    }

    /// Id and addresses of a peer.
    #[must_use]
    pub fn peer_info(&self, peer: &PeerId) -> PeerInfo {
        PeerInfo {
            id: peer.clone(),
            addrs: self.addresses(peer),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Keys
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a peer's public key.
    ///
    /// # Errors
    ///
    /// [`PeerstoreError::IdentityMismatch`] if the key does not hash to `peer`.
    pub fn add_pubkey(&self, peer: &PeerId, key: PublicKey) -> Result<(), PeerstoreError> {
        if !peer.matches_public_key(&key) {
            return Err(PeerstoreError::IdentityMismatch {
                peer: peer.to_string(),
            });
        }
        self.peers.entry(peer.clone()).or_default().public_key = Some(key);
        Ok(())
    }

    /// Record the local peer's private key. The public key is stored alongside it.
    ///
    /// # Errors
    ///
    /// [`PeerstoreError::IdentityMismatch`] if the derived public key does not hash to
    /// `peer`.
    pub fn add_privkey(&self, peer: &PeerId, key: PrivateKey) -> Result<(), PeerstoreError> {
        let public = key.public();
        if !peer.matches_public_key(&public) {
            return Err(PeerstoreError::IdentityMismatch {
                peer: peer.to_string(),
            });
        }
        let mut record = self.peers.entry(peer.clone()).or_default();
        record.public_key = Some(public);
        record.private_key = Some(key);
        Ok(())
    }

    /// A peer's public key, if known.
    #[must_use]
    pub fn pubkey(&self, peer: &PeerId) -> Option<PublicKey> {
        self.peers.get(peer).and_then(|r| r.public_key)
    }

    /// A peer's private key. Only ever set for the local peer.
    #[must_use]
    pub fn privkey(&self, peer: &PeerId) -> Option<PrivateKey> {
        self.peers.get(peer).and_then(|r| r.private_key.clone())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Attributes
    // ═══════════════════════════════════════════════════════════════════════

    /// Store an attribute, replacing any previous value.
    pub fn put(&self, peer: &PeerId, key: &str, value: impl Into<Value>) {
        self.peers
            .entry(peer.clone())
            .or_default()
            .attrs
            .insert(key.to_string(), value.into());
    }

    /// Read an attribute.
    #[must_use]
    pub fn get(&self, peer: &PeerId, key: &str) -> Option<Value> {
        self.peers.get(peer).and_then(|r| r.attrs.get(key).cloned())
    }

    /// Record the protocols a peer supports.
    pub fn set_protocols(&self, peer: &PeerId, protocols: &[String]) {
        self.put(peer, PROTOCOLS_KEY, protocols.to_vec());
    }

    /// Protocols a peer was last seen supporting.
    #[must_use]
    pub fn protocols(&self, peer: &PeerId) -> Vec<String> {
        self.get(peer, PROTOCOLS_KEY)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Enumeration
    // ═══════════════════════════════════════════════════════════════════════

    /// Every peer with a record.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        self.peers.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Every peer that currently has at least one valid address.
    #[must_use]
    pub fn peers_with_addrs(&self) -> Vec<PeerId> {
        self.peers()
            .into_iter()
            .filter(|p| !self.addresses(p).is_empty())
            .collect()
    }
}

impl std::fmt::Debug for Peerstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Peerstore")
            .field("peers", &self.peers.len())
            .finish()
    }
}
