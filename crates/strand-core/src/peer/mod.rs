//! Peer identity and the peerstore.

mod id;
mod peerstore;

pub use id::PeerId;
pub use peerstore::{
    AGENT_VERSION_KEY, CONNECTED_ADDR_TTL, OWN_OBSERVED_ADDR_TTL, PERMANENT_ADDR_TTL,
    PROTOCOL_VERSION_KEY, PROTOCOLS_KEY, PROVIDER_ADDR_TTL, PeerInfo, Peerstore,
    RECENTLY_CONNECTED_ADDR_TTL, TEMP_ADDR_TTL,
};

use strand_crypto::{KeyType, PrivateKey, PublicKey};

/// Generate a key pair and the peer id it certifies.
#[must_use]
pub fn generate(key_type: KeyType) -> (PrivateKey, PublicKey, PeerId) {
    let (private, public) = strand_crypto::generate_keypair(key_type);
    let id = PeerId::from_public_key(&public);
    (private, public, id)
}

/// Derive the id certified by a public key.
#[must_use]
pub fn peer_id_from_public_key(key: &PublicKey) -> PeerId {
    PeerId::from_public_key(key)
}
