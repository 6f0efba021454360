//! Property-based tests for Strand
//!
//! Uses proptest to verify invariants across large input spaces.

use proptest::prelude::*;
use std::net::{Ipv4Addr, Ipv6Addr};
use strand_core::{Component, Multiaddr, PeerId};
use strand_crypto::PrivateKey;

fn peer_from_seed(seed: [u8; 32]) -> PeerId {
    PeerId::from_public_key(&PrivateKey::from_seed(&seed).public())
}

fn component() -> impl Strategy<Value = Component> {
    prop_oneof![
        any::<u32>().prop_map(|ip| Component::Ip4(Ipv4Addr::from(ip))),
        any::<u128>().prop_map(|ip| Component::Ip6(Ipv6Addr::from(ip))),
        any::<u16>().prop_map(Component::Tcp),
        any::<u16>().prop_map(Component::Udp),
        any::<u16>().prop_map(Component::Dccp),
        any::<u16>().prop_map(Component::Sctp),
        Just(Component::Udt),
        Just(Component::Utp),
        Just(Component::Http),
        Just(Component::Https),
        any::<[u8; 32]>().prop_map(|seed| Component::Ipfs(peer_from_seed(seed).as_multihash().clone())),
    ]
}

fn multiaddr(max: usize) -> impl Strategy<Value = Multiaddr> {
    prop::collection::vec(component(), 0..max).prop_map(Multiaddr::from_components)
}

// ============================================================================
// Multiaddr Properties
// ============================================================================

mod multiaddr_properties {
    use super::*;

    proptest! {
        /// Binary form decodes back to the same address
        #[test]
        fn bytes_roundtrip(addr in multiaddr(6)) {
            let bytes = addr.to_bytes();
            prop_assert_eq!(Multiaddr::from_bytes(&bytes).unwrap(), addr);
        }

        /// Text form parses back to the same address and the same bytes
        #[test]
        fn string_roundtrip(addr in multiaddr(6).prop_filter("non-empty", |a| !a.is_empty())) {
            let text = addr.to_string();
            let parsed: Multiaddr = text.parse().unwrap();
            prop_assert_eq!(parsed.to_bytes(), addr.to_bytes());
            prop_assert_eq!(parsed.to_string(), text);
        }

        /// Equal addresses have identical encodings
        #[test]
        fn equality_matches_bytes(a in multiaddr(4), b in multiaddr(4)) {
            prop_assert_eq!(a == b, a.to_bytes() == b.to_bytes());
        }

        /// Decapsulating what was just encapsulated restores the original
        #[test]
        fn encapsulate_decapsulate(
            a in multiaddr(5),
            b in multiaddr(4).prop_filter("non-empty", |b| !b.is_empty()),
        ) {
            let joined = a.encapsulate(&b);
            prop_assert_eq!(joined.len(), a.len() + b.len());
            prop_assert_eq!(joined.decapsulate(&b).unwrap(), a);
        }

        /// Encapsulation is byte concatenation
        #[test]
        fn encapsulate_concatenates_bytes(a in multiaddr(4), b in multiaddr(4)) {
            let mut expected = a.to_bytes();
            expected.extend_from_slice(&b.to_bytes());
            prop_assert_eq!(a.encapsulate(&b).to_bytes(), expected);
        }

        /// Thin-waist depends only on the first two components
        #[test]
        fn thin_waist_prefix(
            ip in any::<u32>(),
            port in any::<u16>(),
            udp in any::<bool>(),
            rest in multiaddr(3),
        ) {
            let transport = if udp { Component::Udp(port) } else { Component::Tcp(port) };
            let head = Multiaddr::from_components(vec![Component::Ip4(Ipv4Addr::from(ip)), transport]);
            prop_assert!(head.is_thin_waist());
            prop_assert!(head.encapsulate(&rest).is_thin_waist());

            let headless = Multiaddr::from_components(vec![Component::Tcp(port)]).encapsulate(&rest);
            prop_assert!(!headless.is_thin_waist());
        }

        /// Arbitrary bytes never panic the decoder
        #[test]
        fn decode_arbitrary_bytes(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
            if let Ok(addr) = Multiaddr::from_bytes(&bytes) {
                prop_assert_eq!(addr.to_bytes(), bytes);
            }
        }
    }

    #[test]
    fn thin_waist_examples() {
        let yes = ["/ip4/1.2.3.4/tcp/1", "/ip6/::1/udp/2", "/ip4/1.2.3.4/tcp/1/ip4/5.6.7.8"];
        let no = ["/tcp/1", "/ip4/1.2.3.4", "/ip4/1.2.3.4/ip4/5.6.7.8", "/ip4/1.2.3.4/sctp/1"];
        for text in yes {
            assert!(text.parse::<Multiaddr>().unwrap().is_thin_waist(), "{text}");
        }
        for text in no {
            assert!(!text.parse::<Multiaddr>().unwrap().is_thin_waist(), "{text}");
        }
    }
}

// ============================================================================
// Peer Identity Properties
// ============================================================================

mod identity_properties {
    use super::*;
    use strand_core::Peerstore;

    proptest! {
        /// The id derived from a key never changes and round-trips through base58
        #[test]
        fn peer_id_stable(seed in any::<[u8; 32]>()) {
            let key = PrivateKey::from_seed(&seed).public();
            let a = PeerId::from_public_key(&key);
            let b = strand_core::peer::peer_id_from_public_key(&key);
            prop_assert_eq!(&a, &b);
            prop_assert!(a.matches_public_key(&key));
            prop_assert_eq!(PeerId::from_base58(&a.to_base58()).unwrap(), a.clone());
            prop_assert_eq!(PeerId::from_bytes(a.as_bytes()).unwrap(), a);
        }

        /// A key can only be stored under the id it certifies
        #[test]
        fn pubkey_bound_to_id(seed_a in any::<[u8; 32]>(), seed_b in any::<[u8; 32]>()) {
            prop_assume!(seed_a != seed_b);
            let key_a = PrivateKey::from_seed(&seed_a).public();
            let id_a = PeerId::from_public_key(&key_a);
            let id_b = peer_from_seed(seed_b);

            let ps = Peerstore::new();
            prop_assert!(ps.add_pubkey(&id_b, key_a.clone()).is_err());
            prop_assert!(ps.add_pubkey(&id_a, key_a).is_ok());
            prop_assert!(ps.pubkey(&id_b).is_none());
            prop_assert!(ps.pubkey(&id_a).is_some());
        }
    }
}

// ============================================================================
// Peerstore TTL Properties
// ============================================================================

mod peerstore_properties {
    use super::*;
    use std::collections::BTreeSet;
    use std::time::Duration;
    use strand_core::Peerstore;
    use strand_core::peer::PERMANENT_ADDR_TTL;

    fn tcp_addrs(max: usize) -> impl Strategy<Value = Vec<Multiaddr>> {
        prop::collection::btree_set((any::<u32>(), any::<u16>()), 1..max).prop_map(|set| {
            set.into_iter()
                .map(|(ip, port)| {
                    Multiaddr::from_components(vec![
                        Component::Ip4(Ipv4Addr::from(ip)),
                        Component::Tcp(port),
                    ])
                })
                .collect()
        })
    }

    proptest! {
        /// A zero TTL removes exactly the listed addresses
        #[test]
        fn set_zero_ttl_removes_listed(
            seed in any::<[u8; 32]>(),
            addrs in tcp_addrs(8),
            split in any::<prop::sample::Index>(),
        ) {
            let peer = peer_from_seed(seed);
            let ps = Peerstore::new();
            ps.add_addresses(&peer, &addrs, PERMANENT_ADDR_TTL);

            let cut = split.index(addrs.len());
            let (gone, kept) = addrs.split_at(cut);
            ps.set_addresses(&peer, gone, Duration::ZERO);

            let left: BTreeSet<_> = ps.addresses(&peer).into_iter().collect();
            let expected: BTreeSet<_> = kept.iter().cloned().collect();
            prop_assert_eq!(left, expected);
        }

        /// Adding never shortens an address's lifetime
        #[test]
        fn add_only_extends(seed in any::<[u8; 32]>(), addrs in tcp_addrs(6)) {
            let peer = peer_from_seed(seed);
            let ps = Peerstore::new();
            ps.add_addresses(&peer, &addrs, PERMANENT_ADDR_TTL);
            ps.add_addresses(&peer, &addrs, Duration::from_nanos(1));
            std::thread::sleep(Duration::from_millis(1));

            let mut expected = addrs.clone();
            expected.sort();
            prop_assert_eq!(ps.addresses(&peer), expected);
        }
    }

    #[test]
    fn added_address_expires() {
        let peer = peer_from_seed([7; 32]);
        let addr: Multiaddr = "/ip4/10.0.0.1/tcp/4001".parse().unwrap();
        let ps = Peerstore::new();
        ps.add_address(&peer, &addr, Duration::from_millis(20));
        assert_eq!(ps.addresses(&peer), vec![addr.clone()]);

        std::thread::sleep(Duration::from_millis(40));
        assert!(ps.addresses(&peer).is_empty());
    }

    #[test]
    fn set_replaces_ttl() {
        let peer = peer_from_seed([9; 32]);
        let addr: Multiaddr = "/ip4/10.0.0.2/tcp/4001".parse().unwrap();
        let ps = Peerstore::new();
        ps.add_address(&peer, &addr, PERMANENT_ADDR_TTL);
        ps.set_addresses(&peer, std::slice::from_ref(&addr), Duration::from_millis(20));

        std::thread::sleep(Duration::from_millis(40));
        assert!(ps.addresses(&peer).is_empty());
    }
}

// ============================================================================
// Scope Properties
// ============================================================================

mod scope_properties {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use strand_core::{Scope, ScopeError};

    #[tokio::test]
    async fn close_is_idempotent() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let scope = Scope::with_teardown("root", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ScopeError::new("boom"))
        });

        let first = scope.close().await;
        for _ in 0..5 {
            assert_eq!(scope.close().await, first);
        }
        assert!(first.is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn children_close_before_parent() {
        let parent = Scope::new("parent");
        let children: Vec<Scope> = (0..4).map(|i| parent.child(format!("child {i}"))).collect();
        let grandchild = children[0].child("grandchild");

        let parent_closed = parent.closed();
        let observed = Arc::new(AtomicUsize::new(0));
        for child in &children {
            let closing = child.closing();
            let seen = Arc::clone(&observed);
            child.spawn(move |_| async move {
                closing.wait().await;
                seen.fetch_add(1, Ordering::SeqCst);
            });
        }

        parent.close().await.unwrap();
        assert!(parent_closed.is_fired());
        assert!(grandchild.is_closed());
        for child in &children {
            assert!(child.is_closed());
        }
        assert_eq!(observed.load(Ordering::SeqCst), children.len());
    }
}
