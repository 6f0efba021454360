//! Loopback nodes
//!
//! ```no_run
//! use strand_integration_tests::fixtures::{close_all, link, loopback_node};
//!
//! # async fn demo() {
//! let a = loopback_node().await;
//! let b = loopback_node().await;
//! link(&a, &b).await;
//! // ... exercise a and b ...
//! close_all(&[a, b]).await;
//! # }
//! ```

use std::sync::Arc;
use strand_core::Peerstore;
use strand_core::peer::TEMP_ADDR_TTL;
use strand_crypto::KeyType;
use strand_net::{Network, NetworkConfig, Stream, StreamHandler, handler_fn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// A node with its own key and peerstore, started with `config`.
///
/// # Panics
///
/// Panics if the network fails to start.
pub async fn node_with_config(config: NetworkConfig) -> Network {
    let (key, _, _) = strand_core::peer::generate(KeyType::Ed25519);
    Network::new(key, Arc::new(Peerstore::new()), config)
        .await
        .expect("network should start")
}

/// A node listening on an ephemeral loopback port.
///
/// # Panics
///
/// Panics if the network fails to start.
pub async fn loopback_node() -> Network {
    node_with_config(NetworkConfig {
        listen_addrs: vec!["/ip4/127.0.0.1/tcp/0".parse().expect("valid multiaddr")],
        ..NetworkConfig::default()
    })
    .await
}

/// Teach `from` where `to` listens and dial it.
///
/// # Panics
///
/// Panics if the dial fails.
pub async fn link(from: &Network, to: &Network) {
    from.peerstore()
        .add_addresses(to.local_peer(), &to.listen_addresses(), TEMP_ADDR_TTL);
    from.dial_peer(to.local_peer())
        .await
        .expect("dial should succeed");
}

/// Echo every chunk back until the remote half-closes.
pub fn echo_handler() -> StreamHandler {
    handler_fn(|mut s: Stream| async move {
        let mut buf = [0u8; 4096];
        loop {
            match s.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if s.write_all(&buf[..n]).await.is_err() {
                        return;
                    }
                }
            }
        }
        let _ = s.shutdown().await;
    })
}

/// Close every node, failing loudly if a close fails.
///
/// # Panics
///
/// Panics if any close returns an error.
pub async fn close_all(nets: &[Network]) {
    for net in nets {
        net.close().await.expect("close should succeed");
    }
}
