//! Identify service.
//!
//! Runs on every new connection, in both directions. The side that opens the
//! `/ipfs/identify` stream reads one record describing the remote:
//!
//! ```text
//! 2: listen_addrs     (repeated, binary multiaddr)
//! 3: protocols        (repeated string)
//! 4: observed_addr    (binary multiaddr the remote sees us at)
//! 5: protocol_version (string)
//! 6: agent_version    (string)
//! ```
//!
//! The record is varint-delimited. Listen addresses, versions and protocols go into the
//! peerstore under the remote peer; the observed address becomes a candidate address of
//! the local peer for [`OWN_OBSERVED_ADDR_TTL`], refreshed each time it is seen again.

use crate::config::PROTOCOL_VERSION;
use crate::conn::{Conn, ConnId, Stream};
use crate::error::{NetError, Result};
use crate::network::{Network, WeakNetwork, fired_signal};
use crate::protocol::{self, StreamHandler, handler_fn};
use crate::wire;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use strand_core::peer::{
    AGENT_VERSION_KEY, CONNECTED_ADDR_TTL, OWN_OBSERVED_ADDR_TTL, PROTOCOL_VERSION_KEY,
};
use strand_core::record::{RecordReader, RecordWriter};
use strand_core::{Multiaddr, ParseError, Signal, Trigger};
use strand_transport::addr::check_nat_warning;
use tokio::io::AsyncWriteExt;

/// Protocol tag of the identify stream.
pub const IDENTIFY_PROTOCOL: &str = "/ipfs/identify";

const MAX_IDENTIFY_MESSAGE: usize = 64 * 1024;

/// What a peer says about itself (and about how it sees us).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentifyMessage {
    /// Wire protocol version
    pub protocol_version: String,
    /// Implementation name
    pub agent_version: String,
    /// Addresses the peer listens on
    pub listen_addrs: Vec<Multiaddr>,
    /// Address the peer sees the connection coming from
    pub observed_addr: Option<Multiaddr>,
    /// Protocol tags the peer handles
    pub protocols: Vec<String>,
}

impl IdentifyMessage {
    /// Record encoding.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut w = RecordWriter::new()
            .repeated(2, self.listen_addrs.iter().map(Multiaddr::to_bytes))
            .repeated(3, self.protocols.iter().map(String::as_bytes));
        if let Some(observed) = &self.observed_addr {
            w = w.bytes(4, &observed.to_bytes());
        }
        w.string(5, &self.protocol_version)
            .string(6, &self.agent_version)
            .finish()
    }

    /// Decode a record. Unknown fields are skipped, and so are listen addresses that do
    /// not parse.
    ///
    /// # Errors
    ///
    /// Fails on a malformed record or a malformed observed address.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, ParseError> {
        let mut msg = Self::default();
        for field in RecordReader::new(bytes) {
            match field? {
                (2, value) => match Multiaddr::from_bytes(value.as_bytes()?) {
                    Ok(addr) => msg.listen_addrs.push(addr),
                    Err(e) => tracing::debug!(error = %e, "skipping bad listen address"),
                },
                (3, value) => msg.protocols.push(value.as_str()?.to_string()),
                (4, value) => msg.observed_addr = Some(Multiaddr::from_bytes(value.as_bytes()?)?),
                (5, value) => msg.protocol_version = value.as_str()?.to_string(),
                (6, value) => msg.agent_version = value.as_str()?.to_string(),
                _ => {}
            }
        }
        Ok(msg)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-network identify state.
pub(crate) struct IdentifyService {
    /// One completion trigger per connection identify has started on
    runs: Mutex<HashMap<ConnId, Arc<Trigger>>>,
    /// Observed own addresses and when they stop being valid
    observed: Mutex<HashMap<Multiaddr, Instant>>,
    timeout: Duration,
}

impl IdentifyService {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            runs: Mutex::new(HashMap::new()),
            observed: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Start identify on `conn` unless it already started. Returns the completion
    /// signal, which also fires if the run fails or the connection closes.
    pub(crate) fn start(&self, net: &Network, conn: &Arc<dyn Conn>) -> Signal {
        if conn.is_closed() {
            return fired_signal();
        }
        let trigger = match lock(&self.runs).entry(conn.id()) {
            Entry::Occupied(e) => return e.get().signal(),
            Entry::Vacant(v) => Arc::clone(v.insert(Arc::new(Trigger::new()))),
        };
        let done = trigger.signal();

        let weak = net.downgrade();
        let conn = Arc::clone(conn);
        let timeout = self.timeout;
        let owner = conn.scope().clone();
        owner.spawn(move |scope| async move {
            let closing = scope.closing();
            let outcome = tokio::select! {
                res = tokio::time::timeout(timeout, identify_conn(&weak, &conn)) => {
                    res.unwrap_or(Err(NetError::timeout("identify")))
                }
                () = closing.wait() => Err(NetError::Cancelled),
            };
            match outcome {
                Ok(msg) => tracing::debug!(
                    conn = %conn.id(),
                    peer = %conn.remote_peer().short(),
                    agent = %msg.agent_version,
                    addrs = msg.listen_addrs.len(),
                    "identified peer"
                ),
                Err(e) => tracing::debug!(
                    conn = %conn.id(),
                    peer = %conn.remote_peer().short(),
                    error = %e,
                    "identify failed"
                ),
            }
            trigger.fire();
        });
        done
    }

    /// Drop the state of a closed connection, releasing any waiters.
    pub(crate) fn forget(&self, conn: ConnId) {
        if let Some(trigger) = lock(&self.runs).remove(&conn) {
            trigger.fire();
        }
    }

    /// Record that a peer saw us at `observed`.
    fn observe(&self, observed: Multiaddr) {
        lock(&self.observed).insert(observed, Instant::now() + OWN_OBSERVED_ADDR_TTL);
    }

    /// Observed addresses that have not expired, sorted.
    pub(crate) fn own_observed_addrs(&self) -> Vec<Multiaddr> {
        let now = Instant::now();
        let mut observed = lock(&self.observed);
        observed.retain(|_, until| *until > now);
        let mut out: Vec<Multiaddr> = observed.keys().cloned().collect();
        out.sort();
        out
    }
}

/// Open an identify stream on `conn`, read the remote's message and record it.
async fn identify_conn(net: &WeakNetwork, conn: &Arc<dyn Conn>) -> Result<IdentifyMessage> {
    let io = conn.new_stream().await?;
    let mut stream = Stream::new(io, Arc::clone(conn));
    protocol::write_header(&mut stream, Some(IDENTIFY_PROTOCOL)).await?;
    let bytes = wire::read_delimited(&mut stream, MAX_IDENTIFY_MESSAGE).await?;
    let msg = IdentifyMessage::decode(&bytes)?;

    let net = net.upgrade().ok_or(NetError::Cancelled)?;
    consume(&net, conn, &msg);
    Ok(msg)
}

fn consume(net: &Network, conn: &Arc<dyn Conn>, msg: &IdentifyMessage) {
    let ps = net.peerstore();
    let remote = conn.remote_peer();
    ps.add_addresses(remote, &msg.listen_addrs, CONNECTED_ADDR_TTL);
    ps.put(remote, PROTOCOL_VERSION_KEY, msg.protocol_version.clone());
    ps.put(remote, AGENT_VERSION_KEY, msg.agent_version.clone());
    ps.set_protocols(remote, &msg.protocols);

    if let Some(observed) = &msg.observed_addr {
        let listen = net.interface_listen_addresses().unwrap_or_default();
        check_nat_warning(observed, conn.local_multiaddr(), &listen);
        net.inner.identify.observe(observed.clone());
        ps.add_address(net.local_peer(), observed, OWN_OBSERVED_ADDR_TTL);
    }
}

/// Our identify message for the remote end of `conn`.
fn local_message(net: &Network, conn: &Arc<dyn Conn>) -> IdentifyMessage {
    IdentifyMessage {
        protocol_version: PROTOCOL_VERSION.to_string(),
        agent_version: net.config().agent_version.clone(),
        listen_addrs: net.interface_listen_addresses().unwrap_or_default(),
        observed_addr: Some(conn.remote_multiaddr().clone()),
        protocols: net.protocols(),
    }
}

/// Responder registered under [`IDENTIFY_PROTOCOL`].
pub(crate) fn handler(net: WeakNetwork) -> StreamHandler {
    handler_fn(move |mut stream: Stream| {
        let net = net.clone();
        async move {
            let Some(net) = net.upgrade() else { return };
            let msg = local_message(&net, stream.conn());
            if let Err(e) = wire::write_delimited(&mut stream, &msg.encode()).await {
                tracing::debug!(peer = %stream.remote_peer().short(), error = %e, "identify response failed");
                return;
            }
            let _ = stream.shutdown().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_message_roundtrip() {
        let msg = IdentifyMessage {
            protocol_version: "0.1.0".into(),
            agent_version: "strand/test".into(),
            listen_addrs: vec![ma("/ip4/127.0.0.1/tcp/4001"), ma("/ip6/::1/tcp/4001")],
            observed_addr: Some(ma("/ip4/1.2.3.4/tcp/55555")),
            protocols: vec!["/ipfs/identify".into(), "/ipfs/relay".into()],
        };
        assert_eq!(IdentifyMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn test_decode_skips_unknown_fields_and_bad_addrs() {
        let bytes = RecordWriter::new()
            .bytes(1, b"ignored public key")
            .bytes(2, &[0xff, 0xff])
            .bytes(2, &ma("/ip4/10.0.0.1/tcp/1").to_bytes())
            .string(6, "agent")
            .finish();
        let msg = IdentifyMessage::decode(&bytes).unwrap();
        assert_eq!(msg.listen_addrs, vec![ma("/ip4/10.0.0.1/tcp/1")]);
        assert_eq!(msg.agent_version, "agent");
        assert!(msg.observed_addr.is_none());
    }

    #[test]
    fn test_decode_rejects_bad_observed_addr() {
        let bytes = RecordWriter::new().bytes(4, &[0xff, 0xff]).finish();
        assert!(IdentifyMessage::decode(&bytes).is_err());
    }

    #[test]
    fn test_observed_addrs_expire() {
        let service = IdentifyService::new(Duration::from_secs(1));
        service.observe(ma("/ip4/1.2.3.4/tcp/1"));
        assert_eq!(service.own_observed_addrs(), vec![ma("/ip4/1.2.3.4/tcp/1")]);

        lock(&service.observed).insert(ma("/ip4/5.6.7.8/tcp/1"), Instant::now());
        assert_eq!(service.own_observed_addrs(), vec![ma("/ip4/1.2.3.4/tcp/1")]);
    }
}
