//! Network configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strand_core::Multiaddr;
use strand_transport::TransportConfig;

/// Protocol version spoken by this build. Peers must share the major component.
pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Default agent string: `strand/<crate version>`.
#[must_use]
pub fn default_agent_version() -> String {
    format!("strand/{}", env!("CARGO_PKG_VERSION"))
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Addresses to listen on. Wildcard IPs are expanded to interface addresses.
    pub listen_addrs: Vec<Multiaddr>,

    /// Agent string advertised in the version handshake and identify
    pub agent_version: String,

    /// TCP socket options
    pub transport: TransportConfig,

    /// Connection upgrade settings
    pub handshake: HandshakeConfig,

    /// Peer dialing settings
    pub dial: DialConfig,

    /// Stream multiplexer settings
    pub mux: MuxConfig,

    /// Maximum inbound streams handled concurrently per peer
    pub inbound_streams_per_peer: usize,

    /// Upper bound on one identify exchange
    #[serde(with = "duration_secs")]
    pub identify_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addrs: Vec::new(),
            agent_version: default_agent_version(),
            transport: TransportConfig::default(),
            handshake: HandshakeConfig::default(),
            dial: DialConfig::default(),
            mux: MuxConfig::default(),
            inbound_streams_per_peer: 16,
            identify_timeout: Duration::from_secs(30),
        }
    }
}

/// Connection upgrade configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HandshakeConfig {
    /// Upper bound on version handshake plus secure channel setup
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Dial configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    /// Upper bound on one `dial_peer` call, across all addresses
    #[serde(with = "duration_secs")]
    pub timeout: Duration,

    /// How long a peer stays in backoff after a failed dial
    #[serde(with = "duration_secs")]
    pub backoff: Duration,

    /// Addresses of one peer dialed concurrently
    pub max_parallel_addrs: usize,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            backoff: Duration::from_secs(5),
            max_parallel_addrs: 8,
        }
    }
}

/// Stream multiplexer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MuxConfig {
    /// Per-stream receive window in bytes
    pub initial_window: u32,

    /// Largest data frame payload
    pub max_frame_size: usize,

    /// Open streams allowed per connection
    pub max_streams: usize,

    /// Remotely opened streams queued before new ones are reset
    pub accept_backlog: usize,
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            initial_window: 256 * 1024,
            max_frame_size: 16 * 1024,
            max_streams: 1024,
            accept_backlog: 64,
        }
    }
}

/// Durations as (possibly fractional) seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::default();
        assert!(config.agent_version.starts_with("strand/"));
        assert_eq!(config.handshake.timeout, Duration::from_secs(30));
        assert_eq!(config.dial.timeout, Duration::from_secs(10));
        assert_eq!(config.dial.backoff, Duration::from_secs(5));
        assert_eq!(config.mux.initial_window, 256 * 1024);
        assert_eq!(config.inbound_streams_per_peer, 16);
    }

    #[test]
    fn test_json_roundtrip_and_partial() {
        let mut config = NetworkConfig::default();
        config.listen_addrs = vec!["/ip4/0.0.0.0/tcp/4001".parse().unwrap()];
        config.dial.timeout = Duration::from_millis(1500);

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"/ip4/0.0.0.0/tcp/4001\""));
        let back: NetworkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let partial: NetworkConfig = serde_json::from_str(r#"{"dial":{"backoff":1}}"#).unwrap();
        assert_eq!(partial.dial.backoff, Duration::from_secs(1));
        assert_eq!(partial.dial.timeout, Duration::from_secs(10));
        assert_eq!(partial.mux, MuxConfig::default());
    }
}
