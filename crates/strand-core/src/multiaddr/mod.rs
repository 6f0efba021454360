//! Multiaddr: composable, self-describing network addresses.
//!
//! A multiaddr is a sequence of `(protocol, body)` components. On the wire each component
//! is `<varint code><body>`; in text it is `/name/value`:
//!
//! ```text
//! /ip4/127.0.0.1/udp/1234   <->   04 7f 00 00 01 11 04 d2
//! ```
//!
//! The encoding is canonical, so two addresses are equal exactly when their byte forms are.

mod protocol;

pub use protocol::{
    BodySize, Component, DCCP, HTTP, HTTPS, IP4, IP6, IPFS, PROTOCOLS, Protocol, SCTP, TCP, UDP,
    UDT, UTP, protocol_with_code, protocol_with_name,
};

use crate::error::ParseError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// A network address made of one or more components.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Multiaddr {
    components: Vec<Component>,
}

impl Multiaddr {
    /// Address with no components. Only produced by decapsulation and joins.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an address from components.
    #[must_use]
    pub fn from_components(components: Vec<Component>) -> Self {
        Self { components }
    }

    /// Decode the binary form.
    ///
    /// # Errors
    ///
    /// [`ParseError::UnknownCode`] for an unregistered protocol code, [`ParseError::Truncated`]
    /// if a body is cut short.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.is_empty() {
            return Err(ParseError::Empty);
        }
        let mut components = Vec::new();
        while !bytes.is_empty() {
            let (component, rest) = Component::from_bytes(bytes)?;
            components.push(component);
            bytes = rest;
        }
        Ok(Self { components })
    }

    /// Binary form.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.components.len() * 4);
        for component in &self.components {
            component.write_to(&mut out);
        }
        out
    }

    /// Components in order.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Protocols in order.
    #[must_use]
    pub fn protocols(&self) -> Vec<&'static Protocol> {
        self.components.iter().map(Component::protocol).collect()
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether there are no components.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Append a component.
    #[must_use]
    pub fn with(mut self, component: Component) -> Self {
        self.components.push(component);
        self
    }

    /// `self` followed by `other`.
    #[must_use]
    pub fn encapsulate(&self, other: &Multiaddr) -> Multiaddr {
        let mut components = Vec::with_capacity(self.len() + other.len());
        components.extend_from_slice(&self.components);
        components.extend_from_slice(&other.components);
        Self { components }
    }

    /// Remove the last occurrence of `other` and everything after it.
    ///
    /// Returns `None` when `other` does not occur in `self`.
    #[must_use]
    pub fn decapsulate(&self, other: &Multiaddr) -> Option<Multiaddr> {
        if other.is_empty() || other.len() > self.len() {
            return None;
        }
        let needle = other.components.as_slice();
        (0..=self.len() - other.len())
            .rev()
            .find(|&i| &self.components[i..i + needle.len()] == needle)
            .map(|i| Self {
                components: self.components[..i].to_vec(),
            })
    }

    /// One single-component address per component.
    #[must_use]
    pub fn split(&self) -> Vec<Multiaddr> {
        self.components
            .iter()
            .map(|c| Self {
                components: vec![c.clone()],
            })
            .collect()
    }

    /// Concatenate addresses.
    #[must_use]
    pub fn join<'a>(parts: impl IntoIterator<Item = &'a Multiaddr>) -> Multiaddr {
        Self {
            components: parts
                .into_iter()
                .flat_map(|p| p.components.iter().cloned())
                .collect(),
        }
    }

    /// Whether the address starts with `/ip{4,6}/{tcp,udp}/port`.
    #[must_use]
    pub fn is_thin_waist(&self) -> bool {
        matches!(
            self.components.as_slice(),
            [
                Component::Ip4(_) | Component::Ip6(_),
                Component::Tcp(_) | Component::Udp(_),
                ..
            ]
        )
    }

    /// The leading IP address, if any.
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        match self.components.first() {
            Some(Component::Ip4(ip)) => Some(IpAddr::V4(*ip)),
            Some(Component::Ip6(ip)) => Some(IpAddr::V6(*ip)),
            _ => None,
        }
    }

    /// Whether the leading IP is `0.0.0.0` or `::`.
    #[must_use]
    pub fn is_ip_unspecified(&self) -> bool {
        self.ip().is_some_and(|ip| ip.is_unspecified())
    }

    /// Whether the leading IP is a loopback address.
    #[must_use]
    pub fn is_ip_loopback(&self) -> bool {
        self.ip().is_some_and(|ip| ip.is_loopback())
    }

    /// Whether the leading IP is an IPv6 link-local address (`fe80::/10`).
    #[must_use]
    pub fn is_ip6_link_local(&self) -> bool {
        matches!(self.ip(), Some(IpAddr::V6(ip)) if ip.segments()[0] & 0xffc0 == 0xfe80)
    }

    /// Replace the leading component, keeping the rest.
    #[must_use]
    pub fn with_first(&self, first: Component) -> Multiaddr {
        let mut components = self.components.clone();
        match components.first_mut() {
            Some(slot) => *slot = first,
            None => components.push(first),
        }
        Self { components }
    }

    /// The socket address of a `/ip{4,6}/tcp/port` prefix.
    #[must_use]
    pub fn to_tcp_socket_addr(&self) -> Option<SocketAddr> {
        match self.components.as_slice() {
            [_, Component::Tcp(port), ..] => self.ip().map(|ip| SocketAddr::new(ip, *port)),
            _ => None,
        }
    }

    /// `/ip{4,6}/<ip>/tcp/<port>` for a socket address.
    #[must_use]
    pub fn from_tcp_socket_addr(addr: SocketAddr) -> Multiaddr {
        let ip = match addr.ip() {
            IpAddr::V4(ip) => Component::Ip4(ip),
            IpAddr::V6(ip) => Component::Ip6(ip),
        };
        Self {
            components: vec![ip, Component::Tcp(addr.port())],
        }
    }
}

impl FromStr for Multiaddr {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        let body = s.strip_prefix('/').ok_or(ParseError::MissingLeadingSlash)?;
        let body = body.strip_suffix('/').unwrap_or(body);
        if body.is_empty() {
            return Err(ParseError::EmptyComponent);
        }

        let mut parts = body.split('/');
        let mut components = Vec::new();
        while let Some(name) = parts.next() {
            if name.is_empty() {
                return Err(ParseError::EmptyComponent);
            }
            let proto = protocol_with_name(name)
                .ok_or_else(|| ParseError::UnknownProtocol(name.to_string()))?;
            let value = if proto.is_zero_sized() {
                None
            } else {
                parts.next()
            };
            components.push(Component::from_text(proto, value)?);
        }
        Ok(Self { components })
    }
}

impl TryFrom<&str> for Multiaddr {
    type Error = ParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl TryFrom<Vec<u8>> for Multiaddr {
    type Error = ParseError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_bytes(&bytes)
    }
}

impl From<Component> for Multiaddr {
    fn from(component: Component) -> Self {
        Self {
            components: vec![component],
        }
    }
}

impl fmt::Display for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for component in &self.components {
            write!(f, "{component}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Multiaddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Multiaddr({self})")
    }
}

impl Serialize for Multiaddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Multiaddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_udp_hex_vector() {
        let addr = ma("/ip4/127.0.0.1/udp/1234");
        assert_eq!(hex::encode(addr.to_bytes()), "047f0000011104d2");
        assert_eq!(
            Multiaddr::from_bytes(&hex::decode("047f0000011104d2").unwrap()).unwrap(),
            addr
        );
    }

    #[test]
    fn test_tcp_hex_vector() {
        let addr = ma("/ip4/127.0.0.1/tcp/4321");
        assert_eq!(hex::encode(addr.to_bytes()), "047f0000010610e1");
    }

    #[test]
    fn test_nested_hex_vector() {
        let addr = ma("/ip4/127.0.0.1/udp/1234/ip4/127.0.0.1/tcp/4321");
        assert_eq!(
            hex::encode(addr.to_bytes()),
            "047f0000011104d2047f0000010610e1"
        );
        assert_eq!(
            addr.to_string(),
            "/ip4/127.0.0.1/udp/1234/ip4/127.0.0.1/tcp/4321"
        );
    }

    #[test]
    fn test_encapsulate_decapsulate() {
        let base = ma("/ip4/127.0.0.1/udp/1234");
        let suffix = ma("/udp/5678");
        let joined = base.encapsulate(&suffix);
        assert_eq!(joined.to_string(), "/ip4/127.0.0.1/udp/1234/udp/5678");
        assert_eq!(joined.decapsulate(&suffix), Some(base.clone()));
        assert_eq!(base.decapsulate(&ma("/tcp/1")), None);
    }

    #[test]
    fn test_decapsulate_last_occurrence() {
        let addr = ma("/ip4/1.2.3.4/tcp/80/ip4/5.6.7.8/tcp/80/utp");
        assert_eq!(
            addr.decapsulate(&ma("/tcp/80")),
            Some(ma("/ip4/1.2.3.4/tcp/80/ip4/5.6.7.8"))
        );
    }

    #[test]
    fn test_trailing_slash_and_canonical_form() {
        assert_eq!(ma("/ip4/127.0.0.1/tcp/80/"), ma("/ip4/127.0.0.1/tcp/80"));
        assert_eq!(ma("/ip4/127.0.0.1/tcp/0080").to_string(), "/ip4/127.0.0.1/tcp/80");
        assert_eq!(ma("/ip6/0:0:0:0:0:0:0:1/tcp/1").to_string(), "/ip6/::1/tcp/1");
    }

    #[test]
    fn test_zero_sized_protocols() {
        let addr = ma("/ip4/10.0.0.1/udp/1/utp");
        assert_eq!(addr.len(), 3);
        assert_eq!(addr.to_bytes().last().copied(), Some(0x02));
        assert_eq!(ma("/ip4/10.0.0.1/udp/1/udt").to_string(), "/ip4/10.0.0.1/udp/1/udt");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("".parse::<Multiaddr>(), Err(ParseError::Empty));
        assert_eq!(
            "ip4/1.2.3.4".parse::<Multiaddr>(),
            Err(ParseError::MissingLeadingSlash)
        );
        assert_eq!("/".parse::<Multiaddr>(), Err(ParseError::EmptyComponent));
        assert_eq!(
            "/ip4//tcp/1".parse::<Multiaddr>().err().map(|e| matches!(e, ParseError::BadAddressBody { .. })),
            Some(true)
        );
        assert_eq!(
            "/ip4/1.2.3.4//tcp/1".parse::<Multiaddr>(),
            Err(ParseError::EmptyComponent)
        );
        assert_eq!(
            "/ip4/1.2.3.4/quic".parse::<Multiaddr>(),
            Err(ParseError::UnknownProtocol("quic".into()))
        );
        assert!(matches!(
            "/ip4/1.2.3.4/tcp".parse::<Multiaddr>(),
            Err(ParseError::BadAddressBody { protocol: "tcp", .. })
        ));
        assert!(matches!(
            "/ip4/300.2.3.4".parse::<Multiaddr>(),
            Err(ParseError::BadAddressBody { protocol: "ip4", .. })
        ));
    }

    #[test]
    fn test_binary_errors() {
        assert_eq!(Multiaddr::from_bytes(&[]), Err(ParseError::Empty));
        assert_eq!(
            Multiaddr::from_bytes(&[0x04, 0x7f, 0x00]),
            Err(ParseError::Truncated)
        );
        assert_eq!(
            Multiaddr::from_bytes(&[0x63]),
            Err(ParseError::UnknownCode(0x63))
        );
    }

    #[test]
    fn test_thin_waist() {
        assert!(ma("/ip4/1.2.3.4/tcp/1").is_thin_waist());
        assert!(ma("/ip6/::1/udp/1").is_thin_waist());
        assert!(ma("/ip4/1.2.3.4/udp/1/utp").is_thin_waist());
        assert!(!ma("/tcp/1").is_thin_waist());
        assert!(!ma("/ip4/1.2.3.4/ip4/5.6.7.8").is_thin_waist());
        assert!(!ma("/ip4/1.2.3.4/sctp/9").is_thin_waist());
    }

    #[test]
    fn test_split_join() {
        let addr = ma("/ip4/1.2.3.4/tcp/5/http");
        let parts = addr.split();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[1], ma("/tcp/5"));
        assert_eq!(Multiaddr::join(&parts), addr);
    }

    #[test]
    fn test_ipfs_component() {
        let hash = crate::multihash::Multihash::blake3(b"key");
        let text = format!("/ip4/1.2.3.4/tcp/1/ipfs/{}", hash.to_base58());
        let addr = ma(&text);
        assert_eq!(addr.to_string(), text);
        assert_eq!(Multiaddr::from_bytes(&addr.to_bytes()).unwrap(), addr);
    }

    #[test]
    fn test_socket_addr_conversion() {
        let addr = ma("/ip4/127.0.0.1/tcp/4001");
        let sock = addr.to_tcp_socket_addr().unwrap();
        assert_eq!(sock.port(), 4001);
        assert_eq!(Multiaddr::from_tcp_socket_addr(sock), addr);
        assert!(ma("/ip4/127.0.0.1/udp/4001").to_tcp_socket_addr().is_none());
    }

    #[test]
    fn test_ip_predicates() {
        assert!(ma("/ip4/0.0.0.0/tcp/1").is_ip_unspecified());
        assert!(ma("/ip6/::/tcp/1").is_ip_unspecified());
        assert!(ma("/ip4/127.0.0.1/tcp/1").is_ip_loopback());
        assert!(ma("/ip6/fe80::1/tcp/1").is_ip6_link_local());
        assert!(!ma("/ip6/2001:db8::1/tcp/1").is_ip6_link_local());
    }

    #[test]
    fn test_serde_uses_text_form() {
        let addr = ma("/ip4/1.2.3.4/tcp/5");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"/ip4/1.2.3.4/tcp/5\"");
        assert_eq!(serde_json::from_str::<Multiaddr>(&json).unwrap(), addr);
    }
}
