//! Protocol registry and single address components.

use crate::error::ParseError;
use crate::multihash::Multihash;
use crate::varint;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// How many bytes a protocol's address body takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySize {
    /// Exactly this many bytes
    Fixed(usize),
    /// A varint length followed by that many bytes
    Variable,
}

/// Registry entry for a multiaddr protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    /// Varint code on the wire
    pub code: u64,
    /// Name in the text form
    pub name: &'static str,
    /// Body size
    pub size: BodySize,
}

impl Protocol {
    const fn new(code: u64, name: &'static str, size: BodySize) -> Self {
        Self { code, name, size }
    }

    /// Whether the protocol has no address body.
    #[must_use]
    pub const fn is_zero_sized(&self) -> bool {
        matches!(self.size, BodySize::Fixed(0))
    }
}

/// `/ip4/<dotted quad>`
pub const IP4: Protocol = Protocol::new(4, "ip4", BodySize::Fixed(4));
/// `/tcp/<port>`
pub const TCP: Protocol = Protocol::new(6, "tcp", BodySize::Fixed(2));
/// `/udp/<port>`
pub const UDP: Protocol = Protocol::new(17, "udp", BodySize::Fixed(2));
/// `/dccp/<port>`
pub const DCCP: Protocol = Protocol::new(33, "dccp", BodySize::Fixed(2));
/// `/ip6/<rfc 5952 text>`
pub const IP6: Protocol = Protocol::new(41, "ip6", BodySize::Fixed(16));
/// `/sctp/<port>`
pub const SCTP: Protocol = Protocol::new(132, "sctp", BodySize::Fixed(2));
/// `/udt`
pub const UDT: Protocol = Protocol::new(301, "udt", BodySize::Fixed(0));
/// `/utp`
pub const UTP: Protocol = Protocol::new(302, "utp", BodySize::Fixed(0));
/// `/ipfs/<base58 peer id>`
pub const IPFS: Protocol = Protocol::new(421, "ipfs", BodySize::Variable);
/// `/https`
pub const HTTPS: Protocol = Protocol::new(443, "https", BodySize::Fixed(0));
/// `/http`
pub const HTTP: Protocol = Protocol::new(480, "http", BodySize::Fixed(0));

/// Every known protocol.
pub const PROTOCOLS: &[Protocol] = &[IP4, TCP, UDP, DCCP, IP6, SCTP, UDT, UTP, IPFS, HTTPS, HTTP];

/// Look up a protocol by its text name.
#[must_use]
pub fn protocol_with_name(name: &str) -> Option<&'static Protocol> {
    PROTOCOLS.iter().find(|p| p.name == name)
}

/// Look up a protocol by its wire code.
#[must_use]
pub fn protocol_with_code(code: u64) -> Option<&'static Protocol> {
    PROTOCOLS.iter().find(|p| p.code == code)
}

/// One decoded `(protocol, body)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Component {
    /// IPv4 address
    Ip4(Ipv4Addr),
    /// IPv6 address
    Ip6(Ipv6Addr),
    /// TCP port
    Tcp(u16),
    /// UDP port
    Udp(u16),
    /// DCCP port
    Dccp(u16),
    /// SCTP port
    Sctp(u16),
    /// UDT marker
    Udt,
    /// uTP marker
    Utp,
    /// Peer id as a multihash
    Ipfs(Multihash),
    /// HTTP marker
    Http,
    /// HTTPS marker
    Https,
}

impl Component {
    /// Registry entry for this component.
    #[must_use]
    pub fn protocol(&self) -> &'static Protocol {
        match self {
            Self::Ip4(_) => &IP4,
            Self::Ip6(_) => &IP6,
            Self::Tcp(_) => &TCP,
            Self::Udp(_) => &UDP,
            Self::Dccp(_) => &DCCP,
            Self::Sctp(_) => &SCTP,
            Self::Udt => &UDT,
            Self::Utp => &UTP,
            Self::Ipfs(_) => &IPFS,
            Self::Http => &HTTP,
            Self::Https => &HTTPS,
        }
    }

    /// Parse a body given in text form. `value` is `None` for zero-sized protocols.
    pub(crate) fn from_text(
        proto: &'static Protocol,
        value: Option<&str>,
    ) -> Result<Self, ParseError> {
        if proto.is_zero_sized() {
            return match proto.code {
                c if c == UDT.code => Ok(Self::Udt),
                c if c == UTP.code => Ok(Self::Utp),
                c if c == HTTP.code => Ok(Self::Http),
                c if c == HTTPS.code => Ok(Self::Https),
                c => Err(ParseError::UnknownCode(c)),
            };
        }

        let value = value
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ParseError::bad_body(proto.name, "missing value"))?;
        let port = || {
            value
                .parse::<u16>()
                .map_err(|_| ParseError::bad_body(proto.name, format!("invalid port {value:?}")))
        };

        match proto.code {
            c if c == IP4.code => value
                .parse()
                .map(Self::Ip4)
                .map_err(|_| ParseError::bad_body(proto.name, format!("invalid address {value:?}"))),
            c if c == IP6.code => value
                .parse()
                .map(Self::Ip6)
                .map_err(|_| ParseError::bad_body(proto.name, format!("invalid address {value:?}"))),
            c if c == TCP.code => port().map(Self::Tcp),
            c if c == UDP.code => port().map(Self::Udp),
            c if c == DCCP.code => port().map(Self::Dccp),
            c if c == SCTP.code => port().map(Self::Sctp),
            c if c == IPFS.code => Multihash::from_base58(value)
                .map(Self::Ipfs)
                .map_err(|e| ParseError::bad_body(proto.name, e.to_string())),
            c => Err(ParseError::UnknownCode(c)),
        }
    }

    /// Decode one component from the front of `bytes`.
    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<(Self, &[u8]), ParseError> {
        let (code, rest) = varint::decode(bytes)?;
        let proto = protocol_with_code(code).ok_or(ParseError::UnknownCode(code))?;

        let (body, rest) = match proto.size {
            BodySize::Fixed(n) => {
                if rest.len() < n {
                    return Err(ParseError::Truncated);
                }
                rest.split_at(n)
            }
            BodySize::Variable => {
                let (len, rest) = varint::decode_usize(rest)?;
                if rest.len() < len {
                    return Err(ParseError::Truncated);
                }
                rest.split_at(len)
            }
        };

        let port = || u16::from_be_bytes([body[0], body[1]]);
        let component = match *proto {
            IP4 => Self::Ip4(Ipv4Addr::new(body[0], body[1], body[2], body[3])),
            IP6 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(body);
                Self::Ip6(Ipv6Addr::from(octets))
            }
            TCP => Self::Tcp(port()),
            UDP => Self::Udp(port()),
            DCCP => Self::Dccp(port()),
            SCTP => Self::Sctp(port()),
            UDT => Self::Udt,
            UTP => Self::Utp,
            HTTP => Self::Http,
            HTTPS => Self::Https,
            IPFS => Self::Ipfs(
                Multihash::from_bytes(body).map_err(|e| ParseError::bad_body("ipfs", e.to_string()))?,
            ),
            _ => return Err(ParseError::UnknownCode(code)),
        };
        Ok((component, rest))
    }

    /// Append the binary encoding of this component.
    pub(crate) fn write_to(&self, out: &mut Vec<u8>) {
        varint::encode_to(self.protocol().code, out);
        match self {
            Self::Ip4(ip) => out.extend_from_slice(&ip.octets()),
            Self::Ip6(ip) => out.extend_from_slice(&ip.octets()),
            Self::Tcp(port) | Self::Udp(port) | Self::Dccp(port) | Self::Sctp(port) => {
                out.extend_from_slice(&port.to_be_bytes());
            }
            Self::Ipfs(hash) => {
                varint::encode_to(hash.as_bytes().len() as u64, out);
                out.extend_from_slice(hash.as_bytes());
            }
            Self::Udt | Self::Utp | Self::Http | Self::Https => {}
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.protocol().name)?;
        match self {
            Self::Ip4(ip) => write!(f, "/{ip}"),
            Self::Ip6(ip) => write!(f, "/{ip}"),
            Self::Tcp(port) | Self::Udp(port) | Self::Dccp(port) | Self::Sctp(port) => {
                write!(f, "/{port}")
            }
            Self::Ipfs(hash) => write!(f, "/{}", hash.to_base58()),
            Self::Udt | Self::Utp | Self::Http | Self::Https => Ok(()),
        }
    }
}
