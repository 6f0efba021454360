//! Address filters and wildcard resolution.
//!
//! Peers learn many candidate addresses from the peerstore and from each other. These
//! helpers decide which of them are worth dialing, which may be shared with the wider
//! internet, and how a wildcard listen address maps onto concrete interfaces.

use crate::error::{TransportError, TransportResult};
use crate::iface;
use strand_core::multiaddr::{IP4, IP6, Protocol, TCP};
use strand_core::{Component, Multiaddr};

/// Transport shapes the network stack can dial, as protocol sequences.
pub const SUPPORTED_TRANSPORTS: &[&[Protocol]] = &[&[IP4, TCP], &[IP6, TCP]];

/// Whether `addr` can be used by the network.
///
/// Link-local IPv6 addresses are never usable. Loopback is fine, several nodes may run on
/// one machine. With `partial`, a strict prefix of a supported shape (e.g. a bare
/// `/ip4/..`) is accepted too.
#[must_use]
pub fn addr_usable(addr: &Multiaddr, partial: bool) -> bool {
    if addr.is_empty() || addr.is_ip6_link_local() {
        return false;
    }

    let codes: Vec<u64> = addr.protocols().iter().map(|p| p.code).collect();
    SUPPORTED_TRANSPORTS.iter().any(|supported| {
        if codes.len() > supported.len() || (!partial && codes.len() != supported.len()) {
            return false;
        }
        codes.iter().zip(supported.iter()).all(|(c, s)| *c == s.code)
    })
}

/// Keep only the addresses the network can dial.
#[must_use]
pub fn filter_usable_addrs(addrs: &[Multiaddr]) -> Vec<Multiaddr> {
    addrs
        .iter()
        .filter(|a| addr_usable(a, false))
        .cloned()
        .collect()
}

/// `a` without any element of `b`.
#[must_use]
pub fn subtract(a: &[Multiaddr], b: &[Multiaddr]) -> Vec<Multiaddr> {
    a.iter().filter(|x| !b.contains(x)).cloned().collect()
}

/// Expand an unspecified IP (`0.0.0.0`, `::`) into one address per matching interface.
///
/// Concrete addresses are returned unchanged.
///
/// # Errors
///
/// `Unresolvable` if no interface has the same IP family.
pub fn resolve_unspecified_address(
    addr: &Multiaddr,
    iface_addrs: &[Multiaddr],
) -> TransportResult<Vec<Multiaddr>> {
    if !addr.is_ip_unspecified() {
        return Ok(vec![addr.clone()]);
    }

    let family = addr.protocols().first().map(|p| p.code);
    let out: Vec<Multiaddr> = iface_addrs
        .iter()
        .filter(|ia| ia.protocols().first().map(|p| p.code) == family)
        .filter_map(|ia| ia.components().first().cloned())
        .map(|ip| addr.with_first(ip))
        .collect();

    if out.is_empty() {
        return Err(TransportError::Unresolvable(addr.to_string()));
    }
    tracing::debug!(%addr, resolved = ?out, "resolved unspecified address");
    Ok(out)
}

/// [`resolve_unspecified_address`] over a list. Addresses that fail to resolve are
/// skipped; the call only fails when nothing resolves.
///
/// An empty `iface_addrs` means "ask the OS".
///
/// # Errors
///
/// `Unresolvable` if no address could be resolved.
pub fn resolve_unspecified_addresses(
    addrs: &[Multiaddr],
    iface_addrs: &[Multiaddr],
) -> TransportResult<Vec<Multiaddr>> {
    let fetched;
    let iface_addrs = if iface_addrs.is_empty() {
        fetched = interface_addresses()?;
        fetched.as_slice()
    } else {
        iface_addrs
    };

    let out: Vec<Multiaddr> = addrs
        .iter()
        .filter_map(|a| resolve_unspecified_address(a, iface_addrs).ok())
        .flatten()
        .collect();

    if out.is_empty() {
        let list: Vec<String> = addrs.iter().map(ToString::to_string).collect();
        return Err(TransportError::Unresolvable(list.join(", ")));
    }
    Ok(out)
}

/// Usable addresses of the local interfaces, as bare `/ip4/..` and `/ip6/..` addresses.
/// Loopback is included, IPv6 link-local is not.
///
/// # Errors
///
/// Fails if the OS interface list cannot be read.
pub fn interface_addresses() -> TransportResult<Vec<Multiaddr>> {
    let addrs: Vec<Multiaddr> = iface::interface_ips()?
        .into_iter()
        .map(|ip| match ip {
            std::net::IpAddr::V4(v4) => Multiaddr::from_components(vec![Component::Ip4(v4)]),
            std::net::IpAddr::V6(v6) => Multiaddr::from_components(vec![Component::Ip6(v6)]),
        })
        .filter(|a| addr_usable(a, true))
        .collect();
    tracing::trace!(?addrs, "interface addresses");
    Ok(addrs)
}

/// Whether an address may be advertised to peers on the open internet.
#[must_use]
pub fn addr_is_shareable_on_wan(addr: &Multiaddr) -> bool {
    if addr.is_ip_loopback() || addr.is_ip6_link_local() || addr.is_ip_unspecified() {
        return false;
    }
    addr.is_thin_waist()
}

/// Keep only WAN-shareable addresses.
#[must_use]
pub fn wan_shareable_addrs(addrs: &[Multiaddr]) -> Vec<Multiaddr> {
    addrs
        .iter()
        .filter(|a| addr_is_shareable_on_wan(a))
        .cloned()
        .collect()
}

/// Warn when a peer saw us at an address we are not listening on.
///
/// Returns `true` when the warning fired.
pub fn check_nat_warning(observed: &Multiaddr, expected: &Multiaddr, listen: &[Multiaddr]) -> bool {
    if observed == expected || listen.contains(observed) {
        return false;
    }
    let listen: Vec<String> = listen.iter().map(ToString::to_string).collect();
    tracing::warn!(
        %observed,
        listen = %listen.join(", "),
        "remote peer observed us at an address we do not listen on; \
         connection is probably going through a NAT and inbound dials may fail"
    );
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_addr_usable() {
        assert!(addr_usable(&ma("/ip4/127.0.0.1/tcp/4001"), false));
        assert!(addr_usable(&ma("/ip6/::1/tcp/4001"), false));
        assert!(!addr_usable(&ma("/ip4/127.0.0.1/udp/4001/utp"), false));
        assert!(!addr_usable(&ma("/ip6/fe80::1/tcp/4001"), false));
        assert!(!addr_usable(&ma("/ip4/127.0.0.1"), false));
        assert!(addr_usable(&ma("/ip4/127.0.0.1"), true));
        assert!(!addr_usable(&ma("/tcp/4001"), true));
    }

    #[test]
    fn test_filter_usable_and_subtract() {
        let addrs = vec![
            ma("/ip4/1.2.3.4/tcp/1"),
            ma("/ip4/1.2.3.4/udp/1/utp"),
            ma("/ip4/5.6.7.8/tcp/2"),
        ];
        let usable = filter_usable_addrs(&addrs);
        assert_eq!(usable, vec![ma("/ip4/1.2.3.4/tcp/1"), ma("/ip4/5.6.7.8/tcp/2")]);
        assert_eq!(
            subtract(&usable, &[ma("/ip4/5.6.7.8/tcp/2")]),
            vec![ma("/ip4/1.2.3.4/tcp/1")]
        );
    }

    #[test]
    fn test_resolve_unspecified() {
        let ifaces = vec![ma("/ip4/127.0.0.1"), ma("/ip4/10.0.0.5"), ma("/ip6/::1")];

        let resolved = resolve_unspecified_address(&ma("/ip4/0.0.0.0/tcp/4001"), &ifaces).unwrap();
        assert_eq!(
            resolved,
            vec![ma("/ip4/127.0.0.1/tcp/4001"), ma("/ip4/10.0.0.5/tcp/4001")]
        );

        let concrete = ma("/ip4/8.8.8.8/tcp/1");
        assert_eq!(
            resolve_unspecified_address(&concrete, &ifaces).unwrap(),
            vec![concrete]
        );

        assert!(resolve_unspecified_address(&ma("/ip6/::/tcp/1"), &[ma("/ip4/127.0.0.1")]).is_err());
    }

    #[test]
    fn test_resolve_unspecified_addresses_skips_failures() {
        let ifaces = vec![ma("/ip4/127.0.0.1")];
        let out = resolve_unspecified_addresses(
            &[ma("/ip6/::/tcp/1"), ma("/ip4/0.0.0.0/tcp/2")],
            &ifaces,
        )
        .unwrap();
        assert_eq!(out, vec![ma("/ip4/127.0.0.1/tcp/2")]);

        assert!(resolve_unspecified_addresses(&[ma("/ip6/::/tcp/1")], &ifaces).is_err());
    }

    #[test]
    fn test_interface_addresses_include_loopback() {
        let addrs = interface_addresses().unwrap();
        assert!(addrs.iter().any(Multiaddr::is_ip_loopback));
        assert!(addrs.iter().all(|a| !a.is_ip6_link_local()));
    }

    #[test]
    fn test_wan_shareable() {
        let addrs = vec![
            ma("/ip4/127.0.0.1/tcp/1"),
            ma("/ip4/0.0.0.0/tcp/1"),
            ma("/ip4/93.184.216.34/tcp/1"),
            ma("/ip6/fe80::1/tcp/1"),
            ma("/ip4/93.184.216.34"),
        ];
        assert_eq!(wan_shareable_addrs(&addrs), vec![ma("/ip4/93.184.216.34/tcp/1")]);
    }

    #[test]
    fn test_nat_warning() {
        let listen = vec![ma("/ip4/127.0.0.1/tcp/1")];
        let observed = ma("/ip4/1.2.3.4/tcp/9");
        assert!(check_nat_warning(&observed, &ma("/ip4/127.0.0.1/tcp/1"), &listen));
        assert!(!check_nat_warning(&listen[0], &ma("/ip4/5.5.5.5/tcp/1"), &listen));
        assert!(!check_nat_warning(&observed, &observed, &listen));
    }
}
