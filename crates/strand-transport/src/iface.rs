//! Local network interface enumeration.

use std::io;
use std::net::IpAddr;
#[cfg(not(unix))]
use std::net::{Ipv4Addr, Ipv6Addr};

/// IP addresses assigned to local interfaces that are up.
///
/// # Errors
///
/// Fails if the OS interface list cannot be read.
#[cfg(unix)]
pub fn interface_ips() -> io::Result<Vec<IpAddr>> {
    use std::net::{Ipv4Addr, Ipv6Addr};

    let mut head: *mut libc::ifaddrs = std::ptr::null_mut();

    // SAFETY: getifaddrs writes a heap-allocated list head into `head` on success. The
    // list is only read below and released exactly once with freeifaddrs.
    if unsafe { libc::getifaddrs(&mut head) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut out = Vec::new();
    let mut cursor = head;
    while !cursor.is_null() {
        // SAFETY: `cursor` is a non-null node of the list returned by getifaddrs, which
        // stays valid until freeifaddrs.
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        if entry.ifa_addr.is_null() || entry.ifa_flags & libc::IFF_UP as libc::c_uint == 0 {
            continue;
        }

        // SAFETY: ifa_addr is non-null and points at a sockaddr whose sa_family tells us
        // which concrete sockaddr type it is.
        let family = i32::from(unsafe { (*entry.ifa_addr).sa_family });
        if family == libc::AF_INET {
            // SAFETY: AF_INET entries are sockaddr_in.
            let sin = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
            out.push(IpAddr::V4(Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr))));
        } else if family == libc::AF_INET6 {
            // SAFETY: AF_INET6 entries are sockaddr_in6.
            let sin6 = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in6) };
            out.push(IpAddr::V6(Ipv6Addr::from(sin6.sin6_addr.s6_addr)));
        }
    }

    // SAFETY: `head` came from a successful getifaddrs and is freed once.
    unsafe { libc::freeifaddrs(head) };

    out.sort();
    out.dedup();
    Ok(out)
}

/// Loopback only on platforms without `getifaddrs`.
///
/// # Errors
///
/// Never fails.
#[cfg(not(unix))]
pub fn interface_ips() -> io::Result<Vec<IpAddr>> {
    Ok(vec![
        IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(Ipv6Addr::LOCALHOST),
    ])
}
