//! Fuzz target for multiaddr parsing
//!
//! Binary and text decoding must never panic, and whatever decodes must re-encode
//! to the same form.

#![no_main]

use libfuzzer_sys::fuzz_target;
use strand_core::Multiaddr;

fuzz_target!(|data: &[u8]| {
    if let Ok(addr) = Multiaddr::from_bytes(data) {
        assert_eq!(addr.to_bytes(), data);
        let text = addr.to_string();
        if !addr.is_empty() {
            let reparsed: Multiaddr = text.parse().expect("display output must parse");
            assert_eq!(reparsed, addr);
        }
        let _ = addr.to_tcp_socket_addr();
        let _ = addr.is_thin_waist();
    }

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(addr) = s.parse::<Multiaddr>() {
            let back = Multiaddr::from_bytes(&addr.to_bytes()).expect("encoded form must decode");
            assert_eq!(back, addr);
        }
    }
});
