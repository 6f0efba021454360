//! Fuzz target for peer id and multihash parsing
//!
//! Tests that arbitrary input doesn't cause panics when parsed as peer ids.

#![no_main]

use libfuzzer_sys::fuzz_target;
use strand_core::{Multihash, PeerId};

fuzz_target!(|data: &[u8]| {
    if let Ok(hash) = Multihash::from_bytes(data) {
        assert_eq!(hash.as_bytes(), data);
        let _ = hash.digest();
        let _ = hash.code();
    }
    let _ = Multihash::from_bytes_partial(data);

    if let Ok(id) = PeerId::from_bytes(data) {
        let text = id.to_base58();
        assert_eq!(PeerId::from_base58(&text).expect("base58 must round-trip"), id);
        let _ = id.short();
    }

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = s.parse::<PeerId>();
    }
});
