//! Fuzz target for network configuration parsing
//!
//! Tests that arbitrary TOML input doesn't cause panics in configuration parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use strand_net::NetworkConfig;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(config) = toml::from_str::<NetworkConfig>(s) {
            let _ = toml::to_string(&config);
        }
    }
});
