//! Fuzz target for identify message decoding

#![no_main]

use libfuzzer_sys::fuzz_target;
use strand_net::IdentifyMessage;

fuzz_target!(|data: &[u8]| {
    if let Ok(msg) = IdentifyMessage::decode(data) {
        let again = IdentifyMessage::decode(&msg.encode()).expect("re-encoded message must decode");
        assert_eq!(again, msg);
    }
});
