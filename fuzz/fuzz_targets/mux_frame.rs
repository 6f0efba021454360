//! Fuzz target for stream-mux frame decoding
//!
//! The decoder should never panic, only return Ok or Err, and must never claim more
//! bytes than it was given.

#![no_main]

use libfuzzer_sys::fuzz_target;
use strand_core::MuxFrame;

const MAX_PAYLOAD: usize = 16 * 1024;

fuzz_target!(|data: &[u8]| {
    if let Ok((frame, used)) = MuxFrame::decode(data, MAX_PAYLOAD) {
        assert!(used <= data.len());
        let encoded = frame.encode();
        assert_eq!(encoded.len(), used);
        let (again, _) = MuxFrame::decode(&encoded, MAX_PAYLOAD).expect("encoded frame must decode");
        assert_eq!(again, frame);
    }
});
