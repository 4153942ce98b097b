//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences into the streaming frame decoder and
//! asserts that it never panics, never yields an oversize message, and
//! behaves the same after a reset.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use ifbind::rpc::codec::FrameDecoder;
use ifbind::rpc::message::MAX_MESSAGE_SIZE;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    let mut first = Vec::new();
    let r1 = decoder.feed(data, |m| {
        assert!(m.buffer.len() <= MAX_MESSAGE_SIZE, "message exceeds MAX_MESSAGE_SIZE");
        first.push(m);
    });

    // Byte-at-a-time must agree with one big feed.
    decoder.reset();
    let mut second = Vec::new();
    let mut r2 = Ok(());
    for b in data {
        r2 = decoder.feed(core::slice::from_ref(b), |m| second.push(m));
        if r2.is_err() {
            break;
        }
    }
    assert_eq!(first, second);
    assert_eq!(r1.is_err(), r2.is_err());
});
