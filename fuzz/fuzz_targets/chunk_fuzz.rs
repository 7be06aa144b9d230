#![no_main]
use libfuzzer_sys::fuzz_target;

use pngpress::container::png::{decode_chunks, encode_chunks};

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes must never panic, and anything that decodes
    // must reencode byte-for-byte.
    if let Ok(chunks) = decode_chunks(data, false) {
        assert_eq!(encode_chunks(&chunks), data);
        // Verified decode may reject the same stream, but must not panic.
        let _ = decode_chunks(data, true);
    }
});
