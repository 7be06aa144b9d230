#![no_main]
use libfuzzer_sys::fuzz_target;

use pngpress::container::glb::{self, GlbContainer};

fuzz_target!(|data: &[u8]| {
    let Ok(container) = GlbContainer::decode(data) else {
        return;
    };
    // A decodable container must reserialize and decode again. Reencoding
    // pads chunks to 4-byte alignment, so compare the unpadded prefix.
    let encoded = container.encode();
    let again = GlbContainer::decode(&encoded).expect("reencoded container must decode");
    assert!(again.bin.len() - container.bin.len() < 4);
    assert_eq!(&again.bin[..container.bin.len()], &container.bin[..]);

    // The document parse and image index must never panic.
    if let Ok(doc) = container.document() {
        let _ = glb::embedded_images(&doc, &container.bin);
    }
});
