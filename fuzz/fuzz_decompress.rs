#![no_main]

use zstd_session::{DecompressionConfig, EndlessDecompressor, FrameDecompressor};

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let config = DecompressionConfig::default();

    // arbitrary input must only ever produce errors, never panics
    let frame = FrameDecompressor::new(&config, None).unwrap();
    for chunk in data.chunks(7) {
        if frame.eof() || frame.decompress(chunk, Some(4096)).is_err() {
            break;
        }
    }

    let endless = EndlessDecompressor::new(&config, None).unwrap();
    let _ = endless.decompress(data, Some(1 << 20));
});
