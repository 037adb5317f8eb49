#![no_main]

use zstd_session::{
    CParameter, CompressionConfig, CompressionSession, DecompressionConfig, EndDirective,
};

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 1 {
        return;
    }

    // the first byte picks the level and where the frame gets split into blocks
    let level = i32::from(data[0] % 20) - 1;
    let split = usize::from(data[0]) % data.len();

    let config = CompressionConfig::with_level(level).parameter(CParameter::ChecksumFlag, 1);
    let c = CompressionSession::new(&config, None).unwrap();

    let mut output = c.compress(&data[..split], EndDirective::FlushBlock).unwrap();
    output.extend(c.compress(&data[split..], EndDirective::Continue).unwrap());
    output.extend(c.flush(EndDirective::FlushFrame).unwrap());

    let original = zstd_session::decompress(&output, &DecompressionConfig::default(), None).unwrap();
    assert_eq!(data, &original[..]);
});
