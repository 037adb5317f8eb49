/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::sync::Arc;

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use zstd_session::{
    codec_info, compress, decompress, get_frame_info, get_frame_size, train_dictionary,
    CParameter, CompressionConfig, CompressionSession, DecompressionConfig, DictionaryAttach,
    DictionaryRef, EndDirective, EndlessDecompressor, ExitCode, FrameDecompressor,
    RichMemCompressor, Strategy, ZstdDictionary,
};

fn text(len: usize, seed: u64) -> Vec<u8> {
    let words = ["zstd", "session", "frame", "block", "buffer", "carry", "edge", "flush"];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::new();
    while out.len() < len {
        out.extend_from_slice(words[rng.gen_range(0..words.len())].as_bytes());
        out.push(b' ');
    }
    out.truncate(len);
    out
}

fn random(len: usize, seed: u64) -> Vec<u8> {
    let mut out = vec![0u8; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut out);
    out
}

fn records(count: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(77);
    (0..count)
        .map(|i| {
            format!(
                "<row id=\"{}\" kind=\"{}\" weight=\"{}\" flag=\"{}\"/>",
                i,
                ["item", "order", "customer", "invoice"][rng.gen_range(0..4)],
                rng.gen_range(0..100000),
                rng.gen_bool(0.3)
            )
            .into_bytes()
        })
        .collect()
}

fn configs() -> Vec<CompressionConfig> {
    vec![
        CompressionConfig::default(),
        CompressionConfig::with_level(1),
        CompressionConfig::with_level(19),
        CompressionConfig::with_level(-5),
        CompressionConfig::with_level(3)
            .parameter(CParameter::ChecksumFlag, 1)
            .parameter(CParameter::WindowLog, 18),
        CompressionConfig::with_level(5)
            .parameter(CParameter::Strategy, Strategy::Lazy2 as i32)
            .parameter(CParameter::EnableLongDistanceMatching, 1),
        CompressionConfig::with_level(3).parameter(CParameter::NbWorkers, 2),
    ]
}

#[test]
fn round_trip_all_configurations() {
    let inputs = [
        Vec::new(),
        b"x".to_vec(),
        text(100_000, 1),
        random(70_000, 2),
    ];

    for config in configs() {
        for input in &inputs {
            let frame = compress(input, &config, None).unwrap();
            assert_eq!(
                &decompress(&frame, &DecompressionConfig::default(), None).unwrap(),
                input,
                "{:?}",
                config
            );
        }
    }
}

#[test]
fn streamed_round_trip_with_mixed_modes() {
    let data = text(300_000, 3);

    for config in configs() {
        let c = CompressionSession::new(&config, None).unwrap();
        let mut compressed = Vec::new();

        for (i, chunk) in data.chunks(10_000).enumerate() {
            let mode = match i % 7 {
                3 => EndDirective::FlushBlock,
                6 => EndDirective::FlushFrame,
                _ => EndDirective::Continue,
            };
            compressed.extend(c.compress(chunk, mode).unwrap());
        }
        compressed.extend(c.flush(EndDirective::FlushFrame).unwrap());

        let d = EndlessDecompressor::new(&DecompressionConfig::default(), None).unwrap();
        let mut r = Vec::new();
        for chunk in compressed.chunks(999) {
            r.extend(d.decompress(chunk, None).unwrap());
        }
        assert!(d.at_frame_edge());
        assert_eq!(r, data, "{:?}", config);
    }
}

#[test]
fn second_flush_is_empty() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    c.compress(b"payload", EndDirective::Continue).unwrap();
    assert!(!c.flush(EndDirective::FlushFrame).unwrap().is_empty());
    assert!(c.flush(EndDirective::FlushFrame).unwrap().is_empty());
    assert_eq!(c.last_mode(), EndDirective::FlushFrame);
}

#[test]
fn output_never_exceeds_max_length() {
    let data = text(200_000, 4);
    let frame = compress(&data, &CompressionConfig::default(), None).unwrap();

    for cap in [1, 7, 4096, 100_000] {
        let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
        let mut r = Vec::new();
        let mut input: &[u8] = &frame;

        while !d.eof() {
            let chunk = d.decompress(input, Some(cap)).unwrap();
            input = &[];
            assert!(chunk.len() <= cap);
            if chunk.len() < cap {
                // a short chunk only happens when the input ran out or the frame ended
                assert!(d.needs_input() || d.eof());
            } else {
                assert!(!d.needs_input() || d.eof());
            }
            r.extend(chunk);
        }

        assert_eq!(r.len(), data.len());
        assert!(r == data);
    }
}

#[test]
fn carry_over_at_every_split() {
    let data = text(2000, 5);
    let frame = compress(&data, &CompressionConfig::default(), None).unwrap();
    let whole = decompress(&frame, &DecompressionConfig::default(), None).unwrap();

    for split in 0..frame.len() {
        let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
        let mut r = d.decompress(&frame[..split], None).unwrap();
        r.extend(d.decompress(&frame[split..], None).unwrap());
        assert!(d.eof());
        assert_eq!(r, whole, "split at {}", split);
    }
}

#[test]
fn frame_edges_are_counted_once_per_frame() {
    let mut stream = Vec::new();
    let mut expected = Vec::new();
    let mut frame_ends = Vec::new();

    for i in 0..4 {
        let data = text(3000 + i * 500, 10 + i as u64);
        stream.extend(compress(&data, &CompressionConfig::default(), None).unwrap());
        frame_ends.push(stream.len());
        expected.extend(data);
    }
    let trailing_garbage = b"not part of any frame";

    let d = EndlessDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let mut r = Vec::new();
    let mut edges = 0;
    let mut fed = 0;

    // chunks never straddle a frame boundary, so every frame end is seen by exactly one call
    let mut frame_start = 0;
    for &frame_end in &frame_ends {
        for chunk in stream[frame_start..frame_end].chunks(97) {
            r.extend(d.decompress(chunk, None).unwrap());
            fed += chunk.len();
            if d.at_frame_edge() {
                edges += 1;
                assert_eq!(fed, frame_end, "edge reported at {}", fed);
            }
        }
        assert!(d.at_frame_edge(), "no edge at {}", frame_end);
        frame_start = frame_end;
    }
    assert_eq!(r, expected);
    assert_eq!(edges, frame_ends.len());

    // a stop-at-frame session sees the first frame only
    let mut with_garbage = stream.clone();
    with_garbage.extend_from_slice(trailing_garbage);

    let f = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let first = f.decompress(&with_garbage, None).unwrap();
    assert!(f.eof());
    assert_eq!(first, &expected[..3000]);
    assert_eq!(f.unused_data(), &with_garbage[frame_ends[0]..]);
}

#[test]
fn two_small_frames_byte_by_byte() {
    let mut stream = compress(b"ab", &CompressionConfig::default(), None).unwrap();
    stream.extend(compress(b"cd", &CompressionConfig::default(), None).unwrap());

    let d = EndlessDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let mut r = Vec::new();

    for (i, b) in stream.iter().enumerate() {
        r.extend(d.decompress(&[*b], Some(1)).unwrap());
        while !d.needs_input() {
            r.extend(d.decompress(&[], Some(1)).unwrap());
        }

        if i + 1 < stream.len() && d.at_frame_edge() {
            // only possible right at the end of the first frame
            assert_eq!(
                get_frame_size(&stream).unwrap(),
                i + 1,
                "edge in the middle of a frame"
            );
        }
    }

    assert_eq!(r, b"abcd");
    assert!(d.at_frame_edge());
}

#[test]
fn empty_input_frame() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    let frame = c.compress(b"", EndDirective::FlushFrame).unwrap();
    assert!(frame.len() >= 9);
    assert_eq!(get_frame_size(&frame).unwrap(), frame.len());
    assert!(decompress(&frame, &DecompressionConfig::default(), None)
        .unwrap()
        .is_empty());
}

#[test]
fn flush_block_and_frame_make_one_frame() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    let mut out = c.compress(b"abc", EndDirective::FlushBlock).unwrap();
    out.extend(c.compress(b"", EndDirective::FlushFrame).unwrap());

    assert_eq!(get_frame_size(&out).unwrap(), out.len());
    assert_eq!(
        decompress(&out, &DecompressionConfig::default(), None).unwrap(),
        b"abc"
    );
}

#[test]
fn trained_dictionary_in_every_mode() {
    let samples = records(3000);
    let dict = Arc::new(train_dictionary(&samples[..], 8 * 1024).unwrap());
    assert_ne!(dict.dict_id(), 0);

    let config = CompressionConfig::with_level(6);
    let payload: Vec<u8> = samples[100..140].concat();

    let modes: [fn(&Arc<ZstdDictionary>) -> DictionaryRef; 3] = [
        |d| d.as_digested(),
        |d| d.as_undigested(),
        |d| d.as_prefix(),
    ];

    for mode in modes {
        let frame = compress(&payload, &config, Some(mode(&dict))).unwrap();
        let r = decompress(&frame, &DecompressionConfig::default(), Some(mode(&dict))).unwrap();
        assert_eq!(r, payload);
    }

    // dictionaries help on small records
    let plain = compress(&samples[5], &config, None).unwrap();
    let with_dict = compress(&samples[5], &config, Some(dict.clone().into())).unwrap();
    assert!(with_dict.len() < plain.len());
    assert_eq!(get_frame_info(&with_dict).unwrap().dictionary_id, dict.dict_id());
}

#[test]
fn digested_dictionary_reuse() {
    let samples = records(3000);
    let dict = Arc::new(train_dictionary(&samples[..], 8 * 1024).unwrap());
    let config = CompressionConfig::with_level(4);
    let payload = samples[7].clone();

    let a = compress(&payload, &config, Some(dict.as_digested())).unwrap();
    let b = compress(&payload, &config, Some(dict.as_digested())).unwrap();
    assert_eq!(a, b);
    assert_eq!(dict.preparation_count(), 1);

    // a different level needs its own preparation
    compress(&payload, &CompressionConfig::with_level(9), Some(dict.as_digested())).unwrap();
    assert_eq!(dict.preparation_count(), 2);
}

#[test]
fn concurrent_sessions_share_a_dictionary() {
    let samples = records(3000);
    let dict = Arc::new(train_dictionary(&samples[..], 8 * 1024).unwrap());
    let config = CompressionConfig::with_level(3);

    std::thread::scope(|s| {
        for t in 0..4 {
            let dict = dict.clone();
            let samples = &samples;
            let config = &config;
            s.spawn(move || {
                for record in samples.iter().skip(t).step_by(50) {
                    let frame = compress(record, config, Some(dict.as_digested())).unwrap();
                    let r = decompress(&frame, &DecompressionConfig::default(), Some(dict.as_digested()))
                        .unwrap();
                    assert_eq!(&r, record);
                }
            });
        }
    });

    // one encoder handle for level 3 plus one decoder handle
    assert_eq!(dict.preparation_count(), 2);
}

#[test]
fn one_session_shared_between_threads() {
    let c = Arc::new(CompressionSession::new(&CompressionConfig::default(), None).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let c = c.clone();
            std::thread::spawn(move || {
                let data = text(5000, 100 + i);
                let frame = c.compress(&data, EndDirective::FlushFrame).unwrap();
                (data, frame)
            })
        })
        .collect();

    for h in handles {
        let (data, frame) = h.join().unwrap();
        assert_eq!(
            decompress(&frame, &DecompressionConfig::default(), None).unwrap(),
            data
        );
    }
}

#[test]
fn truncated_input_is_an_integrity_error() {
    let frame = compress(&text(10_000, 6), &CompressionConfig::default(), None).unwrap();
    let e = decompress(&frame[..frame.len() / 2], &DecompressionConfig::default(), None).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::IncompleteFrame);
}

#[test]
fn invalid_parameters_name_the_range() {
    let config = CompressionConfig::default().parameter(CParameter::WindowLog, 5);
    let e = CompressionSession::new(&config, None).err().unwrap();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
    assert!(e.message().contains("window_log"), "{}", e.message());
    assert!(e.message().contains("provided value is 5"), "{}", e.message());

    let info = codec_info();
    let e = CompressionSession::new(&CompressionConfig::with_level(info.max_level + 1), None)
        .err()
        .unwrap();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
}

#[test]
fn rich_mem_matches_streaming_decoder() {
    let c = RichMemCompressor::new(&CompressionConfig::with_level(2), None).unwrap();
    for seed in 0..5 {
        let data = text(20_000 * (seed as usize + 1), seed);
        let frame = c.compress(&data).unwrap();
        assert_eq!(get_frame_info(&frame).unwrap().decompressed_size, Some(data.len() as u64));

        let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
        assert_eq!(d.decompress(&frame, None).unwrap(), data);
        assert!(d.eof());
    }
}

#[test]
fn codec_information() {
    let info = codec_info();
    assert!(info.version.starts_with("1."));
    assert!(info.min_level < 0);
    assert!(info.max_level >= 19);
    assert_eq!(info.default_level, 3);
    assert!(info.multithread_supported);
}
