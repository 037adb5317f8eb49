/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Streaming decompression. One engine drives both the stop-at-frame and the
//! continuous variants; they only differ in what happens at a frame boundary.

use std::sync::{Arc, Mutex, PoisonError};

use zstd::zstd_safe::{self, DCtx, DDict, InBuffer, ResetDirective};

use crate::{
    dictionary::{DictionaryRef, ZstdDictionary},
    output_buffer::OutputBuffer,
    parameters::DecompressionConfig,
    session_error::{err_exit_code, ExitCode},
    utils::{lock, try_alloc_zeroed},
    Result, SessionError,
};

/// upper limit for preallocating output from the content size declared in a frame header
const MAX_SIZE_HINT: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopPolicy {
    /// freeze once the first frame has been fully decoded
    AtFrame,
    /// keep decoding frame after frame
    Continuous,
}

/// Input that was passed in but not consumed by the codec yet. Only the bytes
/// between `begin` and `end` are meaningful.
#[derive(Default)]
struct CarryBuffer {
    data: Vec<u8>,
    begin: usize,
    end: usize,
}

impl CarryBuffer {
    fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    fn pending(&self) -> &[u8] {
        &self.data[self.begin..self.end]
    }

    fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
    }

    fn consume(&mut self, n: usize) {
        self.begin += n;
        if self.begin == self.end {
            self.clear();
        }
    }

    /// replaces the pending bytes with `tail`
    fn store(&mut self, tail: &[u8]) -> Result<()> {
        if self.data.len() < tail.len() {
            // the old contents are dead, so drop them instead of copying them along
            self.data = try_alloc_zeroed(tail.len())?;
            log::trace!("carry buffer reallocated to {} bytes", tail.len());
        }

        self.data[..tail.len()].copy_from_slice(tail);
        self.begin = 0;
        self.end = tail.len();
        Ok(())
    }

    /// appends `more` after the pending bytes, compacting or reallocating as needed
    fn append(&mut self, more: &[u8]) -> Result<()> {
        let used = self.end - self.begin;
        let Some(needed) = used.checked_add(more.len()) else {
            return err_exit_code(ExitCode::AllocationFailed, "carry buffer size overflowed");
        };

        if self.data.len() < needed {
            let mut data = try_alloc_zeroed(needed)?;
            data[..used].copy_from_slice(self.pending());
            self.data = data;
            log::trace!("carry buffer reallocated to {} bytes", needed);
        } else if self.data.len() - self.end < more.len() {
            self.data.copy_within(self.begin..self.end, 0);
        } else {
            self.data[self.end..self.end + more.len()].copy_from_slice(more);
            self.end += more.len();
            return Ok(());
        }

        self.begin = 0;
        self.end = needed;
        self.data[used..needed].copy_from_slice(more);
        Ok(())
    }
}

struct DecoderState {
    dctx: DCtx<'static>,

    /// keeps the prepared dictionary alive while the context refers to it
    _ddict: Option<Arc<DDict<'static>>>,

    /// owner of the bytes a referenced prefix points into
    _prefix: Option<Arc<ZstdDictionary>>,

    /// a prefix is referenced and applies to the frame currently being decoded
    prefix_armed: bool,

    carry: CarryBuffer,
    needs_input: bool,
    eof: bool,
    at_frame_edge: bool,

    /// filled on first access once eof is set
    unused_data: Option<Vec<u8>>,
}

impl DecoderState {
    fn run(&mut self, policy: StopPolicy, data: &[u8], max_length: Option<usize>) -> Result<Vec<u8>> {
        let use_carry = !self.carry.is_empty();
        if use_carry {
            self.carry.append(data)?;
        }

        let size_hint = if policy == StopPolicy::Continuous && self.at_frame_edge && !use_carry {
            match zstd_safe::get_frame_content_size(data) {
                Ok(Some(size)) => usize::try_from(size.min(MAX_SIZE_HINT)).ok(),
                _ => None,
            }
        } else {
            None
        };

        let mut output = match size_hint {
            Some(size) => OutputBuffer::with_size(max_length, size)?,
            None => OutputBuffer::new(max_length)?,
        };

        let src: &[u8] = if use_carry { self.carry.pending() } else { data };
        let mut input = InBuffer::around(src);

        loop {
            let dctx = &mut self.dctx;
            let r = output.write_with(|out| {
                dctx.decompress_stream(out, &mut input)
                    .map_err(|code| SessionError::zstd("zstd decompress failed", code))
            });

            let remaining = match r {
                Ok(remaining) => remaining,
                Err(e) => {
                    output.discard();
                    return Err(e);
                }
            };

            // zero means the frame is complete and all of it has been written out
            if remaining == 0 && self.prefix_armed {
                self.dctx
                    .load_dictionary(&[])
                    .map_err(|code| SessionError::zstd("zstd prefix release failed", code))?;
                self.prefix_armed = false;
            }

            match policy {
                StopPolicy::AtFrame => {
                    if remaining == 0 {
                        self.eof = true;
                        break;
                    }
                }
                StopPolicy::Continuous => {
                    self.at_frame_edge = remaining == 0;
                    if self.at_frame_edge && input.pos() == src.len() {
                        break;
                    }
                }
            }

            if output.is_full() {
                if output.reached_max_length() {
                    break;
                }
                output.grow()?;
            } else if input.pos() == src.len() {
                break;
            }
        }

        let consumed = input.pos();
        let all_consumed = consumed == src.len();
        let hit_max = output.reached_max_length();

        if all_consumed {
            self.needs_input = match policy {
                StopPolicy::AtFrame => !(hit_max || self.eof),
                StopPolicy::Continuous => !(hit_max && !self.at_frame_edge),
            };
            self.carry.clear();
        } else {
            self.needs_input = false;
            if policy == StopPolicy::Continuous {
                self.at_frame_edge = false;
            }

            if use_carry {
                self.carry.consume(consumed);
            } else {
                self.carry.store(&data[consumed..])?;
            }
        }

        output.finish()
    }

    /// back to the state of a freshly created session, keeping parameters and
    /// any dictionary that applies to every frame
    fn reset(&mut self) -> Result<()> {
        self.dctx
            .reset(ResetDirective::SessionOnly)
            .map_err(|code| SessionError::zstd("zstd decompressor reset failed", code))?;

        if self.prefix_armed {
            self.dctx
                .load_dictionary(&[])
                .map_err(|code| SessionError::zstd("zstd prefix release failed", code))?;
            self.prefix_armed = false;
        }

        self.carry = CarryBuffer::default();
        self.needs_input = true;
        self.eof = false;
        self.at_frame_edge = true;
        self.unused_data = None;
        Ok(())
    }
}

/// The decompression engine shared by [`FrameDecompressor`] and [`EndlessDecompressor`].
pub(crate) struct DecompressionSession {
    policy: StopPolicy,
    state: Mutex<DecoderState>,
}

impl DecompressionSession {
    pub(crate) fn new(
        policy: StopPolicy,
        config: &DecompressionConfig,
        dictionary: Option<DictionaryRef>,
    ) -> Result<Self> {
        let Some(mut dctx) = DCtx::try_create() else {
            return err_exit_code(
                ExitCode::AllocationFailed,
                "unable to create a zstd decompression context",
            );
        };

        config.apply(&mut dctx)?;

        let mut ddict = None;
        let mut prefix = None;

        if let Some(dictionary) = &dictionary {
            let d = dictionary.dictionary();
            match dictionary {
                DictionaryRef::Digested(_) => {
                    let handle = d.decoder_handle()?;
                    dctx.ref_ddict(&handle)
                        .map_err(|code| SessionError::zstd("zstd dictionary reference failed", code))?;
                    ddict = Some(handle);
                }
                DictionaryRef::Undigested(_) => {
                    dctx.load_dictionary(d.content())
                        .map_err(|code| SessionError::zstd("zstd dictionary load failed", code))?;
                }
                DictionaryRef::Prefix(_) => {
                    let content = d.content();
                    // SAFETY: the content of a ZstdDictionary is never modified or moved, and
                    // the Arc kept in `_prefix` is dropped after `dctx`, which is declared first
                    let content: &'static [u8] =
                        unsafe { std::slice::from_raw_parts(content.as_ptr(), content.len()) };
                    dctx.ref_prefix(content)
                        .map_err(|code| SessionError::zstd("zstd prefix reference failed", code))?;
                    prefix = Some(Arc::clone(d));
                }
            }
        }

        log::debug!(
            "zstd decompression session {:?} dictionary {}",
            policy,
            dictionary
                .as_ref()
                .map_or("none".to_string(), |d| format!(
                    "{} id {}",
                    d.mode_name(),
                    d.dictionary().dict_id()
                ))
        );

        Ok(DecompressionSession {
            policy,
            state: Mutex::new(DecoderState {
                dctx,
                _ddict: ddict,
                prefix_armed: prefix.is_some(),
                _prefix: prefix,
                carry: CarryBuffer::default(),
                needs_input: true,
                eof: false,
                at_frame_edge: true,
                unused_data: None,
            }),
        })
    }

    pub(crate) fn decompress(&self, data: &[u8], max_length: Option<usize>) -> Result<Vec<u8>> {
        let mut guard = lock(&self.state)?;
        let state = &mut *guard;

        match self.policy {
            StopPolicy::AtFrame if state.eof => {
                return err_exit_code(
                    ExitCode::InvalidState,
                    "already at the end of a zstd frame",
                );
            }
            StopPolicy::Continuous
                if state.at_frame_edge && state.carry.is_empty() && data.is_empty() =>
            {
                return Ok(Vec::new());
            }
            _ => {}
        }

        match state.run(self.policy, data, max_length) {
            Ok(r) => Ok(r),
            Err(e) => {
                log::debug!("resetting zstd decompression session after error: {}", e);
                if let Err(reset_err) = state.reset() {
                    log::warn!("zstd decompression session reset failed: {}", reset_err);
                }
                Err(e)
            }
        }
    }

    pub(crate) fn reset_session(&self) -> Result<()> {
        lock(&self.state)?.reset()
    }

    /// reads session flags. These stay meaningful even if a panic poisoned the lock.
    fn with_state<T>(&self, f: impl FnOnce(&mut DecoderState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// Decompresses exactly one frame, then stops. Anything after the frame is
/// available through [`FrameDecompressor::unused_data`].
pub struct FrameDecompressor {
    session: DecompressionSession,
}

impl FrameDecompressor {
    pub fn new(config: &DecompressionConfig, dictionary: Option<DictionaryRef>) -> Result<Self> {
        Ok(FrameDecompressor {
            session: DecompressionSession::new(StopPolicy::AtFrame, config, dictionary)?,
        })
    }

    /// Decompresses `data` together with any input left over from the previous
    /// call. With `max_length` set, at most that many bytes are returned and the
    /// remaining input is kept for the next call.
    pub fn decompress(&self, data: &[u8], max_length: Option<usize>) -> Result<Vec<u8>> {
        self.session.decompress(data, max_length)
    }

    /// true once the frame has been completely decoded
    pub fn eof(&self) -> bool {
        self.session.with_state(|s| s.eof)
    }

    /// false if more output can be produced without passing in more input
    pub fn needs_input(&self) -> bool {
        self.session.with_state(|s| s.needs_input)
    }

    /// Bytes that followed the end of the frame. Empty until `eof` is set.
    pub fn unused_data(&self) -> Vec<u8> {
        self.session.with_state(|s| {
            if !s.eof {
                return Vec::new();
            }

            let carry = &s.carry;
            s.unused_data
                .get_or_insert_with(|| carry.pending().to_vec())
                .clone()
        })
    }

    /// Forgets all buffered input and state so the decompressor can start on an
    /// unrelated stream. Parameters and the dictionary are kept.
    pub fn reset_session(&self) -> Result<()> {
        self.session.reset_session()
    }
}

/// Decompresses any number of concatenated frames.
pub struct EndlessDecompressor {
    session: DecompressionSession,
}

impl EndlessDecompressor {
    pub fn new(config: &DecompressionConfig, dictionary: Option<DictionaryRef>) -> Result<Self> {
        Ok(EndlessDecompressor {
            session: DecompressionSession::new(StopPolicy::Continuous, config, dictionary)?,
        })
    }

    pub fn decompress(&self, data: &[u8], max_length: Option<usize>) -> Result<Vec<u8>> {
        self.session.decompress(data, max_length)
    }

    /// true if all input so far has been consumed and ends exactly at the end of a frame
    pub fn at_frame_edge(&self) -> bool {
        self.session.with_state(|s| s.at_frame_edge)
    }

    pub fn needs_input(&self) -> bool {
        self.session.with_state(|s| s.needs_input)
    }

    pub fn reset_session(&self) -> Result<()> {
        self.session.reset_session()
    }
}

/// Decompresses a buffer holding one or more complete frames.
pub fn decompress(
    data: &[u8],
    config: &DecompressionConfig,
    dictionary: Option<DictionaryRef>,
) -> Result<Vec<u8>> {
    let decompressor = EndlessDecompressor::new(config, dictionary)?;
    let r = decompressor.decompress(data, None)?;

    if !decompressor.at_frame_edge() {
        return err_exit_code(
            ExitCode::IncompleteFrame,
            "zstd data ends in an incomplete frame, maybe the input data was truncated",
        );
    }

    Ok(r)
}

#[cfg(test)]
fn frame_of(data: &[u8]) -> Vec<u8> {
    zstd::bulk::compress(data, 3).unwrap()
}

#[cfg(test)]
fn drain_frame(d: &FrameDecompressor, first: &[u8], max_length: Option<usize>) -> Vec<u8> {
    let mut r = d.decompress(first, max_length).unwrap();
    while !d.eof() && !d.needs_input() {
        r.extend(d.decompress(b"", max_length).unwrap());
    }
    r
}

#[test]
fn carry_buffer_compacts_and_grows() {
    let mut c = CarryBuffer::default();
    c.store(b"abcdef").unwrap();
    assert_eq!(c.pending(), b"abcdef");

    c.consume(4);
    assert_eq!(c.pending(), b"ef");

    // fits after compaction, no reallocation
    c.append(b"ghij").unwrap();
    assert_eq!(c.pending(), b"efghij");
    assert_eq!(c.data.len(), 6);

    c.consume(1);
    c.append(b"klmnop").unwrap();
    assert_eq!(c.pending(), b"fghijklmnop");

    c.consume(11);
    assert!(c.is_empty());
    assert_eq!((c.begin, c.end), (0, 0));

    // a smaller tail reuses the existing allocation
    c.store(b"xy").unwrap();
    assert_eq!(c.pending(), b"xy");
    assert_eq!(c.data.len(), 11);
}

#[test]
fn single_frame_round_trip() {
    crate::init_logging();

    let data = crate::utils::sample_text(100_000, 1);
    let frame = frame_of(&data);

    let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    assert!(!d.eof());
    assert!(d.needs_input());

    let r = d.decompress(&frame, None).unwrap();
    crate::utils::assert_eq_array(&data, &r);
    assert!(d.eof());
    assert!(!d.needs_input());
    assert!(d.unused_data().is_empty());

    let e = d.decompress(b"", None).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidState);
}

#[test]
fn output_is_capped_at_max_length() {
    let data = crate::utils::sample_text(100_000, 2);
    let frame = frame_of(&data);

    let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let mut r = d.decompress(&frame, Some(1000)).unwrap();
    assert_eq!(r.len(), 1000);
    assert!(!d.needs_input());

    while !d.eof() {
        assert!(!d.needs_input());
        let chunk = d.decompress(b"", Some(1000)).unwrap();
        assert!(chunk.len() <= 1000);
        r.extend(chunk);
    }

    crate::utils::assert_eq_array(&data, &r);
}

#[test]
fn split_at_every_offset() {
    let data = crate::utils::sample_text(3000, 3);
    let frame = frame_of(&data);

    for split in 0..=frame.len() {
        let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
        let mut r = d.decompress(&frame[..split], None).unwrap();
        if !d.eof() {
            r.extend(d.decompress(&frame[split..], None).unwrap());
        }
        assert!(d.eof(), "split at {}", split);
        assert_eq!(r, data, "split at {}", split);

        let e = EndlessDecompressor::new(&DecompressionConfig::default(), None).unwrap();
        let mut r = e.decompress(&frame[..split], None).unwrap();
        if split > 0 {
            assert_eq!(e.at_frame_edge(), split == frame.len());
        }
        r.extend(e.decompress(&frame[split..], None).unwrap());
        assert!(e.at_frame_edge());
        assert_eq!(r, data, "split at {}", split);
    }
}

#[test]
fn unused_data_after_frame() {
    let frame = frame_of(b"hello hello hello");
    let mut input = frame.clone();
    input.extend_from_slice(b"trailing garbage");

    let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    assert_eq!(d.decompress(&input, None).unwrap(), b"hello hello hello");
    assert!(d.eof());
    assert_eq!(d.unused_data(), b"trailing garbage");
    // cached, same answer twice
    assert_eq!(d.unused_data(), b"trailing garbage");

    // same thing with the frame split so the tail comes through the carry buffer
    let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let mut r = d.decompress(&input[..5], None).unwrap();
    assert!(d.unused_data().is_empty());
    r.extend(d.decompress(&input[5..], None).unwrap());
    assert_eq!(r, b"hello hello hello");
    assert_eq!(d.unused_data(), b"trailing garbage");
}

#[test]
fn unused_data_waits_for_drained_output() {
    let data = crate::utils::sample_text(10_000, 4);
    let mut input = frame_of(&data);
    input.extend_from_slice(b"next");

    let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let r = drain_frame(&d, &input, Some(100));
    assert_eq!(r, data);
    assert!(d.eof());
    assert_eq!(d.unused_data(), b"next");
}

#[test]
fn corrupt_input_resets_session() {
    crate::init_logging();

    let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let e = d.decompress(b"this is definitely not zstd data", None).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ZstdError);
    assert!(e.message().starts_with("zstd decompress failed"), "{}", e);
    assert!(!d.eof());
    assert!(d.needs_input());

    // usable again without any further cleanup
    let frame = frame_of(b"recovered");
    assert_eq!(d.decompress(&frame, None).unwrap(), b"recovered");
    assert!(d.eof());

    let e = EndlessDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    e.decompress(&frame[..4], None).unwrap();
    assert!(!e.at_frame_edge());
    assert!(e.decompress(&[0xff; 64], None).is_err());
    assert!(e.at_frame_edge());
    assert_eq!(e.decompress(&frame, None).unwrap(), b"recovered");
}

#[test]
fn explicit_reset_session() {
    let frame = frame_of(b"first stream");

    let d = FrameDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    d.decompress(&frame[..frame.len() - 2], None).unwrap();
    d.reset_session().unwrap();
    assert!(d.needs_input());
    assert!(!d.eof());
    assert_eq!(d.decompress(&frame, None).unwrap(), b"first stream");

    d.reset_session().unwrap();
    assert!(!d.eof());
    assert_eq!(d.decompress(&frame, None).unwrap(), b"first stream");
}

#[test]
fn continuous_across_frames() {
    let mut input = Vec::new();
    let mut expected = Vec::new();
    for i in 0..5 {
        let data = crate::utils::sample_text(5000 + i * 100, i as u64);
        input.extend(frame_of(&data));
        expected.extend(data);
    }

    let e = EndlessDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let r = e.decompress(&input, None).unwrap();
    crate::utils::assert_eq_array(&expected, &r);
    assert!(e.at_frame_edge());
    assert!(e.needs_input());

    // nothing pending at a frame edge, so this does not touch the codec
    assert!(e.decompress(b"", None).unwrap().is_empty());
    assert!(e.at_frame_edge());
}

#[test]
fn continuous_byte_by_byte_with_tiny_output() {
    let mut input = frame_of(b"ab");
    let first_len = input.len();
    input.extend(frame_of(b"cd"));

    let e = EndlessDecompressor::new(&DecompressionConfig::default(), None).unwrap();
    let mut r = Vec::new();
    let mut edges = 0;
    let mut was_at_edge = true;

    for (i, b) in input.iter().enumerate() {
        r.extend(e.decompress(&[*b], Some(1)).unwrap());
        if i == 0 || i == first_len {
            assert!(!e.at_frame_edge(), "edge right after starting a frame at {}", i);
        }

        loop {
            if e.at_frame_edge() && !was_at_edge {
                edges += 1;
            }
            was_at_edge = e.at_frame_edge();

            if e.needs_input() {
                break;
            }
            let chunk = e.decompress(b"", Some(1)).unwrap();
            assert!(chunk.len() <= 1);
            r.extend(chunk);
        }
    }

    assert_eq!(r, b"abcd");
    assert!(e.at_frame_edge());
    assert_eq!(edges, 2);
}

#[test]
fn window_log_max_is_enforced() {
    use crate::parameters::DParameter;

    let data = crate::utils::sample_text(1 << 20, 5);
    let frame = frame_of(&data);

    let config = DecompressionConfig::default().parameter(DParameter::WindowLogMax, 10);
    let d = FrameDecompressor::new(&config, None).unwrap();
    let e = d.decompress(&frame, None).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ZstdError);

    let config = DecompressionConfig::default().parameter(DParameter::WindowLogMax, 27);
    let d = FrameDecompressor::new(&config, None).unwrap();
    assert_eq!(d.decompress(&frame, None).unwrap().len(), 1 << 20);
}

#[test]
fn dictionary_attach_modes() {
    use crate::dictionary::{raw_dictionary, DictionaryAttach};

    let dict = raw_dictionary();
    let data = crate::utils::sample_text(20_000, 6);
    let frame = zstd::bulk::Compressor::with_dictionary(3, dict.content())
        .unwrap()
        .compress(&data)
        .unwrap();

    for attach in [dict.as_digested(), dict.as_undigested()] {
        let e = EndlessDecompressor::new(&DecompressionConfig::default(), Some(attach)).unwrap();

        // the dictionary applies to every frame
        let mut twice = frame.clone();
        twice.extend_from_slice(&frame);
        let r = e.decompress(&twice, None).unwrap();
        assert_eq!(r.len(), 2 * data.len());
        assert_eq!(&r[..data.len()], &data[..]);
        assert_eq!(&r[data.len()..], &data[..]);
    }

    // the digested handle was prepared once and is shared from then on
    let before = dict.preparation_count();
    let _d = FrameDecompressor::new(&DecompressionConfig::default(), Some(dict.as_digested())).unwrap();
    assert_eq!(dict.preparation_count(), before);
}

#[test]
fn prefix_frames_from_the_codec() {
    use crate::dictionary::{sample_records, DictionaryAttach};

    let samples = sample_records(2000);
    let dict = Arc::new(crate::train_dictionary(&samples[..], 4096).unwrap());
    let payload = samples[30..40].concat();

    let mut cctx = zstd_safe::CCtx::create();
    cctx.ref_prefix(dict.content()).unwrap();
    let mut frame = Vec::with_capacity(zstd_safe::compress_bound(payload.len()));
    cctx.compress2(&mut frame, &payload).unwrap();
    assert_eq!(crate::get_frame_info(&frame).unwrap().dictionary_id, 0);

    let d = FrameDecompressor::new(&DecompressionConfig::default(), Some(dict.as_prefix())).unwrap();
    assert_eq!(d.decompress(&frame, None).unwrap(), payload);
    assert!(d.eof());

    // a frame written without the prefix follows, which must not see it
    let plain = frame_of(&payload);
    let mut both = frame.clone();
    both.extend_from_slice(&plain);
    let e = EndlessDecompressor::new(&DecompressionConfig::default(), Some(dict.as_prefix())).unwrap();
    let r = e.decompress(&both, None).unwrap();
    assert_eq!(r.len(), 2 * payload.len());
    assert_eq!(&r[payload.len()..], &payload[..]);
    assert!(e.at_frame_edge());
}

#[test]
fn one_shot_decompress() {
    let frame = frame_of(b"one shot");
    let mut two = frame.clone();
    two.extend_from_slice(&frame);

    let config = DecompressionConfig::default();
    assert_eq!(decompress(&two, &config, None).unwrap(), b"one shotone shot");
    assert!(decompress(b"", &config, None).unwrap().is_empty());

    let e = decompress(&frame[..frame.len() - 1], &config, None).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::IncompleteFrame);
}

#[test]
fn sessions_are_send_and_sync() {
    fn check<T: Send + Sync>() {}
    check::<FrameDecompressor>();
    check::<EndlessDecompressor>();
}
