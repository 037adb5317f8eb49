/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Streaming compression with explicit control over where blocks and frames end.

use std::sync::{Arc, Mutex, PoisonError};

use zstd::zstd_safe::{self, zstd_sys, CCtx, CDict, InBuffer, ResetDirective};

use crate::{
    dictionary::{DictionaryRef, ZstdDictionary},
    output_buffer::OutputBuffer,
    parameters::{CParameter, CompressionConfig},
    session_error::{err_exit_code, ExitCode},
    utils::lock,
    Result, SessionError,
};

/// What to do with the data buffered inside the encoder at the end of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndDirective {
    /// Collect more data, the encoder decides when to emit a block. Best ratio.
    Continue,

    /// Emit everything received so far as a complete block. The output can be
    /// decoded up to this point, and the frame stays open.
    FlushBlock,

    /// Emit everything and close the frame. The next call starts a new frame.
    FlushFrame,
}

impl EndDirective {
    fn as_sys(self) -> zstd_sys::ZSTD_EndDirective {
        match self {
            EndDirective::Continue => zstd_sys::ZSTD_EndDirective::ZSTD_e_continue,
            EndDirective::FlushBlock => zstd_sys::ZSTD_EndDirective::ZSTD_e_flush,
            EndDirective::FlushFrame => zstd_sys::ZSTD_EndDirective::ZSTD_e_end,
        }
    }
}

struct EncoderState {
    cctx: CCtx<'static>,

    /// keeps the prepared dictionary alive while the context refers to it
    _cdict: Option<Arc<CDict<'static>>>,

    /// owner of the bytes a referenced prefix points into
    _prefix: Option<Arc<ZstdDictionary>>,

    /// a prefix is referenced and applies to the current or next frame
    prefix_armed: bool,

    last_mode: EndDirective,

    /// expected size of the current or next frame, if the caller announced one
    pledged: Option<u64>,
}

impl EncoderState {
    fn run(
        &mut self,
        data: &[u8],
        mode: EndDirective,
        use_multithread: bool,
        output: OutputBuffer,
    ) -> Result<Vec<u8>> {
        let r = if use_multithread && mode == EndDirective::Continue {
            self.drain_multithread(data, output)
        } else {
            self.drain(data, mode, output)
        };

        match r {
            Ok(r) => {
                self.last_mode = mode;
                if mode == EndDirective::FlushFrame {
                    self.frame_closed()?;
                }
                Ok(r)
            }
            Err(e) => {
                self.recover(&e);
                Err(e)
            }
        }
    }

    /// resets after a failed call, a failing reset is only logged
    fn recover(&mut self, e: &SessionError) {
        log::debug!(
            "resetting zstd compression session after error (pledged size {:?}): {}",
            self.pledged,
            e
        );
        if let Err(reset_err) = self.reset() {
            log::warn!("zstd compression session reset failed: {}", reset_err);
        }
    }

    /// compresses `data` as one frame straight into the spare capacity of `output`
    fn compress_whole(&mut self, data: &[u8], output: &mut Vec<u8>) -> Result<()> {
        match self.cctx.compress2(output, data) {
            Ok(_) => {
                self.last_mode = EndDirective::FlushFrame;
                self.frame_closed()
            }
            Err(code) => {
                let e = SessionError::zstd("zstd compress failed", code);
                self.recover(&e);
                Err(e)
            }
        }
    }

    fn step(
        &mut self,
        output: &mut OutputBuffer,
        input: &mut InBuffer<'_>,
        mode: EndDirective,
    ) -> Result<usize> {
        let cctx = &mut self.cctx;
        output.write_with(|out| {
            cctx.compress_stream2(out, input, mode.as_sys())
                .map_err(|code| SessionError::zstd("zstd compress failed", code))
        })
    }

    fn drain(&mut self, data: &[u8], mode: EndDirective, mut output: OutputBuffer) -> Result<Vec<u8>> {
        let mut input = InBuffer::around(data);

        loop {
            let remaining = self.step(&mut output, &mut input, mode)?;

            let done = match mode {
                EndDirective::Continue => input.pos() == data.len(),
                EndDirective::FlushBlock | EndDirective::FlushFrame => remaining == 0,
            };
            if done {
                break;
            }

            if output.is_full() {
                output.grow()?;
            }
        }

        output.finish()
    }

    /// Worker threads hand back output one job at a time, so keep calling until
    /// the input is gone and nothing more is ready, rather than stopping at the
    /// first call that consumed everything.
    fn drain_multithread(&mut self, data: &[u8], mut output: OutputBuffer) -> Result<Vec<u8>> {
        let mut input = InBuffer::around(data);

        loop {
            loop {
                self.step(&mut output, &mut input, EndDirective::Continue)?;
                if output.is_full() || input.pos() == data.len() {
                    break;
                }
            }

            if output.is_full() {
                output.grow()?;
            } else if input.pos() == data.len() {
                break;
            }
        }

        output.finish()
    }

    /// the pledged size and a prefix both only applied to the frame that just ended
    fn frame_closed(&mut self) -> Result<()> {
        self.pledged = None;
        self.release_prefix()
    }

    fn release_prefix(&mut self) -> Result<()> {
        if self.prefix_armed {
            self.cctx
                .load_dictionary(&[])
                .map_err(|code| SessionError::zstd("zstd prefix release failed", code))?;
            self.prefix_armed = false;
        }
        Ok(())
    }

    /// drops any half written frame so the next call starts cleanly
    fn reset(&mut self) -> Result<()> {
        self.last_mode = EndDirective::FlushFrame;
        self.pledged = None;
        self.cctx
            .reset(ResetDirective::SessionOnly)
            .map_err(|code| SessionError::zstd("zstd compressor reset failed", code))?;
        self.release_prefix()
    }
}

/// A compression session. Thread safe, calls from different threads are serialized.
pub struct CompressionSession {
    state: Mutex<EncoderState>,
    level: i32,
    use_multithread: bool,
}

impl CompressionSession {
    pub fn new(config: &CompressionConfig, dictionary: Option<DictionaryRef>) -> Result<Self> {
        let Some(mut cctx) = CCtx::try_create() else {
            return err_exit_code(
                ExitCode::AllocationFailed,
                "unable to create a zstd compression context",
            );
        };

        config.apply(&mut cctx)?;

        let level = config.effective_level();
        let use_multithread = config.nb_workers() > 0;

        let mut cdict = None;
        let mut prefix = None;

        if let Some(dictionary) = &dictionary {
            let d = dictionary.dictionary();
            match dictionary {
                DictionaryRef::Digested(_) => {
                    let handle = d.encoder_handle(level)?;
                    cctx.ref_cdict(&handle)
                        .map_err(|code| SessionError::zstd("zstd dictionary reference failed", code))?;
                    cdict = Some(handle);
                }
                DictionaryRef::Undigested(_) => {
                    cctx.load_dictionary(d.content())
                        .map_err(|code| SessionError::zstd("zstd dictionary load failed", code))?;
                }
                DictionaryRef::Prefix(_) => {
                    let content = d.content();
                    // SAFETY: the content of a ZstdDictionary is never modified or moved, and
                    // the Arc kept in `_prefix` is dropped after `cctx`, which is declared first
                    let content: &'static [u8] =
                        unsafe { std::slice::from_raw_parts(content.as_ptr(), content.len()) };
                    cctx.ref_prefix(content)
                        .map_err(|code| SessionError::zstd("zstd prefix reference failed", code))?;
                    prefix = Some(Arc::clone(d));
                }
            }
        }

        log::debug!(
            "zstd compression session level {} workers {} dictionary {}",
            level,
            config.nb_workers(),
            dictionary
                .as_ref()
                .map_or("none".to_string(), |d| format!(
                    "{} id {}",
                    d.mode_name(),
                    d.dictionary().dict_id()
                ))
        );

        Ok(CompressionSession {
            state: Mutex::new(EncoderState {
                cctx,
                _cdict: cdict,
                prefix_armed: prefix.is_some(),
                _prefix: prefix,
                last_mode: EndDirective::FlushFrame,
                pledged: None,
            }),
            level,
            use_multithread,
        })
    }

    /// Compresses `data` and returns whatever output the encoder produced.
    /// With `Continue` that may well be nothing.
    pub fn compress(&self, data: &[u8], mode: EndDirective) -> Result<Vec<u8>> {
        let mut state = lock(&self.state)?;
        let output = OutputBuffer::new(None)?;
        state.run(data, mode, self.use_multithread, output)
    }

    /// Same as compressing empty input, except that repeating the mode of the
    /// previous call does nothing. Flushing twice never emits an empty block or frame.
    pub fn flush(&self, mode: EndDirective) -> Result<Vec<u8>> {
        if mode == EndDirective::Continue {
            return err_exit_code(
                ExitCode::InvalidParameter,
                "flush mode should be FlushBlock or FlushFrame",
            );
        }

        let mut state = lock(&self.state)?;
        if state.last_mode == mode {
            return Ok(Vec::new());
        }

        let output = OutputBuffer::new(None)?;
        state.run(b"", mode, self.use_multithread, output)
    }

    /// mode of the last successful call, FlushFrame initially and after an error
    pub fn last_mode(&self) -> EndDirective {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last_mode
    }

    /// Announces the exact uncompressed size of the next frame, which is then
    /// written into its header. Only possible between frames; the value applies
    /// to that one frame. Compressing a different amount fails the frame.
    pub fn set_pledged_input_size(&self, size: Option<u64>) -> Result<()> {
        let mut state = lock(&self.state)?;
        if state.last_mode != EndDirective::FlushFrame {
            return err_exit_code(
                ExitCode::InvalidState,
                "the pledged input size can only be set between frames, flush the current frame first",
            );
        }

        state
            .cctx
            .set_pledged_src_size(size)
            .map_err(|code| SessionError::zstd("zstd pledged size rejected", code))?;
        state.pledged = size;
        Ok(())
    }

    /// level used by the encoder and for preparing digested dictionaries
    pub fn compression_level(&self) -> i32 {
        self.level
    }

    pub fn is_multithreaded(&self) -> bool {
        self.use_multithread
    }
}

/// Compresses every input as one complete frame into an output buffer sized
/// for the worst case up front, trading memory for speed.
pub struct RichMemCompressor {
    session: CompressionSession,
}

impl RichMemCompressor {
    pub fn new(config: &CompressionConfig, dictionary: Option<DictionaryRef>) -> Result<Self> {
        let session = if config.nb_workers() > 0 {
            log::warn!(
                "rich memory compression does not use worker threads, ignoring {} requested workers",
                config.nb_workers()
            );
            let single = config.clone().parameter(CParameter::NbWorkers, 0);
            CompressionSession::new(&single, dictionary)?
        } else {
            CompressionSession::new(config, dictionary)?
        };

        Ok(RichMemCompressor { session })
    }

    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut state = lock(&self.session.state)?;
        let mut output = Vec::new();
        output.try_reserve_exact(zstd_safe::compress_bound(data.len()))?;
        state.compress_whole(data, &mut output)?;
        Ok(output)
    }

    pub fn compression_level(&self) -> i32 {
        self.session.compression_level()
    }
}

/// Compresses `data` into a single frame.
pub fn compress(
    data: &[u8],
    config: &CompressionConfig,
    dictionary: Option<DictionaryRef>,
) -> Result<Vec<u8>> {
    CompressionSession::new(config, dictionary)?.compress(data, EndDirective::FlushFrame)
}

#[cfg(test)]
fn decompress_all(data: &[u8]) -> Vec<u8> {
    crate::decompress(data, &Default::default(), None).unwrap()
}

#[test]
fn flush_frame_is_idempotent() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    assert_eq!(c.last_mode(), EndDirective::FlushFrame);

    let mut out = c.compress(b"some data", EndDirective::Continue).unwrap();
    assert_eq!(c.last_mode(), EndDirective::Continue);

    out.extend(c.flush(EndDirective::FlushFrame).unwrap());
    assert!(!out.is_empty());
    assert!(c.flush(EndDirective::FlushFrame).unwrap().is_empty());
    assert_eq!(decompress_all(&out), b"some data");

    let mut out = c.compress(b"more", EndDirective::FlushBlock).unwrap();
    assert!(c.flush(EndDirective::FlushBlock).unwrap().is_empty());
    out.extend(c.flush(EndDirective::FlushFrame).unwrap());
    assert_eq!(decompress_all(&out), b"more");
}

#[test]
fn flush_rejects_continue() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    let e = c.flush(EndDirective::Continue).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
}

#[test]
fn empty_frame() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    let frame = c.compress(b"", EndDirective::FlushFrame).unwrap();
    assert!(frame.len() >= 9);
    assert!(decompress_all(&frame).is_empty());
}

#[test]
fn flush_block_then_frame_is_one_frame() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    let mut out = c.compress(b"abc", EndDirective::FlushBlock).unwrap();

    // the block is decodable on its own before the frame is closed
    let partial = crate::EndlessDecompressor::new(&Default::default(), None).unwrap();
    assert_eq!(partial.decompress(&out, None).unwrap(), b"abc");
    assert!(!partial.at_frame_edge());

    out.extend(c.compress(b"", EndDirective::FlushFrame).unwrap());

    let d = crate::FrameDecompressor::new(&Default::default(), None).unwrap();
    assert_eq!(d.decompress(&out, None).unwrap(), b"abc");
    assert!(d.eof());
    assert!(d.unused_data().is_empty());
}

#[test]
fn pledged_size_lands_in_the_header() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    c.set_pledged_input_size(Some(3)).unwrap();

    let mut frame = c.compress(b"a", EndDirective::Continue).unwrap();
    frame.extend(c.compress(b"bc", EndDirective::FlushFrame).unwrap());
    assert_eq!(zstd_safe::get_frame_content_size(&frame).unwrap(), Some(3));
    assert_eq!(decompress_all(&frame), b"abc");

    // the pledge covered one frame only
    let mut frame = c.compress(b"abcd", EndDirective::Continue).unwrap();
    frame.extend(c.flush(EndDirective::FlushFrame).unwrap());
    assert_eq!(zstd_safe::get_frame_content_size(&frame).unwrap(), None);
    assert_eq!(decompress_all(&frame), b"abcd");
}

#[test]
fn pledged_size_only_between_frames() {
    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    c.compress(b"abc", EndDirective::Continue).unwrap();
    let e = c.set_pledged_input_size(Some(3)).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidState);

    c.compress(b"abc", EndDirective::FlushBlock).unwrap();
    assert!(c.set_pledged_input_size(Some(3)).is_err());

    c.flush(EndDirective::FlushFrame).unwrap();
    c.set_pledged_input_size(None).unwrap();
}

#[test]
fn pledged_size_mismatch_resets_session() {
    crate::init_logging();

    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    c.set_pledged_input_size(Some(10)).unwrap();
    c.compress(b"abc", EndDirective::Continue).unwrap();

    let e = c.flush(EndDirective::FlushFrame).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ZstdError);
    assert!(e.message().starts_with("zstd compress failed"), "{}", e);
    assert_eq!(c.last_mode(), EndDirective::FlushFrame);

    let frame = c.compress(b"abc", EndDirective::FlushFrame).unwrap();
    assert_eq!(decompress_all(&frame), b"abc");
}

#[test]
fn multithreaded_round_trip() {
    crate::init_logging();

    // several times the job size of level 1, so workers finish jobs while input keeps coming
    let data = crate::utils::sample_random(16 * 1024 * 1024, 10);
    let config = CompressionConfig::with_level(1).parameter(CParameter::NbWorkers, 2);

    let c = CompressionSession::new(&config, None).unwrap();
    assert!(c.is_multithreaded());

    let mut out = Vec::new();
    for chunk in data.chunks(1024 * 1024) {
        out.extend(c.compress(chunk, EndDirective::Continue).unwrap());
    }

    // finished jobs were handed back by Continue calls instead of piling up until the flush
    let before_flush = out.len();
    assert!(before_flush > 0);

    out.extend(c.flush(EndDirective::FlushFrame).unwrap());
    assert!(out.len() > before_flush);

    crate::utils::assert_eq_array(&data, &decompress_all(&out));
}

#[test]
fn level_is_cached_for_dictionaries() {
    let c = CompressionSession::new(&CompressionConfig::with_level(7), None).unwrap();
    assert_eq!(c.compression_level(), 7);
    assert!(!c.is_multithreaded());

    let config = CompressionConfig::with_level(7).parameter(CParameter::CompressionLevel, 12);
    let c = CompressionSession::new(&config, None).unwrap();
    assert_eq!(c.compression_level(), 12);

    let c = CompressionSession::new(&CompressionConfig::default(), None).unwrap();
    assert_eq!(c.compression_level(), zstd::DEFAULT_COMPRESSION_LEVEL);
}

#[test]
fn digested_dictionary_is_prepared_once() {
    use crate::dictionary::{raw_dictionary, DictionaryAttach};

    let dict = raw_dictionary();
    let data = crate::utils::sample_text(50_000, 11);
    let config = CompressionConfig::with_level(5);

    let a = compress(&data, &config, Some(dict.as_digested())).unwrap();
    let b = compress(&data, &config, Some(dict.as_digested())).unwrap();
    assert_eq!(a, b);
    assert_eq!(dict.preparation_count(), 1);

    let r = crate::decompress(&a, &Default::default(), Some(dict.as_digested())).unwrap();
    crate::utils::assert_eq_array(&data, &r);
}

#[test]
fn undigested_dictionary_round_trip() {
    use crate::dictionary::{raw_dictionary, DictionaryAttach};

    let dict = raw_dictionary();
    let data = crate::utils::sample_text(50_000, 12);

    let c = CompressionSession::new(&CompressionConfig::default(), Some(dict.as_undigested())).unwrap();
    let mut out = c.compress(&data, EndDirective::FlushFrame).unwrap();
    out.extend(c.compress(&data, EndDirective::FlushFrame).unwrap());
    assert_eq!(dict.preparation_count(), 0);

    let r = crate::decompress(&out, &Default::default(), Some(dict.as_undigested())).unwrap();
    assert_eq!(r.len(), 2 * data.len());
    assert_eq!(&r[data.len()..], &data[..]);
}

#[test]
fn prefix_applies_to_one_frame() {
    use crate::dictionary::{raw_dictionary, DictionaryAttach};

    let dict = raw_dictionary();
    let data = crate::utils::sample_text(20_000, 13);

    let c = CompressionSession::new(&CompressionConfig::default(), Some(dict.as_prefix())).unwrap();
    let first = c.compress(&data, EndDirective::FlushFrame).unwrap();
    let second = c.compress(&data, EndDirective::FlushFrame).unwrap();

    // the second frame was written without the prefix
    assert_eq!(decompress_all(&second), data);

    let mut both = first.clone();
    both.extend_from_slice(&second);
    let r = crate::decompress(&both, &Default::default(), Some(dict.as_prefix())).unwrap();
    assert_eq!(r.len(), 2 * data.len());
    assert_eq!(&r[..data.len()], &data[..]);
    assert_eq!(&r[data.len()..], &data[..]);
}

#[test]
fn prefix_is_raw_content() {
    use crate::dictionary::{sample_records, DictionaryAttach};

    // a trained dictionary has a header, which a prefix must not interpret
    let samples = sample_records(2000);
    let dict = Arc::new(crate::train_dictionary(&samples[..], 4096).unwrap());
    assert_ne!(dict.dict_id(), 0);

    let payload = samples[10..20].concat();
    let frame = compress(&payload, &CompressionConfig::default(), Some(dict.as_prefix())).unwrap();
    assert_eq!(crate::get_frame_info(&frame).unwrap().dictionary_id, 0);

    let mut dctx = zstd_safe::DCtx::create();
    dctx.ref_prefix(dict.content()).unwrap();
    let mut plain = Vec::with_capacity(payload.len());
    dctx.decompress(&mut plain, &frame).unwrap();
    assert_eq!(plain, payload);
}

#[test]
fn rich_mem_compressor() {
    let config = CompressionConfig::with_level(3).parameter(CParameter::NbWorkers, 2);
    let c = RichMemCompressor::new(&config, None).unwrap();
    assert_eq!(c.compression_level(), 3);
    assert!(!c.session.is_multithreaded());

    let data = crate::utils::sample_random(100_000, 14);
    let a = c.compress(&data).unwrap();
    assert!(a.len() <= zstd_safe::compress_bound(data.len()));
    // written in place into the buffer reserved up front
    assert!(a.capacity() >= zstd_safe::compress_bound(data.len()));
    assert_eq!(decompress_all(&a), data);

    let b = c.compress(b"").unwrap();
    assert!(decompress_all(&b).is_empty());
}

#[test]
fn rich_mem_prefix_applies_to_one_call() {
    use crate::dictionary::{raw_dictionary, DictionaryAttach};

    let dict = raw_dictionary();
    let data = crate::utils::sample_text(20_000, 15);

    let c = RichMemCompressor::new(&CompressionConfig::default(), Some(dict.as_prefix())).unwrap();
    let first = c.compress(&data).unwrap();
    let second = c.compress(&data).unwrap();

    let r = crate::decompress(&first, &Default::default(), Some(dict.as_prefix())).unwrap();
    assert_eq!(r, data);
    assert_eq!(decompress_all(&second), data);
}

#[test]
fn rejects_invalid_level() {
    let e = CompressionSession::new(&CompressionConfig::with_level(1000), None)
        .err()
        .unwrap();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
}

#[test]
fn sessions_are_send_and_sync() {
    fn check<T: Send + Sync>() {}
    check::<CompressionSession>();
    check::<RichMemCompressor>();
    check::<crate::ZstdDictionary>();
}
