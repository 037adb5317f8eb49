/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Dictionaries and the cache of codec-side prepared handles built from them.
//!
//! Preparing a dictionary (digesting it into encoder or decoder tables) is far
//! more expensive than compressing a small message with it, so a dictionary
//! keeps one prepared encoder handle per compression level and a single
//! decoder handle. Handles are created on first use and shared read-only after
//! that by every session that references the dictionary.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use byteorder::{ByteOrder, LittleEndian};
use zstd::zstd_safe::{zstd_sys, CDict, DDict};

use crate::{
    session_error::{err_exit_code, AddContext, ExitCode},
    utils::{lock, try_alloc_zeroed},
    Result, SessionError,
};

/// little endian magic number at the start of a formatted dictionary
const DICTIONARY_MAGIC: u32 = 0xEC30A437;

/// the codec refuses dictionary content shorter than this
const MIN_DICTIONARY_SIZE: usize = 8;

/// Returns the id stored in the header of a formatted dictionary, or 0 if
/// the content does not start with the dictionary magic (raw content).
pub fn dictionary_id(content: &[u8]) -> u32 {
    if content.len() < 8 || LittleEndian::read_u32(&content[0..4]) != DICTIONARY_MAGIC {
        return 0;
    }
    LittleEndian::read_u32(&content[4..8])
}

/// Dictionary content plus its cache of prepared codec handles.
pub struct ZstdDictionary {
    content: Vec<u8>,
    dict_id: u32,

    /// prepared encoder handles keyed by compression level
    encoder_handles: Mutex<HashMap<i32, Arc<CDict<'static>>>>,

    /// decoder preparation does not depend on the level, so there is at most one
    decoder_handle: Mutex<Option<Arc<DDict<'static>>>>,

    /// number of times the codec was asked to prepare this dictionary
    preparations: AtomicUsize,
}

impl std::fmt::Debug for ZstdDictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ZstdDictionary")
            .field("dict_id", &self.dict_id)
            .field("size", &self.content.len())
            .finish()
    }
}

impl ZstdDictionary {
    /// Wraps dictionary content.
    ///
    /// Unless `is_raw` is set, the content must be a formatted dictionary (as
    /// produced by training) with a non-zero id. Raw content is used as plain
    /// history that compressed data may refer back to.
    pub fn new(content: Vec<u8>, is_raw: bool) -> Result<Self> {
        if content.len() < MIN_DICTIONARY_SIZE {
            return err_exit_code(
                ExitCode::InvalidParameter,
                &format!(
                    "zstd dictionary content should be at least {} bytes, got {}",
                    MIN_DICTIONARY_SIZE,
                    content.len()
                ),
            );
        }

        let dict_id = dictionary_id(&content);
        if !is_raw && dict_id == 0 {
            return err_exit_code(
                ExitCode::InvalidParameter,
                "invalid zstd dictionary, use is_raw to load arbitrary content as a raw dictionary",
            );
        }

        Ok(ZstdDictionary {
            content,
            dict_id,
            encoder_handles: Mutex::new(HashMap::new()),
            decoder_handle: Mutex::new(None),
            preparations: AtomicUsize::new(0),
        })
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// 0 for raw content, otherwise the id from the dictionary header
    pub fn dict_id(&self) -> u32 {
        self.dict_id
    }

    /// how many prepared handles have been created so far (encoder and decoder)
    pub fn preparation_count(&self) -> usize {
        self.preparations.load(Ordering::Relaxed)
    }

    /// Returns the prepared encoder handle for `level`, preparing it on first use.
    /// The lock is held while preparing so concurrent callers for the same level
    /// wait for the first one instead of duplicating the work.
    pub(crate) fn encoder_handle(&self, level: i32) -> Result<Arc<CDict<'static>>> {
        let mut handles = lock(&self.encoder_handles)?;

        if let Some(h) = handles.get(&level) {
            return Ok(h.clone());
        }

        let Some(cdict) = CDict::try_create(&self.content, level) else {
            return err_exit_code(
                ExitCode::ZstdError,
                "failed to prepare the zstd dictionary for compression",
            );
        };

        self.preparations.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "prepared encoder dictionary id {} size {} for level {}",
            self.dict_id,
            self.content.len(),
            level
        );

        let cdict = Arc::new(cdict);
        handles.insert(level, cdict.clone());
        Ok(cdict)
    }

    /// Returns the prepared decoder handle, preparing it on first use.
    pub(crate) fn decoder_handle(&self) -> Result<Arc<DDict<'static>>> {
        let mut handle = lock(&self.decoder_handle)?;

        if let Some(h) = handle.as_ref() {
            return Ok(h.clone());
        }

        let Some(ddict) = DDict::try_create(&self.content) else {
            return err_exit_code(
                ExitCode::ZstdError,
                "failed to prepare the zstd dictionary for decompression",
            );
        };

        self.preparations.fetch_add(1, Ordering::Relaxed);
        log::debug!(
            "prepared decoder dictionary id {} size {}",
            self.dict_id,
            self.content.len()
        );

        let ddict = Arc::new(ddict);
        *handle = Some(ddict.clone());
        Ok(ddict)
    }
}

/// How a dictionary is attached to a session.
#[derive(Debug, Clone)]
pub enum DictionaryRef {
    /// Uses the cached prepared handle. Fastest when the dictionary is reused,
    /// and lets the dictionary override some encoder parameters.
    Digested(Arc<ZstdDictionary>),

    /// Loads the content into the session when it is created. Nothing is
    /// cached, so create one session and reuse it rather than reloading.
    Undigested(Arc<ZstdDictionary>),

    /// Treats the content as data preceding the next frame only. Afterwards
    /// the session continues without a dictionary.
    Prefix(Arc<ZstdDictionary>),
}

impl DictionaryRef {
    pub fn dictionary(&self) -> &Arc<ZstdDictionary> {
        match self {
            DictionaryRef::Digested(d) | DictionaryRef::Undigested(d) | DictionaryRef::Prefix(d) => d,
        }
    }

    pub(crate) fn mode_name(&self) -> &'static str {
        match self {
            DictionaryRef::Digested(_) => "digested",
            DictionaryRef::Undigested(_) => "undigested",
            DictionaryRef::Prefix(_) => "prefix",
        }
    }
}

impl From<Arc<ZstdDictionary>> for DictionaryRef {
    fn from(d: Arc<ZstdDictionary>) -> Self {
        DictionaryRef::Digested(d)
    }
}

/// convenience constructors for the three attach modes
pub trait DictionaryAttach {
    fn as_digested(&self) -> DictionaryRef;
    fn as_undigested(&self) -> DictionaryRef;
    fn as_prefix(&self) -> DictionaryRef;
}

impl DictionaryAttach for Arc<ZstdDictionary> {
    fn as_digested(&self) -> DictionaryRef {
        DictionaryRef::Digested(self.clone())
    }

    fn as_undigested(&self) -> DictionaryRef {
        DictionaryRef::Undigested(self.clone())
    }

    fn as_prefix(&self) -> DictionaryRef {
        DictionaryRef::Prefix(self.clone())
    }
}

/// concatenates samples and records their sizes, the layout the trainer expects
fn concatenate_samples(samples: &[impl AsRef<[u8]>]) -> Result<(Vec<u8>, Vec<usize>)> {
    if samples.is_empty() {
        return err_exit_code(ExitCode::InvalidParameter, "no samples provided");
    }

    let total: usize = samples.iter().map(|s| s.as_ref().len()).sum();
    let mut buffer = Vec::new();
    buffer.try_reserve_exact(total)?;

    let mut sizes = Vec::with_capacity(samples.len());
    for s in samples {
        buffer.extend_from_slice(s.as_ref());
        sizes.push(s.as_ref().len());
    }

    Ok((buffer, sizes))
}

/// Trains a formatted dictionary of at most `dict_size` bytes from samples.
pub fn train_dictionary(samples: &[impl AsRef<[u8]>], dict_size: usize) -> Result<ZstdDictionary> {
    if dict_size == 0 {
        return err_exit_code(ExitCode::InvalidParameter, "dict_size should be > 0");
    }

    let (buffer, sizes) = concatenate_samples(samples)?;

    let content = zstd::dict::from_continuous(&buffer, &sizes, dict_size).map_err(|e| {
        SessionError::new(
            ExitCode::ZstdError,
            &format!("zstd dictionary training failed: {}", e),
        )
    })?;

    log::debug!(
        "trained dictionary of {} bytes from {} samples",
        content.len(),
        sizes.len()
    );

    ZstdDictionary::new(content, false).context()
}

/// Turns custom dictionary content into a formatted dictionary of at most
/// `dict_size` bytes, computing entropy tables from the samples for `level`.
pub fn finalize_dictionary(
    base: &ZstdDictionary,
    samples: &[impl AsRef<[u8]>],
    dict_size: usize,
    level: i32,
) -> Result<ZstdDictionary> {
    if dict_size == 0 {
        return err_exit_code(ExitCode::InvalidParameter, "dict_size should be > 0");
    }

    let (buffer, sizes) = concatenate_samples(samples)?;
    let Ok(nb_samples) = u32::try_from(sizes.len()) else {
        return err_exit_code(ExitCode::InvalidParameter, "too many samples");
    };

    let mut dst = try_alloc_zeroed(dict_size)?;

    let params = zstd_sys::ZDICT_params_t {
        compressionLevel: level,
        notificationLevel: 0,
        dictID: 0,
    };

    // SAFETY: every pointer is paired with the length of the live buffer it points into,
    // and the sizes array has exactly nb_samples entries
    let written = unsafe {
        zstd_sys::ZDICT_finalizeDictionary(
            dst.as_mut_ptr().cast(),
            dst.len(),
            base.content.as_ptr().cast(),
            base.content.len(),
            buffer.as_ptr().cast(),
            sizes.as_ptr(),
            nb_samples,
            params,
        )
    };

    // SAFETY: ZDICT_isError only inspects the integer it is given
    if unsafe { zstd_sys::ZDICT_isError(written) } != 0 {
        return Err(SessionError::zstd(
            "zstd dictionary finalization failed",
            written,
        ));
    }

    dst.truncate(written);
    ZstdDictionary::new(dst, false).context()
}

#[cfg(test)]
pub(crate) fn raw_dictionary() -> Arc<ZstdDictionary> {
    let content = crate::utils::sample_text(16 * 1024, 99);
    Arc::new(ZstdDictionary::new(content, true).unwrap())
}

/// structured records that share a lot of layout, which is what dictionaries are for
#[cfg(test)]
pub(crate) fn sample_records(count: usize) -> Vec<Vec<u8>> {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    let names = ["alpha", "bravo", "charlie", "delta", "echo", "foxtrot", "golf"];
    let mut rng = StdRng::seed_from_u64(1234);
    (0..count)
        .map(|i| {
            format!(
                "{{\"id\": {}, \"name\": \"{}_{}\", \"email\": \"{}{}@example.com\", \"active\": {}, \"score\": {}, \"tags\": [\"{}\", \"{}\"]}}",
                i,
                names[rng.gen_range(0..names.len())],
                rng.gen_range(0..10000),
                names[rng.gen_range(0..names.len())],
                rng.gen_range(0..1000),
                rng.gen_bool(0.5),
                rng.gen_range(0..100),
                names[rng.gen_range(0..names.len())],
                names[rng.gen_range(0..names.len())],
            )
            .into_bytes()
        })
        .collect()
}

#[test]
fn rejects_short_content() {
    let e = ZstdDictionary::new(vec![1, 2, 3], true).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
}

#[test]
fn rejects_unformatted_content_unless_raw() {
    let content = b"just some plain bytes, no header".to_vec();
    let e = ZstdDictionary::new(content.clone(), false).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);

    let d = ZstdDictionary::new(content, true).unwrap();
    assert_eq!(d.dict_id(), 0);
}

#[test]
fn parses_dictionary_id() {
    let mut content = vec![0x37, 0xA4, 0x30, 0xEC, 0x78, 0x56, 0x34, 0x12];
    content.extend_from_slice(&[0; 16]);
    assert_eq!(dictionary_id(&content), 0x12345678);

    content[0] = 0;
    assert_eq!(dictionary_id(&content), 0);
    assert_eq!(dictionary_id(&[0x37, 0xA4, 0x30]), 0);
}

#[test]
fn encoder_handles_are_cached_per_level() {
    let d = raw_dictionary();
    assert_eq!(d.preparation_count(), 0);

    let a = d.encoder_handle(3).unwrap();
    let b = d.encoder_handle(3).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(d.preparation_count(), 1);

    let c = d.encoder_handle(7).unwrap();
    assert!(!Arc::ptr_eq(&a, &c));
    assert_eq!(d.preparation_count(), 2);

    let x = d.decoder_handle().unwrap();
    let y = d.decoder_handle().unwrap();
    assert!(Arc::ptr_eq(&x, &y));
    assert_eq!(d.preparation_count(), 3);
}

#[test]
fn concurrent_requests_prepare_once() {
    let d = raw_dictionary();

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                d.encoder_handle(5).unwrap();
                d.decoder_handle().unwrap();
            });
        }
    });

    assert_eq!(d.preparation_count(), 2);
}

#[test]
fn attach_modes() {
    let d = raw_dictionary();
    assert!(matches!(d.as_digested(), DictionaryRef::Digested(_)));
    assert!(matches!(d.as_undigested(), DictionaryRef::Undigested(_)));
    assert!(matches!(d.as_prefix(), DictionaryRef::Prefix(_)));
    assert!(matches!(DictionaryRef::from(d.clone()), DictionaryRef::Digested(_)));
    assert!(Arc::ptr_eq(d.as_prefix().dictionary(), &d));
}

#[test]
fn train_rejects_bad_arguments() {
    let samples = sample_records(10);
    assert_eq!(
        train_dictionary(&samples[..], 0).unwrap_err().exit_code(),
        ExitCode::InvalidParameter
    );

    let empty: Vec<Vec<u8>> = Vec::new();
    assert_eq!(
        train_dictionary(&empty[..], 1024).unwrap_err().exit_code(),
        ExitCode::InvalidParameter
    );
}

#[test]
fn train_and_finalize() {
    crate::init_logging();

    let samples = sample_records(2000);

    let trained = train_dictionary(&samples[..], 4096).unwrap();
    assert_ne!(trained.dict_id(), 0);
    assert!(trained.content().len() <= 4096);

    let base = ZstdDictionary::new(samples[..40].concat(), true).unwrap();
    let finalized = finalize_dictionary(&base, &samples[..], 8192, 3).unwrap();
    assert_ne!(finalized.dict_id(), 0);
    assert!(finalized.content().len() <= 8192);

    // the codec agrees with our reading of the header
    assert_eq!(
        zstd::zstd_safe::get_dict_id_from_dict(finalized.content()).map_or(0, |id| id.get()),
        finalized.dict_id()
    );
}
