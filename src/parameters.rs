/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Compression and decompression parameters, their bounds as reported by the
//! zstd library, and the configuration structs the sessions are built from.

use zstd::zstd_safe::{self, zstd_sys, CCtx, DCtx};

use crate::{
    session_error::{err_exit_code, ExitCode},
    Result, SessionError,
};

/// Advanced compression parameters. Values are plain integers, with 0 meaning
/// "use the library default" for everything except the compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CParameter {
    CompressionLevel,
    WindowLog,
    HashLog,
    ChainLog,
    SearchLog,
    MinMatch,
    TargetLength,
    Strategy,
    EnableLongDistanceMatching,
    LdmHashLog,
    LdmMinMatch,
    LdmBucketSizeLog,
    LdmHashRateLog,
    ContentSizeFlag,
    ChecksumFlag,
    DictIdFlag,
    NbWorkers,
    JobSize,
    OverlapLog,
}

/// Advanced decompression parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DParameter {
    WindowLogMax,
}

/// Match finder strategies, from fastest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Fast = 1,
    DFast = 2,
    Greedy = 3,
    Lazy = 4,
    Lazy2 = 5,
    BtLazy2 = 6,
    BtOpt = 7,
    BtUltra = 8,
    BtUltra2 = 9,
}

impl Strategy {
    pub fn from_value(value: i32) -> Option<Strategy> {
        Some(match value {
            1 => Strategy::Fast,
            2 => Strategy::DFast,
            3 => Strategy::Greedy,
            4 => Strategy::Lazy,
            5 => Strategy::Lazy2,
            6 => Strategy::BtLazy2,
            7 => Strategy::BtOpt,
            8 => Strategy::BtUltra,
            9 => Strategy::BtUltra2,
            _ => return None,
        })
    }

    fn as_sys(self) -> zstd_sys::ZSTD_strategy {
        use zstd_sys::ZSTD_strategy::*;
        match self {
            Strategy::Fast => ZSTD_fast,
            Strategy::DFast => ZSTD_dfast,
            Strategy::Greedy => ZSTD_greedy,
            Strategy::Lazy => ZSTD_lazy,
            Strategy::Lazy2 => ZSTD_lazy2,
            Strategy::BtLazy2 => ZSTD_btlazy2,
            Strategy::BtOpt => ZSTD_btopt,
            Strategy::BtUltra => ZSTD_btultra,
            Strategy::BtUltra2 => ZSTD_btultra2,
        }
    }
}

/// Inclusive range of values accepted for a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterBounds {
    pub lower: i32,
    pub upper: i32,
}

impl ParameterBounds {
    pub fn contains(&self, value: i32) -> bool {
        self.lower <= value && value <= self.upper
    }
}

fn bounds_from_sys(bounds: zstd_sys::ZSTD_bounds, name: &str) -> Result<ParameterBounds> {
    // SAFETY: ZSTD_isError only inspects the integer it is given
    if unsafe { zstd_sys::ZSTD_isError(bounds.error) } != 0 {
        return Err(SessionError::zstd(
            &format!("parameter \"{}\" is not supported by this build", name),
            bounds.error,
        ));
    }

    Ok(ParameterBounds {
        lower: bounds.lowerBound,
        upper: bounds.upperBound,
    })
}

impl CParameter {
    pub fn name(self) -> &'static str {
        match self {
            CParameter::CompressionLevel => "compression_level",
            CParameter::WindowLog => "window_log",
            CParameter::HashLog => "hash_log",
            CParameter::ChainLog => "chain_log",
            CParameter::SearchLog => "search_log",
            CParameter::MinMatch => "min_match",
            CParameter::TargetLength => "target_length",
            CParameter::Strategy => "strategy",
            CParameter::EnableLongDistanceMatching => "enable_long_distance_matching",
            CParameter::LdmHashLog => "ldm_hash_log",
            CParameter::LdmMinMatch => "ldm_min_match",
            CParameter::LdmBucketSizeLog => "ldm_bucket_size_log",
            CParameter::LdmHashRateLog => "ldm_hash_rate_log",
            CParameter::ContentSizeFlag => "content_size_flag",
            CParameter::ChecksumFlag => "checksum_flag",
            CParameter::DictIdFlag => "dict_id_flag",
            CParameter::NbWorkers => "nb_workers",
            CParameter::JobSize => "job_size",
            CParameter::OverlapLog => "overlap_log",
        }
    }

    fn as_sys(self) -> zstd_sys::ZSTD_cParameter {
        use zstd_sys::ZSTD_cParameter::*;
        match self {
            CParameter::CompressionLevel => ZSTD_c_compressionLevel,
            CParameter::WindowLog => ZSTD_c_windowLog,
            CParameter::HashLog => ZSTD_c_hashLog,
            CParameter::ChainLog => ZSTD_c_chainLog,
            CParameter::SearchLog => ZSTD_c_searchLog,
            CParameter::MinMatch => ZSTD_c_minMatch,
            CParameter::TargetLength => ZSTD_c_targetLength,
            CParameter::Strategy => ZSTD_c_strategy,
            CParameter::EnableLongDistanceMatching => ZSTD_c_enableLongDistanceMatching,
            CParameter::LdmHashLog => ZSTD_c_ldmHashLog,
            CParameter::LdmMinMatch => ZSTD_c_ldmMinMatch,
            CParameter::LdmBucketSizeLog => ZSTD_c_ldmBucketSizeLog,
            CParameter::LdmHashRateLog => ZSTD_c_ldmHashRateLog,
            CParameter::ContentSizeFlag => ZSTD_c_contentSizeFlag,
            CParameter::ChecksumFlag => ZSTD_c_checksumFlag,
            CParameter::DictIdFlag => ZSTD_c_dictIDFlag,
            CParameter::NbWorkers => ZSTD_c_nbWorkers,
            CParameter::JobSize => ZSTD_c_jobSize,
            CParameter::OverlapLog => ZSTD_c_overlapLog,
        }
    }

    /// the range of values the linked zstd library accepts for this parameter
    pub fn bounds(self) -> Result<ParameterBounds> {
        // SAFETY: ZSTD_cParam_getBounds is a pure lookup on a valid enum value
        let bounds = unsafe { zstd_sys::ZSTD_cParam_getBounds(self.as_sys()) };
        bounds_from_sys(bounds, self.name())
    }

    /// converts a value into the typed zstd parameter. None means the value selects
    /// the library default and nothing needs to be set.
    fn to_codec(self, value: i32) -> Result<Option<zstd_safe::CParameter>> {
        use zstd_safe::CParameter as P;

        if self == CParameter::CompressionLevel {
            return Ok(Some(P::CompressionLevel(value)));
        }

        let Ok(v) = u32::try_from(value) else {
            return Err(self.out_of_bounds(value));
        };

        Ok(Some(match self {
            CParameter::CompressionLevel => P::CompressionLevel(value),
            CParameter::WindowLog => P::WindowLog(v),
            CParameter::HashLog => P::HashLog(v),
            CParameter::ChainLog => P::ChainLog(v),
            CParameter::SearchLog => P::SearchLog(v),
            CParameter::MinMatch => P::MinMatch(v),
            CParameter::TargetLength => P::TargetLength(v),
            CParameter::Strategy => {
                if value == 0 {
                    return Ok(None);
                }
                match Strategy::from_value(value) {
                    Some(s) => P::Strategy(s.as_sys()),
                    None => return Err(self.out_of_bounds(value)),
                }
            }
            CParameter::EnableLongDistanceMatching => P::EnableLongDistanceMatching(v != 0),
            CParameter::LdmHashLog => P::LdmHashLog(v),
            CParameter::LdmMinMatch => P::LdmMinMatch(v),
            CParameter::LdmBucketSizeLog => P::LdmBucketSizeLog(v),
            CParameter::LdmHashRateLog => P::LdmHashRateLog(v),
            CParameter::ContentSizeFlag => P::ContentSizeFlag(v != 0),
            CParameter::ChecksumFlag => P::ChecksumFlag(v != 0),
            CParameter::DictIdFlag => P::DictIdFlag(v != 0),
            CParameter::NbWorkers => P::NbWorkers(v),
            CParameter::JobSize => P::JobSize(v),
            CParameter::OverlapLog => P::OverlapSizeLog(v),
        }))
    }

    fn out_of_bounds(self, value: i32) -> SessionError {
        out_of_bounds_error("compression", self.name(), self.bounds(), value)
    }

    /// sets the parameter on an encoder context, translating a rejection into an
    /// error that names the accepted range
    pub(crate) fn apply(self, cctx: &mut CCtx<'static>, value: i32) -> Result<()> {
        if let Some(p) = self.to_codec(value)? {
            cctx.set_parameter(p)
                .map_err(|_| self.out_of_bounds(value))?;
        }
        Ok(())
    }
}

impl DParameter {
    pub fn name(self) -> &'static str {
        match self {
            DParameter::WindowLogMax => "window_log_max",
        }
    }

    pub fn bounds(self) -> Result<ParameterBounds> {
        let p = match self {
            DParameter::WindowLogMax => zstd_sys::ZSTD_dParameter::ZSTD_d_windowLogMax,
        };
        // SAFETY: ZSTD_dParam_getBounds is a pure lookup on a valid enum value
        let bounds = unsafe { zstd_sys::ZSTD_dParam_getBounds(p) };
        bounds_from_sys(bounds, self.name())
    }

    fn out_of_bounds(self, value: i32) -> SessionError {
        out_of_bounds_error("decompression", self.name(), self.bounds(), value)
    }

    pub(crate) fn apply(self, dctx: &mut DCtx<'static>, value: i32) -> Result<()> {
        let Ok(v) = u32::try_from(value) else {
            return Err(self.out_of_bounds(value));
        };

        let p = match self {
            DParameter::WindowLogMax => zstd_safe::DParameter::WindowLogMax(v),
        };

        dctx.set_parameter(p).map_err(|_| self.out_of_bounds(value))?;
        Ok(())
    }
}

fn out_of_bounds_error(
    kind: &str,
    name: &str,
    bounds: Result<ParameterBounds>,
    value: i32,
) -> SessionError {
    match bounds {
        Ok(b) => SessionError::new(
            ExitCode::InvalidParameter,
            &format!(
                "Error when setting zstd {} parameter \"{}\", it should {} <= value <= {}, provided value is {}. (zstd v{})",
                kind,
                name,
                b.lower,
                b.upper,
                value,
                zstd_safe::version_string()
            ),
        ),
        Err(e) => SessionError::new(ExitCode::InvalidParameter, e.message()),
    }
}

/// Configuration for a compression session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompressionConfig {
    /// compression level, None selects the library default
    pub level: Option<i32>,

    /// advanced parameters, applied in order after the level. A
    /// `CParameter::CompressionLevel` entry here takes precedence over `level`.
    pub parameters: Vec<(CParameter, i32)>,
}

impl CompressionConfig {
    pub fn with_level(level: i32) -> Self {
        CompressionConfig {
            level: Some(level),
            parameters: Vec::new(),
        }
    }

    pub fn parameter(mut self, parameter: CParameter, value: i32) -> Self {
        self.parameters.push((parameter, value));
        self
    }

    /// the level the encoder will end up with, which is also the level used to
    /// prepare digested dictionaries
    pub fn effective_level(&self) -> i32 {
        self.parameters
            .iter()
            .rev()
            .find(|(p, _)| *p == CParameter::CompressionLevel)
            .map(|(_, v)| *v)
            .or(self.level)
            .unwrap_or(zstd::DEFAULT_COMPRESSION_LEVEL)
    }

    /// number of worker threads requested, 0 for single threaded
    pub fn nb_workers(&self) -> i32 {
        self.parameters
            .iter()
            .rev()
            .find(|(p, _)| *p == CParameter::NbWorkers)
            .map_or(0, |(_, v)| *v)
    }

    /// applies the configuration to a fresh encoder context
    pub(crate) fn apply(&self, cctx: &mut CCtx<'static>) -> Result<()> {
        let levels = codec_info();
        let level = self.effective_level();
        if level < levels.min_level || level > levels.max_level {
            return err_exit_code(
                ExitCode::InvalidParameter,
                &format!(
                    "compression level {} is out of range, it should be {} <= level <= {}",
                    level, levels.min_level, levels.max_level
                ),
            );
        }

        CParameter::CompressionLevel.apply(cctx, level)?;

        for &(parameter, value) in &self.parameters {
            if parameter != CParameter::CompressionLevel {
                parameter.apply(cctx, value)?;
            }
        }

        Ok(())
    }
}

/// Configuration for a decompression session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecompressionConfig {
    pub parameters: Vec<(DParameter, i32)>,
}

impl DecompressionConfig {
    pub fn parameter(mut self, parameter: DParameter, value: i32) -> Self {
        self.parameters.push((parameter, value));
        self
    }

    pub(crate) fn apply(&self, dctx: &mut DCtx<'static>) -> Result<()> {
        for &(parameter, value) in &self.parameters {
            parameter.apply(dctx, value)?;
        }
        Ok(())
    }
}

/// Facts about the linked zstd library. Immutable, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecInfo {
    pub version: &'static str,
    pub version_number: u32,
    pub default_level: i32,
    pub min_level: i32,
    pub max_level: i32,
    pub multithread_supported: bool,
}

pub fn codec_info() -> CodecInfo {
    CodecInfo {
        version: zstd_safe::version_string(),
        version_number: zstd_safe::version_number(),
        default_level: zstd::DEFAULT_COMPRESSION_LEVEL,
        min_level: zstd_safe::min_c_level(),
        max_level: zstd_safe::max_c_level(),
        multithread_supported: CParameter::NbWorkers
            .bounds()
            .map_or(false, |b| b.upper > 0),
    }
}

#[test]
fn level_range_is_sane() {
    let info = codec_info();
    assert!(info.min_level < 0);
    assert!(info.max_level >= 19);
    assert!(info.min_level <= info.default_level && info.default_level <= info.max_level);
    assert!(info.version.starts_with('1'));
    assert!(info.multithread_supported);
}

#[test]
fn bounds_are_reported_for_every_parameter() {
    let all = [
        CParameter::CompressionLevel,
        CParameter::WindowLog,
        CParameter::HashLog,
        CParameter::ChainLog,
        CParameter::SearchLog,
        CParameter::MinMatch,
        CParameter::TargetLength,
        CParameter::Strategy,
        CParameter::EnableLongDistanceMatching,
        CParameter::LdmHashLog,
        CParameter::LdmMinMatch,
        CParameter::LdmBucketSizeLog,
        CParameter::LdmHashRateLog,
        CParameter::ContentSizeFlag,
        CParameter::ChecksumFlag,
        CParameter::DictIdFlag,
        CParameter::NbWorkers,
        CParameter::JobSize,
        CParameter::OverlapLog,
    ];

    for p in all {
        let b = p.bounds().unwrap();
        assert!(b.lower <= b.upper, "{}", p.name());
    }

    let strategy = CParameter::Strategy.bounds().unwrap();
    assert_eq!(strategy.lower, Strategy::Fast as i32);
    assert_eq!(strategy.upper, Strategy::BtUltra2 as i32);

    let checksum = CParameter::ChecksumFlag.bounds().unwrap();
    assert_eq!((checksum.lower, checksum.upper), (0, 1));

    let window = DParameter::WindowLogMax.bounds().unwrap();
    assert!(window.contains(10) && window.contains(27));
}

#[test]
fn out_of_range_parameter_names_the_bounds() {
    let mut cctx = CCtx::create();
    let e = CParameter::WindowLog.apply(&mut cctx, 5).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
    assert!(e.message().contains("\"window_log\""), "{}", e.message());
    assert!(e.message().contains("<= value <="), "{}", e.message());
    assert!(e.message().contains("provided value is 5"), "{}", e.message());

    let e = CParameter::HashLog.apply(&mut cctx, -1).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);

    let e = CParameter::Strategy.apply(&mut cctx, 42).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);

    // zero keeps the default
    CParameter::Strategy.apply(&mut cctx, 0).unwrap();
    CParameter::WindowLog.apply(&mut cctx, 0).unwrap();
}

#[test]
fn level_outside_range_is_rejected() {
    let mut cctx = CCtx::create();
    let e = CompressionConfig::with_level(1000)
        .apply(&mut cctx)
        .unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);

    // level given as a parameter wins over the plain level
    let config = CompressionConfig::with_level(1000).parameter(CParameter::CompressionLevel, 5);
    assert_eq!(config.effective_level(), 5);
    let mut cctx = CCtx::create();
    config.apply(&mut cctx).unwrap();

    assert_eq!(
        CompressionConfig::default().effective_level(),
        zstd::DEFAULT_COMPRESSION_LEVEL
    );
}

#[test]
fn decompression_parameter_bounds() {
    let mut dctx = DCtx::create();
    DParameter::WindowLogMax.apply(&mut dctx, 20).unwrap();

    let e = DParameter::WindowLogMax.apply(&mut dctx, 2).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::InvalidParameter);
    assert!(e.message().contains("window_log_max"));
}
