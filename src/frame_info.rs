/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use zstd::zstd_safe;

use crate::{
    session_error::{err_exit_code, ExitCode},
    Result, SessionError,
};

/// Information read from a frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// None if the header does not declare the size
    pub decompressed_size: Option<u64>,

    /// 0 if no dictionary is needed, or the frame does not record which one
    pub dictionary_id: u32,
}

/// Reads the header at the start of `frame`. Only the header has to be present,
/// the rest of the frame is not looked at.
pub fn get_frame_info(frame: &[u8]) -> Result<FrameInfo> {
    let Ok(decompressed_size) = zstd_safe::get_frame_content_size(frame) else {
        return err_exit_code(
            ExitCode::ZstdError,
            "Error when getting information from the header of a zstd frame. Make sure the \
             frame_buffer argument starts from the beginning of a frame, and its length not \
             less than the frame header (6~18 bytes).",
        );
    };

    let dictionary_id = zstd_safe::get_dict_id_from_frame(frame).map_or(0, |id| id.get());

    Ok(FrameInfo {
        decompressed_size,
        dictionary_id,
    })
}

/// Returns the compressed length of the first frame in `frame`, which must
/// contain that whole frame.
pub fn get_frame_size(frame: &[u8]) -> Result<usize> {
    zstd_safe::find_frame_compressed_size(frame)
        .map_err(|code| SessionError::zstd("Error when finding the compressed size of a zstd frame", code))
}

#[test]
fn reads_frame_header() {
    let frame = zstd::bulk::compress(b"hello frame", 3).unwrap();
    let info = get_frame_info(&frame).unwrap();
    assert_eq!(info.decompressed_size, Some(11));
    assert_eq!(info.dictionary_id, 0);

    // the header alone is enough
    let info = get_frame_info(&frame[..frame.len() - 3]).unwrap();
    assert_eq!(info.decompressed_size, Some(11));
}

#[test]
fn unknown_size_and_dictionary_id() {
    use crate::{CompressionSession, EndDirective};

    let c = CompressionSession::new(&Default::default(), None).unwrap();
    let mut frame = c.compress(b"streamed", EndDirective::Continue).unwrap();
    frame.extend(c.flush(EndDirective::FlushFrame).unwrap());
    assert_eq!(get_frame_info(&frame).unwrap().decompressed_size, None);

    let samples = crate::dictionary::sample_records(2000);
    let dict = std::sync::Arc::new(crate::train_dictionary(&samples[..], 4096).unwrap());
    let frame = crate::compress(&samples[0], &Default::default(), Some(dict.clone().into())).unwrap();
    assert_eq!(get_frame_info(&frame).unwrap().dictionary_id, dict.dict_id());
}

#[test]
fn rejects_non_frames() {
    let e = get_frame_info(b"not a frame").unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ZstdError);
    assert!(e.message().contains("6~18 bytes"));

    assert!(get_frame_info(b"").is_err());
}

#[test]
fn finds_frame_size() {
    let frame = zstd::bulk::compress(&crate::utils::sample_text(10_000, 20), 3).unwrap();
    let mut two = frame.clone();
    two.extend_from_slice(&frame);
    two.extend_from_slice(b"tail");

    assert_eq!(get_frame_size(&frame).unwrap(), frame.len());
    assert_eq!(get_frame_size(&two).unwrap(), frame.len());

    let e = get_frame_size(&frame[..frame.len() - 1]).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::ZstdError);
}
