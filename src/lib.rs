/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

// forbid lints that we already have eliminated from the codebase so they don't show up in the future
#![forbid(trivial_casts)]
#![forbid(trivial_numeric_casts)]
#![forbid(non_ascii_idents)]
#![forbid(unused_extern_crates)]
#![forbid(unused_import_braces)]
#![forbid(single_use_lifetimes)]
#![forbid(unused_crate_dependencies)]
#![forbid(unused_lifetimes)]
#![forbid(unused_macro_rules)]
#![forbid(macro_use_extern_crate)]

mod compress_session;
mod decompress_session;
mod dictionary;
mod frame_info;
mod output_buffer;
mod parameters;
mod session_error;

mod utils;

pub use session_error::{AddContext, ExitCode};
pub use session_error::{Result, SessionError};

pub use parameters::{codec_info, CodecInfo};
pub use parameters::{CParameter, DParameter, ParameterBounds, Strategy};
pub use parameters::{CompressionConfig, DecompressionConfig};

pub use compress_session::{compress, CompressionSession, EndDirective, RichMemCompressor};
pub use decompress_session::{decompress, EndlessDecompressor, FrameDecompressor};

pub use dictionary::{dictionary_id, finalize_dictionary, train_dictionary};
pub use dictionary::{DictionaryAttach, DictionaryRef, ZstdDictionary};

pub use frame_info::{get_frame_info, get_frame_size, FrameInfo};

#[cfg(test)]
static INIT: std::sync::Once = std::sync::Once::new();

/// Initialize the logger for tests. This is a no-op if the logger is already initialized.
#[cfg(test)]
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
