/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

use std::sync::{Mutex, MutexGuard};

use crate::{session_error::ExitCode, Result, SessionError};

/// acquires a session lock for the duration of one public call. A poisoned lock
/// means a previous call panicked halfway, so the state cannot be trusted.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| {
        SessionError::new(
            ExitCode::GeneralFailure,
            "session lock poisoned by a panic in another thread",
        )
    })
}

/// Allocates a zero filled buffer, reporting allocator failure as an error instead of aborting.
///
/// Output blocks are handed to the codec as initialized slices, so each one
/// pays for a memset. Callers that know the whole output size up front write
/// into spare capacity instead, see `RichMemCompressor::compress`.
pub(crate) fn try_alloc_zeroed(size: usize) -> Result<Vec<u8>> {
    let mut v = Vec::new();
    v.try_reserve_exact(size)?;
    v.resize(size, 0);
    Ok(v)
}

/// handy function to compare two arrays, and print the first mismatch. Useful for debugging.
#[cfg(test)]
#[track_caller]
pub fn assert_eq_array<T: PartialEq + std::fmt::Debug>(a: &[T], b: &[T]) {
    use core::panic;

    if a.len() != b.len() {
        for i in 0..std::cmp::min(a.len(), b.len()) {
            assert_eq!(
                a[i],
                b[i],
                "length mismatch {},{} and first mismatch at offset {}",
                a.len(),
                b.len(),
                i
            );
        }
        panic!(
            "length mismatch {} and {}, but common prefix identical",
            a.len(),
            b.len()
        );
    } else {
        for i in 0..a.len() {
            assert_eq!(
                a[i],
                b[i],
                "length identical {}, but first mismatch at offset {}",
                a.len(),
                i
            );
        }
    }
}

/// text-like data that compresses well, deterministic for a given seed
#[cfg(test)]
pub fn sample_text(len: usize, seed: u64) -> Vec<u8> {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const WORDS: [&str; 12] = [
        "frame", "block", "window", "dictionary", "literal", "match", "offset", "sequence",
        "checksum", "stream", "level", "entropy",
    ];

    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(len + 16);
    while out.len() < len {
        out.extend_from_slice(WORDS[rng.gen_range(0..WORDS.len())].as_bytes());
        out.push(if rng.gen_ratio(1, 10) { b'\n' } else { b' ' });
    }
    out.truncate(len);
    out
}

/// incompressible data, deterministic for a given seed
#[cfg(test)]
pub fn sample_random(len: usize, seed: u64) -> Vec<u8> {
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = vec![0u8; len];
    rng.fill_bytes(&mut out);
    out
}

#[test]
fn sample_data_is_deterministic() {
    assert_eq!(sample_text(1000, 7), sample_text(1000, 7));
    assert_eq!(sample_text(1000, 7).len(), 1000);
    assert_ne!(sample_random(64, 1), sample_random(64, 2));
}

#[test]
fn poisoned_lock_is_an_error() {
    let m = std::sync::Arc::new(Mutex::new(0u32));
    let m2 = m.clone();
    let _ = std::thread::spawn(move || {
        let _guard = m2.lock().unwrap();
        panic!("poison the lock");
    })
    .join();

    let e = lock(&m).unwrap_err();
    assert_eq!(e.exit_code(), ExitCode::GeneralFailure);
}
