/*---------------------------------------------------------------------------------------------
 *  Copyright (c) Microsoft Corporation. All rights reserved.
 *  Licensed under the Apache License, Version 2.0. See LICENSE.txt in the project root for license information.
 *  This software incorporates material from third parties. See NOTICE.txt for details.
 *--------------------------------------------------------------------------------------------*/

//! Accumulates codec output of unknown final length as a list of blocks that
//! are copied into one contiguous result at the end.

use zstd::zstd_safe::OutBuffer;

use crate::{
    session_error::{err_exit_code, ExitCode},
    utils::try_alloc_zeroed,
    Result,
};

const KB: usize = 1024;
const MB: usize = 1024 * 1024;

/// Sizes of successive blocks. Small outputs only pay for a small first block,
/// large outputs settle on 256MB blocks once the table runs out.
const BLOCK_SIZES: [usize; 17] = [
    32 * KB,
    64 * KB,
    256 * KB,
    MB,
    4 * MB,
    8 * MB,
    16 * MB,
    16 * MB,
    32 * MB,
    32 * MB,
    32 * MB,
    32 * MB,
    64 * MB,
    64 * MB,
    128 * MB,
    128 * MB,
    256 * MB,
];

/// Growable output buffer.
///
/// Every block except the last one is always completely filled, so the number
/// of bytes produced so far is `allocated - (last block length - pos)`.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    blocks: Vec<Vec<u8>>,

    /// sum of the lengths of all blocks
    allocated: usize,

    /// upper limit on `allocated`, None if unlimited
    max_length: Option<usize>,

    /// write cursor inside the last block
    pos: usize,
}

impl OutputBuffer {
    /// Creates a buffer whose first block is the default first growth size,
    /// or `max_length` if that is smaller.
    pub fn new(max_length: Option<usize>) -> Result<Self> {
        let first = match max_length {
            Some(max) if max < BLOCK_SIZES[0] => max,
            _ => BLOCK_SIZES[0],
        };

        Self::with_first_block(max_length, first)
    }

    /// Creates a buffer whose first block is sized from the caller's estimate of
    /// the final output (eg the content size declared in a frame header).
    pub fn with_size(max_length: Option<usize>, init_size: usize) -> Result<Self> {
        let first = match max_length {
            Some(max) => init_size.min(max),
            None => init_size,
        };

        Self::with_first_block(max_length, first)
    }

    fn with_first_block(max_length: Option<usize>, size: usize) -> Result<Self> {
        Ok(OutputBuffer {
            blocks: vec![try_alloc_zeroed(size)?],
            allocated: size,
            max_length,
            pos: 0,
        })
    }

    /// Appends the next block. Only valid once the current block is full.
    pub fn grow(&mut self) -> Result<()> {
        if !self.is_full() {
            return err_exit_code(
                ExitCode::GeneralFailure,
                "output buffer grown before the current block was full",
            );
        }

        let mut block_size = BLOCK_SIZES[self.blocks.len().min(BLOCK_SIZES.len() - 1)];

        if let Some(max) = self.max_length {
            let rest = max.saturating_sub(self.allocated);
            if rest == 0 {
                return err_exit_code(
                    ExitCode::AllocationFailed,
                    "output buffer cannot grow past max_length",
                );
            }
            block_size = block_size.min(rest);
        }

        let Some(allocated) = self.allocated.checked_add(block_size) else {
            return err_exit_code(
                ExitCode::AllocationFailed,
                "output buffer size overflowed",
            );
        };

        self.blocks.push(try_alloc_zeroed(block_size)?);
        self.allocated = allocated;
        self.pos = 0;

        log::trace!(
            "output buffer grew by {} to {} bytes in {} blocks",
            block_size,
            allocated,
            self.blocks.len()
        );

        Ok(())
    }

    /// true if the current block has no space left
    pub fn is_full(&self) -> bool {
        self.blocks.last().map_or(true, |b| self.pos == b.len())
    }

    /// true if the buffer is full and may not grow any further
    pub fn reached_max_length(&self) -> bool {
        self.max_length == Some(self.allocated) && self.is_full()
    }

    /// number of bytes written so far
    pub fn produced(&self) -> usize {
        self.allocated - self.remaining()
    }

    /// free space in the current block
    pub fn remaining(&self) -> usize {
        self.blocks.last().map_or(0, |b| b.len() - self.pos)
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }

    /// Lets the codec write into the free part of the current block. The closure
    /// receives a zstd output cursor positioned at the write cursor, and the
    /// cursor's final position becomes the new write cursor.
    pub(crate) fn write_with<T>(
        &mut self,
        f: impl FnOnce(&mut OutBuffer<'_, [u8]>) -> Result<T>,
    ) -> Result<T> {
        let Some(block) = self.blocks.last_mut() else {
            return err_exit_code(ExitCode::GeneralFailure, "output buffer has no blocks");
        };

        let mut out = OutBuffer::around_pos(block.as_mut_slice(), self.pos);
        let r = f(&mut out);
        self.pos = out.pos();
        r
    }

    /// Returns everything written as one contiguous vector.
    ///
    /// If the output fits exactly in a single block (possibly followed by an
    /// empty block from a speculative grow), that block is returned without copying.
    pub fn finish(mut self) -> Result<Vec<u8>> {
        let produced = self.produced();

        if self.blocks.len() == 1 && self.is_full() {
            return Ok(self.blocks.pop().unwrap_or_default());
        }

        if self.blocks.len() == 2 && self.pos == 0 && self.blocks[0].len() == produced {
            self.blocks.truncate(1);
            return Ok(self.blocks.pop().unwrap_or_default());
        }

        let mut result = Vec::new();
        result.try_reserve_exact(produced)?;

        let last = self.blocks.len() - 1;
        for (i, block) in self.blocks.iter().enumerate() {
            if i == last {
                result.extend_from_slice(&block[..self.pos]);
            } else {
                result.extend_from_slice(block);
            }
        }

        debug_assert_eq!(result.len(), produced);
        Ok(result)
    }

    /// Throws away everything written so far. Used when the codec call that was
    /// filling the buffer failed, so that no partial output reaches the caller.
    pub fn discard(self) {
        log::trace!(
            "discarding {} of {} allocated bytes of partial output",
            self.produced(),
            self.allocated()
        );
    }
}

/// simulates the codec writing n bytes into the current block
#[cfg(test)]
fn fill(buffer: &mut OutputBuffer, n: usize, value: u8) {
    let pos = buffer.pos;
    let block = buffer.blocks.last_mut().unwrap();
    block[pos..pos + n].fill(value);
    buffer.pos += n;
}

#[test]
fn first_block_respects_small_max_length() {
    let b = OutputBuffer::new(Some(100)).unwrap();
    assert_eq!(b.allocated(), 100);
    assert_eq!(b.produced(), 0);

    let b = OutputBuffer::new(None).unwrap();
    assert_eq!(b.allocated(), BLOCK_SIZES[0]);

    let b = OutputBuffer::new(Some(10 * MB)).unwrap();
    assert_eq!(b.allocated(), BLOCK_SIZES[0]);
}

#[test]
fn with_size_uses_estimate() {
    let b = OutputBuffer::with_size(None, 12345).unwrap();
    assert_eq!(b.allocated(), 12345);

    let b = OutputBuffer::with_size(Some(100), 12345).unwrap();
    assert_eq!(b.allocated(), 100);
}

#[test]
fn growth_is_monotonic_and_plateaus() {
    let mut sizes = Vec::new();
    for i in 0..BLOCK_SIZES.len() + 3 {
        sizes.push(BLOCK_SIZES[i.min(BLOCK_SIZES.len() - 1)]);
    }
    assert!(sizes.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(sizes[sizes.len() - 1], sizes[sizes.len() - 2]);
}

#[test]
fn grow_requires_full_block() {
    let mut b = OutputBuffer::new(None).unwrap();
    assert!(!b.is_full());
    assert_eq!(b.grow().unwrap_err().exit_code(), ExitCode::GeneralFailure);
}

#[test]
fn grow_clamps_to_max_length() {
    let mut b = OutputBuffer::with_size(Some(100), 60).unwrap();
    fill(&mut b, 60, 1);
    assert!(b.is_full());
    assert!(!b.reached_max_length());

    b.grow().unwrap();
    assert_eq!(b.allocated(), 100);
    fill(&mut b, 40, 2);
    assert!(b.reached_max_length());
    assert_eq!(b.grow().unwrap_err().exit_code(), ExitCode::AllocationFailed);

    let r = b.finish().unwrap();
    assert_eq!(r.len(), 100);
    assert!(r[..60].iter().all(|&x| x == 1));
    assert!(r[60..].iter().all(|&x| x == 2));
}

#[test]
fn accounting_across_blocks() {
    let mut b = OutputBuffer::with_size(None, 10).unwrap();
    fill(&mut b, 10, 1);
    b.grow().unwrap();
    assert_eq!(b.allocated(), 10 + BLOCK_SIZES[1]);
    fill(&mut b, 5, 2);
    assert_eq!(b.produced(), 15);
    assert_eq!(b.allocated() - b.remaining(), b.produced());

    let r = b.finish().unwrap();
    assert_eq!(r, [1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2]);
}

#[test]
fn finish_fast_paths() {
    // exactly one full block
    let mut b = OutputBuffer::with_size(None, 4).unwrap();
    fill(&mut b, 4, 9);
    assert_eq!(b.finish().unwrap(), [9, 9, 9, 9]);

    // full block followed by an empty one
    let mut b = OutputBuffer::with_size(None, 3).unwrap();
    fill(&mut b, 3, 8);
    b.grow().unwrap();
    assert_eq!(b.finish().unwrap(), [8, 8, 8]);

    // partially filled single block is copied down to size
    let mut b = OutputBuffer::new(None).unwrap();
    fill(&mut b, 3, 7);
    let r = b.finish().unwrap();
    assert_eq!(r, [7, 7, 7]);
    assert_eq!(r.capacity(), 3);
}

#[test]
fn zero_sized_buffer() {
    let b = OutputBuffer::new(Some(0)).unwrap();
    assert!(b.is_full());
    assert!(b.reached_max_length());
    assert!(b.finish().unwrap().is_empty());
}

#[test]
fn codec_writes_through_cursor() {
    use zstd::zstd_safe::{zstd_sys::ZSTD_EndDirective, CCtx, InBuffer};

    let data = crate::utils::sample_text(5000, 3);
    let mut cctx = CCtx::create();
    let mut input = InBuffer::around(&data);

    // blocks far smaller than the frame, so it has to spill over several of them
    let mut b = OutputBuffer::with_size(None, 8).unwrap();
    loop {
        let remaining = b
            .write_with(|out| {
                cctx.compress_stream2(out, &mut input, ZSTD_EndDirective::ZSTD_e_end)
                    .map_err(|code| crate::SessionError::zstd("compress", code))
            })
            .unwrap();
        if remaining == 0 {
            break;
        }
        if b.is_full() {
            b.grow().unwrap();
        }
    }
    assert!(b.allocated() > 8);

    let frame = b.finish().unwrap();
    assert_eq!(zstd::bulk::decompress(&frame, data.len()).unwrap(), data);
}
