//! Liveness of tracked slots.
//!
//! Two encodings share the tail of the blob:
//!
//! ```text
//! safe points:   ┌─┬──────────────────────────────────────────────┐
//!                │I│ per safe point: live-state vector (inline)   │
//!                └─┴──────────────────────────────────────────────┘
//!                 I=1: pointer width, pointer table, vectors stored
//!                      deduplicated after the next byte boundary
//!
//! ranges:        ┌───────────┬───────────────────────┐ ┌──────────────┐
//!                │ ptr width │ chunk pointer table   │ │ chunk data...│
//!                └───────────┴───────────────────────┘ └──────────────┘
//!                                                     ^ byte aligned
//! ```
//!
//! A live-state vector is either plain (one bit per tracked slot) or run
//! length encoded: an initial dead run, then alternating live and dead runs
//! until every slot is accounted for.
//!
//! Fully-interruptible code is sliced into chunks of
//! [`NUM_NORM_CODE_OFFSETS_PER_CHUNK`] offsets of "pseudo code" (the
//! interruptible ranges laid end to end). Each chunk stores which slots
//! could be live in it, their state at the chunk end, and for each of those
//! slots the offsets inside the chunk where the state flips. The state at a
//! break offset is the end state with every later flip undone.

use std::ops::BitOr;

use crate::bitstream::BitReader;
use crate::config::{Encoding, NUM_NORM_CODE_OFFSETS_PER_CHUNK, NUM_NORM_CODE_OFFSETS_PER_CHUNK_LOG2};
use crate::error::DecodeError;
use crate::ranges::RangeIter;

// =============================================================================
// Flags and summary
// =============================================================================

/// Caller options for a root enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EnumerateFlags(u32);

impl EnumerateFlags {
    /// The frame is the leaf (active) frame.
    pub const ACTIVE_STACK_FRAME: EnumerateFlags = EnumerateFlags(0x1);
    /// Execution of the frame will not resume.
    pub const EXECUTION_ABORTED: EnumerateFlags = EnumerateFlags(0x2);
    /// The frame is the parent of a funclet frame already reported.
    pub const PARENT_OF_FUNCLET_STACK_FRAME: EnumerateFlags = EnumerateFlags(0x4);
    /// Do not report untracked slots.
    pub const NO_REPORT_UNTRACKED: EnumerateFlags = EnumerateFlags(0x8);
    /// Only report stack slots relative to the frame register.
    pub const REPORT_FP_BASED_SLOTS_ONLY: EnumerateFlags = EnumerateFlags(0x10);

    /// No options.
    #[inline]
    pub const fn empty() -> Self {
        EnumerateFlags(0)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether all of `other` is set.
    #[inline]
    pub const fn contains(self, other: EnumerateFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for EnumerateFlags {
    type Output = EnumerateFlags;

    #[inline]
    fn bitor(self, rhs: EnumerateFlags) -> EnumerateFlags {
        EnumerateFlags(self.0 | rhs.0)
    }
}

/// Counters from one enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EnumerationSummary {
    /// Roots passed to the callback.
    pub reported: u32,
    /// Live slots skipped as scratch.
    pub skipped_scratch: u32,
    /// Live slots skipped by caller filters.
    pub filtered: u32,
    /// Live slots whose location was already reported.
    pub duplicates: u32,
    /// Lifetime transitions decoded.
    pub transitions: u32,
}

// =============================================================================
// Live-state vectors
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum VectorForm {
    Plain,
    Rle {
        skip_base: u32,
        run_base: u32,
        run_end: u32,
        expect_run: bool,
    },
}

/// Iterator over the live slot indices of one live-state vector.
///
/// Indices come out ascending. Once exhausted, [`LiveSetIter::position`] is
/// the bit position right after the vector.
#[derive(Debug, Clone)]
pub struct LiveSetIter<'a> {
    reader: BitReader<'a>,
    num_slots: u32,
    index: u32,
    form: VectorForm,
}

impl<'a> LiveSetIter<'a> {
    /// A plain vector of `num_slots` bits with no form prefix.
    #[inline]
    pub fn plain(reader: BitReader<'a>, num_slots: u32) -> Self {
        Self {
            reader,
            num_slots,
            index: 0,
            form: VectorForm::Plain,
        }
    }

    /// A vector with its form prefix at the reader's position.
    pub fn decode(mut reader: BitReader<'a>, enc: &Encoding, num_slots: u32) -> Result<Self, DecodeError> {
        if !reader.read_one_fast()? {
            return Ok(Self::plain(reader, num_slots));
        }
        let (skip_base, run_base) = if reader.read_one_fast()? {
            (enc.live_state_rle_run_base, enc.live_state_rle_skip_base)
        } else {
            (enc.live_state_rle_skip_base, enc.live_state_rle_run_base)
        };
        let initial_skip = reader.decode_u32(skip_base)?;
        Ok(Self {
            reader,
            num_slots,
            index: initial_skip,
            form: VectorForm::Rle {
                skip_base,
                run_base,
                run_end: initial_skip,
                expect_run: true,
            },
        })
    }

    /// Bit position of the next unread field.
    #[inline]
    pub fn position(&self) -> usize {
        self.reader.position()
    }

    /// Count the remaining live slots and return the end position.
    pub fn count_to_end(mut self) -> Result<(u32, usize), DecodeError> {
        let mut count = 0;
        while self.next_live()?.is_some() {
            count += 1;
        }
        Ok((count, self.reader.position()))
    }

    /// Next live slot index.
    pub fn next_live(&mut self) -> Result<Option<u32>, DecodeError> {
        match &mut self.form {
            VectorForm::Plain => {
                while self.index < self.num_slots {
                    let slot = self.index;
                    self.index += 1;
                    if self.reader.read_one_fast()? {
                        return Ok(Some(slot));
                    }
                }
                Ok(None)
            }
            VectorForm::Rle {
                skip_base,
                run_base,
                run_end,
                expect_run,
            } => loop {
                if self.index < *run_end {
                    let slot = self.index;
                    self.index += 1;
                    if slot >= self.num_slots {
                        return Err(DecodeError::SlotIndexOutOfRange {
                            index: u64::from(slot),
                            count: self.num_slots,
                        });
                    }
                    return Ok(Some(slot));
                }
                if self.index >= self.num_slots {
                    return Ok(None);
                }
                let position = self.reader.position();
                let base = if *expect_run { *run_base } else { *skip_base };
                let count = self
                    .reader
                    .decode_u32(base)?
                    .checked_add(1)
                    .and_then(|count| self.index.checked_add(count))
                    .ok_or(DecodeError::ValueOutOfRange { position })?;
                if *expect_run {
                    *run_end = count;
                } else {
                    self.index = count;
                }
                *expect_run = !*expect_run;
            },
        }
    }
}

impl Iterator for LiveSetIter<'_> {
    type Item = Result<u32, DecodeError>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.next_live().transpose()
    }
}

/// Live-state vector of safe point `index`.
///
/// `reader` is positioned at the start of the liveness data, right after
/// the slot table.
pub fn safe_point_live_set<'a>(
    mut reader: BitReader<'a>,
    enc: &Encoding,
    num_safe_points: u32,
    index: u32,
    num_tracked: u32,
) -> Result<LiveSetIter<'a>, DecodeError> {
    debug_assert!(index < num_safe_points);
    if reader.read_one_fast()? {
        let position = reader.position();
        let width = reader
            .decode_u32(enc.pointer_size_base)?
            .checked_add(1)
            .filter(|&width| width <= 64)
            .ok_or(DecodeError::ValueOutOfRange { position })?;
        let table = reader.position();
        let pointer = reader.peek(table + index as usize * width as usize, width)?;
        let sets_start = (table + num_safe_points as usize * width as usize + 7) & !7;
        let start = usize::try_from(pointer)
            .ok()
            .and_then(|pointer| sets_start.checked_add(pointer))
            .ok_or(DecodeError::ValueOutOfRange { position: table })?;
        tracing::trace!(index, width, pointer, "indirect live set");
        LiveSetIter::decode(BitReader::at(reader.data(), start), enc, num_tracked)
    } else {
        reader.skip_fields(u64::from(index), num_tracked)?;
        Ok(LiveSetIter::plain(reader, num_tracked))
    }
}

// =============================================================================
// Fully-interruptible chunks
// =============================================================================

/// Result of locating a break offset in the chunked liveness data.
#[derive(Debug)]
pub enum ChunkLookup<'a> {
    /// The offset is outside every interruptible range.
    OutsideRanges,
    /// No tracked slot is live at the offset.
    NoTrackedLive,
    /// Live tracked slots at the offset.
    Live(ChunkLiveness<'a>),
}

/// Iterator over the tracked slots live at a break offset inside a chunk.
#[derive(Debug, Clone)]
pub struct ChunkLiveness<'a> {
    could_be_live: LiveSetIter<'a>,
    final_state: BitReader<'a>,
    transitions: BitReader<'a>,
    chunk: u32,
    break_delta: Option<u32>,
    transitions_decoded: u32,
}

impl<'a> ChunkLiveness<'a> {
    /// Chunk whose data is being read.
    #[inline]
    pub fn chunk(&self) -> u32 {
        self.chunk
    }

    /// Transitions decoded so far.
    #[inline]
    pub fn transitions_decoded(&self) -> u32 {
        self.transitions_decoded
    }

    /// Next live slot index.
    pub fn next_live(&mut self) -> Result<Option<u32>, DecodeError> {
        while let Some(slot) = self.could_be_live.next_live()? {
            let mut live = self.final_state.read_one_fast()?;
            if let Some(break_delta) = self.break_delta {
                while self.transitions.read_one_fast()? {
                    let offset = self.transitions.read(NUM_NORM_CODE_OFFSETS_PER_CHUNK_LOG2)? as u32;
                    if offset == 0 {
                        return Err(DecodeError::InvalidTransition { chunk: self.chunk });
                    }
                    self.transitions_decoded += 1;
                    if offset > break_delta {
                        live = !live;
                    }
                }
            }
            if live {
                return Ok(Some(slot));
            }
        }
        Ok(None)
    }
}

impl Iterator for ChunkLiveness<'_> {
    type Item = Result<u32, DecodeError>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.next_live().transpose()
    }
}

/// Locate the chunked liveness of normalized code offset `norm_offset`.
///
/// `reader` is positioned at the start of the liveness data; the safe-point
/// live sets in front of the chunk section are skipped.
pub fn chunk_live_slots<'a>(
    mut reader: BitReader<'a>,
    enc: &Encoding,
    num_safe_points: u32,
    num_tracked: u32,
    ranges: RangeIter<'_>,
    norm_offset: u32,
) -> Result<ChunkLookup<'a>, DecodeError> {
    if num_safe_points > 0 {
        if reader.read_one_fast()? {
            let width = reader.decode_u32(enc.pointer_size_base)?.saturating_add(1);
            reader.skip_fields(u64::from(num_safe_points), width)?;
        } else {
            reader.skip_fields(u64::from(num_safe_points), num_tracked)?;
        }
    }

    let mut pseudo_offset = None;
    let mut total = 0u32;
    for range in ranges {
        let range = range?;
        let start = enc.normalize_code_offset(range.start);
        let stop = enc.normalize_code_offset(range.end);
        if pseudo_offset.is_none() && norm_offset >= start && norm_offset < stop {
            pseudo_offset = Some(total + (norm_offset - start));
        }
        total = total.saturating_add(stop - start);
    }
    let Some(pseudo_offset) = pseudo_offset else {
        return Ok(ChunkLookup::OutsideRanges);
    };

    let num_chunks = total.div_ceil(NUM_NORM_CODE_OFFSETS_PER_CHUNK);
    let position = reader.position();
    let width = reader.decode_u32(enc.pointer_size_base)?;
    if width == 0 {
        return Ok(ChunkLookup::NoTrackedLive);
    }
    if width > 64 {
        return Err(DecodeError::ValueOutOfRange { position });
    }

    let table = reader.position();
    let break_chunk = pseudo_offset / NUM_NORM_CODE_OFFSETS_PER_CHUNK;
    let mut chunk = break_chunk;
    let pointer = loop {
        let pointer = reader.peek(table + chunk as usize * width as usize, width)?;
        if pointer != 0 {
            break pointer;
        }
        if chunk == 0 {
            return Ok(ChunkLookup::NoTrackedLive);
        }
        chunk -= 1;
    };

    let info2 = (table + num_chunks as usize * width as usize + 7) & !7;
    let chunk_start = usize::try_from(pointer - 1)
        .ok()
        .and_then(|pointer| info2.checked_add(pointer))
        .ok_or(DecodeError::ValueOutOfRange { position: table })?;

    let data = reader.data();
    let could_be_live = LiveSetIter::decode(BitReader::at(data, chunk_start), enc, num_tracked)?;
    let (num_could_be_live, final_state) = could_be_live.clone().count_to_end()?;
    if num_could_be_live == 0 {
        return Err(DecodeError::EmptyLiveSet);
    }
    let transitions = final_state + num_could_be_live as usize;

    let break_delta = (chunk == break_chunk).then_some(pseudo_offset % NUM_NORM_CODE_OFFSETS_PER_CHUNK);
    tracing::trace!(
        pseudo_offset,
        break_chunk,
        chunk,
        num_could_be_live,
        "interruptible chunk"
    );

    Ok(ChunkLookup::Live(ChunkLiveness {
        could_be_live,
        final_state: BitReader::at(data, final_state),
        transitions: BitReader::at(data, transitions),
        chunk,
        break_delta,
        transitions_decoded: 0,
    }))
}
