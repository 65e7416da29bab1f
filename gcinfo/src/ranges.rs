//! Interruptible code ranges.
//!
//! Ranges are half-open, sorted and disjoint. Each is stored as the gap
//! from the previous range's end followed by its length minus one, both in
//! normalized code offsets:
//!
//! ```text
//!  0        s0      e0           s1          e1
//!  ├────────┼───────┤────────────┼───────────┤
//!   delta1₀  len₀     delta1₁      len₁
//! ```

use std::fmt;

use crate::bitstream::BitReader;
use crate::config::Encoding;
use crate::error::DecodeError;

/// A half-open `[start, end)` range of code offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeRange {
    /// First offset in the range.
    pub start: u32,
    /// First offset past the range.
    pub end: u32,
}

impl CodeRange {
    /// Create a range.
    #[inline]
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether `offset` lies in the range.
    #[inline]
    pub const fn contains(&self, offset: u32) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Number of offsets covered.
    #[inline]
    pub const fn len(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range covers nothing.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl fmt::Display for CodeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// Forward-only decoder over the interruptible range table.
///
/// Yields ranges in code offsets. After an error the iterator is fused.
#[derive(Debug, Clone)]
pub struct RangeIter<'a> {
    reader: BitReader<'a>,
    encoding: &'a Encoding,
    remaining: u32,
    last_stop: u32,
}

impl<'a> RangeIter<'a> {
    /// Iterate `count` ranges starting at the reader's position.
    #[inline]
    pub fn new(reader: BitReader<'a>, encoding: &'a Encoding, count: u32) -> Self {
        Self {
            reader,
            encoding,
            remaining: count,
            last_stop: 0,
        }
    }

    /// Ranges not yet produced.
    #[inline]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Bit position of the next range.
    #[inline]
    pub fn position(&self) -> usize {
        self.reader.position()
    }

    /// Consume the remaining ranges and return the position after the table.
    pub fn end_position(mut self) -> Result<usize, DecodeError> {
        while let Some(range) = self.next() {
            range?;
        }
        Ok(self.reader.position())
    }

    fn decode_next(&mut self) -> Result<CodeRange, DecodeError> {
        let enc = self.encoding;
        let position = self.reader.position();
        let start_delta = self.reader.decode_u32(enc.interruptible_range_delta1_base)?;
        let length = self.reader.decode_u32(enc.interruptible_range_delta2_base)?;
        let norm_start = self
            .last_stop
            .checked_add(start_delta)
            .ok_or(DecodeError::ValueOutOfRange { position })?;
        let norm_stop = norm_start
            .checked_add(length)
            .and_then(|stop| stop.checked_add(1))
            .ok_or(DecodeError::ValueOutOfRange { position })?;
        self.last_stop = norm_stop;
        Ok(CodeRange::new(
            enc.denormalize_code_offset(norm_start),
            enc.denormalize_code_offset(norm_stop),
        ))
    }
}

impl Iterator for RangeIter<'_> {
    type Item = Result<CodeRange, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let result = self.decode_next();
        self.remaining = if result.is_ok() { self.remaining - 1 } else { 0 };
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

/// Whether `offset` lies in one of the ranges.
///
/// Stops at the first range starting after `offset`.
pub fn contains_offset(ranges: RangeIter<'_>, offset: u32) -> Result<bool, DecodeError> {
    for range in ranges {
        let range = range?;
        if offset < range.start {
            return Ok(false);
        }
        if range.contains(offset) {
            return Ok(true);
        }
    }
    Ok(false)
}
