//! Bit-level cursor over an encoded GC info blob.
//!
//! Every other decoder in this crate is written in terms of [`BitReader`].
//! Bits are consumed least-significant first within each byte, bytes in
//! ascending address order:
//!
//! ```text
//!   byte 0            byte 1
//! ┌─┬─┬─┬─┬─┬─┬─┬─┐ ┌─┬─┬─┬─┬─┬─┬─┬─┐
//! │7│6│5│4│3│2│1│0│ │7│6│5│4│3│2│1│0│
//! └─┴─┴─┴─┴─┴─┴─┴─┘ └─┴─┴─┴─┴─┴─┴─┴─┘
//!  bit 7 ... bit 0   bit 15 ... bit 8
//! ```
//!
//! A multi-bit `read(n)` returns the first bit consumed in bit 0 of the
//! result, so fields may straddle byte boundaries transparently.
//!
//! # Variable-length integers
//!
//! A value is split into chunks of `base + 1` bits. The low `base` bits of
//! each chunk carry data (least significant chunk first) and the top bit is
//! a continuation flag. Signed values are sign-extended from the total
//! number of data bits consumed.

use crate::error::DecodeError;

/// Width of the widest single read, and the exclusive upper bound for a
/// variable-length `base`.
pub const BITS_PER_WORD: u32 = u64::BITS;

/// Smallest `k` such that `2^k >= value`.
///
/// Used to size fixed-width offset tables: a table of code offsets below
/// `value` needs `ceil_log2(value)` bits per entry.
#[inline]
pub const fn ceil_log2(value: u64) -> u32 {
    if value <= 1 {
        0
    } else {
        BITS_PER_WORD - (value - 1).leading_zeros()
    }
}

#[inline]
#[track_caller]
fn check_base(base: u32) {
    assert!(
        base > 0 && base < BITS_PER_WORD,
        "variable-length base {base} outside 1..{BITS_PER_WORD}"
    );
}

// =============================================================================
// BitReader
// =============================================================================

/// Forward and random-access cursor over a borrowed byte blob.
///
/// The reader never owns or mutates the blob. Cloning a reader is cheap and
/// is the way to keep a "come back here" mark alongside the primary cursor.
#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Create a reader positioned at bit 0.
    #[inline]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a reader positioned at an absolute bit offset.
    #[inline]
    pub const fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    /// The underlying blob.
    #[inline]
    pub const fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Total number of bits in the blob.
    #[inline]
    pub const fn bit_len(&self) -> usize {
        self.data.len() * 8
    }

    /// Current absolute bit position.
    #[inline]
    pub const fn position(&self) -> usize {
        self.pos
    }

    /// Bits left between the cursor and the end of the blob.
    #[inline]
    pub const fn remaining_bits(&self) -> usize {
        self.bit_len().saturating_sub(self.pos)
    }

    /// Number of whole bytes touched so far.
    #[inline]
    pub const fn bytes_consumed(&self) -> usize {
        self.pos.div_ceil(8)
    }

    /// Move to an absolute bit position.
    ///
    /// Seeking past the end is allowed; the next read reports the error.
    #[inline]
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Move relative to the current position.
    ///
    /// Negative deltas rewind. Rewinding before bit 0 is corrupt input.
    #[inline]
    pub fn skip(&mut self, delta: isize) -> Result<(), DecodeError> {
        match self.pos.checked_add_signed(delta) {
            Some(pos) => {
                self.pos = pos;
                Ok(())
            }
            None => Err(DecodeError::ValueOutOfRange { position: self.pos }),
        }
    }

    /// Skip `count` fixed-width fields of `width` bits each.
    #[inline]
    pub fn skip_fields(&mut self, count: u64, width: u32) -> Result<(), DecodeError> {
        let bits = count
            .checked_mul(u64::from(width))
            .and_then(|bits| isize::try_from(bits).ok())
            .ok_or(DecodeError::ValueOutOfRange { position: self.pos })?;
        self.skip(bits)
    }

    /// Advance to the next byte boundary (no-op when already aligned).
    #[inline]
    pub fn align_to_byte(&mut self) {
        self.pos = (self.pos + 7) & !7;
    }

    /// Read `n` bits at an absolute position without moving the cursor.
    ///
    /// # Panics
    ///
    /// Panics if `n` is zero or wider than a word.
    pub fn peek(&self, pos: usize, n: u32) -> Result<u64, DecodeError> {
        assert!(n > 0 && n <= BITS_PER_WORD, "read width {n} outside 1..={BITS_PER_WORD}");

        let end = pos.checked_add(n as usize);
        if end.map_or(true, |end| end > self.bit_len()) {
            return Err(DecodeError::UnexpectedEnd { position: pos, wanted: n });
        }

        let mut value = 0u64;
        let mut filled = 0u32;
        let mut cursor = pos;
        while filled < n {
            let byte = u64::from(self.data[cursor / 8]);
            let bit = (cursor % 8) as u32;
            let take = (8 - bit).min(n - filled);
            let chunk = (byte >> bit) & ((1u64 << take) - 1);
            value |= chunk << filled;
            filled += take;
            cursor += take as usize;
        }
        Ok(value)
    }

    /// Read one bit at an absolute position without moving the cursor.
    #[inline]
    pub fn peek_bit_at(&self, pos: usize) -> Result<bool, DecodeError> {
        match self.data.get(pos / 8) {
            Some(byte) => Ok(byte & (1 << (pos % 8)) != 0),
            None => Err(DecodeError::UnexpectedEnd { position: pos, wanted: 1 }),
        }
    }

    /// Consume `n` bits (1 ≤ n ≤ 64).
    #[inline]
    pub fn read(&mut self, n: u32) -> Result<u64, DecodeError> {
        let value = self.peek(self.pos, n)?;
        self.pos += n as usize;
        Ok(value)
    }

    /// Consume a single bit.
    #[inline]
    pub fn read_one_fast(&mut self) -> Result<bool, DecodeError> {
        let bit = self.peek_bit_at(self.pos)?;
        self.pos += 1;
        Ok(bit)
    }

    /// Decode an unsigned variable-length integer.
    ///
    /// # Panics
    ///
    /// Panics if `base` is outside `1..64`.
    #[track_caller]
    pub fn decode_unsigned(&mut self, base: u32) -> Result<u64, DecodeError> {
        check_base(base);
        let start = self.pos;
        let continuation = 1u64 << base;
        let mask = continuation - 1;

        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= BITS_PER_WORD {
                return Err(DecodeError::VarIntOverflow { position: start });
            }
            let chunk = self.read(base + 1)?;
            result |= (chunk & mask) << shift;
            if chunk & continuation == 0 {
                return Ok(result);
            }
            shift += base;
        }
    }

    /// Decode a signed variable-length integer.
    ///
    /// # Panics
    ///
    /// Panics if `base` is outside `1..64`.
    #[track_caller]
    pub fn decode_signed(&mut self, base: u32) -> Result<i64, DecodeError> {
        check_base(base);
        let start = self.pos;
        let continuation = 1u64 << base;
        let mask = continuation - 1;

        let mut result = 0u64;
        let mut shift = 0u32;
        loop {
            if shift >= BITS_PER_WORD {
                return Err(DecodeError::VarIntOverflow { position: start });
            }
            let chunk = self.read(base + 1)?;
            result |= (chunk & mask) << shift;
            shift += base;
            if chunk & continuation == 0 {
                if shift >= BITS_PER_WORD {
                    return Ok(result as i64);
                }
                let unused = BITS_PER_WORD - shift;
                return Ok(((result << unused) as i64) >> unused);
            }
        }
    }

    /// Decode an unsigned variable-length integer that must fit in `u32`.
    #[inline]
    #[track_caller]
    pub fn decode_u32(&mut self, base: u32) -> Result<u32, DecodeError> {
        let position = self.pos;
        let value = self.decode_unsigned(base)?;
        u32::try_from(value).map_err(|_| DecodeError::ValueOutOfRange { position })
    }

    /// Decode a signed variable-length integer that must fit in `i32`.
    #[inline]
    #[track_caller]
    pub fn decode_i32(&mut self, base: u32) -> Result<i32, DecodeError> {
        let position = self.pos;
        let value = self.decode_signed(base)?;
        i32::try_from(value).map_err(|_| DecodeError::ValueOutOfRange { position })
    }
}
