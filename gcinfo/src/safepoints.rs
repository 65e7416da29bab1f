//! Safe-point table.
//!
//! Safe points are call return addresses. Each is stored as the normalized
//! `return_offset - 1` in a fixed-width field, so entry `i` sits at
//! `table_start + i * width` and can be read without touching the others.
//! Entries are sorted, which lets [`SafePointTable::find`] bisect the table
//! and finish with a short linear scan.

use std::ops::ControlFlow;

use crate::bitstream::BitReader;
use crate::config::{Encoding, MAX_LINEAR_SEARCH};
use crate::error::DecodeError;

/// View of the safe-point table inside a blob.
#[derive(Debug, Clone, Copy)]
pub struct SafePointTable<'a> {
    reader: BitReader<'a>,
    encoding: &'a Encoding,
    count: u32,
    width: u32,
}

impl<'a> SafePointTable<'a> {
    /// Table of `count` entries at the reader's position, for a method of
    /// `code_length` bytes.
    pub fn new(reader: BitReader<'a>, encoding: &'a Encoding, count: u32, code_length: u32) -> Self {
        Self {
            reader,
            encoding,
            count,
            width: encoding.safe_point_offset_bits(code_length),
        }
    }

    /// Number of safe points.
    #[inline]
    pub fn len(&self) -> u32 {
        self.count
    }

    /// Whether the method has no safe points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Bits per entry.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Bit position of the first entry.
    #[inline]
    pub fn start_position(&self) -> usize {
        self.reader.position()
    }

    /// Bit position after the table.
    #[inline]
    pub fn end_position(&self) -> usize {
        self.reader.position() + self.count as usize * self.width as usize
    }

    fn stored(&self, index: u32) -> Result<u32, DecodeError> {
        if self.width == 0 {
            return Ok(0);
        }
        let position = self.reader.position() + index as usize * self.width as usize;
        Ok(self.reader.peek(position, self.width)? as u32)
    }

    /// Return offset of safe point `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn offset_at(&self, index: u32) -> Result<u32, DecodeError> {
        assert!(index < self.count, "safe point {index} out of range ({} entries)", self.count);
        Ok(self.encoding.denormalize_code_offset(self.stored(index)?) + 1)
    }

    /// Index of the safe point whose return offset is `offset`.
    pub fn find(&self, offset: u32) -> Result<Option<u32>, DecodeError> {
        let Some(adjusted) = offset.checked_sub(1) else {
            return Ok(None);
        };
        if self.encoding.odd_safe_point_offsets && adjusted & 1 == 0 {
            return Ok(None);
        }
        let target = self.encoding.normalize_code_offset(adjusted);

        let mut low = 0u32;
        let mut high = self.count;
        while high - low > MAX_LINEAR_SEARCH {
            let mid = low + (high - low) / 2;
            let value = self.stored(mid)?;
            if value == target {
                return Ok(Some(mid));
            }
            if target < value {
                high = mid;
            } else {
                low = mid + 1;
            }
        }

        for index in low..high {
            let value = self.stored(index)?;
            if value == target {
                return Ok(Some(index));
            }
            if target < value {
                break;
            }
        }
        Ok(None)
    }

    /// Return offsets in table order.
    pub fn iter(&self) -> impl Iterator<Item = Result<u32, DecodeError>> + '_ {
        (0..self.count).map(move |index| self.offset_at(index))
    }

    /// Invoke `callback` with each return offset until it breaks.
    pub fn for_each<F>(&self, mut callback: F) -> Result<(), DecodeError>
    where
        F: FnMut(u32) -> ControlFlow<()>,
    {
        for offset in self.iter() {
            if callback(offset?).is_break() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{encode_safe_points, BitWriter};

    fn table_bytes(enc: &Encoding, code_length: u32, offsets: &[u32]) -> Vec<u8> {
        let mut writer = BitWriter::new();
        writer.write(0b101, 3); // unaligned start
        encode_safe_points(&mut writer, enc, code_length, offsets);
        writer.into_bytes()
    }

    fn table<'a>(enc: &'a Encoding, bytes: &'a [u8], code_length: u32, count: usize) -> SafePointTable<'a> {
        SafePointTable::new(BitReader::at(bytes, 3), enc, count as u32, code_length)
    }

    #[test]
    fn test_find_matches_linear_scan() {
        let enc = Encoding::AMD64;
        let code_length = 2000;
        // Enough entries to exercise bisection before the linear tail.
        let offsets: Vec<u32> = (0..150).map(|i| 5 + i * 13).collect();
        let bytes = table_bytes(&enc, code_length, &offsets);
        let table = table(&enc, &bytes, code_length, offsets.len());
        assert_eq!(table.width(), 11);

        for offset in 0..code_length + 2 {
            let expected = offsets.iter().position(|&o| o == offset).map(|i| i as u32);
            assert_eq!(table.find(offset).unwrap(), expected, "offset {offset}");
        }
    }

    #[test]
    fn test_enumerate_returns_return_offsets() {
        let enc = Encoding::AMD64;
        let offsets = [1, 10, 11, 40];
        let bytes = table_bytes(&enc, 64, &offsets);
        let table = table(&enc, &bytes, 64, offsets.len());

        let all: Vec<u32> = table.iter().map(Result::unwrap).collect();
        assert_eq!(all, offsets);

        let mut seen = Vec::new();
        table
            .for_each(|offset| {
                seen.push(offset);
                if offset >= 10 {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();
        assert_eq!(seen, [1, 10]);
        assert_eq!(table.end_position(), 3 + 4 * 6);
    }

    #[test]
    fn test_offset_zero_is_never_a_safe_point() {
        let enc = Encoding::AMD64;
        let bytes = table_bytes(&enc, 16, &[1]);
        let table = table(&enc, &bytes, 16, 1);
        assert_eq!(table.find(0).unwrap(), None);
        assert_eq!(table.find(1).unwrap(), Some(0));
    }

    #[test]
    fn test_arm64_rejects_misaligned_offsets() {
        let enc = Encoding::ARM64;
        let offsets = [8, 24, 100];
        let bytes = table_bytes(&enc, 128, &offsets);
        let table = table(&enc, &bytes, 128, offsets.len());
        assert_eq!(table.find(24).unwrap(), Some(1));
        assert_eq!(table.find(23).unwrap(), None);
        assert_eq!(table.find(25).unwrap(), None);
        assert_eq!(table.find(100).unwrap(), Some(2));
    }

    #[test]
    fn test_single_byte_method_has_zero_width_entries() {
        let enc = Encoding::AMD64;
        let table = SafePointTable::new(BitReader::new(&[]), &enc, 1, 1);
        assert_eq!(table.width(), 0);
        assert_eq!(table.find(1).unwrap(), Some(0));
        assert_eq!(table.offset_at(0).unwrap(), 1);
    }

    #[test]
    fn test_empty_table() {
        let enc = Encoding::AMD64;
        let table = SafePointTable::new(BitReader::new(&[]), &enc, 0, 100);
        assert!(table.is_empty());
        assert_eq!(table.find(10).unwrap(), None);
        assert_eq!(table.iter().count(), 0);
    }
}
