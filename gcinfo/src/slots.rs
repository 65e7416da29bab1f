//! GC slot table decoding.
//!
//! The slot table declares every location that may hold a root in the
//! method, in a fixed order that all liveness data indexes into:
//!
//! ```text
//! index: 0 .. R-1          R .. R+S-1            R+S .. R+S+U-1
//!       ┌──────────────┬───────────────────────┬──────────────────────┐
//!       │  registers   │  tracked stack slots  │ untracked stack slots│
//!       └──────────────┴───────────────────────┴──────────────────────┘
//!        ◄──────── tracked (liveness encoded) ──►◄─ always live ───────►
//! ```
//!
//! Within each group a slot whose predecessor had no flags is stored as a
//! small delta from it. Everything else is stored in full with its flags.
//!
//! # Predecoded cache
//!
//! The first [`MAX_PREDECODED_SLOTS`] descriptors are decoded once into a
//! fixed array. Later slots are re-decoded on demand from a saved cursor
//! ([`SlotCursor`]). The cache is small in debug builds so the fallback path
//! is exercised by ordinary tests.

use crate::bitstream::BitReader;
use crate::config::Encoding;
use crate::error::DecodeError;

/// Capacity of the predecoded slot cache.
#[cfg(debug_assertions)]
pub const MAX_PREDECODED_SLOTS: usize = 4;

/// Capacity of the predecoded slot cache.
#[cfg(not(debug_assertions))]
pub const MAX_PREDECODED_SLOTS: usize = 64;

// =============================================================================
// Slot flags and bases
// =============================================================================

/// Kind and bookkeeping flags of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SlotFlags(u8);

impl SlotFlags {
    /// No flags: an ordinary object reference.
    pub const EMPTY: SlotFlags = SlotFlags(0);
    /// The reference may point inside an object.
    pub const INTERIOR: SlotFlags = SlotFlags(0x1);
    /// The referent must not be moved.
    pub const PINNED: SlotFlags = SlotFlags(0x2);
    /// Liveness is not tracked; live for the whole method body.
    pub const UNTRACKED: SlotFlags = SlotFlags(0x4);
    /// Decoder bookkeeping: the slot is a register.
    pub const IS_REGISTER: SlotFlags = SlotFlags(0x8);

    const WIRE_MASK: u8 = 0x3;

    /// Flags from their 2-bit stored form.
    #[inline]
    pub const fn from_wire(bits: u8) -> Self {
        SlotFlags(bits & Self::WIRE_MASK)
    }

    /// The 2-bit stored form (interior and pinned only).
    #[inline]
    pub const fn wire_bits(self) -> u8 {
        self.0 & Self::WIRE_MASK
    }

    /// The flags a root is reported with.
    #[inline]
    pub const fn reported(self) -> Self {
        SlotFlags(self.0 & Self::WIRE_MASK)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether all of `other` is set.
    #[inline]
    pub const fn contains(self, other: SlotFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union.
    #[inline]
    pub const fn union(self, other: SlotFlags) -> Self {
        SlotFlags(self.0 | other.0)
    }

    /// Interior pointer.
    #[inline]
    pub const fn is_interior(self) -> bool {
        self.contains(Self::INTERIOR)
    }

    /// Pinned reference.
    #[inline]
    pub const fn is_pinned(self) -> bool {
        self.contains(Self::PINNED)
    }

    /// Untracked slot.
    #[inline]
    pub const fn is_untracked(self) -> bool {
        self.contains(Self::UNTRACKED)
    }
}

impl std::ops::BitOr for SlotFlags {
    type Output = SlotFlags;

    #[inline]
    fn bitor(self, rhs: SlotFlags) -> SlotFlags {
        self.union(rhs)
    }
}

/// What a stack slot offset is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StackSlotBase {
    /// The caller's stack pointer (this frame's SP after unwinding).
    CallerSpRel = 0,
    /// This frame's stack pointer.
    SpRel = 1,
    /// The method's stack base (frame) register.
    FrameRegRel = 2,
}

impl StackSlotBase {
    /// Base kind from its 2-bit stored form. The value 3 is reserved.
    #[inline]
    pub const fn from_bits(bits: u64) -> Option<Self> {
        match bits {
            0 => Some(StackSlotBase::CallerSpRel),
            1 => Some(StackSlotBase::SpRel),
            2 => Some(StackSlotBase::FrameRegRel),
            _ => None,
        }
    }

    /// The 2-bit stored form.
    #[inline]
    pub const fn bits(self) -> u64 {
        self as u64
    }
}

// =============================================================================
// SlotDesc
// =============================================================================

/// One decoded slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotDesc {
    /// A register root.
    Register {
        /// Architecture register number.
        reg: u32,
        /// Slot flags ([`SlotFlags::IS_REGISTER`] always set).
        flags: SlotFlags,
    },
    /// A stack root.
    Stack {
        /// Byte offset from `base`.
        offset: i32,
        /// Reference point of `offset`.
        base: StackSlotBase,
        /// Slot flags.
        flags: SlotFlags,
    },
}

impl SlotDesc {
    /// Flags of the slot.
    #[inline]
    pub const fn flags(&self) -> SlotFlags {
        match self {
            SlotDesc::Register { flags, .. } | SlotDesc::Stack { flags, .. } => *flags,
        }
    }

    /// Whether this is a register slot.
    #[inline]
    pub const fn is_register(&self) -> bool {
        matches!(self, SlotDesc::Register { .. })
    }

    /// Whether this slot is untracked.
    #[inline]
    pub const fn is_untracked(&self) -> bool {
        self.flags().is_untracked()
    }
}

const PLACEHOLDER: SlotDesc = SlotDesc::Register {
    reg: 0,
    flags: SlotFlags::EMPTY,
};

/// Slot counts from the table prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotCounts {
    /// Register slots.
    pub num_registers: u32,
    /// Tracked stack slots.
    pub num_stack_slots: u32,
    /// Untracked stack slots.
    pub num_untracked: u32,
}

impl SlotCounts {
    /// Slots with encoded liveness: registers plus tracked stack slots.
    #[inline]
    pub const fn num_tracked(&self) -> u32 {
        self.num_registers + self.num_stack_slots
    }

    /// All slots.
    #[inline]
    pub const fn num_slots(&self) -> u32 {
        self.num_tracked() + self.num_untracked
    }
}

// =============================================================================
// SlotCursor
// =============================================================================

/// Resumable forward decoder over slot descriptors.
///
/// Holds everything needed to decode the next slot: the bit position, the
/// index it will produce, and the previous slot's normalized value and
/// stored flags (the delta reference).
#[derive(Debug, Clone)]
pub struct SlotCursor<'a> {
    reader: BitReader<'a>,
    encoding: &'a Encoding,
    counts: SlotCounts,
    next_index: u32,
    prev_norm: i64,
    prev_wire_flags: u8,
}

impl<'a> SlotCursor<'a> {
    fn new(reader: BitReader<'a>, encoding: &'a Encoding, counts: SlotCounts) -> Self {
        Self {
            reader,
            encoding,
            counts,
            next_index: 0,
            prev_norm: 0,
            prev_wire_flags: 0,
        }
    }

    /// Index of the slot the next call decodes.
    #[inline]
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    /// Bit position of the next slot.
    #[inline]
    pub fn position(&self) -> usize {
        self.reader.position()
    }

    /// Decode the next slot, or `None` past the end of the table.
    pub fn next_slot(&mut self) -> Result<Option<SlotDesc>, DecodeError> {
        let index = self.next_index;
        if index >= self.counts.num_slots() {
            return Ok(None);
        }

        let desc = if index < self.counts.num_registers {
            self.decode_register(index)?
        } else {
            self.decode_stack_slot(index)?
        };
        self.next_index += 1;
        Ok(Some(desc))
    }

    fn decode_register(&mut self, index: u32) -> Result<SlotDesc, DecodeError> {
        let enc = self.encoding;
        let position = self.reader.position();
        let norm = if index == 0 || self.prev_wire_flags != 0 {
            let norm = self.reader.decode_u32(enc.register_base)?;
            self.prev_wire_flags = self.reader.read(2)? as u8;
            norm
        } else {
            let delta = self.reader.decode_u32(enc.register_delta_base)?;
            u32::try_from(self.prev_norm)
                .ok()
                .and_then(|prev| prev.checked_add(delta)?.checked_add(1))
                .ok_or(DecodeError::ValueOutOfRange { position })?
        };
        self.prev_norm = i64::from(norm);

        Ok(SlotDesc::Register {
            reg: enc.denormalize_register(norm),
            flags: SlotFlags::from_wire(self.prev_wire_flags) | SlotFlags::IS_REGISTER,
        })
    }

    fn decode_stack_slot(&mut self, index: u32) -> Result<SlotDesc, DecodeError> {
        let enc = self.encoding;
        let base_position = self.reader.position();
        let base = StackSlotBase::from_bits(self.reader.read(2)?).ok_or(
            DecodeError::InvalidStackBase {
                position: base_position,
            },
        )?;

        let first_in_group =
            index == self.counts.num_registers || index == self.counts.num_tracked();
        let position = self.reader.position();
        let norm = if first_in_group || self.prev_wire_flags != 0 {
            let norm = self.reader.decode_i32(enc.stack_slot_base)?;
            self.prev_wire_flags = self.reader.read(2)? as u8;
            norm
        } else {
            let delta = self.reader.decode_u32(enc.stack_slot_delta_base)?;
            i32::try_from(self.prev_norm + i64::from(delta))
                .map_err(|_| DecodeError::ValueOutOfRange { position })?
        };
        self.prev_norm = i64::from(norm);

        let mut flags = SlotFlags::from_wire(self.prev_wire_flags);
        if index >= self.counts.num_tracked() {
            flags = flags | SlotFlags::UNTRACKED;
        }
        Ok(SlotDesc::Stack {
            offset: enc.denormalize_stack_slot(norm),
            base,
            flags,
        })
    }
}

// =============================================================================
// SlotTable
// =============================================================================

/// A decoded slot table with its predecoded cache.
#[derive(Debug, Clone)]
pub struct SlotTable<'a> {
    counts: SlotCounts,
    cache: [SlotDesc; MAX_PREDECODED_SLOTS],
    num_cached: usize,
    /// Cursor positioned right after the last cached slot.
    resume: SlotCursor<'a>,
    end_position: usize,
}

impl<'a> SlotTable<'a> {
    /// Decode the table at the reader's position.
    ///
    /// On success the reader is left immediately after the table.
    pub fn decode(reader: &mut BitReader<'a>, encoding: &'a Encoding) -> Result<Self, DecodeError> {
        let num_registers = if reader.read_one_fast()? {
            reader.decode_u32(encoding.num_registers_base)?
        } else {
            0
        };
        let (num_stack_slots, num_untracked) = if reader.read_one_fast()? {
            let stack = reader.decode_u32(encoding.num_stack_slots_base)?;
            let untracked = reader.decode_u32(encoding.num_untracked_slots_base)?;
            (stack, untracked)
        } else {
            (0, 0)
        };
        let total = u64::from(num_registers) + u64::from(num_stack_slots) + u64::from(num_untracked);
        if total > u64::from(u32::MAX) {
            return Err(DecodeError::ValueOutOfRange {
                position: reader.position(),
            });
        }

        let counts = SlotCounts {
            num_registers,
            num_stack_slots,
            num_untracked,
        };
        let mut cursor = SlotCursor::new(*reader, encoding, counts);
        let mut cache = [PLACEHOLDER; MAX_PREDECODED_SLOTS];
        let mut num_cached = 0;
        while num_cached < MAX_PREDECODED_SLOTS {
            match cursor.next_slot()? {
                Some(desc) => {
                    cache[num_cached] = desc;
                    num_cached += 1;
                }
                None => break,
            }
        }

        let resume = cursor.clone();
        while cursor.next_slot()?.is_some() {}
        let end_position = cursor.position();
        reader.seek(end_position);

        tracing::trace!(
            registers = num_registers,
            stack = num_stack_slots,
            untracked = num_untracked,
            cached = num_cached,
            "decoded slot table"
        );

        Ok(Self {
            counts,
            cache,
            num_cached,
            resume,
            end_position,
        })
    }

    /// Slot counts.
    #[inline]
    pub fn counts(&self) -> SlotCounts {
        self.counts
    }

    /// Number of register slots.
    #[inline]
    pub fn num_registers(&self) -> u32 {
        self.counts.num_registers
    }

    /// Number of tracked stack slots.
    #[inline]
    pub fn num_stack_slots(&self) -> u32 {
        self.counts.num_stack_slots
    }

    /// Number of untracked stack slots.
    #[inline]
    pub fn num_untracked(&self) -> u32 {
        self.counts.num_untracked
    }

    /// Number of slots with encoded liveness.
    #[inline]
    pub fn num_tracked(&self) -> u32 {
        self.counts.num_tracked()
    }

    /// Total number of slots.
    #[inline]
    pub fn num_slots(&self) -> u32 {
        self.counts.num_slots()
    }

    /// Number of slots held in the predecoded cache.
    #[inline]
    pub fn num_cached(&self) -> usize {
        self.num_cached
    }

    /// Bit position immediately after the table.
    #[inline]
    pub fn end_position(&self) -> usize {
        self.end_position
    }

    /// Descriptor of slot `index`.
    ///
    /// O(1) inside the cache; otherwise re-decodes forward from the end of
    /// the cache.
    ///
    /// # Panics
    ///
    /// Panics if `index >= self.num_slots()`.
    pub fn get_slot(&self, index: u32) -> Result<SlotDesc, DecodeError> {
        self.walker().get(index)
    }

    /// A walker for efficient in-order access.
    #[inline]
    pub fn walker(&self) -> SlotWalker<'_, 'a> {
        SlotWalker {
            table: self,
            cursor: None,
            last: None,
        }
    }

    /// All descriptors in table order.
    pub fn iter(&self) -> impl Iterator<Item = Result<SlotDesc, DecodeError>> + '_ {
        let mut walker = self.walker();
        (0..self.num_slots()).map(move |index| walker.get(index))
    }
}

/// Slot accessor that keeps its re-decode position between calls.
///
/// Accessing slots in ascending order costs one decode per slot overall.
/// Going backwards past the cache restarts from the cache end.
#[derive(Debug)]
pub struct SlotWalker<'t, 'a> {
    table: &'t SlotTable<'a>,
    cursor: Option<SlotCursor<'a>>,
    last: Option<SlotDesc>,
}

impl<'t, 'a> SlotWalker<'t, 'a> {
    /// Descriptor of slot `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get(&mut self, index: u32) -> Result<SlotDesc, DecodeError> {
        let table = self.table;
        assert!(
            index < table.num_slots(),
            "slot index {index} out of range ({} slots)",
            table.num_slots()
        );

        if (index as usize) < table.num_cached {
            return Ok(table.cache[index as usize]);
        }

        let cursor = self.cursor.get_or_insert_with(|| table.resume.clone());
        if let Some(last) = self.last {
            if cursor.next_index() == index + 1 {
                return Ok(last);
            }
        }
        if cursor.next_index() > index {
            *cursor = table.resume.clone();
        }

        loop {
            let position = cursor.position();
            let desc = cursor
                .next_slot()?
                .ok_or(DecodeError::ValueOutOfRange { position })?;
            if cursor.next_index() == index + 1 {
                self.last = Some(desc);
                return Ok(desc);
            }
        }
    }
}
