//! Frame views and reported root locations.
//!
//! The decoder never owns or mutates the stack walker's state. It reads
//! register values and stack pointers through [`FrameView`] and reports each
//! live root as a [`GcRoot`].
//!
//! # Stack slot addressing
//!
//! ```text
//! ┌────────────────────────┐  High addresses
//! │   Caller's frame       │
//! ├────────────────────────┤  ← caller SP    (CallerSpRel slots: caller_sp + off)
//! │   Return address       │
//! │   Saved frame pointer  │  ← frame reg    (FrameRegRel slots: frame_reg + off)
//! │   Locals / spills      │
//! ├────────────────────────┤
//! │   Outgoing arg area    │  scratch for non-leaf frames
//! ├────────────────────────┤  ← SP           (SpRel slots: sp + off)
//! │     (Stack grows)      │
//! └────────────────────────┘  Low addresses
//! ```

use crate::slots::{SlotFlags, StackSlotBase};

// =============================================================================
// FrameView
// =============================================================================

/// Read-only snapshot of one stack frame's registers.
pub trait FrameView {
    /// Current value of register `reg`, if the snapshot has it.
    fn register_value(&self, reg: u32) -> Option<usize>;

    /// Address where register `reg` was spilled, if known.
    ///
    /// Reported with register roots so a relocating collector can update the
    /// saved copy.
    fn register_location(&self, _reg: u32) -> Option<usize> {
        None
    }

    /// Stack pointer of this frame.
    fn stack_pointer(&self) -> usize;

    /// Stack pointer of the caller, i.e. this frame's SP after unwinding.
    fn caller_stack_pointer(&self) -> usize;

    /// Absolute address of a stack slot.
    ///
    /// `frame_register` is the method's stack base register, needed only for
    /// [`StackSlotBase::FrameRegRel`]. Returns `None` when the base cannot be
    /// resolved against this frame.
    fn stack_slot_address(
        &self,
        base: StackSlotBase,
        offset: i32,
        frame_register: Option<u32>,
    ) -> Option<usize> {
        let origin = match base {
            StackSlotBase::SpRel => self.stack_pointer(),
            StackSlotBase::CallerSpRel => self.caller_stack_pointer(),
            StackSlotBase::FrameRegRel => self.register_value(frame_register?)?,
        };
        Some(origin.wrapping_add_signed(offset as isize))
    }
}

impl<F: FrameView + ?Sized> FrameView for &F {
    #[inline]
    fn register_value(&self, reg: u32) -> Option<usize> {
        (**self).register_value(reg)
    }

    #[inline]
    fn register_location(&self, reg: u32) -> Option<usize> {
        (**self).register_location(reg)
    }

    #[inline]
    fn stack_pointer(&self) -> usize {
        (**self).stack_pointer()
    }

    #[inline]
    fn caller_stack_pointer(&self) -> usize {
        (**self).caller_stack_pointer()
    }
}

// =============================================================================
// RootLocation
// =============================================================================

/// Where a live root is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RootLocation {
    /// A register of this frame.
    Register {
        /// Architecture register number.
        reg: u32,
        /// Spill address of the register, if the frame view knows it.
        saved_at: Option<usize>,
    },
    /// A stack slot.
    Stack {
        /// Absolute address of the slot.
        address: usize,
        /// What `offset` is relative to.
        base: StackSlotBase,
        /// Offset in bytes from `base`.
        offset: i32,
    },
}

impl RootLocation {
    /// Memory address holding the root, if it lives in memory.
    #[inline]
    pub fn address(&self) -> Option<usize> {
        match self {
            RootLocation::Stack { address, .. } => Some(*address),
            RootLocation::Register { saved_at, .. } => *saved_at,
        }
    }

    /// Whether this is a register root.
    #[inline]
    pub fn is_register(&self) -> bool {
        matches!(self, RootLocation::Register { .. })
    }

    /// Identity of the storage, ignoring how a stack slot was addressed.
    #[inline]
    pub fn key(&self) -> RootKey {
        match *self {
            RootLocation::Register { reg, .. } => RootKey::Register(reg),
            RootLocation::Stack { address, .. } => RootKey::Memory(address),
        }
    }
}

/// Storage identity of a [`RootLocation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RootKey {
    /// Register number.
    Register(u32),
    /// Absolute stack address.
    Memory(usize),
}

/// One reported root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcRoot {
    /// Where the reference lives.
    pub location: RootLocation,
    /// Interior / pinned kind.
    pub flags: SlotFlags,
}

impl GcRoot {
    /// Whether the reference may point inside an object.
    #[inline]
    pub fn is_interior(&self) -> bool {
        self.flags.is_interior()
    }

    /// Whether the referent must not move.
    #[inline]
    pub fn is_pinned(&self) -> bool {
        self.flags.is_pinned()
    }
}

// =============================================================================
// SavedRegisters
// =============================================================================

/// Maximum architecture register number a [`SavedRegisters`] can hold.
pub const MAX_SAVED_REGISTERS: usize = 32;

/// A [`FrameView`] over a captured register file.
#[derive(Debug, Clone)]
pub struct SavedRegisters {
    /// Saved register values indexed by architecture register number.
    pub values: [usize; MAX_SAVED_REGISTERS],
    /// Bit `n` set when `values[n]` is meaningful.
    pub valid: u32,
    /// Address of the register save area; register `n` lives at `+ 8 * n`.
    pub register_save_area: Option<usize>,
    /// Stack pointer of the frame.
    pub sp: usize,
    /// Stack pointer of the caller.
    pub caller_sp: usize,
}

impl SavedRegisters {
    /// Create an empty register file.
    #[inline]
    pub fn new(sp: usize, caller_sp: usize) -> Self {
        Self {
            values: [0; MAX_SAVED_REGISTERS],
            valid: 0,
            register_save_area: None,
            sp,
            caller_sp,
        }
    }

    /// Builder-style register assignment.
    #[inline]
    pub fn with(mut self, reg: u32, value: usize) -> Self {
        self.set(reg, value);
        self
    }

    /// Set a register value. Out-of-range registers are ignored.
    #[inline]
    pub fn set(&mut self, reg: u32, value: usize) {
        if (reg as usize) < MAX_SAVED_REGISTERS {
            self.values[reg as usize] = value;
            self.valid |= 1 << reg;
        }
    }

    /// Get a register value.
    #[inline]
    pub fn get(&self, reg: u32) -> Option<usize> {
        if (reg as usize) < MAX_SAVED_REGISTERS && self.valid & (1 << reg) != 0 {
            Some(self.values[reg as usize])
        } else {
            None
        }
    }
}

impl FrameView for SavedRegisters {
    #[inline]
    fn register_value(&self, reg: u32) -> Option<usize> {
        self.get(reg)
    }

    #[inline]
    fn register_location(&self, reg: u32) -> Option<usize> {
        let area = self.register_save_area?;
        self.get(reg)?;
        Some(area + reg as usize * 8)
    }

    #[inline]
    fn stack_pointer(&self) -> usize {
        self.sp
    }

    #[inline]
    fn caller_stack_pointer(&self) -> usize {
        self.caller_sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_key_ignores_stack_base() {
        let below_caller = RootLocation::Stack {
            address: 0x1010,
            base: StackSlotBase::CallerSpRel,
            offset: -0xF0,
        };
        let above_sp = RootLocation::Stack {
            address: 0x1010,
            base: StackSlotBase::SpRel,
            offset: 0x10,
        };
        assert_ne!(below_caller, above_sp);
        assert_eq!(below_caller.key(), above_sp.key());

        let spilled = RootLocation::Register { reg: 3, saved_at: Some(0x1010) };
        assert_eq!(spilled.key(), RootKey::Register(3));
        assert_ne!(spilled.key(), above_sp.key());
    }

    #[test]
    fn test_saved_registers_validity() {
        let mut regs = SavedRegisters::new(0x1000, 0x1100);
        assert_eq!(regs.get(3), None);
        regs.set(3, 0xABCD);
        assert_eq!(regs.get(3), Some(0xABCD));
        regs.set(40, 1);
        assert_eq!(regs.get(40), None);
    }

    #[test]
    fn test_register_location_needs_save_area() {
        let mut regs = SavedRegisters::new(0, 0).with(5, 7);
        assert_eq!(regs.register_location(5), None);
        regs.register_save_area = Some(0x2000);
        assert_eq!(regs.register_location(5), Some(0x2000 + 40));
        assert_eq!(regs.register_location(6), None);
    }

    #[test]
    fn test_stack_slot_address_by_base() {
        let regs = SavedRegisters::new(0x1000, 0x1100).with(5, 0x10F0);
        assert_eq!(
            regs.stack_slot_address(StackSlotBase::SpRel, 16, None),
            Some(0x1010)
        );
        assert_eq!(
            regs.stack_slot_address(StackSlotBase::CallerSpRel, -8, None),
            Some(0x10F8)
        );
        assert_eq!(
            regs.stack_slot_address(StackSlotBase::FrameRegRel, -16, Some(5)),
            Some(0x10E0)
        );
        assert_eq!(regs.stack_slot_address(StackSlotBase::FrameRegRel, 0, None), None);
        assert_eq!(regs.stack_slot_address(StackSlotBase::FrameRegRel, 0, Some(6)), None);
    }

    #[test]
    fn test_root_location_address() {
        let stack = RootLocation::Stack {
            address: 0x1010,
            base: StackSlotBase::SpRel,
            offset: 16,
        };
        assert_eq!(stack.address(), Some(0x1010));
        assert!(!stack.is_register());

        let reg = RootLocation::Register {
            reg: 3,
            saved_at: None,
        };
        assert_eq!(reg.address(), None);
        assert!(reg.is_register());
    }
}
