//! Per-architecture encoding parameters.
//!
//! The producer picks a variable-length `base` for every field, and a few
//! normalization transforms that shorten common values (stack offsets are
//! stored divided by the slot alignment, the frame register is remapped to
//! codepoint 0). Decoding must use exactly the same table, so it is passed
//! explicitly to every decode routine rather than baked into them.

use std::fmt;

/// Width of the header flag field for format version 1.
pub const HEADER_FLAGS_BITS_VERSION_1: u32 = 9;

/// Width of the header flag field for format versions 2 and later.
pub const HEADER_FLAGS_BITS: u32 = 10;

/// Latest understood format version.
pub const GCINFO_VERSION: u32 = 3;

/// Number of normalized code offsets covered by one fully-interruptible chunk.
pub const NUM_NORM_CODE_OFFSETS_PER_CHUNK: u32 = 64;

/// `log2` of [`NUM_NORM_CODE_OFFSETS_PER_CHUNK`].
pub const NUM_NORM_CODE_OFFSETS_PER_CHUNK_LOG2: u32 = 6;

/// Safe-point searches narrow by bisection until this many candidates remain.
pub const MAX_LINEAR_SEARCH: u32 = 32;

/// Meaning of header flag bit 7, which differs per architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchHeaderFlag {
    /// The method wants only its leaf funclet frame reported.
    WantsReportOnlyLeaf,
    /// The method contains tail calls. Leaf-only reporting is implied.
    HasTailCalls,
}

/// Encoding parameters for one target architecture.
///
/// # Example
///
/// ```
/// use gcinfo::config::Encoding;
///
/// let enc = Encoding::AMD64;
/// assert_eq!(enc.normalize_stack_slot(24), 3);
/// assert_eq!(enc.denormalize_stack_slot(3), 24);
/// assert!(enc.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Encoding {
    // =========================================================================
    // Header
    // =========================================================================
    /// Base for the GS cookie stack slot.
    ///
    /// Default: 6
    pub gs_cookie_stack_slot_base: u32,

    /// Base for the PSP symbol stack slot.
    ///
    /// Default: 6
    pub psp_sym_stack_slot_base: u32,

    /// Base for the generics instantiation context stack slot.
    ///
    /// Default: 6
    pub generics_inst_context_stack_slot_base: u32,

    /// Base for the normalized method code length.
    ///
    /// Default: 8
    pub code_length_base: u32,

    /// Base for the normalized stack base register.
    ///
    /// Default: 3 (AMD64), 2 (ARM64)
    pub stack_base_register_base: u32,

    /// Base for the normalized outgoing/scratch area size.
    ///
    /// Default: 3
    pub size_of_stack_area_base: u32,

    /// Base for the edit-and-continue preserved area size.
    ///
    /// Default: 4
    pub size_of_edit_and_continue_preserved_area_base: u32,

    /// Base for the edit-and-continue fixed frame size.
    ///
    /// `None` on targets whose header does not carry the field.
    ///
    /// Default: `None` (AMD64), 4 (ARM64)
    pub size_of_edit_and_continue_fixed_stack_frame_base: Option<u32>,

    /// Base for the reverse P/Invoke frame stack slot.
    ///
    /// Default: 6
    pub reverse_pinvoke_frame_base: u32,

    /// Base for the normalized prolog size (stored minus one).
    ///
    /// Default: 5
    pub norm_prolog_size_base: u32,

    /// Base for the normalized epilog size.
    ///
    /// Default: 3
    pub norm_epilog_size_base: u32,

    /// Width of the return kind in a slim header.
    ///
    /// Default: 2
    pub return_kind_bits_slim: u32,

    /// Width of the return kind in a fat header.
    ///
    /// Default: 4
    pub return_kind_bits_fat: u32,

    /// What header flag bit 7 means on this target.
    pub arch_header_flag: ArchHeaderFlag,

    // =========================================================================
    // Safe points and interruptible ranges
    // =========================================================================
    /// Base for the number of safe points.
    ///
    /// Default: 2 (AMD64), 3 (ARM64)
    pub num_safe_points_base: u32,

    /// Base for the number of interruptible ranges.
    ///
    /// Default: 1
    pub num_interruptible_ranges_base: u32,

    /// Base for the gap before each interruptible range.
    ///
    /// Default: 6
    pub interruptible_range_delta1_base: u32,

    /// Base for each interruptible range length (stored minus one).
    ///
    /// Default: 6
    pub interruptible_range_delta2_base: u32,

    /// Safe-point offsets are stored as `return_address - 1`, which is odd
    /// whenever instructions are at least 2-byte aligned. Lookups may reject
    /// even offsets without searching.
    ///
    /// Default: false (AMD64), true (ARM64)
    pub odd_safe_point_offsets: bool,

    // =========================================================================
    // Slot table
    // =========================================================================
    /// Base for the register slot count.
    ///
    /// Default: 2 (AMD64), 3 (ARM64)
    pub num_registers_base: u32,

    /// Base for the tracked stack slot count.
    ///
    /// Default: 2
    pub num_stack_slots_base: u32,

    /// Base for the untracked stack slot count.
    ///
    /// Default: 1
    pub num_untracked_slots_base: u32,

    /// Base for a fully encoded register number.
    ///
    /// Default: 3
    pub register_base: u32,

    /// Base for a register number delta (stored minus one).
    ///
    /// Default: 2
    pub register_delta_base: u32,

    /// Base for a fully encoded stack offset (signed).
    ///
    /// Default: 6
    pub stack_slot_base: u32,

    /// Base for a stack offset delta.
    ///
    /// Default: 4
    pub stack_slot_delta_base: u32,

    // =========================================================================
    // Liveness
    // =========================================================================
    /// Base for pointer widths (live-set indirection and chunk tables).
    ///
    /// Default: 3
    pub pointer_size_base: u32,

    /// Base for run-length "live" runs.
    ///
    /// Default: 2
    pub live_state_rle_run_base: u32,

    /// Base for run-length "dead" runs.
    ///
    /// Default: 4
    pub live_state_rle_skip_base: u32,

    // =========================================================================
    // Normalization
    // =========================================================================
    /// `log2` of the stack slot alignment.
    ///
    /// Default: 3 (8-byte slots)
    pub stack_slot_shift: u32,

    /// `log2` of the code offset granularity.
    ///
    /// Default: 0
    pub code_offset_shift: u32,

    /// `log2` of the code length granularity.
    ///
    /// Default: 0 (AMD64), 2 (ARM64)
    pub code_length_shift: u32,

    /// XOR applied to register numbers in the slot table.
    ///
    /// Default: 0
    pub register_xor: u32,

    /// XOR applied to the stack base register, mapping the usual frame
    /// pointer to 0.
    ///
    /// Default: 5 (rbp), 29 (fp)
    pub stack_base_register_xor: u32,

    /// `log2` of the outgoing/scratch area granularity.
    ///
    /// Default: 3
    pub size_of_stack_area_shift: u32,

    /// The header carries the fixed outgoing-argument/scratch area size, and
    /// stack slots inside it are scratch for non-leaf frames.
    ///
    /// Default: true
    pub has_fixed_stack_parameter_scratch_area: bool,
}

impl Encoding {
    /// x86-64 (both Windows and System V).
    pub const AMD64: Encoding = Encoding {
        gs_cookie_stack_slot_base: 6,
        psp_sym_stack_slot_base: 6,
        generics_inst_context_stack_slot_base: 6,
        code_length_base: 8,
        stack_base_register_base: 3,
        size_of_stack_area_base: 3,
        size_of_edit_and_continue_preserved_area_base: 4,
        size_of_edit_and_continue_fixed_stack_frame_base: None,
        reverse_pinvoke_frame_base: 6,
        norm_prolog_size_base: 5,
        norm_epilog_size_base: 3,
        return_kind_bits_slim: 2,
        return_kind_bits_fat: 4,
        arch_header_flag: ArchHeaderFlag::WantsReportOnlyLeaf,
        num_safe_points_base: 2,
        num_interruptible_ranges_base: 1,
        interruptible_range_delta1_base: 6,
        interruptible_range_delta2_base: 6,
        odd_safe_point_offsets: false,
        num_registers_base: 2,
        num_stack_slots_base: 2,
        num_untracked_slots_base: 1,
        register_base: 3,
        register_delta_base: 2,
        stack_slot_base: 6,
        stack_slot_delta_base: 4,
        pointer_size_base: 3,
        live_state_rle_run_base: 2,
        live_state_rle_skip_base: 4,
        stack_slot_shift: 3,
        code_offset_shift: 0,
        code_length_shift: 0,
        register_xor: 0,
        stack_base_register_xor: 5,
        size_of_stack_area_shift: 3,
        has_fixed_stack_parameter_scratch_area: true,
    };

    /// AArch64.
    pub const ARM64: Encoding = Encoding {
        stack_base_register_base: 2,
        size_of_edit_and_continue_fixed_stack_frame_base: Some(4),
        arch_header_flag: ArchHeaderFlag::HasTailCalls,
        num_safe_points_base: 3,
        odd_safe_point_offsets: true,
        num_registers_base: 3,
        code_length_shift: 2,
        stack_base_register_xor: 29,
        ..Encoding::AMD64
    };

    // =========================================================================
    // Normalization
    // =========================================================================

    /// Stack offset as stored in the blob.
    #[inline]
    pub const fn normalize_stack_slot(&self, offset: i32) -> i32 {
        offset >> self.stack_slot_shift
    }

    /// Stack offset in bytes from its stored form.
    #[inline]
    pub const fn denormalize_stack_slot(&self, norm: i32) -> i32 {
        norm.wrapping_shl(self.stack_slot_shift)
    }

    /// Code offset as stored in the blob.
    #[inline]
    pub const fn normalize_code_offset(&self, offset: u32) -> u32 {
        offset >> self.code_offset_shift
    }

    /// Code offset in bytes from its stored form.
    #[inline]
    pub const fn denormalize_code_offset(&self, norm: u32) -> u32 {
        norm.wrapping_shl(self.code_offset_shift)
    }

    /// Code length as stored in the blob.
    #[inline]
    pub const fn normalize_code_length(&self, length: u32) -> u32 {
        length >> self.code_length_shift
    }

    /// Code length in bytes from its stored form.
    #[inline]
    pub const fn denormalize_code_length(&self, norm: u32) -> u32 {
        norm.wrapping_shl(self.code_length_shift)
    }

    /// Register number as stored in the slot table.
    #[inline]
    pub const fn normalize_register(&self, reg: u32) -> u32 {
        reg ^ self.register_xor
    }

    /// Register number from its slot-table form.
    #[inline]
    pub const fn denormalize_register(&self, norm: u32) -> u32 {
        norm ^ self.register_xor
    }

    /// Stack base register as stored in the header.
    #[inline]
    pub const fn normalize_stack_base_register(&self, reg: u32) -> u32 {
        reg ^ self.stack_base_register_xor
    }

    /// Stack base register from its header form.
    #[inline]
    pub const fn denormalize_stack_base_register(&self, norm: u32) -> u32 {
        norm ^ self.stack_base_register_xor
    }

    /// Outgoing/scratch area size from its stored form.
    #[inline]
    pub const fn denormalize_size_of_stack_area(&self, norm: u32) -> u32 {
        norm.wrapping_shl(self.size_of_stack_area_shift)
    }

    /// Bits per entry in the safe-point table for a method of `code_length` bytes.
    #[inline]
    pub const fn safe_point_offset_bits(&self, code_length: u32) -> u32 {
        crate::bitstream::ceil_log2(self.normalize_code_offset(code_length) as u64)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate the table.
    ///
    /// Every variable-length base must lie in `1..64` and every shift must
    /// leave room for a value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bases = [
            ("gs_cookie_stack_slot_base", self.gs_cookie_stack_slot_base),
            ("psp_sym_stack_slot_base", self.psp_sym_stack_slot_base),
            (
                "generics_inst_context_stack_slot_base",
                self.generics_inst_context_stack_slot_base,
            ),
            ("code_length_base", self.code_length_base),
            ("stack_base_register_base", self.stack_base_register_base),
            ("size_of_stack_area_base", self.size_of_stack_area_base),
            (
                "size_of_edit_and_continue_preserved_area_base",
                self.size_of_edit_and_continue_preserved_area_base,
            ),
            ("reverse_pinvoke_frame_base", self.reverse_pinvoke_frame_base),
            ("norm_prolog_size_base", self.norm_prolog_size_base),
            ("norm_epilog_size_base", self.norm_epilog_size_base),
            ("num_safe_points_base", self.num_safe_points_base),
            ("num_interruptible_ranges_base", self.num_interruptible_ranges_base),
            ("interruptible_range_delta1_base", self.interruptible_range_delta1_base),
            ("interruptible_range_delta2_base", self.interruptible_range_delta2_base),
            ("num_registers_base", self.num_registers_base),
            ("num_stack_slots_base", self.num_stack_slots_base),
            ("num_untracked_slots_base", self.num_untracked_slots_base),
            ("register_base", self.register_base),
            ("register_delta_base", self.register_delta_base),
            ("stack_slot_base", self.stack_slot_base),
            ("stack_slot_delta_base", self.stack_slot_delta_base),
            ("pointer_size_base", self.pointer_size_base),
            ("live_state_rle_run_base", self.live_state_rle_run_base),
            ("live_state_rle_skip_base", self.live_state_rle_skip_base),
        ];
        for (field, base) in bases {
            check_base(field, base)?;
        }
        if let Some(base) = self.size_of_edit_and_continue_fixed_stack_frame_base {
            check_base("size_of_edit_and_continue_fixed_stack_frame_base", base)?;
        }

        for (field, bits) in [
            ("return_kind_bits_slim", self.return_kind_bits_slim),
            ("return_kind_bits_fat", self.return_kind_bits_fat),
        ] {
            if bits == 0 || bits > 8 {
                return Err(ConfigError::InvalidFieldWidth { field, bits });
            }
        }

        for (field, shift) in [
            ("stack_slot_shift", self.stack_slot_shift),
            ("code_offset_shift", self.code_offset_shift),
            ("code_length_shift", self.code_length_shift),
            ("size_of_stack_area_shift", self.size_of_stack_area_shift),
        ] {
            if shift >= 16 {
                return Err(ConfigError::InvalidShift { field, shift });
            }
        }
        Ok(())
    }
}

#[inline]
fn check_base(field: &'static str, base: u32) -> Result<(), ConfigError> {
    if base == 0 || base >= crate::bitstream::BITS_PER_WORD {
        return Err(ConfigError::InvalidBase { field, base });
    }
    Ok(())
}

/// Encoding table validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable-length base is outside `1..64`.
    InvalidBase {
        /// Offending field.
        field: &'static str,
        /// Its value.
        base: u32,
    },
    /// A fixed-width field is zero or wider than a byte.
    InvalidFieldWidth {
        /// Offending field.
        field: &'static str,
        /// Its value.
        bits: u32,
    },
    /// A normalization shift leaves no room for a value.
    InvalidShift {
        /// Offending field.
        field: &'static str,
        /// Its value.
        shift: u32,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidBase { field, base } => {
                write!(f, "{field} must be in 1..64, got {base}")
            }
            ConfigError::InvalidFieldWidth { field, bits } => {
                write!(f, "{field} must be 1 to 8 bits wide, got {bits}")
            }
            ConfigError::InvalidShift { field, shift } => {
                write!(f, "{field} must be below 16, got {shift}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Runtime switches that are not part of the blob format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoderOptions {
    /// Treat call-site safe points as interruptible (format version 3+).
    ///
    /// Default: false
    pub interruptible_call_sites: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_valid() {
        assert!(Encoding::AMD64.validate().is_ok());
        assert!(Encoding::ARM64.validate().is_ok());
    }

    #[test]
    fn test_arm64_overrides() {
        let arm = Encoding::ARM64;
        assert_eq!(arm.num_registers_base, 3);
        assert_eq!(arm.num_safe_points_base, 3);
        assert_eq!(arm.stack_base_register_base, 2);
        assert_eq!(arm.code_length_shift, 2);
        assert_eq!(arm.size_of_edit_and_continue_fixed_stack_frame_base, Some(4));
        // Shared values are inherited.
        assert_eq!(arm.stack_slot_base, Encoding::AMD64.stack_slot_base);
    }

    #[test]
    fn test_stack_slot_normalization() {
        let enc = Encoding::AMD64;
        assert_eq!(enc.normalize_stack_slot(24), 3);
        assert_eq!(enc.denormalize_stack_slot(3), 24);
        assert_eq!(enc.normalize_stack_slot(-16), -2);
        assert_eq!(enc.denormalize_stack_slot(-2), -16);
    }

    #[test]
    fn test_frame_register_maps_to_zero() {
        assert_eq!(Encoding::AMD64.normalize_stack_base_register(5), 0);
        assert_eq!(Encoding::AMD64.denormalize_stack_base_register(0), 5);
        assert_eq!(Encoding::ARM64.normalize_stack_base_register(29), 0);
        assert_eq!(Encoding::ARM64.denormalize_stack_base_register(0), 29);
    }

    #[test]
    fn test_code_length_normalization() {
        assert_eq!(Encoding::AMD64.normalize_code_length(37), 37);
        assert_eq!(Encoding::ARM64.normalize_code_length(40), 10);
        assert_eq!(Encoding::ARM64.denormalize_code_length(10), 40);
    }

    #[test]
    fn test_safe_point_offset_bits() {
        assert_eq!(Encoding::AMD64.safe_point_offset_bits(1), 0);
        assert_eq!(Encoding::AMD64.safe_point_offset_bits(32), 5);
        assert_eq!(Encoding::AMD64.safe_point_offset_bits(33), 6);
    }

    #[test]
    fn test_validate_rejects_bad_base() {
        let enc = Encoding {
            register_base: 0,
            ..Encoding::AMD64
        };
        assert_eq!(
            enc.validate(),
            Err(ConfigError::InvalidBase {
                field: "register_base",
                base: 0
            })
        );

        let enc = Encoding {
            size_of_edit_and_continue_fixed_stack_frame_base: Some(64),
            ..Encoding::ARM64
        };
        assert!(matches!(enc.validate(), Err(ConfigError::InvalidBase { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_widths() {
        let enc = Encoding {
            return_kind_bits_fat: 0,
            ..Encoding::AMD64
        };
        assert!(matches!(
            enc.validate(),
            Err(ConfigError::InvalidFieldWidth { .. })
        ));

        let enc = Encoding {
            stack_slot_shift: 40,
            ..Encoding::AMD64
        };
        assert!(matches!(enc.validate(), Err(ConfigError::InvalidShift { .. })));
    }

    #[test]
    fn test_error_display() {
        let err = ConfigError::InvalidBase {
            field: "register_base",
            base: 0,
        };
        assert_eq!(err.to_string(), "register_base must be in 1..64, got 0");
    }
}
