//! AArch64 register file.
//!
//! Register numbers are x0..x30 with 31 standing for sp. x18 is the platform
//! register and never holds a root. Under AAPCS64 x19..x28 are callee-saved;
//! x0..x17 and the frame/link pair x29/x30 are treated as scratch because
//! the unwinder does not restore them for callers.

use super::Target;
use crate::config::Encoding;

/// Platform register, reserved by the OS.
pub const PLATFORM_REGISTER: u32 = 18;

/// Frame pointer.
pub const FP: u32 = 29;

/// Link register.
pub const LR: u32 = 30;

/// Stack pointer in GC info numbering.
pub const SP: u32 = 31;

const NAMES: [&str; 32] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13",
    "x14", "x15", "x16", "x17", "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26",
    "x27", "x28", "fp", "lr", "sp",
];

/// AArch64 target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Arm64;

impl Arm64 {
    /// Create the target.
    #[inline]
    pub const fn new() -> Self {
        Arm64
    }
}

impl Target for Arm64 {
    #[inline]
    fn name(&self) -> &'static str {
        "arm64"
    }

    #[inline]
    fn encoding(&self) -> &Encoding {
        &Encoding::ARM64
    }

    #[inline]
    fn stack_pointer_register(&self) -> u32 {
        SP
    }

    #[inline]
    fn is_valid_register(&self, reg: u32) -> bool {
        reg <= LR && reg != PLATFORM_REGISTER
    }

    #[inline]
    fn is_scratch_register(&self, reg: u32) -> bool {
        reg <= 17 || reg >= FP
    }

    #[inline]
    fn register_name(&self, reg: u32) -> &'static str {
        NAMES.get(reg as usize).copied().unwrap_or("<invalid>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_partition() {
        let target = Arm64::new();
        let scratch: Vec<u32> = (0..=LR).filter(|&r| target.is_scratch_register(r)).collect();
        assert_eq!(scratch.len(), 18 + 2);
        for reg in 19..=28 {
            assert!(!target.is_scratch_register(reg));
        }
        assert!(target.is_scratch_register(FP));
        assert!(target.is_scratch_register(LR));
    }

    #[test]
    fn test_register_validity() {
        let target = Arm64::new();
        assert!(!target.is_valid_register(PLATFORM_REGISTER));
        assert!(!target.is_valid_register(SP));
        assert!(target.is_valid_register(0));
        assert!(target.is_valid_register(LR));
    }

    #[test]
    fn test_register_names() {
        let target = Arm64::new();
        assert_eq!(target.register_name(0), "x0");
        assert_eq!(target.register_name(FP), "fp");
        assert_eq!(target.register_name(SP), "sp");
        assert_eq!(target.register_name(32), "<invalid>");
    }
}
