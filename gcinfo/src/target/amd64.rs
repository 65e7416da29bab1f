//! x86-64 register file and calling conventions.
//!
//! Register numbers in GC info are the hardware encodings (rax = 0 ... r15 = 15).
//! Which of them survive a call depends on the ABI:
//!
//! ```text
//!            rax rcx rdx rbx rsp rbp rsi rdi r8-r11 r12-r15
//! Windows     S   S   S   P   -   P   P   P    S       P
//! System V    S   S   S   P   -   P   S   S    S       P
//! ```
//!
//! `S` = scratch (caller-saved), `P` = preserved, `-` = never a root.

use std::fmt;

use super::Target;
use crate::config::Encoding;

// =============================================================================
// General-Purpose Registers
// =============================================================================

/// x86-64 general-purpose register by hardware encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Gpr {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Gpr {
    /// All 16 general-purpose registers in encoding order.
    pub const ALL: [Gpr; 16] = [
        Gpr::Rax,
        Gpr::Rcx,
        Gpr::Rdx,
        Gpr::Rbx,
        Gpr::Rsp,
        Gpr::Rbp,
        Gpr::Rsi,
        Gpr::Rdi,
        Gpr::R8,
        Gpr::R9,
        Gpr::R10,
        Gpr::R11,
        Gpr::R12,
        Gpr::R13,
        Gpr::R14,
        Gpr::R15,
    ];

    /// Hardware encoding, which is also the GC info register number.
    #[inline(always)]
    pub const fn encoding(self) -> u32 {
        self as u32
    }

    /// Convert from a GC info register number.
    #[inline]
    pub const fn from_encoding(enc: u32) -> Option<Gpr> {
        if enc < 16 {
            Some(Gpr::ALL[enc as usize])
        } else {
            None
        }
    }

    /// 64-bit register name.
    pub const fn name_64(self) -> &'static str {
        match self {
            Gpr::Rax => "rax",
            Gpr::Rcx => "rcx",
            Gpr::Rdx => "rdx",
            Gpr::Rbx => "rbx",
            Gpr::Rsp => "rsp",
            Gpr::Rbp => "rbp",
            Gpr::Rsi => "rsi",
            Gpr::Rdi => "rdi",
            Gpr::R8 => "r8",
            Gpr::R9 => "r9",
            Gpr::R10 => "r10",
            Gpr::R11 => "r11",
            Gpr::R12 => "r12",
            Gpr::R13 => "r13",
            Gpr::R14 => "r14",
            Gpr::R15 => "r15",
        }
    }
}

impl fmt::Display for Gpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name_64())
    }
}

// =============================================================================
// Register Sets
// =============================================================================

/// A set of GPRs as a 16-bit mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GprSet(u16);

impl GprSet {
    #[inline(always)]
    pub(crate) const fn from_bits(bits: u16) -> Self {
        GprSet(bits)
    }

    /// Whether the set contains `reg`.
    #[inline(always)]
    pub const fn contains(self, reg: Gpr) -> bool {
        (self.0 & (1 << reg.encoding())) != 0
    }

    /// Number of registers in the set.
    #[inline(always)]
    pub const fn count(self) -> u32 {
        self.0.count_ones()
    }
}

// =============================================================================
// Calling Convention
// =============================================================================

/// x86-64 calling conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// Windows x64 ABI.
    WindowsX64,
    /// System V AMD64 ABI (Linux, macOS, BSD).
    SystemV,
}

impl CallingConvention {
    /// Convention of the current platform.
    #[cfg(target_os = "windows")]
    pub const fn host() -> Self {
        CallingConvention::WindowsX64
    }

    /// Convention of the current platform.
    #[cfg(not(target_os = "windows"))]
    pub const fn host() -> Self {
        CallingConvention::SystemV
    }

    /// Callee-saved GPRs, excluding rsp.
    pub const fn callee_saved_gprs(self) -> GprSet {
        match self {
            // RBX, RBP, RSI, RDI, R12-R15
            CallingConvention::WindowsX64 => GprSet::from_bits(0xF0E8),
            // RBX, RBP, R12-R15
            CallingConvention::SystemV => GprSet::from_bits(0xF028),
        }
    }
}

// =============================================================================
// Target
// =============================================================================

/// x86-64 target under a given calling convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Amd64 {
    convention: CallingConvention,
}

impl Amd64 {
    /// Create a target for `convention`.
    #[inline]
    pub const fn new(convention: CallingConvention) -> Self {
        Self { convention }
    }

    /// Calling convention used for scratch classification.
    #[inline]
    pub const fn convention(&self) -> CallingConvention {
        self.convention
    }
}

impl Target for Amd64 {
    #[inline]
    fn name(&self) -> &'static str {
        "amd64"
    }

    #[inline]
    fn encoding(&self) -> &Encoding {
        &Encoding::AMD64
    }

    #[inline]
    fn stack_pointer_register(&self) -> u32 {
        Gpr::Rsp.encoding()
    }

    #[inline]
    fn is_valid_register(&self, reg: u32) -> bool {
        matches!(Gpr::from_encoding(reg), Some(gpr) if gpr != Gpr::Rsp)
    }

    #[inline]
    fn is_scratch_register(&self, reg: u32) -> bool {
        match Gpr::from_encoding(reg) {
            Some(gpr) => !self.convention.callee_saved_gprs().contains(gpr),
            None => true,
        }
    }

    #[inline]
    fn register_name(&self, reg: u32) -> &'static str {
        Gpr::from_encoding(reg).map_or("<invalid>", Gpr::name_64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpr_round_trip() {
        for gpr in Gpr::ALL {
            assert_eq!(Gpr::from_encoding(gpr.encoding()), Some(gpr));
        }
        assert_eq!(Gpr::from_encoding(16), None);
        assert_eq!(Gpr::R12.to_string(), "r12");
    }

    #[test]
    fn test_windows_preserves_rsi_rdi() {
        let target = Amd64::new(CallingConvention::WindowsX64);
        for reg in [Gpr::Rbx, Gpr::Rbp, Gpr::Rsi, Gpr::Rdi, Gpr::R12, Gpr::R15] {
            assert!(!target.is_scratch_register(reg.encoding()), "{reg}");
        }
        for reg in [Gpr::Rax, Gpr::Rcx, Gpr::Rdx, Gpr::R8, Gpr::R11] {
            assert!(target.is_scratch_register(reg.encoding()), "{reg}");
        }
        assert_eq!(CallingConvention::WindowsX64.callee_saved_gprs().count(), 8);
    }

    #[test]
    fn test_sysv_scratches_rsi_rdi() {
        let target = Amd64::new(CallingConvention::SystemV);
        assert!(target.is_scratch_register(Gpr::Rsi.encoding()));
        assert!(target.is_scratch_register(Gpr::Rdi.encoding()));
        assert!(!target.is_scratch_register(Gpr::Rbx.encoding()));
        assert!(!target.is_scratch_register(Gpr::R14.encoding()));
        assert_eq!(CallingConvention::SystemV.callee_saved_gprs().count(), 6);
    }

    #[test]
    fn test_rsp_never_holds_roots() {
        let target = Amd64::new(CallingConvention::SystemV);
        assert!(!target.is_valid_register(4));
        assert!(target.is_valid_register(0));
        assert!(!target.is_valid_register(16));
        assert_eq!(target.stack_pointer_register(), 4);
        assert_eq!(target.register_name(99), "<invalid>");
    }
}
