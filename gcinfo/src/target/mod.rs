//! Target architecture descriptions.
//!
//! The decode algorithm is architecture-neutral. Everything that varies per
//! target is reached through [`Target`]:
//!
//! - the [`Encoding`] table (field bases and normalization),
//! - which registers may hold roots,
//! - which registers are scratch (caller-saved) under the calling convention,
//! - the stack pointer register number.
//!
//! Several targets can be used side by side in one binary, which is how the
//! tests exercise both AMD64 and ARM64 layouts.

pub mod amd64;
pub mod arm64;

pub use amd64::{Amd64, CallingConvention, Gpr};
pub use arm64::Arm64;

use crate::config::Encoding;

/// Architecture-specific knowledge needed to decode and report roots.
pub trait Target {
    /// Short architecture name for logs.
    fn name(&self) -> &'static str;

    /// Field encoding table.
    fn encoding(&self) -> &Encoding;

    /// Register number of the stack pointer.
    fn stack_pointer_register(&self) -> u32;

    /// Whether `reg` can hold a GC root.
    fn is_valid_register(&self, reg: u32) -> bool;

    /// Whether `reg` is caller-saved.
    ///
    /// Scratch registers belong to the callee once a call is in progress, so
    /// they are only meaningful in the active (leaf) frame.
    fn is_scratch_register(&self, reg: u32) -> bool;

    /// Printable register name.
    fn register_name(&self, reg: u32) -> &'static str;
}

impl<T: Target + ?Sized> Target for &T {
    #[inline]
    fn name(&self) -> &'static str {
        (**self).name()
    }

    #[inline]
    fn encoding(&self) -> &Encoding {
        (**self).encoding()
    }

    #[inline]
    fn stack_pointer_register(&self) -> u32 {
        (**self).stack_pointer_register()
    }

    #[inline]
    fn is_valid_register(&self, reg: u32) -> bool {
        (**self).is_valid_register(reg)
    }

    #[inline]
    fn is_scratch_register(&self, reg: u32) -> bool {
        (**self).is_scratch_register(reg)
    }

    #[inline]
    fn register_name(&self, reg: u32) -> &'static str {
        (**self).register_name(reg)
    }
}

/// Target of the machine this crate was compiled for.
#[cfg(target_arch = "aarch64")]
pub type HostTarget = Arm64;

/// Target of the machine this crate was compiled for.
#[cfg(not(target_arch = "aarch64"))]
pub type HostTarget = Amd64;

/// The host target with its native calling convention.
#[cfg(target_arch = "aarch64")]
#[inline]
pub const fn host() -> HostTarget {
    Arm64::new()
}

/// The host target with its native calling convention.
#[cfg(not(target_arch = "aarch64"))]
#[inline]
pub const fn host() -> HostTarget {
    Amd64::new(CallingConvention::host())
}
