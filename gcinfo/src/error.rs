//! Error types for GC info decoding and root enumeration.
//!
//! Two layers:
//! - [`DecodeError`]: the blob itself is truncated or inconsistent.
//! - [`EnumerateError`]: a root enumeration request could not be served,
//!   either because the blob is corrupt or because the query offset is not
//!   a point where roots may be enumerated.
//!
//! Caller contract violations (an out-of-range slot index, a variable-length
//! base outside `1..64`, querying a fact that was not requested) are not
//! represented here. They panic.

use std::fmt;

// =============================================================================
// DecodeError
// =============================================================================

/// The GC info blob is malformed.
///
/// A trusted encoder never produces these. Treat them as fatal for the
/// enumeration in progress: continuing risks under-reporting roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// A read ran past the end of the blob.
    UnexpectedEnd {
        /// Bit position of the failed read.
        position: usize,
        /// Number of bits requested.
        wanted: u32,
    },
    /// A variable-length integer did not terminate within 64 bits.
    VarIntOverflow {
        /// Bit position where the integer started.
        position: usize,
    },
    /// A stack slot used the reserved base kind 3.
    InvalidStackBase {
        /// Bit position of the base field.
        position: usize,
    },
    /// The return kind field holds an undefined value.
    InvalidReturnKind(u32),
    /// A register slot names a register the target cannot hold a root in.
    InvalidRegister(u32),
    /// A live-state vector referenced a slot past the tracked slot count.
    SlotIndexOutOfRange {
        /// Offending slot index.
        index: u64,
        /// Number of tracked slots.
        count: u32,
    },
    /// A fully-interruptible chunk declared no slots that could be live.
    EmptyLiveSet,
    /// A frame-register-relative slot exists but the method has no stack base register.
    MissingStackBaseRegister,
    /// A lifetime transition used offset zero within its chunk.
    InvalidTransition {
        /// Chunk containing the transition.
        chunk: u32,
    },
    /// A decoded count or offset does not fit the field it describes.
    ValueOutOfRange {
        /// Bit position where the value started.
        position: usize,
    },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnexpectedEnd { position, wanted } => {
                write!(f, "unexpected end of GC info reading {wanted} bits at bit {position}")
            }
            DecodeError::VarIntOverflow { position } => {
                write!(f, "variable-length integer at bit {position} exceeds 64 bits")
            }
            DecodeError::InvalidStackBase { position } => {
                write!(f, "reserved stack slot base at bit {position}")
            }
            DecodeError::InvalidReturnKind(kind) => write!(f, "invalid return kind {kind}"),
            DecodeError::InvalidRegister(reg) => write!(f, "register {reg} cannot hold a GC root"),
            DecodeError::SlotIndexOutOfRange { index, count } => {
                write!(f, "live slot index {index} out of range ({count} tracked slots)")
            }
            DecodeError::EmptyLiveSet => write!(f, "interruptible chunk has no potentially live slots"),
            DecodeError::MissingStackBaseRegister => {
                write!(f, "frame-relative slot without a stack base register")
            }
            DecodeError::InvalidTransition { chunk } => {
                write!(f, "lifetime transition at chunk offset 0 in chunk {chunk}")
            }
            DecodeError::ValueOutOfRange { position } => {
                write!(f, "decoded value at bit {position} is out of range")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

// =============================================================================
// EnumerateError
// =============================================================================

/// Root enumeration failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerateError {
    /// The method is partially interruptible and `offset` is neither a safe
    /// point nor inside an interruptible range.
    ///
    /// Speculative stack walkers may tolerate this and skip the frame.
    NoSafePoint {
        /// The queried code offset.
        offset: u32,
    },
    /// The frame view could not produce a register value the query needed.
    RegisterUnavailable {
        /// Architecture register number.
        reg: u32,
    },
    /// The blob is corrupt.
    Decode(DecodeError),
}

impl fmt::Display for EnumerateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumerateError::NoSafePoint { offset } => {
                write!(f, "offset {offset:#x} is not a safe point or interruptible")
            }
            EnumerateError::RegisterUnavailable { reg } => {
                write!(f, "frame has no value for register {reg}")
            }
            EnumerateError::Decode(err) => write!(f, "corrupt GC info: {err}"),
        }
    }
}

impl std::error::Error for EnumerateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnumerateError::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DecodeError> for EnumerateError {
    #[inline]
    fn from(err: DecodeError) -> Self {
        EnumerateError::Decode(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_display_mentions_position() {
        let err = DecodeError::UnexpectedEnd {
            position: 17,
            wanted: 5,
        };
        let msg = err.to_string();
        assert!(msg.contains("17"));
        assert!(msg.contains("5 bits"));
    }

    #[test]
    fn test_enumerate_error_wraps_decode_error() {
        let err: EnumerateError = DecodeError::EmptyLiveSet.into();
        assert_eq!(err, EnumerateError::Decode(DecodeError::EmptyLiveSet));
        assert!(err.source().is_some());
        assert!(EnumerateError::NoSafePoint { offset: 0 }.source().is_none());
    }

    #[test]
    fn test_no_safe_point_display_is_hex() {
        let msg = EnumerateError::NoSafePoint { offset: 0x20 }.to_string();
        assert!(msg.contains("0x20"));
    }
}
