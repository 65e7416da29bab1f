//! GC Info Decoder
//!
//! Decodes the compact per-method GC information a compiler emits alongside
//! machine code, and answers the two questions a stack walker asks during a
//! collection pause:
//!
//! - is this instruction offset a place where roots may be enumerated?
//! - which registers and stack slots hold live references there, and are
//!   they ordinary, interior or pinned?
//!
//! # Blob Layout
//!
//! ```text
//! ┌────────┬────────┬─────────────┬────────┬────────────┬──────────────────┐
//! │ header │ counts │ safe points │ ranges │ slot table │ liveness data    │
//! └────────┴────────┴─────────────┴────────┴────────────┴──────────────────┘
//!   slim or   varint   fixed-width   delta    registers,   per safe point
//!   fat form           entries       pairs    stack slots  and per chunk
//! ```
//!
//! Everything is a bit stream read least-significant bit first. Field
//! widths and normalization shifts differ per architecture and come from
//! [`Encoding`], reached through a [`Target`].
//!
//! # Usage
//!
//! ```ignore
//! use gcinfo::{DecodeFlags, EnumerateFlags, GcInfoDecoder, GcInfoToken, SavedRegisters};
//!
//! let decoder = GcInfoDecoder::new(GcInfoToken::new(blob), gcinfo::target::host(), DecodeFlags::GC_LIFETIMES)?;
//! let frame = SavedRegisters::new(sp, caller_sp);
//! decoder.enumerate_live_slots(offset, &frame, false, EnumerateFlags::empty(), |root| {
//!     mark(root.location);
//! })?;
//! ```
//!
//! # Allocation
//!
//! Decoding and enumeration run inside collection pauses and do not touch
//! the heap: cursors are `Copy`, the slot cache is a fixed array, and
//! duplicate suppression spills only past 32 roots per frame.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bitstream;
pub mod config;
pub mod decoder;
pub mod error;
pub mod frame;
pub mod header;
pub mod liveness;
pub mod ranges;
pub mod safepoints;
pub mod slots;
pub mod target;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

// Re-exports for convenient access
pub use bitstream::BitReader;
pub use config::{ConfigError, DecoderOptions, Encoding};
pub use decoder::{GcInfoDecoder, GcInfoToken, Interruptibility};
pub use error::{DecodeError, EnumerateError};
pub use frame::{FrameView, GcRoot, RootKey, RootLocation, SavedRegisters};
pub use header::{DecodeFlags, GcInfoHeader, GenericsContextKind, ReturnKind};
pub use liveness::{EnumerateFlags, EnumerationSummary};
pub use ranges::CodeRange;
pub use slots::{SlotDesc, SlotFlags, SlotTable, StackSlotBase};
pub use target::Target;
