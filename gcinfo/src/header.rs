//! Method header decoding.
//!
//! The header carries the per-method scalar facts. Two forms exist:
//!
//! ```text
//! slim: ┌─┬─────────┬────────────┬──────────────┐
//!       │0│has base │ ret kind:2 │ code length  │
//!       └─┴─────────┴────────────┴──────────────┘
//!
//! fat:  ┌─┬──────────┬────────────┬─────────────┬──────────────┬─────┐
//!       │1│ flags:10 │ ret kind:4 │ code length │ prolog/epilog│ ... │
//!       └─┴──────────┴────────────┴─────────────┴──────────────┴─────┘
//!        ... GS cookie, PSP sym, generics context, stack base register,
//!            EnC area, reverse P/Invoke frame, outgoing area size
//! ```
//!
//! Every optional fat field is present only when its header flag is set.
//! Decoding is driven by a [`DecodeFlags`] interest mask and stops as soon
//! as every requested fact is known; facts whose flag is clear are known
//! (absent) right after the flag field.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::bitstream::BitReader;
use crate::config::{ArchHeaderFlag, Encoding, HEADER_FLAGS_BITS, HEADER_FLAGS_BITS_VERSION_1};
use crate::error::DecodeError;
use crate::ranges::CodeRange;

// =============================================================================
// Interest mask
// =============================================================================

/// Facts the caller wants decoded up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DecodeFlags(u32);

impl DecodeFlags {
    /// Method code length.
    pub const CODE_LENGTH: DecodeFlags = DecodeFlags(1 << 0);
    /// Prolog size.
    pub const PROLOG_LENGTH: DecodeFlags = DecodeFlags(1 << 1);
    /// GS cookie slot and valid range.
    pub const GS_COOKIE: DecodeFlags = DecodeFlags(1 << 2);
    /// PSP symbol slot.
    pub const PSP_SYM: DecodeFlags = DecodeFlags(1 << 3);
    /// Generics instantiation context slot and kind.
    pub const GENERICS_INST_CONTEXT: DecodeFlags = DecodeFlags(1 << 4);
    /// Stack base register.
    pub const STACK_BASE_REGISTER: DecodeFlags = DecodeFlags(1 << 5);
    /// Edit-and-continue area sizes.
    pub const EDIT_AND_CONTINUE: DecodeFlags = DecodeFlags(1 << 6);
    /// Reverse P/Invoke frame slot.
    pub const REVERSE_PINVOKE_VAR: DecodeFlags = DecodeFlags(1 << 7);
    /// Return kind.
    pub const RETURN_KIND: DecodeFlags = DecodeFlags(1 << 8);
    /// Varargs flag.
    pub const VARARG: DecodeFlags = DecodeFlags(1 << 9);
    /// Tail-call and report-only-leaf flags.
    pub const HAS_TAILCALLS: DecodeFlags = DecodeFlags(1 << 10);
    /// Size of the fixed outgoing/scratch area.
    pub const SIZE_OF_STACK_AREA: DecodeFlags = DecodeFlags(1 << 11);
    /// Safe points and interruptible ranges.
    pub const INTERRUPTIBILITY: DecodeFlags = DecodeFlags(1 << 12);
    /// Slot table and liveness data.
    pub const GC_LIFETIMES: DecodeFlags = DecodeFlags(1 << 13);
    /// Interruptible range enumeration.
    pub const FOR_RANGES_CALLBACK: DecodeFlags = DecodeFlags(1 << 14);

    /// Every header fact.
    pub const HEADER: DecodeFlags = DecodeFlags((1 << 12) - 1);
    /// Everything.
    pub const EVERYTHING: DecodeFlags = DecodeFlags((1 << 15) - 1);

    /// Sections that need the method body index.
    pub const BODY: DecodeFlags = DecodeFlags(
        Self::INTERRUPTIBILITY.0 | Self::GC_LIFETIMES.0 | Self::FOR_RANGES_CALLBACK.0,
    );

    /// No facts.
    #[inline]
    pub const fn empty() -> Self {
        DecodeFlags(0)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Whether no fact is requested.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether all of `other` is set.
    #[inline]
    pub const fn contains(self, other: DecodeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any of `other` is set.
    #[inline]
    pub const fn intersects(self, other: DecodeFlags) -> bool {
        self.0 & other.0 != 0
    }

    /// Facts in `self` that are not in `other`.
    #[inline]
    pub const fn difference(self, other: DecodeFlags) -> Self {
        DecodeFlags(self.0 & !other.0)
    }
}

impl BitOr for DecodeFlags {
    type Output = DecodeFlags;

    #[inline]
    fn bitor(self, rhs: DecodeFlags) -> DecodeFlags {
        DecodeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DecodeFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: DecodeFlags) {
        self.0 |= rhs.0;
    }
}

// =============================================================================
// Header flags
// =============================================================================

/// The fat header's flag field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HeaderFlags(u32);

impl HeaderFlags {
    /// The method takes variable arguments.
    pub const IS_VARARG: u32 = 0x1;
    /// A GS cookie slot is present.
    pub const HAS_GS_COOKIE: u32 = 0x4;
    /// A PSP symbol slot is present.
    pub const HAS_PSP_SYM: u32 = 0x8;
    /// Mask of the generics context kind.
    pub const GENERICS_INST_CONTEXT_MASK: u32 = 0x30;
    /// Generics context is a method table.
    pub const GENERICS_INST_CONTEXT_MT: u32 = 0x10;
    /// Generics context is a method descriptor.
    pub const GENERICS_INST_CONTEXT_MD: u32 = 0x20;
    /// Generics context is `this`.
    pub const GENERICS_INST_CONTEXT_THIS: u32 = 0x30;
    /// A stack base register is present.
    pub const HAS_STACK_BASE_REGISTER: u32 = 0x40;
    /// Report-only-leaf (AMD64) or has-tail-calls (ARM64).
    pub const ARCH_SPECIFIC: u32 = 0x80;
    /// Edit-and-continue area sizes are present.
    pub const HAS_EDIT_AND_CONTINUE_INFO: u32 = 0x100;
    /// A reverse P/Invoke frame slot is present.
    pub const REVERSE_PINVOKE_FRAME: u32 = 0x200;

    /// Flags from raw bits.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        HeaderFlags(bits)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    const fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }

    /// Varargs method.
    #[inline]
    pub const fn is_vararg(self) -> bool {
        self.has(Self::IS_VARARG)
    }

    /// GS cookie present.
    #[inline]
    pub const fn has_gs_cookie(self) -> bool {
        self.has(Self::HAS_GS_COOKIE)
    }

    /// PSP symbol present.
    #[inline]
    pub const fn has_psp_sym(self) -> bool {
        self.has(Self::HAS_PSP_SYM)
    }

    /// Generics context kind, if any.
    #[inline]
    pub const fn generics_context_kind(self) -> Option<GenericsContextKind> {
        match self.0 & Self::GENERICS_INST_CONTEXT_MASK {
            Self::GENERICS_INST_CONTEXT_MT => Some(GenericsContextKind::MethodTable),
            Self::GENERICS_INST_CONTEXT_MD => Some(GenericsContextKind::MethodDesc),
            Self::GENERICS_INST_CONTEXT_THIS => Some(GenericsContextKind::This),
            _ => None,
        }
    }

    /// Stack base register present.
    #[inline]
    pub const fn has_stack_base_register(self) -> bool {
        self.has(Self::HAS_STACK_BASE_REGISTER)
    }

    /// Architecture-specific bit 7.
    #[inline]
    pub const fn arch_specific(self) -> bool {
        self.has(Self::ARCH_SPECIFIC)
    }

    /// Edit-and-continue info present.
    #[inline]
    pub const fn has_edit_and_continue_info(self) -> bool {
        self.has(Self::HAS_EDIT_AND_CONTINUE_INFO)
    }

    /// Reverse P/Invoke frame present.
    #[inline]
    pub const fn has_reverse_pinvoke_frame(self) -> bool {
        self.has(Self::REVERSE_PINVOKE_FRAME)
    }

    /// Whether the prolog/epilog sizes are stored.
    #[inline]
    pub const fn has_prolog_info(self) -> bool {
        self.has_gs_cookie() || self.generics_context_kind().is_some()
    }
}

/// What the generics instantiation context slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericsContextKind {
    /// A method table pointer.
    MethodTable,
    /// A method descriptor pointer.
    MethodDesc,
    /// The `this` object.
    This,
}

/// Generics instantiation context location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GenericsInstContext {
    /// Caller-SP-relative stack offset.
    pub stack_slot: i32,
    /// What the slot holds.
    pub kind: GenericsContextKind,
}

// =============================================================================
// Return kind
// =============================================================================

/// Classification of the method's return value registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReturnKind {
    /// Non-GC scalar.
    Scalar = 0,
    /// Object reference.
    Object = 1,
    /// Interior reference.
    ByRef = 2,
    /// Not recorded.
    Unset = 3,
    /// Two-register struct: scalar, object.
    ScalarObj = 4,
    /// Two-register struct: object, object.
    ObjObj = 5,
    /// Two-register struct: byref, object.
    ByRefObj = 6,
    /// Two-register struct: scalar, byref.
    ScalarByRef = 8,
    /// Two-register struct: object, byref.
    ObjByRef = 9,
    /// Two-register struct: byref, byref.
    ByRefByRef = 10,
}

impl ReturnKind {
    /// Return kind from its stored value.
    pub const fn from_raw(raw: u32) -> Result<Self, DecodeError> {
        Ok(match raw {
            0 => ReturnKind::Scalar,
            1 => ReturnKind::Object,
            2 => ReturnKind::ByRef,
            3 => ReturnKind::Unset,
            4 => ReturnKind::ScalarObj,
            5 => ReturnKind::ObjObj,
            6 => ReturnKind::ByRefObj,
            8 => ReturnKind::ScalarByRef,
            9 => ReturnKind::ObjByRef,
            10 => ReturnKind::ByRefByRef,
            _ => return Err(DecodeError::InvalidReturnKind(raw)),
        })
    }

    /// Stored value.
    #[inline]
    pub const fn raw(self) -> u32 {
        self as u32
    }

    /// Whether the value is returned in two registers.
    #[inline]
    pub const fn is_multi_register(self) -> bool {
        self.raw() > 3
    }
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnKind::Scalar => "scalar",
            ReturnKind::Object => "object",
            ReturnKind::ByRef => "byref",
            ReturnKind::Unset => "unset",
            ReturnKind::ScalarObj => "scalar+object",
            ReturnKind::ObjObj => "object+object",
            ReturnKind::ByRefObj => "byref+object",
            ReturnKind::ScalarByRef => "scalar+byref",
            ReturnKind::ObjByRef => "object+byref",
            ReturnKind::ByRefByRef => "byref+byref",
        };
        f.write_str(name)
    }
}

// =============================================================================
// GcInfoHeader
// =============================================================================

/// Decoded header facts.
///
/// Fact accessors panic when the fact was not decoded; check
/// [`GcInfoHeader::known`] or decode with [`DecodeFlags::HEADER`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcInfoHeader {
    known: DecodeFlags,
    slim: bool,
    flags: HeaderFlags,
    report_only_leaf: bool,
    has_tail_calls: bool,
    return_kind: Option<ReturnKind>,
    code_length: u32,
    prolog_size: Option<u32>,
    gs_cookie_valid_range: Option<CodeRange>,
    gs_cookie_stack_slot: Option<i32>,
    psp_sym_stack_slot: Option<i32>,
    generics_inst_context: Option<GenericsInstContext>,
    stack_base_register: Option<u32>,
    size_of_edit_and_continue_preserved_area: Option<u32>,
    size_of_edit_and_continue_fixed_stack_frame: Option<u32>,
    reverse_pinvoke_frame_stack_slot: Option<i32>,
    size_of_stack_parameter_area: u32,
    end_position: usize,
}

impl GcInfoHeader {
    /// Decode the header at the reader's position.
    ///
    /// Stops after the last stage needed for `wanted`; the reader is left
    /// there. When every header fact was decoded the reader sits at the
    /// start of the method body.
    pub fn decode(
        reader: &mut BitReader<'_>,
        encoding: &Encoding,
        version: u32,
        wanted: DecodeFlags,
    ) -> Result<Self, DecodeError> {
        let wanted = wanted.difference(DecodeFlags::BODY);
        let mut header = GcInfoHeader {
            known: DecodeFlags::empty(),
            slim: false,
            flags: HeaderFlags::default(),
            report_only_leaf: encoding.arch_header_flag == ArchHeaderFlag::HasTailCalls,
            has_tail_calls: false,
            return_kind: None,
            code_length: 0,
            prolog_size: None,
            gs_cookie_valid_range: None,
            gs_cookie_stack_slot: None,
            psp_sym_stack_slot: None,
            generics_inst_context: None,
            stack_base_register: None,
            size_of_edit_and_continue_preserved_area: None,
            size_of_edit_and_continue_fixed_stack_frame: None,
            reverse_pinvoke_frame_stack_slot: None,
            size_of_stack_parameter_area: 0,
            end_position: 0,
        };

        let fat = reader.read_one_fast()?;
        if !fat {
            header.decode_slim(reader, encoding)?;
        } else {
            header.decode_fat(reader, encoding, version, wanted)?;
        }
        if header.is_complete() {
            header.end_position = reader.position();
        }

        tracing::trace!(
            slim = header.slim,
            flags = header.flags.bits(),
            known = header.known.bits(),
            position = reader.position(),
            "decoded GC info header"
        );
        Ok(header)
    }

    fn decode_slim(&mut self, reader: &mut BitReader<'_>, enc: &Encoding) -> Result<(), DecodeError> {
        self.slim = true;
        if reader.read_one_fast()? {
            self.flags = HeaderFlags::from_bits(HeaderFlags::HAS_STACK_BASE_REGISTER);
            self.stack_base_register = Some(enc.denormalize_stack_base_register(0));
        }
        let raw = reader.read(enc.return_kind_bits_slim)? as u32;
        self.return_kind = Some(ReturnKind::from_raw(raw)?);
        self.code_length = enc.denormalize_code_length(reader.decode_u32(enc.code_length_base)?);
        self.known = DecodeFlags::HEADER;
        Ok(())
    }

    fn decode_fat(
        &mut self,
        reader: &mut BitReader<'_>,
        enc: &Encoding,
        version: u32,
        wanted: DecodeFlags,
    ) -> Result<(), DecodeError> {
        let flag_bits = if version == 1 {
            HEADER_FLAGS_BITS_VERSION_1
        } else {
            HEADER_FLAGS_BITS
        };
        let flags = HeaderFlags::from_bits(reader.read(flag_bits)? as u32);
        self.flags = flags;
        match enc.arch_header_flag {
            ArchHeaderFlag::WantsReportOnlyLeaf => self.report_only_leaf = flags.arch_specific(),
            ArchHeaderFlag::HasTailCalls => self.has_tail_calls = flags.arch_specific(),
        }
        let raw = reader.read(enc.return_kind_bits_fat)? as u32;
        self.return_kind = Some(ReturnKind::from_raw(raw)?);

        self.known = DecodeFlags::VARARG | DecodeFlags::HAS_TAILCALLS | DecodeFlags::RETURN_KIND;
        let absent = [
            (!flags.has_prolog_info(), DecodeFlags::PROLOG_LENGTH),
            (!flags.has_gs_cookie(), DecodeFlags::GS_COOKIE),
            (!flags.has_psp_sym(), DecodeFlags::PSP_SYM),
            (
                flags.generics_context_kind().is_none(),
                DecodeFlags::GENERICS_INST_CONTEXT,
            ),
            (!flags.has_stack_base_register(), DecodeFlags::STACK_BASE_REGISTER),
            (!flags.has_edit_and_continue_info(), DecodeFlags::EDIT_AND_CONTINUE),
            (!flags.has_reverse_pinvoke_frame(), DecodeFlags::REVERSE_PINVOKE_VAR),
            (
                !enc.has_fixed_stack_parameter_scratch_area,
                DecodeFlags::SIZE_OF_STACK_AREA,
            ),
        ];
        for (is_absent, fact) in absent {
            if is_absent {
                self.known |= fact;
            }
        }
        if self.satisfies(wanted) {
            return Ok(());
        }

        self.code_length = enc.denormalize_code_length(reader.decode_u32(enc.code_length_base)?);
        self.known |= DecodeFlags::CODE_LENGTH;
        if self.satisfies(wanted) {
            return Ok(());
        }

        if flags.has_gs_cookie() {
            let norm_prolog = decode_prolog_size(reader, enc)?;
            let position = reader.position();
            let norm_epilog = reader.decode_u32(enc.norm_epilog_size_base)?;
            let norm_end = enc
                .normalize_code_offset(self.code_length)
                .checked_sub(norm_epilog)
                .ok_or(DecodeError::ValueOutOfRange { position })?;
            let start = enc.denormalize_code_offset(norm_prolog);
            self.prolog_size = Some(start);
            self.gs_cookie_valid_range = Some(CodeRange::new(start, enc.denormalize_code_offset(norm_end)));
        } else if flags.generics_context_kind().is_some() {
            let norm_prolog = decode_prolog_size(reader, enc)?;
            self.prolog_size = Some(enc.denormalize_code_offset(norm_prolog));
        }
        self.known |= DecodeFlags::PROLOG_LENGTH;
        if self.satisfies(wanted) {
            return Ok(());
        }

        if flags.has_gs_cookie() {
            let norm = reader.decode_i32(enc.gs_cookie_stack_slot_base)?;
            self.gs_cookie_stack_slot = Some(enc.denormalize_stack_slot(norm));
        }
        self.known |= DecodeFlags::GS_COOKIE;
        if self.satisfies(wanted) {
            return Ok(());
        }

        if flags.has_psp_sym() {
            let norm = reader.decode_i32(enc.psp_sym_stack_slot_base)?;
            self.psp_sym_stack_slot = Some(enc.denormalize_stack_slot(norm));
        }
        self.known |= DecodeFlags::PSP_SYM;
        if self.satisfies(wanted) {
            return Ok(());
        }

        if let Some(kind) = flags.generics_context_kind() {
            let norm = reader.decode_i32(enc.generics_inst_context_stack_slot_base)?;
            self.generics_inst_context = Some(GenericsInstContext {
                stack_slot: enc.denormalize_stack_slot(norm),
                kind,
            });
        }
        self.known |= DecodeFlags::GENERICS_INST_CONTEXT;
        if self.satisfies(wanted) {
            return Ok(());
        }

        if flags.has_stack_base_register() {
            let norm = reader.decode_u32(enc.stack_base_register_base)?;
            self.stack_base_register = Some(enc.denormalize_stack_base_register(norm));
        }
        self.known |= DecodeFlags::STACK_BASE_REGISTER;
        if self.satisfies(wanted) {
            return Ok(());
        }

        if flags.has_edit_and_continue_info() {
            let preserved = reader.decode_u32(enc.size_of_edit_and_continue_preserved_area_base)?;
            self.size_of_edit_and_continue_preserved_area = Some(preserved);
            if let Some(base) = enc.size_of_edit_and_continue_fixed_stack_frame_base {
                self.size_of_edit_and_continue_fixed_stack_frame = Some(reader.decode_u32(base)?);
            }
        }
        self.known |= DecodeFlags::EDIT_AND_CONTINUE;
        if self.satisfies(wanted) {
            return Ok(());
        }

        if flags.has_reverse_pinvoke_frame() {
            let norm = reader.decode_i32(enc.reverse_pinvoke_frame_base)?;
            self.reverse_pinvoke_frame_stack_slot = Some(enc.denormalize_stack_slot(norm));
        }
        self.known |= DecodeFlags::REVERSE_PINVOKE_VAR;
        if self.satisfies(wanted) {
            return Ok(());
        }

        if enc.has_fixed_stack_parameter_scratch_area {
            let norm = reader.decode_u32(enc.size_of_stack_area_base)?;
            self.size_of_stack_parameter_area = enc.denormalize_size_of_stack_area(norm);
        }
        self.known |= DecodeFlags::SIZE_OF_STACK_AREA;
        Ok(())
    }

    #[inline]
    fn satisfies(&self, wanted: DecodeFlags) -> bool {
        self.known.contains(wanted)
    }

    #[inline]
    #[track_caller]
    fn require(&self, fact: DecodeFlags, name: &str) {
        assert!(
            self.known.contains(fact),
            "header fact `{name}` was not decoded"
        );
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Facts decoded so far.
    #[inline]
    pub fn known(&self) -> DecodeFlags {
        self.known
    }

    /// Whether every header fact is known.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.known.contains(DecodeFlags::HEADER)
    }

    /// Bit position of the method body, once the header is complete.
    #[inline]
    pub fn end_position(&self) -> Option<usize> {
        self.is_complete().then_some(self.end_position)
    }

    /// Whether the slim form was used.
    #[inline]
    pub fn is_slim(&self) -> bool {
        self.slim
    }

    /// Raw header flags.
    #[inline]
    pub fn flags(&self) -> HeaderFlags {
        self.flags
    }

    /// Varargs method.
    #[track_caller]
    pub fn is_vararg(&self) -> bool {
        self.require(DecodeFlags::VARARG, "is_vararg");
        self.flags.is_vararg()
    }

    /// Only the leaf funclet frame reports roots.
    #[track_caller]
    pub fn wants_report_only_leaf(&self) -> bool {
        self.require(DecodeFlags::HAS_TAILCALLS, "wants_report_only_leaf");
        self.report_only_leaf
    }

    /// The method contains tail calls.
    #[track_caller]
    pub fn has_tail_calls(&self) -> bool {
        self.require(DecodeFlags::HAS_TAILCALLS, "has_tail_calls");
        self.has_tail_calls
    }

    /// Return value classification.
    #[track_caller]
    pub fn return_kind(&self) -> ReturnKind {
        self.require(DecodeFlags::RETURN_KIND, "return_kind");
        self.return_kind.unwrap_or(ReturnKind::Unset)
    }

    /// Method code length in bytes.
    #[track_caller]
    pub fn code_length(&self) -> u32 {
        self.require(DecodeFlags::CODE_LENGTH, "code_length");
        self.code_length
    }

    /// Prolog size in bytes.
    #[track_caller]
    pub fn prolog_size(&self) -> Option<u32> {
        self.require(DecodeFlags::PROLOG_LENGTH, "prolog_size");
        self.prolog_size
    }

    /// Code range in which the GS cookie is valid.
    #[track_caller]
    pub fn gs_cookie_valid_range(&self) -> Option<CodeRange> {
        self.require(DecodeFlags::GS_COOKIE, "gs_cookie_valid_range");
        self.gs_cookie_valid_range
    }

    /// GS cookie stack slot.
    #[track_caller]
    pub fn gs_cookie_stack_slot(&self) -> Option<i32> {
        self.require(DecodeFlags::GS_COOKIE, "gs_cookie_stack_slot");
        self.gs_cookie_stack_slot
    }

    /// PSP symbol stack slot.
    #[track_caller]
    pub fn psp_sym_stack_slot(&self) -> Option<i32> {
        self.require(DecodeFlags::PSP_SYM, "psp_sym_stack_slot");
        self.psp_sym_stack_slot
    }

    /// Generics instantiation context.
    #[track_caller]
    pub fn generics_inst_context(&self) -> Option<GenericsInstContext> {
        self.require(DecodeFlags::GENERICS_INST_CONTEXT, "generics_inst_context");
        self.generics_inst_context
    }

    /// Stack base (frame) register.
    #[track_caller]
    pub fn stack_base_register(&self) -> Option<u32> {
        self.require(DecodeFlags::STACK_BASE_REGISTER, "stack_base_register");
        self.stack_base_register
    }

    /// Edit-and-continue preserved area size.
    #[track_caller]
    pub fn size_of_edit_and_continue_preserved_area(&self) -> Option<u32> {
        self.require(
            DecodeFlags::EDIT_AND_CONTINUE,
            "size_of_edit_and_continue_preserved_area",
        );
        self.size_of_edit_and_continue_preserved_area
    }

    /// Edit-and-continue fixed frame size (ARM64).
    #[track_caller]
    pub fn size_of_edit_and_continue_fixed_stack_frame(&self) -> Option<u32> {
        self.require(
            DecodeFlags::EDIT_AND_CONTINUE,
            "size_of_edit_and_continue_fixed_stack_frame",
        );
        self.size_of_edit_and_continue_fixed_stack_frame
    }

    /// Reverse P/Invoke frame stack slot.
    #[track_caller]
    pub fn reverse_pinvoke_frame_stack_slot(&self) -> Option<i32> {
        self.require(DecodeFlags::REVERSE_PINVOKE_VAR, "reverse_pinvoke_frame_stack_slot");
        self.reverse_pinvoke_frame_stack_slot
    }

    /// Size of the fixed outgoing/scratch area in bytes.
    #[track_caller]
    pub fn size_of_stack_parameter_area(&self) -> u32 {
        self.require(DecodeFlags::SIZE_OF_STACK_AREA, "size_of_stack_parameter_area");
        self.size_of_stack_parameter_area
    }
}

/// Normalized prolog size, stored minus one.
fn decode_prolog_size(reader: &mut BitReader<'_>, enc: &Encoding) -> Result<u32, DecodeError> {
    let position = reader.position();
    reader
        .decode_u32(enc.norm_prolog_size_base)?
        .checked_add(1)
        .ok_or(DecodeError::ValueOutOfRange { position })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{BitWriter, GcInfoBuilder};

    fn decode(enc: &Encoding, blob: &[u8], wanted: DecodeFlags) -> (GcInfoHeader, usize) {
        let mut reader = BitReader::new(blob);
        let header = GcInfoHeader::decode(&mut reader, enc, 3, wanted).unwrap();
        (header, reader.position())
    }

    #[test]
    fn test_slim_header() {
        let enc = Encoding::AMD64;
        let blob = GcInfoBuilder::new(enc, 100)
            .return_kind(ReturnKind::Object)
            .build();
        let (header, _) = decode(&enc, &blob, DecodeFlags::CODE_LENGTH);

        assert!(header.is_slim());
        assert!(header.is_complete());
        assert_eq!(header.code_length(), 100);
        assert_eq!(header.return_kind(), ReturnKind::Object);
        assert!(!header.is_vararg());
        assert!(!header.wants_report_only_leaf());
        assert_eq!(header.stack_base_register(), None);
        assert_eq!(header.gs_cookie_stack_slot(), None);
        assert_eq!(header.prolog_size(), None);
        assert_eq!(header.size_of_stack_parameter_area(), 0);
    }

    #[test]
    fn test_slim_header_default_frame_register() {
        let blob = GcInfoBuilder::new(Encoding::AMD64, 64)
            .stack_base_register(5)
            .build();
        let (header, _) = decode(&Encoding::AMD64, &blob, DecodeFlags::HEADER);
        assert!(header.is_slim());
        assert_eq!(header.stack_base_register(), Some(5));

        let blob = GcInfoBuilder::new(Encoding::ARM64, 64)
            .stack_base_register(29)
            .build();
        let (header, _) = decode(&Encoding::ARM64, &blob, DecodeFlags::HEADER);
        assert!(header.is_slim());
        assert_eq!(header.stack_base_register(), Some(29));
        // Leaf-only reporting is implied on this target.
        assert!(header.wants_report_only_leaf());
        assert!(!header.has_tail_calls());
    }

    #[test]
    fn test_fat_header_all_facts() {
        let enc = Encoding::AMD64;
        let blob = GcInfoBuilder::new(enc, 0x200)
            .vararg()
            .report_only_leaf()
            .return_kind(ReturnKind::ObjByRef)
            .prolog_epilog(0x10, 0x8)
            .gs_cookie(-16)
            .psp_sym(-24)
            .generics_context(-32, GenericsContextKind::This)
            .stack_base_register(3)
            .edit_and_continue(0x40, 0)
            .reverse_pinvoke_frame(-48)
            .stack_parameter_area(32)
            .build();
        let (header, position) = decode(&enc, &blob, DecodeFlags::EVERYTHING);

        assert!(!header.is_slim());
        assert!(header.is_vararg());
        assert!(header.wants_report_only_leaf());
        assert!(!header.has_tail_calls());
        assert_eq!(header.return_kind(), ReturnKind::ObjByRef);
        assert_eq!(header.code_length(), 0x200);
        assert_eq!(header.prolog_size(), Some(0x10));
        assert_eq!(header.gs_cookie_valid_range(), Some(CodeRange::new(0x10, 0x1F8)));
        assert_eq!(header.gs_cookie_stack_slot(), Some(-16));
        assert_eq!(header.psp_sym_stack_slot(), Some(-24));
        assert_eq!(
            header.generics_inst_context(),
            Some(GenericsInstContext {
                stack_slot: -32,
                kind: GenericsContextKind::This
            })
        );
        assert_eq!(header.stack_base_register(), Some(3));
        assert_eq!(header.size_of_edit_and_continue_preserved_area(), Some(0x40));
        assert_eq!(header.size_of_edit_and_continue_fixed_stack_frame(), None);
        assert_eq!(header.reverse_pinvoke_frame_stack_slot(), Some(-48));
        assert_eq!(header.size_of_stack_parameter_area(), 32);
        assert_eq!(header.end_position(), Some(position));
    }

    #[test]
    fn test_generics_context_without_gs_cookie() {
        let enc = Encoding::AMD64;
        let blob = GcInfoBuilder::new(enc, 80)
            .prolog_epilog(6, 0)
            .generics_context(8, GenericsContextKind::MethodDesc)
            .build();
        let (header, _) = decode(&enc, &blob, DecodeFlags::HEADER);
        assert_eq!(header.prolog_size(), Some(6));
        assert_eq!(header.gs_cookie_valid_range(), None);
        assert_eq!(header.generics_inst_context().map(|g| g.kind), Some(GenericsContextKind::MethodDesc));
    }

    #[test]
    fn test_arm64_fat_header() {
        let enc = Encoding::ARM64;
        let blob = GcInfoBuilder::new(enc, 400)
            .tail_calls()
            .edit_and_continue(0x30, 0x50)
            .build();
        let (header, _) = decode(&enc, &blob, DecodeFlags::HEADER);
        assert!(!header.is_slim());
        assert!(header.has_tail_calls());
        assert!(header.wants_report_only_leaf());
        assert_eq!(header.code_length(), 400);
        assert_eq!(header.size_of_edit_and_continue_preserved_area(), Some(0x30));
        assert_eq!(header.size_of_edit_and_continue_fixed_stack_frame(), Some(0x50));
    }

    #[test]
    fn test_version_1_flag_width() {
        let enc = Encoding::AMD64;
        let blob = GcInfoBuilder::new(enc, 77)
            .version(1)
            .vararg()
            .build();
        let mut reader = BitReader::new(&blob);
        let header = GcInfoHeader::decode(&mut reader, &enc, 1, DecodeFlags::HEADER).unwrap();
        assert!(header.is_vararg());
        assert_eq!(header.code_length(), 77);
    }

    #[test]
    fn test_early_bail_by_mask() {
        let enc = Encoding::AMD64;
        let blob = GcInfoBuilder::new(enc, 0x80)
            .prolog_epilog(4, 2)
            .gs_cookie(-8)
            .psp_sym(-16)
            .build();

        let (header, position) = decode(&enc, &blob, DecodeFlags::CODE_LENGTH);
        assert!(!header.is_complete());
        assert_eq!(header.end_position(), None);
        assert!(header.known().contains(DecodeFlags::CODE_LENGTH));
        assert!(!header.known().contains(DecodeFlags::GS_COOKIE));
        // fat bit + flags + return kind + code length (0x80 at base 8: 9 bits)
        assert_eq!(position, 1 + 10 + 4 + 9);

        let (header, _) = decode(&enc, &blob, DecodeFlags::PSP_SYM);
        assert_eq!(header.psp_sym_stack_slot(), Some(-16));
        assert_eq!(header.gs_cookie_stack_slot(), Some(-8));
        assert!(!header.known().contains(DecodeFlags::SIZE_OF_STACK_AREA));
    }

    #[test]
    fn test_absent_facts_are_known_after_flags() {
        let enc = Encoding::AMD64;
        let blob = GcInfoBuilder::new(enc, 0x80).force_fat().build();
        let (header, position) = decode(&enc, &blob, DecodeFlags::GS_COOKIE | DecodeFlags::PSP_SYM);
        assert_eq!(position, 1 + 10 + 4);
        assert_eq!(header.gs_cookie_stack_slot(), None);
        assert_eq!(header.psp_sym_stack_slot(), None);
    }

    #[test]
    #[should_panic(expected = "was not decoded")]
    fn test_unrequested_fact_panics() {
        let enc = Encoding::AMD64;
        let blob = GcInfoBuilder::new(enc, 0x80).gs_cookie(-8).prolog_epilog(1, 1).build();
        let (header, _) = decode(&enc, &blob, DecodeFlags::CODE_LENGTH);
        let _ = header.gs_cookie_stack_slot();
    }

    #[test]
    fn test_invalid_return_kind() {
        let enc = Encoding::AMD64;
        let mut writer = BitWriter::new();
        writer.write_bit(true);
        writer.write(0, HEADER_FLAGS_BITS);
        writer.write(7, enc.return_kind_bits_fat);
        writer.encode_unsigned(10, enc.code_length_base);
        let blob = writer.into_bytes();
        let err = GcInfoHeader::decode(&mut BitReader::new(&blob), &enc, 3, DecodeFlags::HEADER).unwrap_err();
        assert_eq!(err, DecodeError::InvalidReturnKind(7));
    }

    #[test]
    fn test_prolog_size_overflow_is_corrupt() {
        let enc = Encoding::AMD64;
        for flags in [HeaderFlags::HAS_GS_COOKIE, HeaderFlags::GENERICS_INST_CONTEXT_MT] {
            let mut writer = BitWriter::new();
            writer.write_bit(true);
            writer.write(flags as u64, HEADER_FLAGS_BITS);
            writer.write(0, enc.return_kind_bits_fat);
            writer.encode_unsigned(10, enc.code_length_base);
            let prolog_position = writer.bit_len();
            writer.encode_unsigned(u32::MAX as u64, enc.norm_prolog_size_base);
            writer.encode_unsigned(0, enc.norm_epilog_size_base);
            let blob = writer.into_bytes();

            let err = GcInfoHeader::decode(&mut BitReader::new(&blob), &enc, 3, DecodeFlags::PROLOG_LENGTH).unwrap_err();
            assert_eq!(err, DecodeError::ValueOutOfRange { position: prolog_position });
        }
    }

    #[test]
    fn test_return_kind_values() {
        for raw in 0..16u32 {
            match ReturnKind::from_raw(raw) {
                Ok(kind) => {
                    assert_eq!(kind.raw(), raw);
                    assert_eq!(kind.is_multi_register(), raw > 3);
                }
                Err(err) => {
                    assert!(matches!(raw, 7 | 11..=15));
                    assert_eq!(err, DecodeError::InvalidReturnKind(raw));
                }
            }
        }
        assert_eq!(ReturnKind::ByRefObj.to_string(), "byref+object");
    }

    #[test]
    fn test_decode_flags_algebra() {
        let mask = DecodeFlags::CODE_LENGTH | DecodeFlags::GC_LIFETIMES;
        assert!(mask.contains(DecodeFlags::CODE_LENGTH));
        assert!(mask.intersects(DecodeFlags::BODY));
        assert!(!mask.contains(DecodeFlags::BODY));
        assert_eq!(mask.difference(DecodeFlags::BODY), DecodeFlags::CODE_LENGTH);
        assert!(DecodeFlags::EVERYTHING.contains(DecodeFlags::HEADER | DecodeFlags::BODY));
        assert!(DecodeFlags::empty().is_empty());
    }

    #[test]
    fn test_header_flag_generics_kinds() {
        assert_eq!(HeaderFlags::from_bits(0x10).generics_context_kind(), Some(GenericsContextKind::MethodTable));
        assert_eq!(HeaderFlags::from_bits(0x20).generics_context_kind(), Some(GenericsContextKind::MethodDesc));
        assert_eq!(HeaderFlags::from_bits(0x30).generics_context_kind(), Some(GenericsContextKind::This));
        assert_eq!(HeaderFlags::from_bits(0x0F).generics_context_kind(), None);
        assert!(HeaderFlags::from_bits(0x20).has_prolog_info());
    }
}
