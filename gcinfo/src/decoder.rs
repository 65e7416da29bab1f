//! Per-method decoder and root reporting.
//!
//! A [`GcInfoDecoder`] is created over one method's blob with an interest
//! mask. Header facts in the mask are decoded eagerly; the rest are decoded
//! on first access. Asking for any body section ([`DecodeFlags::BODY`])
//! records where the safe-point table, the ranges and the slot table start,
//! so later queries seek straight to the section they need.
//!
//! # Root enumeration
//!
//! ```text
//!             ┌─────────────────────┐
//!   offset ──►│ safe point lookup   │── found ──► safe-point live set ─┐
//!             └─────────────────────┘                                  │
//!                   │ not found / aborted                              ▼
//!             ┌─────────────────────┐                         ┌────────────────┐
//!             │ interruptible range │── inside ──► chunk ────►│ report tracked │
//!             └─────────────────────┘                         └────────────────┘
//!                   │ outside                                          │
//!                   ▼                                                  ▼
//!              NoSafePoint                                    report untracked
//! ```
//!
//! Every root passes through the same filter: FP-only mode, scratch
//! registers and scratch stack slots, then duplicate suppression.

use std::cell::OnceCell;
use std::ops::ControlFlow;

use smallvec::SmallVec;

use crate::bitstream::BitReader;
use crate::config::{DecoderOptions, Encoding};
use crate::error::{DecodeError, EnumerateError};
use crate::frame::{FrameView, GcRoot, RootKey, RootLocation};
use crate::header::{DecodeFlags, GcInfoHeader, GenericsInstContext, ReturnKind};
use crate::liveness::{
    chunk_live_slots, safe_point_live_set, ChunkLookup, EnumerateFlags, EnumerationSummary,
};
use crate::ranges::{contains_offset, CodeRange, RangeIter};
use crate::safepoints::SafePointTable;
use crate::slots::{SlotDesc, SlotTable, StackSlotBase};
use crate::target::Target;

/// Inline capacity of the per-enumeration duplicate filter.
const INLINE_REPORTED_ROOTS: usize = 32;

// =============================================================================
// Token and layout
// =============================================================================

/// A method's GC info blob and its format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcInfoToken<'a> {
    /// The encoded bytes.
    pub blob: &'a [u8],
    /// Format version the blob was written with.
    pub version: u32,
}

impl<'a> GcInfoToken<'a> {
    /// Token for a blob in the current format version.
    #[inline]
    pub const fn new(blob: &'a [u8]) -> Self {
        Self {
            blob,
            version: crate::config::GCINFO_VERSION,
        }
    }
}

/// How the method may be interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruptibility {
    /// Roots are known at every offset inside the interruptible ranges.
    FullyInterruptible,
    /// Roots are only known at safe points.
    PartiallyInterruptible,
}

/// Section positions of the method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BodyLayout {
    num_safe_points: u32,
    num_ranges: u32,
    safe_points_pos: usize,
    ranges_pos: usize,
    slot_table_pos: usize,
}

// =============================================================================
// GcInfoDecoder
// =============================================================================

/// Decoder over one method's GC info.
pub struct GcInfoDecoder<'a, T: Target> {
    blob: &'a [u8],
    version: u32,
    target: T,
    encoding: Encoding,
    options: DecoderOptions,
    requested: DecodeFlags,
    header: GcInfoHeader,
    full_header: OnceCell<GcInfoHeader>,
    body: Option<BodyLayout>,
    bits_read: usize,
}

impl<'a, T: Target> GcInfoDecoder<'a, T> {
    /// Decode the facts in `flags` with default options.
    pub fn new(token: GcInfoToken<'a>, target: T, flags: DecodeFlags) -> Result<Self, DecodeError> {
        Self::with_options(token, target, flags, DecoderOptions::default())
    }

    /// Decode the facts in `flags`.
    pub fn with_options(
        token: GcInfoToken<'a>,
        target: T,
        flags: DecodeFlags,
        options: DecoderOptions,
    ) -> Result<Self, DecodeError> {
        let encoding = *target.encoding();
        let wants_body = flags.intersects(DecodeFlags::BODY);
        let header_mask = if wants_body { DecodeFlags::EVERYTHING } else { flags };

        let mut reader = BitReader::new(token.blob);
        let header = GcInfoHeader::decode(&mut reader, &encoding, token.version, header_mask)?;
        let mut bits_read = reader.position();

        let body = if wants_body {
            let layout = Self::decode_layout(&mut reader, &encoding, &header)?;
            bits_read = layout.slot_table_pos;
            Some(layout)
        } else {
            None
        };

        tracing::debug!(
            arch = target.name(),
            flags = flags.bits(),
            bytes = token.blob.len(),
            bits_read,
            "created GC info decoder"
        );

        Ok(Self {
            blob: token.blob,
            version: token.version,
            target,
            encoding,
            options,
            requested: flags,
            header,
            full_header: OnceCell::new(),
            body,
            bits_read,
        })
    }

    fn decode_layout(
        reader: &mut BitReader<'_>,
        enc: &Encoding,
        header: &GcInfoHeader,
    ) -> Result<BodyLayout, DecodeError> {
        let num_safe_points = reader.decode_u32(enc.num_safe_points_base)?;
        let num_ranges = if header.is_slim() {
            0
        } else {
            reader.decode_u32(enc.num_interruptible_ranges_base)?
        };
        let safe_points_pos = reader.position();
        let width = enc.safe_point_offset_bits(header.code_length());
        reader.skip_fields(u64::from(num_safe_points), width)?;
        let ranges_pos = reader.position();
        let slot_table_pos = RangeIter::new(*reader, enc, num_ranges).end_position()?;
        reader.seek(slot_table_pos);

        Ok(BodyLayout {
            num_safe_points,
            num_ranges,
            safe_points_pos,
            ranges_pos,
            slot_table_pos,
        })
    }

    #[track_caller]
    fn body(&self, needs: DecodeFlags, query: &str) -> BodyLayout {
        match self.body {
            Some(body) if self.requested.intersects(needs) => body,
            _ => panic!("`{query}` needs one of the decode flags {:#x}", needs.bits()),
        }
    }

    // =========================================================================
    // Decoder state
    // =========================================================================

    /// The target this decoder reports for.
    #[inline]
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Encoding table in use.
    #[inline]
    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Format version of the blob.
    #[inline]
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Interest mask the decoder was created with.
    #[inline]
    pub fn requested(&self) -> DecodeFlags {
        self.requested
    }

    /// Bytes consumed by the decoding done at construction.
    #[inline]
    pub fn num_bytes_read(&self) -> usize {
        self.bits_read.div_ceil(8)
    }

    /// Header with every fact decoded.
    ///
    /// Decoded from the start of the blob on first use when construction
    /// did not already decode all of it.
    pub fn header(&self) -> Result<&GcInfoHeader, DecodeError> {
        if self.header.is_complete() {
            return Ok(&self.header);
        }
        if let Some(header) = self.full_header.get() {
            return Ok(header);
        }
        let mut reader = BitReader::new(self.blob);
        let header = GcInfoHeader::decode(&mut reader, &self.encoding, self.version, DecodeFlags::EVERYTHING)?;
        tracing::debug!(known = self.header.known().bits(), "decoded full header on demand");
        Ok(self.full_header.get_or_init(|| header))
    }

    /// Header as decoded at construction.
    #[inline]
    pub fn eager_header(&self) -> &GcInfoHeader {
        &self.header
    }

    fn fact<R>(&self, fact: DecodeFlags, read: impl FnOnce(&GcInfoHeader) -> R) -> Result<R, DecodeError> {
        if self.header.known().contains(fact) {
            Ok(read(&self.header))
        } else {
            Ok(read(self.header()?))
        }
    }

    // =========================================================================
    // Header facts
    // =========================================================================

    /// Method code length in bytes.
    pub fn code_length(&self) -> Result<u32, DecodeError> {
        self.fact(DecodeFlags::CODE_LENGTH, GcInfoHeader::code_length)
    }

    /// Return value classification.
    pub fn return_kind(&self) -> Result<ReturnKind, DecodeError> {
        self.fact(DecodeFlags::RETURN_KIND, GcInfoHeader::return_kind)
    }

    /// Varargs method.
    pub fn is_vararg(&self) -> Result<bool, DecodeError> {
        self.fact(DecodeFlags::VARARG, GcInfoHeader::is_vararg)
    }

    /// Only the leaf funclet frame reports roots.
    pub fn wants_report_only_leaf(&self) -> Result<bool, DecodeError> {
        self.fact(DecodeFlags::HAS_TAILCALLS, GcInfoHeader::wants_report_only_leaf)
    }

    /// The method contains tail calls.
    pub fn has_tail_calls(&self) -> Result<bool, DecodeError> {
        self.fact(DecodeFlags::HAS_TAILCALLS, GcInfoHeader::has_tail_calls)
    }

    /// Prolog size in bytes, when stored.
    pub fn prolog_size(&self) -> Result<Option<u32>, DecodeError> {
        self.fact(DecodeFlags::PROLOG_LENGTH, GcInfoHeader::prolog_size)
    }

    /// Offsets where the GS cookie is valid.
    pub fn gs_cookie_valid_range(&self) -> Result<Option<CodeRange>, DecodeError> {
        self.fact(DecodeFlags::GS_COOKIE, GcInfoHeader::gs_cookie_valid_range)
    }

    /// GS cookie stack slot.
    pub fn gs_cookie_stack_slot(&self) -> Result<Option<i32>, DecodeError> {
        self.fact(DecodeFlags::GS_COOKIE, GcInfoHeader::gs_cookie_stack_slot)
    }

    /// PSP symbol stack slot.
    pub fn psp_sym_stack_slot(&self) -> Result<Option<i32>, DecodeError> {
        self.fact(DecodeFlags::PSP_SYM, GcInfoHeader::psp_sym_stack_slot)
    }

    /// Generics instantiation context.
    pub fn generics_inst_context(&self) -> Result<Option<GenericsInstContext>, DecodeError> {
        self.fact(DecodeFlags::GENERICS_INST_CONTEXT, GcInfoHeader::generics_inst_context)
    }

    /// Stack base (frame) register.
    pub fn stack_base_register(&self) -> Result<Option<u32>, DecodeError> {
        self.fact(DecodeFlags::STACK_BASE_REGISTER, GcInfoHeader::stack_base_register)
    }

    /// Size of the edit-and-continue preserved area.
    pub fn size_of_edit_and_continue_preserved_area(&self) -> Result<Option<u32>, DecodeError> {
        self.fact(
            DecodeFlags::EDIT_AND_CONTINUE,
            GcInfoHeader::size_of_edit_and_continue_preserved_area,
        )
    }

    /// Size of the edit-and-continue fixed stack frame.
    pub fn size_of_edit_and_continue_fixed_stack_frame(&self) -> Result<Option<u32>, DecodeError> {
        self.fact(
            DecodeFlags::EDIT_AND_CONTINUE,
            GcInfoHeader::size_of_edit_and_continue_fixed_stack_frame,
        )
    }

    /// Reverse P/Invoke frame stack slot.
    pub fn reverse_pinvoke_frame_stack_slot(&self) -> Result<Option<i32>, DecodeError> {
        self.fact(
            DecodeFlags::REVERSE_PINVOKE_VAR,
            GcInfoHeader::reverse_pinvoke_frame_stack_slot,
        )
    }

    /// Size of the fixed outgoing argument and scratch area.
    pub fn size_of_stack_parameter_area(&self) -> Result<u32, DecodeError> {
        self.fact(DecodeFlags::SIZE_OF_STACK_AREA, GcInfoHeader::size_of_stack_parameter_area)
    }

    // =========================================================================
    // Safe points and ranges
    // =========================================================================

    fn safe_point_table(&self, body: &BodyLayout) -> Result<SafePointTable<'_>, DecodeError> {
        Ok(SafePointTable::new(
            BitReader::at(self.blob, body.safe_points_pos),
            &self.encoding,
            body.num_safe_points,
            self.header()?.code_length(),
        ))
    }

    fn range_iter(&self, body: &BodyLayout) -> RangeIter<'_> {
        RangeIter::new(BitReader::at(self.blob, body.ranges_pos), &self.encoding, body.num_ranges)
    }

    /// Whether the method has interruptible ranges.
    #[track_caller]
    pub fn interruptibility(&self) -> Interruptibility {
        let body = self.body(DecodeFlags::BODY, "interruptibility");
        if body.num_ranges > 0 {
            Interruptibility::FullyInterruptible
        } else {
            Interruptibility::PartiallyInterruptible
        }
    }

    /// Number of safe points.
    #[track_caller]
    pub fn num_safe_points(&self) -> u32 {
        self.body(DecodeFlags::BODY, "num_safe_points").num_safe_points
    }

    /// Number of interruptible ranges.
    #[track_caller]
    pub fn num_interruptible_ranges(&self) -> u32 {
        self.body(DecodeFlags::BODY, "num_interruptible_ranges").num_ranges
    }

    /// Whether `offset` is inside an interruptible range.
    #[track_caller]
    pub fn is_interruptible(&self, offset: u32) -> Result<bool, DecodeError> {
        let body = self.body(
            DecodeFlags::INTERRUPTIBILITY | DecodeFlags::FOR_RANGES_CALLBACK,
            "is_interruptible",
        );
        contains_offset(self.range_iter(&body), offset)
    }

    /// Whether return offset `offset` is a safe point.
    #[track_caller]
    pub fn is_safe_point(&self, offset: u32) -> Result<bool, DecodeError> {
        Ok(self.find_safe_point(offset)?.is_some())
    }

    /// Index of the safe point at return offset `offset`.
    #[track_caller]
    pub fn find_safe_point(&self, offset: u32) -> Result<Option<u32>, DecodeError> {
        let body = self.body(
            DecodeFlags::INTERRUPTIBILITY | DecodeFlags::GC_LIFETIMES,
            "find_safe_point",
        );
        self.safe_point_table(&body)?.find(offset)
    }

    /// Whether a call-site safe point may also be treated as interruptible.
    #[track_caller]
    pub fn is_interruptible_safe_point(&self, offset: u32) -> Result<bool, DecodeError> {
        if self.version < 3 || !self.options.interruptible_call_sites {
            return Ok(false);
        }
        self.is_safe_point(offset)
    }

    /// Safe-point table view.
    #[track_caller]
    pub fn safe_points(&self) -> Result<SafePointTable<'_>, DecodeError> {
        let body = self.body(
            DecodeFlags::INTERRUPTIBILITY | DecodeFlags::GC_LIFETIMES,
            "safe_points",
        );
        self.safe_point_table(&body)
    }

    /// Forward-only iterator over the interruptible ranges.
    #[track_caller]
    pub fn interruptible_ranges(&self) -> RangeIter<'_> {
        let body = self.body(
            DecodeFlags::INTERRUPTIBILITY | DecodeFlags::FOR_RANGES_CALLBACK,
            "interruptible_ranges",
        );
        self.range_iter(&body)
    }

    /// Invoke `callback` with each safe point's return offset until it breaks.
    #[track_caller]
    pub fn enumerate_safe_points<F>(&self, callback: F) -> Result<(), DecodeError>
    where
        F: FnMut(u32) -> ControlFlow<()>,
    {
        self.safe_points()?.for_each(callback)
    }

    /// Invoke `callback` with each interruptible range until it breaks.
    #[track_caller]
    pub fn enumerate_interruptible_ranges<F>(&self, mut callback: F) -> Result<(), DecodeError>
    where
        F: FnMut(CodeRange) -> ControlFlow<()>,
    {
        for range in self.interruptible_ranges() {
            if callback(range?).is_break() {
                break;
            }
        }
        Ok(())
    }

    /// The slot table.
    #[track_caller]
    pub fn slot_table(&self) -> Result<SlotTable<'_>, DecodeError> {
        let body = self.body(DecodeFlags::GC_LIFETIMES, "slot_table");
        let mut reader = BitReader::at(self.blob, body.slot_table_pos);
        SlotTable::decode(&mut reader, &self.encoding)
    }

    // =========================================================================
    // Root enumeration
    // =========================================================================

    /// Report every root live at `offset` in `frame`.
    ///
    /// `offset` is the frame's current instruction offset: a return offset
    /// for callers, the faulting or hijacked offset for the active frame.
    /// Scratch registers and scratch stack slots are only reported when
    /// `report_scratch` is set.
    ///
    /// # Panics
    ///
    /// Panics if the decoder was not created with
    /// [`DecodeFlags::GC_LIFETIMES`].
    #[track_caller]
    pub fn enumerate_live_slots<F, C>(
        &self,
        offset: u32,
        frame: &F,
        report_scratch: bool,
        flags: EnumerateFlags,
        callback: C,
    ) -> Result<EnumerationSummary, EnumerateError>
    where
        F: FrameView + ?Sized,
        C: FnMut(GcRoot),
    {
        let body = self.body(DecodeFlags::GC_LIFETIMES, "enumerate_live_slots");
        let header = self.header()?;
        let enc = &self.encoding;

        if header.wants_report_only_leaf() && flags.contains(EnumerateFlags::PARENT_OF_FUNCLET_STACK_FRAME) {
            tracing::debug!(offset, "funclet parent frame reports nothing");
            return Ok(EnumerationSummary::default());
        }

        let mut reader = BitReader::at(self.blob, body.slot_table_pos);
        let table = SlotTable::decode(&mut reader, enc)?;
        let liveness = reader;
        let num_tracked = table.num_tracked();
        let aborted = flags.contains(EnumerateFlags::EXECUTION_ABORTED);

        let mut reporter = Reporter::new(&self.target, header, frame, flags, callback);

        let safe_point = if aborted || body.num_safe_points == 0 {
            None
        } else {
            self.safe_point_table(&body)?.find(offset)?
        };

        if let Some(index) = safe_point {
            tracing::trace!(offset, index, "reporting at safe point");
            if num_tracked > 0 {
                let live = safe_point_live_set(liveness, enc, body.num_safe_points, index, num_tracked)?;
                reporter.report_tracked(&table, live, report_scratch)?;
            }
        } else if body.num_ranges > 0 {
            let lookup = if num_tracked == 0 {
                if contains_offset(self.range_iter(&body), offset)? {
                    ChunkLookup::NoTrackedLive
                } else {
                    ChunkLookup::OutsideRanges
                }
            } else {
                chunk_live_slots(
                    liveness,
                    enc,
                    body.num_safe_points,
                    num_tracked,
                    self.range_iter(&body),
                    enc.normalize_code_offset(offset),
                )?
            };
            match lookup {
                ChunkLookup::OutsideRanges if aborted => {
                    tracing::debug!(offset, "aborted frame outside interruptible code");
                    return Ok(reporter.summary);
                }
                ChunkLookup::OutsideRanges => return Err(EnumerateError::NoSafePoint { offset }),
                ChunkLookup::NoTrackedLive => {}
                ChunkLookup::Live(mut chunk) => {
                    reporter.report_tracked(&table, &mut chunk, report_scratch)?;
                    reporter.summary.transitions += chunk.transitions_decoded();
                }
            }
        } else if body.num_safe_points > 0 && !aborted {
            return Err(EnumerateError::NoSafePoint { offset });
        }

        if reports_untracked(flags) {
            reporter.report_untracked(&table)?;
        }

        tracing::trace!(offset, summary = ?reporter.summary, "enumerated live slots");
        Ok(reporter.summary)
    }

    /// Report only the untracked slots, which are live throughout the body.
    ///
    /// # Panics
    ///
    /// Panics if the decoder was not created with
    /// [`DecodeFlags::GC_LIFETIMES`].
    #[track_caller]
    pub fn enumerate_untracked_slots<F, C>(
        &self,
        frame: &F,
        flags: EnumerateFlags,
        callback: C,
    ) -> Result<EnumerationSummary, EnumerateError>
    where
        F: FrameView + ?Sized,
        C: FnMut(GcRoot),
    {
        let table = self.slot_table()?;
        let header = self.header()?;
        let mut reporter = Reporter::new(&self.target, header, frame, flags, callback);
        if reports_untracked(flags) {
            reporter.report_untracked(&table)?;
        }
        Ok(reporter.summary)
    }
}

impl<T: Target + std::fmt::Debug> std::fmt::Debug for GcInfoDecoder<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcInfoDecoder")
            .field("target", &self.target)
            .field("version", &self.version)
            .field("bytes", &self.blob.len())
            .field("requested", &self.requested)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

#[inline]
fn reports_untracked(flags: EnumerateFlags) -> bool {
    !flags.contains(EnumerateFlags::PARENT_OF_FUNCLET_STACK_FRAME)
        && !flags.contains(EnumerateFlags::NO_REPORT_UNTRACKED)
}

// =============================================================================
// Reporter
// =============================================================================

/// Applies the reporting filters and hands roots to the callback.
struct Reporter<'r, T: ?Sized, F: ?Sized, C> {
    target: &'r T,
    header: &'r GcInfoHeader,
    frame: &'r F,
    flags: EnumerateFlags,
    callback: C,
    /// Keys of reported roots, kept sorted.
    reported: SmallVec<[RootKey; INLINE_REPORTED_ROOTS]>,
    summary: EnumerationSummary,
}

impl<'r, T, F, C> Reporter<'r, T, F, C>
where
    T: Target + ?Sized,
    F: FrameView + ?Sized,
    C: FnMut(GcRoot),
{
    fn new(target: &'r T, header: &'r GcInfoHeader, frame: &'r F, flags: EnumerateFlags, callback: C) -> Self {
        Self {
            target,
            header,
            frame,
            flags,
            callback,
            reported: SmallVec::new(),
            summary: EnumerationSummary::default(),
        }
    }

    fn report_tracked<I>(&mut self, table: &SlotTable<'_>, live: I, report_scratch: bool) -> Result<(), EnumerateError>
    where
        I: IntoIterator<Item = Result<u32, DecodeError>>,
    {
        let mut walker = table.walker();
        for index in live {
            let slot = walker.get(index?)?;
            self.report(slot, report_scratch)?;
        }
        Ok(())
    }

    fn report_untracked(&mut self, table: &SlotTable<'_>) -> Result<(), EnumerateError> {
        let mut walker = table.walker();
        for index in table.num_tracked()..table.num_slots() {
            let slot = walker.get(index)?;
            self.report(slot, true)?;
        }
        Ok(())
    }

    fn report(&mut self, slot: SlotDesc, report_scratch: bool) -> Result<(), EnumerateError> {
        let fp_only = self.flags.contains(EnumerateFlags::REPORT_FP_BASED_SLOTS_ONLY);
        let location = match slot {
            SlotDesc::Register { reg, .. } => {
                if fp_only {
                    self.summary.filtered += 1;
                    return Ok(());
                }
                if !self.target.is_valid_register(reg) {
                    return Err(DecodeError::InvalidRegister(reg).into());
                }
                let scratch = self.target.is_scratch_register(reg);
                if scratch && !report_scratch {
                    tracing::trace!(reg = self.target.register_name(reg), "skipping scratch register");
                    self.summary.skipped_scratch += 1;
                    return Ok(());
                }
                if scratch && !self.flags.contains(EnumerateFlags::ACTIVE_STACK_FRAME) {
                    tracing::warn!(
                        reg = self.target.register_name(reg),
                        "reporting scratch register of a non-active frame"
                    );
                }
                RootLocation::Register {
                    reg,
                    saved_at: self.frame.register_location(reg),
                }
            }
            SlotDesc::Stack { offset, base, .. } => {
                if fp_only && base != StackSlotBase::FrameRegRel {
                    self.summary.filtered += 1;
                    return Ok(());
                }
                let frame_register = match base {
                    StackSlotBase::FrameRegRel => Some(
                        self.header
                            .stack_base_register()
                            .ok_or(DecodeError::MissingStackBaseRegister)?,
                    ),
                    _ => None,
                };
                let address = self
                    .frame
                    .stack_slot_address(base, offset, frame_register)
                    .ok_or_else(|| EnumerateError::RegisterUnavailable {
                        reg: frame_register.unwrap_or_else(|| self.target.stack_pointer_register()),
                    })?;
                if !report_scratch && self.is_scratch_stack_slot(address) {
                    tracing::trace!(address, "skipping scratch stack slot");
                    self.summary.skipped_scratch += 1;
                    return Ok(());
                }
                RootLocation::Stack { address, base, offset }
            }
        };

        match self.reported.binary_search(&location.key()) {
            Ok(_) => {
                self.summary.duplicates += 1;
                return Ok(());
            }
            Err(at) => self.reported.insert(at, location.key()),
        }

        let root = GcRoot {
            location,
            flags: slot.flags().reported(),
        };
        tracing::trace!(?location, interior = root.is_interior(), pinned = root.is_pinned(), "reporting root");
        (self.callback)(root);
        self.summary.reported += 1;
        Ok(())
    }

    fn is_scratch_stack_slot(&self, address: usize) -> bool {
        let area = self.header.size_of_stack_parameter_area() as usize;
        let sp = self.frame.stack_pointer();
        area > 0 && address >= sp && address - sp < area
    }
}
