//! Blob writer for tests and benchmarks.
//!
//! [`BitWriter`] is the mirror of [`BitReader`](crate::bitstream::BitReader)
//! and [`GcInfoBuilder`] lays out complete GC info blobs from a plain
//! description of a method. The builder is a fixture: it emits exactly what
//! it is told and panics on descriptions the format cannot express.

use rustc_hash::FxHashMap;

use crate::bitstream::{ceil_log2, BITS_PER_WORD};
use crate::config::{
    ArchHeaderFlag, Encoding, GCINFO_VERSION, HEADER_FLAGS_BITS, HEADER_FLAGS_BITS_VERSION_1,
    NUM_NORM_CODE_OFFSETS_PER_CHUNK, NUM_NORM_CODE_OFFSETS_PER_CHUNK_LOG2,
};
use crate::header::{GenericsContextKind, HeaderFlags, ReturnKind};
use crate::ranges::CodeRange;
use crate::slots::SlotDesc;

// =============================================================================
// BitWriter
// =============================================================================

/// Append-only bit buffer, least-significant bit first.
#[derive(Debug, Clone, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit_len: usize,
}

impl BitWriter {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bits written so far.
    #[inline]
    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Append one bit.
    pub fn write_bit(&mut self, bit: bool) {
        let byte = self.bit_len / 8;
        if byte == self.bytes.len() {
            self.bytes.push(0);
        }
        if bit {
            self.bytes[byte] |= 1 << (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    /// Append the low `n` bits of `value` (0 ≤ n ≤ 64).
    pub fn write(&mut self, value: u64, n: u32) {
        assert!(n <= BITS_PER_WORD, "write width {n} too large");
        for i in 0..n {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Append an unsigned variable-length integer.
    pub fn encode_unsigned(&mut self, value: u64, base: u32) {
        assert!(base > 0 && base < BITS_PER_WORD, "variable-length base {base} outside 1..64");
        let mask = (1u64 << base) - 1;
        let mut rest = value;
        loop {
            let chunk = rest & mask;
            rest >>= base;
            if rest == 0 {
                self.write(chunk, base + 1);
                return;
            }
            self.write(chunk | (1u64 << base), base + 1);
        }
    }

    /// Append a signed variable-length integer.
    pub fn encode_signed(&mut self, value: i64, base: u32) {
        assert!(base > 0 && base < BITS_PER_WORD, "variable-length base {base} outside 1..64");
        let mask = (1u64 << base) - 1;
        let sign = 1u64 << (base - 1);
        let mut rest = value;
        loop {
            let chunk = (rest as u64) & mask;
            rest >>= base;
            let done = (rest == 0 && chunk & sign == 0) || (rest == -1 && chunk & sign != 0);
            if done {
                self.write(chunk, base + 1);
                return;
            }
            self.write(chunk | (1u64 << base), base + 1);
        }
    }

    /// Pad with zero bits to a byte boundary.
    pub fn align_to_byte(&mut self) {
        while self.bit_len % 8 != 0 {
            self.write_bit(false);
        }
    }

    /// Append every bit of `other`.
    pub fn append(&mut self, other: &BitWriter) {
        for pos in 0..other.bit_len {
            self.write_bit(other.bytes[pos / 8] & (1 << (pos % 8)) != 0);
        }
    }

    /// The written bytes; the last byte is zero-padded.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Bits taken by `value` as an unsigned variable-length integer.
pub fn unsigned_size(value: u64, base: u32) -> usize {
    let mut chunks = 1;
    let mut rest = value >> base;
    while rest != 0 {
        chunks += 1;
        rest >>= base;
    }
    chunks * (base as usize + 1)
}

// =============================================================================
// Section encoders
// =============================================================================

/// Append a slot table.
///
/// Slots must be registers, then tracked stack slots, then untracked stack
/// slots, and delta-encodable runs must ascend.
pub fn encode_slot_table(writer: &mut BitWriter, enc: &Encoding, slots: &[SlotDesc]) {
    let num_registers = slots.iter().take_while(|s| s.is_register()).count();
    let num_stack = slots[num_registers..]
        .iter()
        .take_while(|s| !s.is_register() && !s.is_untracked())
        .count();
    let num_tracked = num_registers + num_stack;
    let num_untracked = slots.len() - num_tracked;
    assert!(
        slots[num_tracked..].iter().all(|s| !s.is_register() && s.is_untracked()),
        "slots must be ordered registers, tracked stack, untracked stack"
    );

    if num_registers > 0 {
        writer.write_bit(true);
        writer.encode_unsigned(num_registers as u64, enc.num_registers_base);
    } else {
        writer.write_bit(false);
    }
    if num_stack + num_untracked > 0 {
        writer.write_bit(true);
        writer.encode_unsigned(num_stack as u64, enc.num_stack_slots_base);
        writer.encode_unsigned(num_untracked as u64, enc.num_untracked_slots_base);
    } else {
        writer.write_bit(false);
    }

    let mut prev_norm = 0i64;
    let mut prev_wire = 0u8;
    for (index, slot) in slots.iter().enumerate() {
        let wire = slot.flags().wire_bits();
        match *slot {
            SlotDesc::Register { reg, .. } => {
                let norm = i64::from(enc.normalize_register(reg));
                if index == 0 || prev_wire != 0 {
                    writer.encode_unsigned(norm as u64, enc.register_base);
                    writer.write(u64::from(wire), 2);
                } else {
                    assert!(wire == 0 && norm > prev_norm, "register slot {index} not delta-encodable");
                    writer.encode_unsigned((norm - prev_norm - 1) as u64, enc.register_delta_base);
                }
                prev_norm = norm;
            }
            SlotDesc::Stack { offset, base, .. } => {
                let norm = enc.normalize_stack_slot(offset);
                assert_eq!(enc.denormalize_stack_slot(norm), offset, "misaligned stack slot");
                let norm = i64::from(norm);
                writer.write(base.bits(), 2);
                let first_in_group = index == num_registers || index == num_tracked;
                if first_in_group || prev_wire != 0 {
                    writer.encode_signed(norm, enc.stack_slot_base);
                    writer.write(u64::from(wire), 2);
                } else {
                    assert!(wire == 0 && norm >= prev_norm, "stack slot {index} not delta-encodable");
                    writer.encode_unsigned((norm - prev_norm) as u64, enc.stack_slot_delta_base);
                }
                prev_norm = norm;
            }
        }
        prev_wire = wire;
    }
}

/// Append a safe-point table of return offsets.
pub fn encode_safe_points(writer: &mut BitWriter, enc: &Encoding, code_length: u32, offsets: &[u32]) {
    let width = enc.safe_point_offset_bits(code_length);
    let mut prev = None;
    for &offset in offsets {
        assert!(offset >= 1 && offset <= code_length, "safe point {offset} outside method");
        assert!(prev < Some(offset), "safe points must ascend");
        prev = Some(offset);
        writer.write(u64::from(enc.normalize_code_offset(offset - 1)), width);
    }
}

/// Append an interruptible range table.
pub fn encode_ranges(writer: &mut BitWriter, enc: &Encoding, ranges: &[CodeRange]) {
    let mut last_stop = 0u32;
    for range in ranges {
        let start = enc.normalize_code_offset(range.start);
        let stop = enc.normalize_code_offset(range.end);
        assert!(start >= last_stop && stop > start, "ranges must be sorted and non-empty");
        writer.encode_unsigned(u64::from(start - last_stop), enc.interruptible_range_delta1_base);
        writer.encode_unsigned(u64::from(stop - start - 1), enc.interruptible_range_delta2_base);
        last_stop = stop;
    }
}

/// Form of a live-state bit vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveSetEncoding {
    /// Smallest of the forms below.
    #[default]
    Auto,
    /// One bit per slot.
    Simple,
    /// Run lengths, dead runs with the skip base.
    Rle,
    /// Run lengths with the two bases swapped.
    RleSwapped,
}

fn rle_size(enc: &Encoding, live: &[bool], swapped: bool) -> usize {
    let mut probe = BitWriter::new();
    write_rle(&mut probe, enc, live, swapped);
    probe.bit_len()
}

fn write_rle(writer: &mut BitWriter, enc: &Encoding, live: &[bool], swapped: bool) {
    let (skip_base, run_base) = if swapped {
        (enc.live_state_rle_run_base, enc.live_state_rle_skip_base)
    } else {
        (enc.live_state_rle_skip_base, enc.live_state_rle_run_base)
    };
    writer.write_bit(true);
    writer.write_bit(swapped);

    let mut run_start = 0usize;
    let mut in_run = false;
    for (index, &bit) in live.iter().enumerate() {
        if bit && !in_run {
            writer.encode_unsigned((index - run_start) as u64, skip_base);
            run_start = index + 1;
            in_run = true;
        } else if !bit && in_run {
            writer.encode_unsigned((index - run_start) as u64, run_base);
            run_start = index + 1;
            in_run = false;
        }
    }
    let tail_base = if in_run { run_base } else { skip_base };
    writer.encode_unsigned((live.len() - run_start) as u64, tail_base);
}

/// Append a live-state vector.
pub fn write_live_set(writer: &mut BitWriter, enc: &Encoding, live: &[bool], encoding: LiveSetEncoding) {
    let encoding = match encoding {
        LiveSetEncoding::Auto => {
            let simple = 1 + live.len();
            let rle = rle_size(enc, live, false);
            let swapped = rle_size(enc, live, true);
            if simple <= rle && simple <= swapped {
                LiveSetEncoding::Simple
            } else if rle <= swapped {
                LiveSetEncoding::Rle
            } else {
                LiveSetEncoding::RleSwapped
            }
        }
        other => other,
    };
    match encoding {
        LiveSetEncoding::Simple | LiveSetEncoding::Auto => {
            writer.write_bit(false);
            for &bit in live {
                writer.write_bit(bit);
            }
        }
        LiveSetEncoding::Rle => write_rle(writer, enc, live, false),
        LiveSetEncoding::RleSwapped => write_rle(writer, enc, live, true),
    }
}

// =============================================================================
// GcInfoBuilder
// =============================================================================

/// Where per-safe-point live sets are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LiveStateLayout {
    /// Indirect when that is smaller and the method has no ranges.
    #[default]
    Auto,
    /// One plain bit vector per safe point.
    Inline,
    /// Deduplicated vectors behind a pointer table.
    Indirect(LiveSetEncoding),
}

/// Describes one method and lays out its GC info blob.
///
/// Header facts are set with the builder methods; the slim header is used
/// whenever the method qualifies unless [`GcInfoBuilder::force_fat`] is set.
#[derive(Debug, Clone)]
pub struct GcInfoBuilder {
    encoding: Encoding,
    version: u32,
    code_length: u32,
    force_fat: bool,
    flags: u32,
    return_kind: ReturnKind,
    prolog_size: u32,
    epilog_size: u32,
    gs_cookie: Option<i32>,
    psp_sym: Option<i32>,
    generics_context: Option<(i32, GenericsContextKind)>,
    stack_base_register: Option<u32>,
    edit_and_continue: Option<(u32, u32)>,
    reverse_pinvoke_frame: Option<i32>,
    stack_parameter_area: u32,
    slots: Vec<SlotDesc>,
    safe_points: Vec<(u32, Vec<bool>)>,
    ranges: Vec<CodeRange>,
    transitions: Vec<(u32, u32, bool)>,
    layout: LiveStateLayout,
}

impl GcInfoBuilder {
    /// A method of `code_length` bytes with nothing else declared.
    pub fn new(encoding: Encoding, code_length: u32) -> Self {
        Self {
            encoding,
            version: GCINFO_VERSION,
            code_length,
            force_fat: false,
            flags: 0,
            return_kind: ReturnKind::Scalar,
            prolog_size: 0,
            epilog_size: 0,
            gs_cookie: None,
            psp_sym: None,
            generics_context: None,
            stack_base_register: None,
            edit_and_continue: None,
            reverse_pinvoke_frame: None,
            stack_parameter_area: 0,
            slots: Vec::new(),
            safe_points: Vec::new(),
            ranges: Vec::new(),
            transitions: Vec::new(),
            layout: LiveStateLayout::Auto,
        }
    }

    /// Format version (affects the flag field width).
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Always emit a fat header.
    pub fn force_fat(mut self) -> Self {
        self.force_fat = true;
        self
    }

    /// Mark the method varargs.
    pub fn vararg(mut self) -> Self {
        self.flags |= HeaderFlags::IS_VARARG;
        self
    }

    /// Set the report-only-leaf flag.
    pub fn report_only_leaf(mut self) -> Self {
        assert_eq!(self.encoding.arch_header_flag, ArchHeaderFlag::WantsReportOnlyLeaf);
        self.flags |= HeaderFlags::ARCH_SPECIFIC;
        self
    }

    /// Set the has-tail-calls flag.
    pub fn tail_calls(mut self) -> Self {
        assert_eq!(self.encoding.arch_header_flag, ArchHeaderFlag::HasTailCalls);
        self.flags |= HeaderFlags::ARCH_SPECIFIC;
        self
    }

    /// Return kind.
    pub fn return_kind(mut self, kind: ReturnKind) -> Self {
        self.return_kind = kind;
        self
    }

    /// Prolog and epilog sizes (stored with a GS cookie or generics context).
    pub fn prolog_epilog(mut self, prolog: u32, epilog: u32) -> Self {
        self.prolog_size = prolog;
        self.epilog_size = epilog;
        self
    }

    /// GS cookie slot.
    pub fn gs_cookie(mut self, slot: i32) -> Self {
        self.gs_cookie = Some(slot);
        self
    }

    /// PSP symbol slot.
    pub fn psp_sym(mut self, slot: i32) -> Self {
        self.psp_sym = Some(slot);
        self
    }

    /// Generics instantiation context.
    pub fn generics_context(mut self, slot: i32, kind: GenericsContextKind) -> Self {
        self.generics_context = Some((slot, kind));
        self
    }

    /// Stack base register.
    pub fn stack_base_register(mut self, reg: u32) -> Self {
        self.stack_base_register = Some(reg);
        self
    }

    /// Edit-and-continue area sizes. `fixed_frame` is only stored on
    /// targets whose header carries it.
    pub fn edit_and_continue(mut self, preserved: u32, fixed_frame: u32) -> Self {
        self.edit_and_continue = Some((preserved, fixed_frame));
        self
    }

    /// Reverse P/Invoke frame slot.
    pub fn reverse_pinvoke_frame(mut self, slot: i32) -> Self {
        self.reverse_pinvoke_frame = Some(slot);
        self
    }

    /// Size of the fixed outgoing/scratch area.
    pub fn stack_parameter_area(mut self, size: u32) -> Self {
        self.stack_parameter_area = size;
        self
    }

    /// Declare a slot. See [`encode_slot_table`] for ordering rules.
    pub fn slot(mut self, slot: SlotDesc) -> Self {
        self.slots.push(slot);
        self
    }

    /// Declare several slots.
    pub fn slots(mut self, slots: impl IntoIterator<Item = SlotDesc>) -> Self {
        self.slots.extend(slots);
        self
    }

    /// Declare a safe point at return offset `offset` with one live bit
    /// per tracked slot.
    pub fn safe_point(mut self, offset: u32, live: &[bool]) -> Self {
        self.safe_points.push((offset, live.to_vec()));
        self
    }

    /// Declare an interruptible range.
    pub fn range(mut self, start: u32, end: u32) -> Self {
        self.ranges.push(CodeRange::new(start, end));
        self
    }

    /// Tracked slot `slot` becomes live (or dead) at code offset `offset`.
    pub fn transition(mut self, offset: u32, slot: u32, live: bool) -> Self {
        self.transitions.push((offset, slot, live));
        self
    }

    /// Live-set storage choice.
    pub fn live_state_layout(mut self, layout: LiveStateLayout) -> Self {
        self.layout = layout;
        self
    }

    fn header_flags(&self) -> u32 {
        let mut flags = self.flags;
        if self.gs_cookie.is_some() {
            flags |= HeaderFlags::HAS_GS_COOKIE;
        }
        if self.psp_sym.is_some() {
            flags |= HeaderFlags::HAS_PSP_SYM;
        }
        if let Some((_, kind)) = self.generics_context {
            flags |= match kind {
                GenericsContextKind::MethodTable => HeaderFlags::GENERICS_INST_CONTEXT_MT,
                GenericsContextKind::MethodDesc => HeaderFlags::GENERICS_INST_CONTEXT_MD,
                GenericsContextKind::This => HeaderFlags::GENERICS_INST_CONTEXT_THIS,
            };
        }
        if self.stack_base_register.is_some() {
            flags |= HeaderFlags::HAS_STACK_BASE_REGISTER;
        }
        if self.edit_and_continue.is_some() {
            flags |= HeaderFlags::HAS_EDIT_AND_CONTINUE_INFO;
        }
        if self.reverse_pinvoke_frame.is_some() {
            flags |= HeaderFlags::REVERSE_PINVOKE_FRAME;
        }
        flags
    }

    fn is_slim(&self) -> bool {
        let enc = &self.encoding;
        let default_base = self
            .stack_base_register
            .map_or(true, |reg| enc.normalize_stack_base_register(reg) == 0);
        !self.force_fat
            && self.header_flags() & !HeaderFlags::HAS_STACK_BASE_REGISTER == 0
            && default_base
            && self.ranges.is_empty()
            && self.return_kind.raw() < (1 << enc.return_kind_bits_slim)
            && self.stack_parameter_area == 0
    }

    fn write_header(&self, writer: &mut BitWriter) {
        let enc = &self.encoding;
        let norm_code_length = enc.normalize_code_length(self.code_length);
        assert_eq!(enc.denormalize_code_length(norm_code_length), self.code_length);

        if self.is_slim() {
            writer.write_bit(false);
            writer.write_bit(self.stack_base_register.is_some());
            writer.write(u64::from(self.return_kind.raw()), enc.return_kind_bits_slim);
            writer.encode_unsigned(u64::from(norm_code_length), enc.code_length_base);
            return;
        }

        let flag_bits = if self.version == 1 {
            HEADER_FLAGS_BITS_VERSION_1
        } else {
            HEADER_FLAGS_BITS
        };
        writer.write_bit(true);
        writer.write(u64::from(self.header_flags()), flag_bits);
        writer.write(u64::from(self.return_kind.raw()), enc.return_kind_bits_fat);
        writer.encode_unsigned(u64::from(norm_code_length), enc.code_length_base);

        if self.gs_cookie.is_some() || self.generics_context.is_some() {
            let norm_prolog = enc.normalize_code_offset(self.prolog_size);
            assert!(norm_prolog >= 1, "prolog size must be set");
            writer.encode_unsigned(u64::from(norm_prolog - 1), enc.norm_prolog_size_base);
            if self.gs_cookie.is_some() {
                let norm_epilog = enc.normalize_code_offset(self.epilog_size);
                writer.encode_unsigned(u64::from(norm_epilog), enc.norm_epilog_size_base);
            }
        }
        let write_slot = |writer: &mut BitWriter, slot: i32, base: u32| {
            writer.encode_signed(i64::from(enc.normalize_stack_slot(slot)), base);
        };
        if let Some(slot) = self.gs_cookie {
            write_slot(writer, slot, enc.gs_cookie_stack_slot_base);
        }
        if let Some(slot) = self.psp_sym {
            write_slot(writer, slot, enc.psp_sym_stack_slot_base);
        }
        if let Some((slot, _)) = self.generics_context {
            write_slot(writer, slot, enc.generics_inst_context_stack_slot_base);
        }
        if let Some(reg) = self.stack_base_register {
            writer.encode_unsigned(
                u64::from(enc.normalize_stack_base_register(reg)),
                enc.stack_base_register_base,
            );
        }
        if let Some((preserved, fixed_frame)) = self.edit_and_continue {
            writer.encode_unsigned(
                u64::from(preserved),
                enc.size_of_edit_and_continue_preserved_area_base,
            );
            if let Some(base) = enc.size_of_edit_and_continue_fixed_stack_frame_base {
                writer.encode_unsigned(u64::from(fixed_frame), base);
            }
        }
        if let Some(slot) = self.reverse_pinvoke_frame {
            write_slot(writer, slot, enc.reverse_pinvoke_frame_base);
        }
        if enc.has_fixed_stack_parameter_scratch_area {
            writer.encode_unsigned(
                u64::from(self.stack_parameter_area >> enc.size_of_stack_area_shift),
                enc.size_of_stack_area_base,
            );
        }
    }

    /// Lay out the blob.
    ///
    /// # Panics
    ///
    /// Panics if the description cannot be encoded: unsorted or overlapping
    /// safe points and ranges, live vectors of the wrong length, or
    /// indirect live sets together with interruptible ranges.
    pub fn build(&self) -> Vec<u8> {
        let enc = &self.encoding;
        let mut info1 = BitWriter::new();
        let mut info2 = BitWriter::new();

        self.write_header(&mut info1);

        let mut safe_points = self.safe_points.clone();
        safe_points.sort_by_key(|(offset, _)| *offset);
        info1.encode_unsigned(safe_points.len() as u64, enc.num_safe_points_base);
        if !self.is_slim() {
            info1.encode_unsigned(self.ranges.len() as u64, enc.num_interruptible_ranges_base);
        }
        let offsets: Vec<u32> = safe_points.iter().map(|(offset, _)| *offset).collect();
        encode_safe_points(&mut info1, enc, self.code_length, &offsets);
        encode_ranges(&mut info1, enc, &self.ranges);
        encode_slot_table(&mut info1, enc, &self.slots);

        let num_tracked = self.slots.iter().filter(|s| !s.is_untracked()).count();
        if num_tracked > 0 {
            if !safe_points.is_empty() {
                self.write_safe_point_live_sets(&mut info1, &mut info2, &safe_points, num_tracked);
            }
            if !self.ranges.is_empty() {
                self.write_chunks(&mut info1, &mut info2, num_tracked);
            }
        }

        info1.align_to_byte();
        info1.append(&info2);
        info1.into_bytes()
    }

    fn write_safe_point_live_sets(
        &self,
        info1: &mut BitWriter,
        info2: &mut BitWriter,
        safe_points: &[(u32, Vec<bool>)],
        num_tracked: usize,
    ) {
        let enc = &self.encoding;
        for (offset, live) in safe_points {
            assert_eq!(live.len(), num_tracked, "live set at {offset} has the wrong length");
        }

        let set_encoding = match self.layout {
            LiveStateLayout::Inline => None,
            LiveStateLayout::Indirect(encoding) => Some(encoding),
            LiveStateLayout::Auto => {
                let inline = 1 + safe_points.len() * num_tracked;
                let indirect = Self::indirect_size(enc, safe_points);
                (self.ranges.is_empty() && indirect < inline).then_some(LiveSetEncoding::Auto)
            }
        };

        let Some(set_encoding) = set_encoding else {
            info1.write_bit(false);
            for (_, live) in safe_points {
                for &bit in live {
                    info1.write_bit(bit);
                }
            }
            return;
        };
        assert!(
            self.ranges.is_empty(),
            "indirect live sets cannot be combined with interruptible ranges"
        );

        info1.write_bit(true);
        let mut set_offsets: FxHashMap<&[bool], u64> = FxHashMap::default();
        let mut pointers = Vec::with_capacity(safe_points.len());
        for (_, live) in safe_points {
            let pointer = *set_offsets.entry(live.as_slice()).or_insert_with(|| {
                let offset = info2.bit_len() as u64;
                write_live_set(info2, enc, live, set_encoding);
                offset
            });
            pointers.push(pointer);
        }
        let largest = pointers.iter().copied().max().unwrap_or(0);
        let width = ceil_log2(largest + 1).max(1);
        info1.encode_unsigned(u64::from(width - 1), enc.pointer_size_base);
        for pointer in pointers {
            info1.write(pointer, width);
        }
    }

    fn indirect_size(enc: &Encoding, safe_points: &[(u32, Vec<bool>)]) -> usize {
        let mut seen: FxHashMap<&[bool], usize> = FxHashMap::default();
        let mut sets = 0usize;
        for (_, live) in safe_points {
            if !seen.contains_key(live.as_slice()) {
                let mut probe = BitWriter::new();
                write_live_set(&mut probe, enc, live, LiveSetEncoding::Auto);
                seen.insert(live.as_slice(), sets);
                sets += probe.bit_len();
            }
        }
        let width = ceil_log2(sets as u64 + 1).max(1) as usize;
        1 + unsigned_size(width as u64 - 1, enc.pointer_size_base) + width * safe_points.len() + sets
    }

    fn write_chunks(&self, info1: &mut BitWriter, info2: &mut BitWriter, num_tracked: usize) {
        let enc = &self.encoding;
        let per_chunk = NUM_NORM_CODE_OFFSETS_PER_CHUNK;

        let norm_ranges: Vec<(u32, u32)> = self
            .ranges
            .iter()
            .map(|r| (enc.normalize_code_offset(r.start), enc.normalize_code_offset(r.end)))
            .collect();
        let total: u32 = norm_ranges.iter().map(|(start, stop)| stop - start).sum();
        let num_chunks = total.div_ceil(per_chunk) as usize;

        let mut transitions = self.transitions.clone();
        transitions.sort_by_key(|(offset, _, _)| *offset);
        let mut pseudo = Vec::with_capacity(transitions.len());
        for (offset, slot, live) in transitions {
            assert!((slot as usize) < num_tracked, "transition for untracked slot {slot}");
            let norm = enc.normalize_code_offset(offset);
            let mut cumulative = 0;
            for &(start, stop) in &norm_ranges {
                if norm < stop {
                    pseudo.push((cumulative + norm.saturating_sub(start), slot as usize, live));
                    break;
                }
                cumulative += stop - start;
            }
        }

        let mut live_state = vec![false; num_tracked];
        let mut pointers = vec![0u64; num_chunks];
        let mut i = 0;
        while i < pseudo.len() {
            let chunk = pseudo[i].0 / per_chunk;
            let mut could_be_live = live_state.clone();
            let mut j = i;
            while j < pseudo.len() && pseudo[j].0 / per_chunk == chunk {
                let (_, slot, live) = pseudo[j];
                could_be_live[slot] = true;
                live_state[slot] = live;
                j += 1;
            }

            pointers[chunk as usize] = info2.bit_len() as u64 + 1;
            write_live_set(info2, enc, &could_be_live, LiveSetEncoding::Auto);
            for slot in (0..num_tracked).filter(|&s| could_be_live[s]) {
                info2.write_bit(live_state[slot]);
            }
            for slot in (0..num_tracked).filter(|&s| could_be_live[s]) {
                for &(offset, _, _) in pseudo[i..j].iter().filter(|t| t.1 == slot) {
                    let delta = offset - chunk * per_chunk;
                    if delta != 0 {
                        info2.write_bit(true);
                        info2.write(u64::from(delta), NUM_NORM_CODE_OFFSETS_PER_CHUNK_LOG2);
                    }
                }
                info2.write_bit(false);
            }
            i = j;
        }

        let largest = pointers.iter().copied().max().unwrap_or(0);
        let width = ceil_log2(largest + 1);
        info1.encode_unsigned(u64::from(width), enc.pointer_size_base);
        if width > 0 {
            for pointer in pointers {
                info1.write(pointer, width);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitstream::BitReader;

    #[test]
    fn test_writer_matches_reader_bit_order() {
        let mut writer = BitWriter::new();
        writer.write(0b101, 3);
        writer.write(0xABCD, 16);
        writer.write_bit(true);
        assert_eq!(writer.bit_len(), 20);
        let bytes = writer.into_bytes();
        let mut reader = BitReader::new(&bytes);
        assert_eq!(reader.read(3).unwrap(), 0b101);
        assert_eq!(reader.read(16).unwrap(), 0xABCD);
        assert!(reader.read_one_fast().unwrap());
    }

    #[test]
    fn test_append_and_align() {
        let mut a = BitWriter::new();
        a.write(0b11, 2);
        a.align_to_byte();
        assert_eq!(a.bit_len(), 8);
        let mut b = BitWriter::new();
        b.write(0b1_0110, 5);
        a.append(&b);
        let bytes = a.into_bytes();
        assert_eq!(bytes, [0b11, 0b1_0110]);
    }

    #[test]
    fn test_unsigned_size_matches_writer() {
        for base in [1, 2, 4, 6] {
            for value in [0u64, 1, 7, 8, 100, 5000] {
                let mut writer = BitWriter::new();
                writer.encode_unsigned(value, base);
                assert_eq!(unsigned_size(value, base), writer.bit_len());
            }
        }
    }

    #[test]
    fn test_auto_live_set_prefers_rle_for_sparse_sets() {
        let enc = Encoding::AMD64;
        let mut live = vec![false; 64];
        live[40] = true;
        let mut writer = BitWriter::new();
        write_live_set(&mut writer, &enc, &live, LiveSetEncoding::Auto);
        assert!(writer.bit_len() < 65);
        let bytes = writer.into_bytes();
        assert!(BitReader::new(&bytes).read_one_fast().unwrap());
    }
}
