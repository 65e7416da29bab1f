//! GC Info Decode Benchmarks
//!
//! Measures the work a stack walker does per frame during a pause.
//!
//! # Benchmark Categories
//!
//! 1. **Construction**: header and body layout for different interest masks
//! 2. **Safe Point Lookup**: bisection plus linear tail over large tables
//! 3. **Enumeration**: live-slot reporting at safe points and in chunks
//! 4. **Slot Access**: cached vs re-decoded slot descriptors

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use gcinfo::target::{Amd64, CallingConvention};
use gcinfo::test_support::GcInfoBuilder;
use gcinfo::{
    DecodeFlags, EnumerateFlags, Encoding, GcInfoDecoder, GcInfoToken, SavedRegisters, SlotDesc,
    SlotFlags, StackSlotBase,
};

// =============================================================================
// Benchmark Helpers
// =============================================================================

const TARGET: Amd64 = Amd64::new(CallingConvention::SystemV);

fn stack_slots(count: usize) -> Vec<SlotDesc> {
    (0..count)
        .map(|i| SlotDesc::Stack {
            offset: 8 * i as i32,
            base: StackSlotBase::CallerSpRel,
            flags: SlotFlags::EMPTY,
        })
        .collect()
}

/// A partially interruptible method with `safe_points` call sites.
fn call_heavy_method(slots: usize, safe_points: u32) -> Vec<u8> {
    let mut builder = GcInfoBuilder::new(Encoding::AMD64, safe_points * 16 + 16).slots(stack_slots(slots));
    for i in 0..safe_points {
        let live: Vec<bool> = (0..slots).map(|s| (s + i as usize) % 3 != 0).collect();
        builder = builder.safe_point(16 * i + 5, &live);
    }
    builder.build()
}

/// A fully interruptible method with a transition every few bytes.
fn loop_method(slots: usize, code_length: u32) -> Vec<u8> {
    let mut builder = GcInfoBuilder::new(Encoding::AMD64, code_length)
        .slots(stack_slots(slots))
        .range(0, code_length);
    let mut live = vec![false; slots];
    for offset in (3..code_length).step_by(7) {
        let slot = (offset as usize / 7) % slots;
        live[slot] = !live[slot];
        builder = builder.transition(offset, slot as u32, live[slot]);
    }
    builder.build()
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_construction(c: &mut Criterion) {
    let mut group = c.benchmark_group("construction");
    let blob = call_heavy_method(16, 64);

    for (name, flags) in [
        ("code_length", DecodeFlags::CODE_LENGTH),
        ("header", DecodeFlags::HEADER),
        ("everything", DecodeFlags::EVERYTHING),
    ] {
        group.bench_function(name, |b| {
            b.iter(|| GcInfoDecoder::new(GcInfoToken::new(black_box(&blob)), TARGET, flags).unwrap())
        });
    }
    group.finish();
}

fn bench_safe_point_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("safe_point_lookup");
    for count in [8u32, 64, 1024] {
        let blob = call_heavy_method(4, count);
        let decoder = GcInfoDecoder::new(GcInfoToken::new(&blob), TARGET, DecodeFlags::INTERRUPTIBILITY).unwrap();
        let last = 16 * (count - 1) + 5;
        group.bench_with_input(BenchmarkId::from_parameter(count), &last, |b, &offset| {
            b.iter(|| decoder.find_safe_point(black_box(offset)).unwrap())
        });
    }
    group.finish();
}

fn bench_enumeration(c: &mut Criterion) {
    let mut group = c.benchmark_group("enumerate_live_slots");
    let frame = SavedRegisters::new(0x1000, 0x2000);

    let blob = call_heavy_method(32, 128);
    let decoder = GcInfoDecoder::new(GcInfoToken::new(&blob), TARGET, DecodeFlags::GC_LIFETIMES).unwrap();
    group.bench_function("safe_point", |b| {
        b.iter(|| {
            let mut count = 0u32;
            decoder
                .enumerate_live_slots(black_box(16 * 64 + 5), &frame, false, EnumerateFlags::empty(), |_| {
                    count += 1
                })
                .unwrap();
            count
        })
    });

    let blob = loop_method(24, 4096);
    let decoder = GcInfoDecoder::new(GcInfoToken::new(&blob), TARGET, DecodeFlags::GC_LIFETIMES).unwrap();
    group.bench_function("interruptible", |b| {
        b.iter(|| {
            let mut count = 0u32;
            decoder
                .enumerate_live_slots(
                    black_box(3000),
                    &frame,
                    true,
                    EnumerateFlags::ACTIVE_STACK_FRAME,
                    |_| count += 1,
                )
                .unwrap();
            count
        })
    });
    group.finish();
}

fn bench_slot_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("slot_access");
    let blob = call_heavy_method(200, 1);
    let decoder = GcInfoDecoder::new(GcInfoToken::new(&blob), TARGET, DecodeFlags::GC_LIFETIMES).unwrap();
    let table = decoder.slot_table().unwrap();

    group.bench_function("cached", |b| b.iter(|| table.get_slot(black_box(1)).unwrap()));
    group.bench_function("redecoded", |b| b.iter(|| table.get_slot(black_box(199)).unwrap()));
    group.bench_function("walk_all", |b| {
        b.iter(|| table.iter().filter(|slot| slot.is_ok()).count())
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_construction,
    bench_safe_point_lookup,
    bench_enumeration,
    bench_slot_access
);
criterion_main!(benches);
