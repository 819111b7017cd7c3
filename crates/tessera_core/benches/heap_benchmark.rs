//! # Heap Allocator Benchmark
//!
//! Batch-sized allocate/release churn over a fragmented heap.
//!
//! Run with: `cargo bench --package tessera_core`

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_core::{HeapAllocator, HeapBlock};

/// Typical per-batch allocation size.
const BATCH_BYTES: u64 = 64 * 1024;

/// Generates deterministic random indices.
fn generate_random_indices(count: usize, max: usize, seed: u64) -> Vec<usize> {
    let mut indices = Vec::with_capacity(count);
    let mut state = seed;

    for _ in 0..count {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        indices.push((state as usize) % max);
    }

    indices
}

fn bench_fill_and_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("heap_fill_and_drain");

    for batches in [256u64, 4096, 16_384] {
        group.bench_with_input(BenchmarkId::from_parameter(batches), &batches, |b, &batches| {
            b.iter(|| {
                let mut heap = HeapAllocator::new(batches * BATCH_BYTES);
                let blocks: Vec<HeapBlock> = (0..batches)
                    .filter_map(|_| heap.allocate(BATCH_BYTES, 16))
                    .collect();
                for block in blocks {
                    heap.release(block);
                }
                black_box(heap.free_block_count())
            });
        });
    }

    group.finish();
}

fn bench_fragmented_churn(c: &mut Criterion) {
    const LIVE: usize = 4096;

    let mut heap = HeapAllocator::new(LIVE as u64 * 2 * BATCH_BYTES);
    let mut live: Vec<HeapBlock> = (0..LIVE)
        .filter_map(|_| heap.allocate(BATCH_BYTES, 16))
        .collect();
    let victims = generate_random_indices(10_000, LIVE, 0x9E37_79B9_7F4A_7C15);

    c.bench_function("heap_fragmented_churn", |b| {
        b.iter(|| {
            for &victim in &victims {
                heap.release(live[victim]);
                if let Some(block) = heap.allocate(BATCH_BYTES, 16) {
                    live[victim] = block;
                }
            }
            black_box(heap.largest_free_block())
        });
    });
}

criterion_group!(benches, bench_fill_and_drain, bench_fragmented_churn);
criterion_main!(benches);
