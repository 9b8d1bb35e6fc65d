//! Basic benchmarks for the `block_pool` crate.
#![allow(
    missing_docs,
    reason = "No need for API documentation in benchmark code"
)]

use std::hint::black_box;
use std::iter;
use std::time::Instant;

use block_pool::BlockPool;
use criterion::{Criterion, criterion_group, criterion_main};

criterion_group!(benches, entrypoint);
criterion_main!(benches);

type TestItem = usize;
const TEST_VALUE: TestItem = 1024;
const BLOCK_CAPACITY: usize = 128;

fn entrypoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_basic");

    group.bench_function("build_one_block", |b| {
        b.iter(|| {
            drop(black_box(BlockPool::<TestItem, BLOCK_CAPACITY>::new()));
        });
    });

    group.bench_function("get_first", |b| {
        b.iter_custom(|iters| {
            let mut pools = iter::repeat_with(BlockPool::<TestItem, BLOCK_CAPACITY>::new)
                .take(usize::try_from(iters).unwrap())
                .collect::<Vec<_>>();

            let start = Instant::now();

            for pool in &mut pools {
                _ = black_box(pool.get(black_box(TEST_VALUE)));
            }

            start.elapsed()
        });
    });

    group.bench_function("get_release_cycle", |b| {
        let mut pool = BlockPool::<TestItem, BLOCK_CAPACITY>::new();

        b.iter(|| {
            let item = pool.get(black_box(TEST_VALUE));

            // SAFETY: The item came from this pool and is released exactly once.
            unsafe { pool.release(black_box(item)) }.unwrap();
        });
    });

    group.bench_function("get_when_head_blocks_full", |b| {
        b.iter_custom(|iters| {
            // Ten full blocks in front of one with room, so every get has to walk the list.
            let mut pool = BlockPool::<TestItem, BLOCK_CAPACITY>::new();
            let first_block = (0..BLOCK_CAPACITY)
                .map(|_| pool.get(TEST_VALUE))
                .collect::<Vec<_>>();

            let filler = (0..BLOCK_CAPACITY * 10)
                .map(|_| pool.get(TEST_VALUE))
                .collect::<Vec<_>>();

            for item in first_block {
                // SAFETY: Every item came from this pool and is released exactly once.
                unsafe { pool.release(item) }.unwrap();
            }

            let start = Instant::now();

            for _ in 0..iters {
                let item = pool.get(black_box(TEST_VALUE));

                // SAFETY: The item came from this pool and is released exactly once.
                unsafe { pool.release(item) }.unwrap();
            }

            let elapsed = start.elapsed();

            for item in filler {
                // SAFETY: Every item came from this pool and is released exactly once.
                unsafe { pool.release(item) }.unwrap();
            }

            elapsed
        });
    });

    group.finish();
}
