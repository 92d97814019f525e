// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use criterion::{criterion_group, criterion_main, Criterion};
use forerun::{spawn_stream, Promise, ThreadPool};
use std::sync::Arc;

fn then_chain_1k(c: &mut Criterion) {
    let pool = Arc::new(ThreadPool::new(2));

    c.bench_function("then_chain_1k", |b| {
        b.iter(|| {
            let p = Promise::new();
            let mut f = p.future();
            for _ in 0..1_000 {
                f = f.then_on(&pool, |x| x + 1);
            }
            p.set(0_i64);
            assert_eq!(*f.get(), 1_000);
        });
    });
}

fn generator_drain_1k(c: &mut Criterion) {
    let pool = Arc::new(ThreadPool::new(2));

    c.bench_function("generator_drain_1k", |b| {
        b.iter(|| {
            let stream = spawn_stream(&pool.parallel_start(), |y| async move {
                for i in 0..1_000_i64 {
                    y.put(i).await;
                }
            });
            let mut sum = 0;
            while let Some(item) = stream.dequeue_item() {
                sum += item;
            }
            assert_eq!(sum, 499_500);
        });
    });
}

criterion_group!(benches, then_chain_1k, generator_drain_1k);
criterion_main!(benches);
