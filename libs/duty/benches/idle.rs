// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use criterion::{Criterion, criterion_group, criterion_main};
use duty::{BackoffIdleStrategy, BusySpinIdleStrategy, IdleStrategy, NoOpIdleStrategy};
use std::hint::black_box;

fn empty_ticks(c: &mut Criterion) {
    let mut group = c.benchmark_group("empty_tick");

    group.bench_function("noop", |b| {
        let mut strategy = NoOpIdleStrategy;
        b.iter(|| strategy.idle_work(black_box(0)));
    });

    group.bench_function("busy_spin", |b| {
        let mut strategy = BusySpinIdleStrategy;
        b.iter(|| strategy.idle_work(black_box(0)));
    });

    // stay inside the spin phase so the bench never parks
    group.bench_function("backoff_spin_phase", |b| {
        let mut strategy = BackoffIdleStrategy::new(
            u64::MAX,
            BackoffIdleStrategy::DEFAULT_MAX_YIELDS,
            BackoffIdleStrategy::DEFAULT_MIN_PARK_PERIOD_NS,
            BackoffIdleStrategy::DEFAULT_MAX_PARK_PERIOD_NS,
        );
        b.iter(|| strategy.idle_work(black_box(0)));
    });

    group.finish();
}

fn productive_ticks(c: &mut Criterion) {
    c.bench_function("backoff_reset", |b| {
        let mut strategy = BackoffIdleStrategy::default();
        b.iter(|| strategy.idle_work(black_box(1)));
    });
}

criterion_group!(benches, empty_ticks, productive_ticks);
criterion_main!(benches);
