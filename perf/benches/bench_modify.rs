use std::sync::Arc;

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use dbuf_core::DoublyBuffered;
use dbuf_perf::IdleReaders;

/// Modify with nobody registered: two closure applications, one flip, an
/// empty drain.
fn bench_modify_no_readers(c: &mut Criterion) {
    let table: DoublyBuffered<u64> = DoublyBuffered::new();

    let mut group = c.benchmark_group("dbuf");
    group.throughput(Throughput::Elements(1));

    group.bench_function("modify (no readers)", |b| {
        b.iter(|| {
            table.modify(|v| {
                *v = black_box(v.wrapping_add(1));
                1
            })
        });
    });

    group.finish();
}

/// The drain is linear in registered readers; sweep a few counts.
fn bench_modify_with_idle_readers(c: &mut Criterion) {
    let mut group = c.benchmark_group("dbuf");
    group.throughput(Throughput::Elements(1));

    for readers in [1usize, 8, 32] {
        let table: Arc<DoublyBuffered<u64>> = Arc::new(DoublyBuffered::new());
        let idle = IdleReaders::spawn(&table, readers);

        group.bench_function(format!("modify ({readers} idle readers)"), |b| {
            b.iter(|| {
                table.modify(|v| {
                    *v = black_box(v.wrapping_add(1));
                    1
                })
            });
        });

        drop(idle);
    }

    group.finish();
}

/// A closure reporting "no change" returns before publication and drain.
fn bench_modify_early_exit(c: &mut Criterion) {
    let table: DoublyBuffered<u64> = DoublyBuffered::new();

    let mut group = c.benchmark_group("dbuf");
    group.throughput(Throughput::Elements(1));

    group.bench_function("modify (early exit)", |b| {
        b.iter(|| {
            table.modify(|v| {
                black_box(*v);
                0
            })
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_modify_no_readers,
    bench_modify_with_idle_readers,
    bench_modify_early_exit,
);
criterion_main!(benches);
