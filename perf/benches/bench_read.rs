use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use dbuf_core::DoublyBuffered;
use dbuf_perf::build_ring;
use relay_core::HashRing;

fn bench_read_uncontended(c: &mut Criterion) {
    let table: DoublyBuffered<u64> = DoublyBuffered::new();
    table.modify(|v| {
        *v = 42;
        1
    });

    let mut group = c.benchmark_group("dbuf");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read (uncontended)", |b| {
        b.iter(|| {
            let g = table.read().expect("read failed");
            black_box(*g);
        });
    });

    group.finish();
}

fn bench_read_with_tls(c: &mut Criterion) {
    let table: DoublyBuffered<u64, u64> = DoublyBuffered::new();
    table.modify(|v| {
        *v = 42;
        1
    });

    let mut group = c.benchmark_group("dbuf");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read + tls bump", |b| {
        b.iter(|| {
            let mut g = table.read().expect("read failed");
            *g.tls() += 1;
            black_box(*g);
        });
    });

    group.finish();
}

fn bench_read_under_live_writer(c: &mut Criterion) {
    let table: Arc<DoublyBuffered<u64>> = Arc::new(DoublyBuffered::new());
    table.modify(|v| {
        *v = 1;
        1
    });

    let stop = Arc::new(AtomicBool::new(false));
    let writer = {
        let table = Arc::clone(&table);
        let stop = Arc::clone(&stop);
        std::thread::spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                table.modify(|v| {
                    *v += 1;
                    1
                });
                std::thread::sleep(std::time::Duration::from_micros(100));
            }
        })
    };

    let mut group = c.benchmark_group("dbuf");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read (live writer)", |b| {
        b.iter(|| {
            let g = table.read().expect("read failed");
            black_box(*g);
        });
    });

    group.finish();
    stop.store(true, Ordering::Relaxed);
    writer.join().expect("writer panicked");
}

fn bench_pick_through_table(c: &mut Criterion) {
    let table: DoublyBuffered<HashRing> = DoublyBuffered::new();
    let populated = build_ring(8, 32);
    let points = populated.len();
    table.modify(move |ring| {
        *ring = build_ring(8, 32);
        points
    });

    let mut group = c.benchmark_group("dbuf");
    group.throughput(Throughput::Elements(1));

    group.bench_function("read + ring pick", |b| {
        let mut key_no = 0u64;
        b.iter(|| {
            let g = table.read().expect("read failed");
            let key = format!("user-{}", key_no % 1024);
            key_no += 1;
            black_box(g.pick(&key).map(|backend| backend.id));
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_read_uncontended,
    bench_read_with_tls,
    bench_read_under_live_writer,
    bench_pick_through_table,
);
criterion_main!(benches);
