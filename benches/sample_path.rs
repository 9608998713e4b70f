//! Criterion benchmarks for the per-sample hot path.
//!
//! Everything here runs once per acquisition cycle (filtering) or once per logged
//! sample (CSV formatting and writing), so it has to stay far below the shortest
//! integration window (NPLC 0.02 at 50 Hz is 400 µs).
//!
//! Run with: cargo bench --bench sample_path

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rust_dmm::data::filter::HannFilter;
use rust_dmm::data::log_store::DayLogStore;
use rust_dmm::data::sample::Sample;

fn hann_filter_process(c: &mut Criterion) {
    let mut group = c.benchmark_group("hann_filter");

    // Tap counts for NPLC 100, 1 and 0.1.
    for taps in [2usize, 25, 250] {
        let mut filter = HannFilter::new(taps, 12.0);
        let mut input = 12.0;
        group.bench_with_input(BenchmarkId::new("process", taps), &taps, |b, _| {
            b.iter(|| {
                input += 1e-6;
                black_box(filter.process(black_box(input)))
            });
        });
    }

    group.finish();
}

fn sample_record(c: &mut Criterion) {
    let sample = Sample {
        number: 1,
        initiate_timestamp: 1_462_060_800.123456,
        voltage: 12.000123456,
        current: 0.500012345,
        power: 6.000209876,
        energy: 12345.678901234,
        ..Sample::default()
    };

    c.bench_function("sample_to_record", |b| {
        b.iter(|| black_box(black_box(&sample).to_record()))
    });
}

fn log_store_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("log_store");
    let batch_size = 64u64;
    group.throughput(Throughput::Elements(batch_size));

    let temp_dir = tempfile::tempdir().unwrap();
    let mut store = DayLogStore::new(temp_dir.path()).unwrap();
    let mut timestamp = 1_462_060_800.0;

    group.bench_function("write_batch_and_flush", |b| {
        b.iter(|| {
            for _ in 0..batch_size {
                timestamp += 0.02;
                let sample = Sample {
                    initiate_timestamp: timestamp,
                    ..Sample::default()
                };
                store.write(&sample).unwrap();
            }
            store.flush().unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, hann_filter_process, sample_record, log_store_write);
criterion_main!(benches);
