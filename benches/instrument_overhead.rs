/// Instrument Overhead Benchmarks
///
/// Measures the cost of the pieces inside the timing loop: clock reads,
/// histogram accumulation and a full measured iteration. Compare these
/// against the calibrated read costs printed in a run's title.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jitterscope::calibration::empty_loop;
use jitterscope::{
    Calibration, CalibrationConfig, Clock, Histogram, JitterMeter, MeasurementRun, SystemClock,
    Timebase,
};
use std::time::Duration;

fn bench_clock_reads(c: &mut Criterion) {
    let clock = SystemClock::new();
    let mut group = c.benchmark_group("clock_read");
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("monotonic_ns", |b| {
        b.iter(|| black_box(clock.monotonic_ns()));
    });

    if clock.has_cycle_counter() {
        group.bench_function("cycles", |b| {
            b.iter(|| black_box(clock.cycles()));
        });
    }

    group.finish();
}

fn bench_accumulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("histogram");
    let samples: Vec<u64> = (0..10_000u64).map(|i| (i * 7919) % 12_000).collect();
    group.throughput(Throughput::Elements(samples.len() as u64));

    group.bench_function("accumulate_10k", |b| {
        let mut h = Histogram::with_buckets(10, 800).unwrap();
        b.iter(|| {
            for &s in &samples {
                h.accumulate(black_box(s));
            }
        });
    });

    group.bench_function("percentiles", |b| {
        let mut h = Histogram::with_buckets(10, 800).unwrap();
        for &s in &samples {
            h.accumulate(s);
        }
        b.iter(|| {
            for p in jitterscope::histogram::STANDARD_PERCENTILES {
                black_box(h.percentile(p).unwrap());
            }
        });
    });

    group.finish();
}

fn bench_measured_iteration(c: &mut Criterion) {
    let clock = SystemClock::new();
    let calibration = Calibration::calibrated(
        &clock,
        &CalibrationConfig {
            passes: 1,
            ..CalibrationConfig::quick()
        },
    )
    .unwrap();

    let mut group = c.benchmark_group("measured_iteration");
    group.sample_size(20);

    for timebase in [Timebase::MonotonicClock, Timebase::CycleCounter] {
        if timebase == Timebase::CycleCounter && !clock.has_cycle_counter() {
            continue;
        }
        let run = MeasurementRun::new(0, 1_000, 0, timebase);
        group.throughput(Throughput::Elements(run.measured_count));
        group.bench_with_input(
            BenchmarkId::new("null_loop_1000", timebase),
            &run,
            |b, run| {
                let mut meter = JitterMeter::new(10)
                    .unwrap()
                    .with_calibration(calibration.clone());
                b.iter(|| {
                    meter.init_histogram(800).unwrap();
                    meter.run_fn(run, || empty_loop(100)).unwrap()
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_clock_reads,
    bench_accumulate,
    bench_measured_iteration
);
criterion_main!(benches);
