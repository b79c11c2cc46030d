//! Accumulation hot-path benchmark.
//!
//! One `accumulate` call per hardware report pair is the per-sample cost of
//! the whole pipeline; at high sampling frequencies (report periods well
//! under a millisecond) this is the loop that has to stay cheap.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use oa_telemetry::oa::fake::SyntheticReports;
use oa_telemetry::oa::metrics;
use oa_telemetry::{DevInfo, OaAccumulator};

fn bench_accumulate(c: &mut Criterion) {
    let devinfo = DevInfo::broadwell();
    let mut reports = SyntheticReports::new(&devinfo, 100_000);
    let report0 = reports.next_report();
    let report1 = reports.next_report();

    let mut acc = OaAccumulator::new(&devinfo, metrics::render_basic_bdw());
    c.bench_function("accumulate_a32u40", |b| {
        b.iter(|| {
            acc.accumulate(black_box(&report0), black_box(&report1), false)
                .unwrap()
        })
    });

    let mut acc = OaAccumulator::new(&devinfo, metrics::render_basic_bdw());
    c.bench_function("accumulate_a32u40_per_ctx", |b| {
        b.iter(|| {
            acc.accumulate(black_box(&report0), black_box(&report1), true)
                .unwrap()
        })
    });

    let hsw = DevInfo::haswell();
    let mut report0 = [0u8; 256];
    let mut report1 = [0u8; 256];
    report0[4..8].copy_from_slice(&1000u32.to_le_bytes());
    report1[4..8].copy_from_slice(&1080u32.to_le_bytes());
    let mut acc = OaAccumulator::new(&hsw, metrics::render_basic_hsw());
    c.bench_function("accumulate_a45", |b| {
        b.iter(|| {
            acc.accumulate(black_box(&report0), black_box(&report1), false)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_accumulate);
criterion_main!(benches);
