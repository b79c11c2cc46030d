//! Overview-mode walkthrough on synthetic data.
//!
//! Feeds generated Broadwell OA reports through a synthetic ring into a
//! stream and prints each completed window as JSON. No GPU required.
//!
//! Run with: cargo run --example overview

use perf_ring::FakeRing;

use oa_telemetry::oa::fake::SyntheticReports;
use oa_telemetry::oa::metrics;
use oa_telemetry::{DevInfo, PerfStream, StreamConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let devinfo = DevInfo::broadwell();
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    let mut config = StreamConfig::new(devinfo.clone(), metrics::render_basic_bdw());
    config.aggregation_period_ns = 10_000_000; // 10ms windows
    let mut stream = PerfStream::with_reader(ring, config);
    stream.set_on_window(|window| {
        println!("{}", serde_json::to_string(window).unwrap());
    });

    // One report every 2ms of device time, polled in batches of five.
    let mut reports = SyntheticReports::new(&devinfo, 2_000_000).with_context(1);
    for _ in 0..20 {
        for _ in 0..5 {
            fake.push_sample(&reports.next_report());
        }
        stream.poll().expect("poll failed");
    }

    let stats = stream.close();
    eprintln!(
        "samples={} pairs={} windows={}",
        stats.samples, stats.pairs_accumulated, stats.windows
    );
}
