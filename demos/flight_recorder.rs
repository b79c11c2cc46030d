//! Flight-recorder walkthrough on synthetic data.
//!
//! Writes several laps of reports into a small ring so the producer
//! overwrites old data, and shows the offset tracker keeping the most recent
//! stretch of records addressable.
//!
//! Run with: cargo run --example flight_recorder

use perf_ring::FakeRing;

use oa_telemetry::oa::fake::SyntheticReports;
use oa_telemetry::oa::metrics;
use oa_telemetry::{DevInfo, PerfStream, SampleMode, StreamConfig};

fn main() {
    tracing_subscriber::fmt().init();

    let devinfo = DevInfo::broadwell();
    let mut fake = FakeRing::new(4096);
    let ring = fake.reader();

    let mut config = StreamConfig::new(devinfo.clone(), metrics::render_basic_bdw());
    config.mode = SampleMode::FlightRecorder;
    let mut stream = PerfStream::with_reader(ring, config);

    let mut reports = SyntheticReports::new(&devinfo, 1_000_000);
    for lap in 0..3 {
        for _ in 0..15 {
            fake.push_sample(&reports.next_report());
            stream.poll().expect("poll failed");
        }
        let tracker = stream.tracker().unwrap();
        println!(
            "lap {}: tracked={} saturated={}",
            lap,
            tracker.len(),
            tracker.is_saturated()
        );
    }

    let tracker = stream.tracker().unwrap();
    let offsets: Vec<u64> = tracker.offsets().collect();
    println!("surviving record offsets: {offsets:?}");
}
