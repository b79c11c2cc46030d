//! Full-path stream tests: synthetic producer → ring drain → pairing →
//! accumulation → window reporting, plus lifecycle and flight-recorder mode.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use perf_ring::FakeRing;

use oa_telemetry::oa::fake::SyntheticReports;
use oa_telemetry::oa::metrics;
use oa_telemetry::oa::stream::TraceBuffer;
use oa_telemetry::{
    driver, DevInfo, PerfStream, SampleMode, StreamConfig, WindowReason, WindowReport,
};

fn overview_config(aggregation_period_ns: u64) -> StreamConfig {
    let mut config = StreamConfig::new(DevInfo::broadwell(), metrics::render_basic_bdw());
    config.aggregation_period_ns = aggregation_period_ns;
    config
}

fn collect_windows(stream: &mut PerfStream) -> Arc<Mutex<Vec<WindowReport>>> {
    let windows = Arc::new(Mutex::new(Vec::new()));
    let sink = windows.clone();
    stream.set_on_window(move |window| sink.lock().unwrap().push(window.clone()));
    windows
}

#[test]
fn windows_fire_once_per_aggregation_period() {
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    // Reports 1ms apart, windows every 5ms.
    let mut reports = SyntheticReports::new(&DevInfo::broadwell(), 1_000_000).with_context(1);
    let mut stream = PerfStream::with_reader(ring, overview_config(5_000_000));
    let windows = collect_windows(&mut stream);

    for _ in 0..21 {
        fake.push_sample(&reports.next_report());
    }
    stream.poll().unwrap();

    let windows = windows.lock().unwrap();
    // 20 pairs of 1ms each; a window closes on the pair that pushes the
    // span past 5ms, i.e. every 6th pair.
    assert_eq!(windows.len(), 3);
    for window in windows.iter() {
        assert_eq!(window.reason, WindowReason::Period);
        assert!(window.last_timestamp_ns > window.first_timestamp_ns);
        let gpu_time = &window.counters[0];
        assert_eq!(gpu_time.symbol, "gpu_time");
        assert_eq!(
            gpu_time.value,
            metrics::CounterValue::U64(window.last_timestamp_ns - window.first_timestamp_ns)
        );
        // The synthetic counter model keeps every EU active.
        let eu_active = &window.counters[3];
        assert_eq!(eu_active.symbol, "eu_active");
        assert_eq!(eu_active.value, metrics::CounterValue::F32(100.0));
    }

    let stats = stream.stats();
    assert_eq!(stats.samples, 21);
    assert_eq!(stats.pairs_accumulated, 20);
    assert_eq!(stats.windows, 3);
}

#[test]
fn pairing_continues_across_poll_boundaries() {
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    let mut reports = SyntheticReports::new(&DevInfo::broadwell(), 1_000_000);
    let mut stream = PerfStream::with_reader(ring, overview_config(u64::MAX));

    for _ in 0..3 {
        fake.push_sample(&reports.next_report());
    }
    stream.poll().unwrap();
    assert_eq!(stream.stats().pairs_accumulated, 2);

    // The newest sample was held in the ring; the first new sample pairs
    // with it, so no inter-batch delta is ever lost.
    for _ in 0..3 {
        fake.push_sample(&reports.next_report());
    }
    stream.poll().unwrap();
    assert_eq!(stream.stats().pairs_accumulated, 5);
}

#[test]
fn context_switch_closes_and_reopens_windows() {
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    let mut reports = SyntheticReports::new(&DevInfo::broadwell(), 1_000_000).with_context(5);
    let mut config = overview_config(u64::MAX);
    config.per_ctx_mode = true;
    let mut stream = PerfStream::with_reader(ring, config);
    let windows = collect_windows(&mut stream);

    fake.push_sample(&reports.next_report());
    fake.push_sample(&reports.next_report());
    fake.push_sample(&reports.switch_away_report());
    fake.push_sample(&reports.next_report());
    stream.poll().unwrap();

    let windows = windows.lock().unwrap();
    let reasons: Vec<_> = windows.iter().map(|w| w.reason).collect();
    assert_eq!(
        reasons,
        vec![WindowReason::CtxSwitchAway, WindowReason::CtxSwitchTo]
    );
}

#[test]
fn corrupt_batch_is_counted_not_fatal() {
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    let mut reports = SyntheticReports::new(&DevInfo::broadwell(), 1_000_000);
    let mut stream = PerfStream::with_reader(ring, overview_config(u64::MAX));

    fake.push_sample(&reports.next_report());
    fake.push_bogus_header(perf_ring::sys::PERF_RECORD_SAMPLE, 0);
    stream.poll().unwrap();
    assert_eq!(stream.stats().corrupted_batches, 1);

    // The stream keeps working on the next poll.
    fake.push_sample(&reports.next_report());
    fake.push_sample(&reports.next_report());
    stream.poll().unwrap();
    assert_eq!(stream.stats().corrupted_batches, 1);
    assert_eq!(stream.stats().pairs_accumulated, 1);
}

#[test]
fn lost_records_are_tallied() {
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    let mut stream = PerfStream::with_reader(ring, overview_config(u64::MAX));
    fake.push_lost(12);
    fake.push_lost(3);
    stream.poll().unwrap();
    assert_eq!(stream.stats().lost_records, 15);
}

#[test]
fn pair_callback_feeds_trace_buffer() {
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    let mut reports = SyntheticReports::new(&DevInfo::broadwell(), 1_000_000);
    let mut stream = PerfStream::with_reader(ring, overview_config(u64::MAX));

    let capture = TraceBuffer::shared(16);
    let sink = capture.clone();
    stream.set_on_pair(move |report0, report1| {
        sink.lock().unwrap().push_pair(report0, report1);
    });

    for _ in 0..4 {
        fake.push_sample(&reports.next_report());
    }
    stream.poll().unwrap();

    // Pairs overlap: 3 pairs but only 4 distinct reports captured.
    assert_eq!(capture.lock().unwrap().reports().len(), 4);
}

#[test]
fn close_hook_fires_once_with_final_stats() {
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    let mut reports = SyntheticReports::new(&DevInfo::broadwell(), 1_000_000);
    let mut stream = PerfStream::with_reader(ring, overview_config(u64::MAX));

    let closes = Arc::new(Mutex::new(Vec::new()));
    let sink = closes.clone();
    stream.set_on_close(move |stats| sink.lock().unwrap().push(stats.samples));

    fake.push_sample(&reports.next_report());
    fake.push_sample(&reports.next_report());
    stream.poll().unwrap();

    let stats = stream.close();
    assert_eq!(stats.samples, 2);
    assert_eq!(*closes.lock().unwrap(), vec![2]);
}

#[test]
fn flight_recorder_tracks_through_overwrite() {
    let mut fake = FakeRing::new(4096);
    let ring = fake.reader();

    let mut reports = SyntheticReports::new(&DevInfo::broadwell(), 1_000_000);
    let mut config = overview_config(u64::MAX);
    config.mode = SampleMode::FlightRecorder;
    let mut stream = PerfStream::with_reader(ring, config);

    // 4096 / 272 = 15 whole records fit; write two laps worth.
    for _ in 0..30 {
        fake.push_sample(&reports.next_report());
        stream.poll().unwrap();
    }

    let tracker = stream.tracker().expect("flight recorder mode");
    assert!(tracker.is_saturated());
    assert!(tracker.len() > 0 && tracker.len() <= 15);
    // The producer is never blocked: everything has been consumed.
    assert_eq!(fake.tail(), fake.head());
}

#[tokio::test(start_paused = true)]
async fn driver_polls_until_cancelled() {
    let mut fake = FakeRing::new(1 << 16);
    let ring = fake.reader();

    let mut reports = SyntheticReports::new(&DevInfo::broadwell(), 1_000_000);
    for _ in 0..5 {
        fake.push_sample(&reports.next_report());
    }

    let mut stream = PerfStream::with_reader(ring, overview_config(u64::MAX));
    let token = tokio_util::sync::CancellationToken::new();
    let canceller = token.clone();

    let drive = driver::run(&mut stream, Duration::from_millis(10), token);
    let cancel = async move {
        tokio::time::sleep(Duration::from_millis(105)).await;
        canceller.cancel();
    };
    let (result, ()) = tokio::join!(drive, cancel);
    result.unwrap();

    assert!(stream.stats().polls >= 10);
    assert_eq!(stream.stats().pairs_accumulated, 4);
}
