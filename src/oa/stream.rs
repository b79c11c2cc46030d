//! Stream orchestration: ring → record pairing → accumulation → reporting.
//!
//! A [`PerfStream`] owns one ring buffer reader and one accumulator and is
//! driven from the host event loop: on every "data may be available"
//! notification the caller invokes [`poll`](PerfStream::poll). Everything is
//! synchronous and non-blocking; the only concurrency is the kernel producer
//! behind the ring, already handled by the reader's fence discipline.
//!
//! Ownership replaces reference counting: the stream has exactly one owner,
//! `close` (or drop) releases the mapping and fires the close hook. Teardown
//! is only safe between poll cycles — callers must not drop a stream from
//! inside one of its own callbacks.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, warn};

use perf_ring::sys::SAMPLE_REPORT_OFFSET;
use perf_ring::{OffsetTracker, RingError, RingReader};

use crate::oa::accumulator::{AccumulateError, OaAccumulator};
use crate::oa::metrics::{CounterSample, DevInfo, MetricSet};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("perf ring error: {0}")]
    Ring(#[from] RingError),
    #[error(transparent)]
    Accumulate(#[from] AccumulateError),
}

/// How the stream consumes the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    /// Parse every sample and keep one rolling accumulator, reporting a
    /// window whenever the aggregation period elapses or a context switch is
    /// observed.
    Overview,
    /// Flight-recorder tracing: consume everything immediately, tracking
    /// record offsets so the most recent stretch of the buffer stays
    /// parseable even while the producer overwrites old data.
    FlightRecorder,
}

#[derive(Clone)]
pub struct StreamConfig {
    pub devinfo: DevInfo,
    pub metric_set: &'static MetricSet,
    /// Minimum window span before a period report fires.
    pub aggregation_period_ns: u64,
    /// Filter accumulation to a single hardware context, honoring
    /// switch-to/switch-away boundaries.
    pub per_ctx_mode: bool,
    pub mode: SampleMode,
}

impl StreamConfig {
    pub fn new(devinfo: DevInfo, metric_set: &'static MetricSet) -> Self {
        StreamConfig {
            devinfo,
            metric_set,
            aggregation_period_ns: 1_000_000_000,
            per_ctx_mode: false,
            mode: SampleMode::Overview,
        }
    }
}

/// Why a window was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowReason {
    Period,
    CtxSwitchTo,
    CtxSwitchAway,
}

/// One completed aggregation window, handed to the window callback.
#[derive(Debug, Clone, Serialize)]
pub struct WindowReport {
    pub first_timestamp_ns: u64,
    pub last_timestamp_ns: u64,
    pub reason: WindowReason,
    pub counters: SmallVec<[CounterSample; 16]>,
}

/// Lifetime counters for one stream, passed to the close hook.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StreamStats {
    pub polls: u64,
    pub samples: u64,
    pub pairs_accumulated: u64,
    pub pairs_skipped: u64,
    pub windows: u64,
    pub lost_records: u64,
    pub corrupted_batches: u64,
    /// Records tracked across flight-recorder scans.
    pub tracked_records: u64,
}

pub type WindowCallback = Box<dyn FnMut(&WindowReport) + Send>;
pub type PairCallback = Box<dyn FnMut(&[u8], &[u8]) + Send>;
pub type CloseCallback = Box<dyn FnOnce(&StreamStats) + Send>;

pub struct PerfStream {
    ring: RingReader,
    tracker: Option<OffsetTracker>,
    accumulator: OaAccumulator,
    config: StreamConfig,
    on_window: Option<WindowCallback>,
    on_pair: Option<PairCallback>,
    on_close: Option<CloseCallback>,
    stats: StreamStats,
    closed: bool,
}

impl PerfStream {
    /// Map the ring from a perf fd and build the stream around it. Mapping
    /// failure (resource exhaustion, bad fd) surfaces here; nothing panics.
    pub fn open(fd: RawFd, n_pages: usize, config: StreamConfig) -> Result<Self, StreamError> {
        let ring = RingReader::open(fd, n_pages)?;
        Ok(Self::with_reader(ring, config))
    }

    /// Build the stream over an existing reader (tests, synthetic input).
    pub fn with_reader(ring: RingReader, config: StreamConfig) -> Self {
        let tracker = match config.mode {
            SampleMode::FlightRecorder => {
                let record_size = (SAMPLE_REPORT_OFFSET + config.metric_set.report_size + 7) & !7;
                Some(OffsetTracker::new(ring.buffer_size(), record_size))
            }
            SampleMode::Overview => None,
        };
        let accumulator = OaAccumulator::new(&config.devinfo, config.metric_set);
        PerfStream {
            ring,
            tracker,
            accumulator,
            config,
            on_window: None,
            on_pair: None,
            on_close: None,
            stats: StreamStats::default(),
            closed: false,
        }
    }

    /// Called once per completed aggregation window.
    pub fn set_on_window(&mut self, callback: impl FnMut(&WindowReport) + Send + 'static) {
        self.on_window = Some(Box::new(callback));
    }

    /// Called for every adjacent sample pair before accumulation.
    pub fn set_on_pair(&mut self, callback: impl FnMut(&[u8], &[u8]) + Send + 'static) {
        self.on_pair = Some(Box::new(callback));
    }

    /// Called exactly once when the stream is closed or dropped.
    pub fn set_on_close(&mut self, callback: impl FnOnce(&StreamStats) + Send + 'static) {
        self.on_close = Some(Box::new(callback));
    }

    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    pub fn accumulator(&self) -> &OaAccumulator {
        &self.accumulator
    }

    pub fn tracker(&self) -> Option<&OffsetTracker> {
        self.tracker.as_ref()
    }

    /// True if unread bytes are pending in the ring.
    pub fn data_pending(&self) -> bool {
        self.ring.has_data()
    }

    /// Run one read/accumulate/flush cycle. Corrupt batches are counted,
    /// logged and skipped — they never terminate the stream.
    pub fn poll(&mut self) -> Result<(), StreamError> {
        self.stats.polls += 1;
        match self.config.mode {
            SampleMode::Overview => self.poll_overview(),
            SampleMode::FlightRecorder => self.poll_flight_recorder(),
        }
    }

    fn poll_overview(&mut self) -> Result<(), StreamError> {
        let Self {
            ring,
            accumulator,
            config,
            on_window,
            on_pair,
            stats,
            ..
        } = self;

        // The previous sample's report, copied out because the drain scratch
        // buffer only lives for one callback.
        let mut prev: SmallVec<[u8; 256]> = SmallVec::new();
        let mut accumulate_error: Option<AccumulateError> = None;

        let drained = ring.drain(|record| {
            let Some(report) = record.oa_report() else {
                return;
            };
            stats.samples += 1;
            if report.len() < config.metric_set.report_size {
                debug!(len = report.len(), "truncated report payload, skipping");
                return;
            }

            if !prev.is_empty() {
                if let Some(callback) = on_pair.as_mut() {
                    callback(&prev, report);
                }
                match accumulator.accumulate(&prev, report, config.per_ctx_mode) {
                    Ok(true) => {
                        stats.pairs_accumulated += 1;

                        let mut reason = None;
                        if accumulator.elapsed_ns() > config.aggregation_period_ns {
                            reason = Some(WindowReason::Period);
                        }
                        if accumulator.ctx_switch_to_seen() {
                            reason = Some(WindowReason::CtxSwitchTo);
                        }
                        if accumulator.ctx_switch_from_seen() {
                            reason = Some(WindowReason::CtxSwitchAway);
                        }

                        if let Some(reason) = reason {
                            let window = WindowReport {
                                first_timestamp_ns: accumulator.first_timestamp_ns(),
                                last_timestamp_ns: accumulator.last_timestamp_ns(),
                                reason,
                                counters: config
                                    .metric_set
                                    .sample_counters(&config.devinfo, accumulator.deltas()),
                            };
                            stats.windows += 1;
                            if let Some(callback) = on_window.as_mut() {
                                callback(&window);
                            }
                            accumulator.clear();
                        }
                    }
                    Ok(false) => stats.pairs_skipped += 1,
                    Err(err) => {
                        accumulate_error.get_or_insert(err);
                    }
                }
            }

            prev.clear();
            prev.extend_from_slice(report);
        });

        match drained {
            Ok(summary) => stats.lost_records += summary.lost_events,
            Err(err) => {
                stats.corrupted_batches += 1;
                warn!(error = %err, "discarded corrupt record batch");
            }
        }

        if let Some(err) = accumulate_error {
            return Err(err.into());
        }
        Ok(())
    }

    fn poll_flight_recorder(&mut self) -> Result<(), StreamError> {
        let Self {
            ring,
            tracker,
            stats,
            ..
        } = self;
        if let Some(tracker) = tracker.as_mut() {
            match tracker.scan(ring) {
                Ok(summary) => stats.tracked_records = summary.tracked as u64,
                Err(err) => {
                    stats.corrupted_batches += 1;
                    warn!(error = %err, "discarded corrupt record batch");
                }
            }
        }
        Ok(())
    }

    /// Release the stream, returning its lifetime stats. Equivalent to
    /// dropping it, but keeps the stats.
    pub fn close(mut self) -> StreamStats {
        self.finish();
        self.stats
    }

    fn finish(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!("closing perf stream");
            if let Some(callback) = self.on_close.take() {
                callback(&self.stats);
            }
        }
    }
}

impl Drop for PerfStream {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Append-only capture of raw reports flowing through the pair callback,
/// bounded by a report budget. Reports overlap between pairs, so a report
/// equal to the last stored one is not duplicated.
pub struct TraceBuffer {
    reports: Vec<Vec<u8>>,
    capacity: usize,
}

impl TraceBuffer {
    pub fn new(capacity: usize) -> Self {
        TraceBuffer {
            reports: Vec::new(),
            capacity,
        }
    }

    /// A shareable buffer ready to be moved into a pair callback.
    pub fn shared(capacity: usize) -> Arc<Mutex<Self>> {
        Arc::new(Mutex::new(Self::new(capacity)))
    }

    pub fn push_pair(&mut self, report0: &[u8], report1: &[u8]) {
        if self.is_full() {
            return;
        }
        if self.reports.last().map(Vec::as_slice) != Some(report0) {
            self.reports.push(report0.to_vec());
        }
        if !self.is_full() {
            self.reports.push(report1.to_vec());
        }
    }

    pub fn is_full(&self) -> bool {
        self.reports.len() >= self.capacity
    }

    pub fn reports(&self) -> &[Vec<u8>] {
        &self.reports
    }
}
