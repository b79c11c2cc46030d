//! # oa-telemetry
//!
//! Ingestion and accumulation of Intel GPU Observation Architecture (OA)
//! performance counters. The kernel samples the OA unit into a shared ring
//! buffer; this crate consumes that ring (via [`perf_ring`]), pairs
//! successive counter snapshots, accumulates wrap-corrected deltas into
//! reporting windows, and renders them through per-generation metric tables.
//!
//! ## Quick start
//!
//! ```no_run
//! use oa_telemetry::{DevInfo, PerfStream, StreamConfig};
//! use oa_telemetry::oa::metrics;
//!
//! # let perf_fd: std::os::unix::io::RawFd = -1;
//! let config = StreamConfig::new(DevInfo::broadwell(), metrics::render_basic_bdw());
//! let mut stream = PerfStream::open(perf_fd, 16, config)?;
//! stream.set_on_window(|window| {
//!     println!(
//!         "{} .. {} ns: {:?}",
//!         window.first_timestamp_ns, window.last_timestamp_ns, window.counters
//!     );
//! });
//!
//! // Whenever the host event loop says data may be available:
//! stream.poll()?;
//! # Ok::<(), oa_telemetry::StreamError>(())
//! ```
//!
//! The OA timestamp is a 32-bit 80ns-tick counter that wraps about every six
//! minutes; poll more often than that or the reconstructed clock silently
//! loses laps. Everything here runs on the caller's thread — the only
//! concurrency is the kernel producer behind the ring buffer, handled inside
//! `perf_ring` with acquire/release cursor ordering.

pub mod driver;
pub mod oa;

pub use oa::accumulator::{AccumulateError, OaAccumulator};
pub use oa::clock::OaClock;
pub use oa::format::{ReportFormat, INVALID_CTX_ID};
pub use oa::metrics::{CounterValue, DevInfo, MetricSet};
pub use oa::stream::{
    PerfStream, SampleMode, StreamConfig, StreamError, StreamStats, WindowReason, WindowReport,
};
