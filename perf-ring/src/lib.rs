//! # perf-ring
//!
//! Consumer-side handling of kernel-shared perf ring buffers: a mapped
//! power-of-two circular buffer the kernel writes variable-length records
//! into, with `data_head`/`data_tail` cursors in a shared header page.
//!
//! Two consumption disciplines are provided:
//!
//! - [`RingReader::drain`] — parse every pending record, holding the newest
//!   sample back so successive batches can be paired for delta accumulation.
//! - [`OffsetTracker::scan`] — flight-recorder mode: consume everything
//!   immediately and only remember record start offsets, tolerating the
//!   producer overwriting old data once the buffer wraps.
//!
//! All record parsing is done by explicit byte decoding at named offsets;
//! nothing reinterprets mapped memory as typed structs. The one concurrency
//! hazard — the kernel producer running asynchronously to this process — is
//! handled with acquire/release fences around the cursor accesses, never
//! locks.

pub mod fake;
pub mod ring_buffer;
pub mod sys;
pub mod tracker;

pub use fake::FakeRing;
pub use ring_buffer::{DrainSummary, Record, RecordKind, RingError, RingReader};
pub use tracker::{OffsetTracker, ScanSummary};
