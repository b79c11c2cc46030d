//! Delta accumulation between successive OA report snapshots.
//!
//! Hardware counters are free-running and wrap; given two snapshots the true
//! forward movement of each counter is recovered with width-aware wrapping
//! subtraction (32-bit words, or 40-bit values split into a low word and a
//! packed high byte) and summed into 64-bit accumulators across a reporting
//! window. In per-context mode, pairs straddling a context switch are either
//! flagged (a switch away from the filtered context) or rejected (a delta
//! that would mix unrelated work).

use std::ptr;

use thiserror::Error;
use tracing::debug;

use crate::oa::clock::OaClock;
use crate::oa::format::{self, ReportFormat, INVALID_CTX_ID};
use crate::oa::metrics::{DevInfo, MetricSet};

/// Delta slots sized for the widest supported layout.
pub const MAX_OA_COUNTERS: usize = 62;

#[derive(Debug, Error)]
pub enum AccumulateError {
    /// The metric set names a report layout this code cannot decode. This is
    /// a configuration mismatch, not a runtime data condition.
    #[error("unsupported OA report format id {0}")]
    UnsupportedFormat(u32),
}

/// 32-bit counter delta; the wrapping subtraction matches the counter's own
/// wrapping, so the result is exact as long as at most one wrap occurred.
fn delta_u32(value0: u32, value1: u32) -> u64 {
    value1.wrapping_sub(value0) as u64
}

/// 40-bit counter delta, mod 2^40.
fn delta_u40(value0: u64, value1: u64) -> u64 {
    if value0 > value1 {
        (1u64 << 40) + value1 - value0
    } else {
        value1 - value0
    }
}

/// Running state for one reporting window.
///
/// Windows are closed by the caller: when it decides a window is complete
/// (elapsed time, or a context-switch flag) it reads the state out and calls
/// [`clear`](OaAccumulator::clear). The wrapping clock deliberately survives
/// `clear` — hardware tick continuity is independent of window boundaries.
pub struct OaAccumulator {
    devinfo: DevInfo,
    oa_format: u32,
    clock: OaClock,
    deltas: [u64; MAX_OA_COUNTERS],
    first_timestamp_ns: u64,
    last_timestamp_ns: u64,
    last_ctx_id: u32,
    ctx_switch_to_seen: bool,
    ctx_switch_from_seen: bool,
    spurious_reports: u64,
}

impl OaAccumulator {
    pub fn new(devinfo: &DevInfo, metric_set: &MetricSet) -> Self {
        OaAccumulator {
            devinfo: devinfo.clone(),
            oa_format: metric_set.oa_format,
            clock: OaClock::new(devinfo.timestamp_frequency),
            deltas: [0; MAX_OA_COUNTERS],
            first_timestamp_ns: 0,
            last_timestamp_ns: 0,
            last_ctx_id: INVALID_CTX_ID,
            ctx_switch_to_seen: false,
            ctx_switch_from_seen: false,
            spurious_reports: 0,
        }
    }

    /// Fold the deltas between two successive reports into the window.
    ///
    /// Returns `Ok(true)` when the pair was accumulated, `Ok(false)` when it
    /// was skipped (zero timestamp, or an invalid context pairing) — skipped
    /// pairs are an expected runtime condition, not an error. `Err` only on
    /// an unrecognized format id.
    pub fn accumulate(
        &mut self,
        report0: &[u8],
        report1: &[u8],
        per_ctx_mode: bool,
    ) -> Result<bool, AccumulateError> {
        let layout = ReportFormat::from_raw(self.oa_format)
            .ok_or(AccumulateError::UnsupportedFormat(self.oa_format))?;
        assert!(
            !ptr::eq(report0.as_ptr(), report1.as_ptr()),
            "delta accumulation needs two distinct report buffers"
        );

        let ts0 = format::timestamp(report0);
        let ts1 = format::timestamp(report1);
        // A timestamp of zero is technically valid, but much more likely
        // indicates a broken report.
        if ts0 == 0 || ts1 == 0 {
            self.spurious_reports += 1;
            debug!("spurious report with timestamp of zero");
            return Ok(false);
        }

        if !self.clock.is_initialized() {
            self.clock.init(ts0);
            self.last_ctx_id = format::ctx_id(&self.devinfo, report0);
        }

        // Transient: only this call's own evaluation may leave it set.
        self.ctx_switch_from_seen = false;

        if per_ctx_mode {
            let ctx0 = format::ctx_id(&self.devinfo, report0);
            let ctx1 = format::ctx_id(&self.devinfo, report1);

            // A fresh window opening on an unexpected context means we missed
            // the boundary; the delta spans work we were not watching.
            if self.first_timestamp_ns == 0 && ctx0 != self.last_ctx_id {
                if ctx0 == INVALID_CTX_ID {
                    self.last_ctx_id = ctx1;
                    return Ok(false);
                }
                self.ctx_switch_to_seen = true;
            }

            if ctx0 != ctx1 {
                if ctx1 == INVALID_CTX_ID {
                    // Switched away. report1 snapshots the counters at the
                    // moment of the switch, so this pair is still ours; data
                    // after it is not.
                    self.ctx_switch_from_seen = true;
                } else if ctx0 == INVALID_CTX_ID {
                    // Work resumed after a switch-away.
                    self.ctx_switch_to_seen = true;
                } else {
                    // Two real contexts with no switch-away in between.
                    self.last_ctx_id = ctx1;
                    return Ok(false);
                }
            }
            self.last_ctx_id = ctx1;
        } else {
            self.last_ctx_id = format::ctx_id(&self.devinfo, report1);
        }

        match layout {
            ReportFormat::A45B8C8 => {
                self.deltas[0] += delta_u32(ts0, ts1);
                // 45x A + 8x B + 8x C, all 32-bit, from dword 3 on.
                for i in 0..61 {
                    self.deltas[1 + i] +=
                        delta_u32(format::dword(report0, 3 + i), format::dword(report1, 3 + i));
                }
            }
            ReportFormat::A32u40A4u32B8C8 => {
                self.deltas[0] += delta_u32(ts0, ts1);
                self.deltas[1] +=
                    delta_u32(format::clock_ticks(report0), format::clock_ticks(report1));
                // 32x 40-bit A counters...
                for i in 0..32 {
                    self.deltas[2 + i] += delta_u40(
                        format::counter_40(report0, i),
                        format::counter_40(report1, i),
                    );
                }
                // 4x 32-bit A counters...
                for i in 0..4 {
                    self.deltas[34 + i] += delta_u32(
                        format::dword(report0, 36 + i),
                        format::dword(report1, 36 + i),
                    );
                }
                // 8x 32-bit B counters + 8x 32-bit C counters...
                for i in 0..16 {
                    self.deltas[38 + i] += delta_u32(
                        format::dword(report0, 48 + i),
                        format::dword(report1, 48 + i),
                    );
                }
            }
        }

        self.clock.advance(ts0);
        if self.first_timestamp_ns == 0 {
            self.first_timestamp_ns = self.clock.now();
        }
        self.clock.advance(ts1);
        self.last_timestamp_ns = self.clock.now();

        Ok(true)
    }

    /// Start a fresh reporting window. Idempotent. The wrapping clock and the
    /// last seen context id carry over.
    pub fn clear(&mut self) {
        self.deltas = [0; MAX_OA_COUNTERS];
        self.first_timestamp_ns = 0;
        self.last_timestamp_ns = 0;
        self.ctx_switch_to_seen = false;
        self.ctx_switch_from_seen = false;
    }

    /// Full reset for a brand-new stream: also forgets the clock epoch and
    /// context tracking.
    pub fn reset(&mut self) {
        self.clear();
        self.clock.reset();
        self.last_ctx_id = INVALID_CTX_ID;
        self.spurious_reports = 0;
    }

    pub fn deltas(&self) -> &[u64] {
        &self.deltas
    }

    pub fn first_timestamp_ns(&self) -> u64 {
        self.first_timestamp_ns
    }

    pub fn last_timestamp_ns(&self) -> u64 {
        self.last_timestamp_ns
    }

    /// Window span so far.
    pub fn elapsed_ns(&self) -> u64 {
        self.last_timestamp_ns
            .saturating_sub(self.first_timestamp_ns)
    }

    pub fn ctx_switch_to_seen(&self) -> bool {
        self.ctx_switch_to_seen
    }

    pub fn ctx_switch_from_seen(&self) -> bool {
        self.ctx_switch_from_seen
    }

    pub fn last_ctx_id(&self) -> u32 {
        self.last_ctx_id
    }

    /// Reports skipped for carrying a zero timestamp.
    pub fn spurious_reports(&self) -> u64 {
        self.spurious_reports
    }
}
