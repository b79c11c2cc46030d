//! Synthetic OA report generation.
//!
//! Produces well-formed A32u40_A4u32_B8_C8 reports with advancing timestamps
//! and plausible counter progressions, for exercising the full ingestion path
//! on machines without the hardware (and for the demo binaries). The counter
//! model matches a GPU that is busy on every EU: the 40-bit A counters
//! advance by `clocks * n_eus` and the B/C counters by `clocks * 2`.

use crate::oa::format::{self, REPORT_SIZE};
use crate::oa::metrics::DevInfo;

pub struct SyntheticReports {
    devinfo: DevInfo,
    period_ns: u64,
    timestamp: u32,
    clocks: u32,
    ctx_id: u32,
}

impl SyntheticReports {
    /// Reports spaced `period_ns` apart in device time.
    pub fn new(devinfo: &DevInfo, period_ns: u64) -> Self {
        SyntheticReports {
            devinfo: devinfo.clone(),
            period_ns,
            timestamp: 0,
            clocks: 0,
            ctx_id: 1,
        }
    }

    pub fn with_context(mut self, ctx_id: u32) -> Self {
        self.ctx_id = ctx_id;
        self
    }

    fn ctx_valid_bit(&self) -> u32 {
        if self.devinfo.gen == 8 {
            1 << 25
        } else {
            1 << 16
        }
    }

    fn write_dword(report: &mut [u8], index: usize, value: u32) {
        report[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn render(&self, reason: u32, ctx_valid: bool) -> [u8; REPORT_SIZE] {
        let mut report = [0u8; REPORT_SIZE];
        let mut dword0 = reason << format::REASON_SHIFT;
        if ctx_valid {
            dword0 |= self.ctx_valid_bit();
        }
        Self::write_dword(&mut report, 0, dword0);
        Self::write_dword(&mut report, 1, self.timestamp);
        Self::write_dword(&mut report, 2, if ctx_valid { self.ctx_id } else { 0 });
        Self::write_dword(&mut report, 3, self.clocks);

        let busy = self.clocks as u64 * self.devinfo.n_eus;
        let low = busy as u32;
        let high = ((busy >> 32) & 0xff) as u8;
        for i in 0..32 {
            Self::write_dword(&mut report, 4 + i, low);
            report[160 + i] = high;
        }
        for i in 0..4 {
            Self::write_dword(&mut report, 36 + i, low);
        }
        let aux = self.clocks.wrapping_mul(2);
        for i in 0..16 {
            Self::write_dword(&mut report, 48 + i, aux);
        }
        report
    }

    fn advance(&mut self) {
        let ticks = self.period_ns * self.devinfo.timestamp_frequency / 1_000_000_000;
        self.timestamp = self.timestamp.wrapping_add(ticks as u32);
        self.clocks = self.clocks.wrapping_add((self.period_ns / 2) as u32);
    }

    /// The next periodic timer report for the configured context.
    pub fn next_report(&mut self) -> [u8; REPORT_SIZE] {
        self.advance();
        self.render(format::REASON_TIMER, true)
    }

    /// A report marking the hardware switching away from any context.
    pub fn switch_away_report(&mut self) -> [u8; REPORT_SIZE] {
        self.advance();
        self.render(format::REASON_CTX_SWITCH, false)
    }
}
