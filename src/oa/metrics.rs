//! Device information and counter metadata.
//!
//! On real hardware these tables are generated per GPU generation from the
//! vendor XML metric descriptions; this module carries hand-written
//! render-basic sets for the two supported report layouts. Each counter is a
//! read function over the accumulated delta slots plus presentation metadata.
//!
//! `DevInfo` is passed explicitly wherever generation- or topology-dependent
//! decisions are made; there is no process-wide device state.

use serde::Serialize;
use smallvec::SmallVec;

use crate::oa::format;

/// Static description of the device being profiled.
#[derive(Debug, Clone)]
pub struct DevInfo {
    /// Hardware generation (7 = Haswell, 8 = Broadwell, ...).
    pub gen: u32,
    /// OA timestamp ticks per second (12.5 MHz ⇔ 80ns ticks).
    pub timestamp_frequency: u64,
    pub n_eus: u64,
    pub eu_threads_count: u64,
    pub gt_max_freq: u64,
}

impl DevInfo {
    pub fn haswell() -> Self {
        DevInfo {
            gen: 7,
            timestamp_frequency: 12_500_000,
            n_eus: 20,
            eu_threads_count: 140,
            gt_max_freq: 1_100_000_000,
        }
    }

    pub fn broadwell() -> Self {
        DevInfo {
            gen: 8,
            timestamp_frequency: 12_500_000,
            n_eus: 24,
            eu_threads_count: 168,
            gt_max_freq: 1_150_000_000,
        }
    }
}

/// A computed counter value in its natural width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CounterValue {
    U64(u64),
    F32(f32),
    F64(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterUnits {
    Ns,
    Cycles,
    Percent,
    Number,
}

/// One counter of a metric set: how to compute it from the delta slots and
/// how to present it.
pub struct CounterSpec {
    pub name: &'static str,
    pub symbol: &'static str,
    pub desc: &'static str,
    pub units: CounterUnits,
    pub read: fn(&DevInfo, &[u64]) -> CounterValue,
    pub max: fn(&DevInfo) -> f64,
}

/// A named group of counters tied to one OA report layout.
pub struct MetricSet {
    pub name: &'static str,
    pub symbol: &'static str,
    /// Kernel OA format id; resolved via [`format::ReportFormat::from_raw`].
    pub oa_format: u32,
    pub report_size: usize,
    pub counters: &'static [CounterSpec],
}

/// One rendered counter inside a window report.
#[derive(Debug, Clone, Serialize)]
pub struct CounterSample {
    pub symbol: &'static str,
    pub value: CounterValue,
    pub max: f64,
}

impl MetricSet {
    /// Render every counter of the set from a window's accumulated deltas.
    pub fn sample_counters(
        &self,
        devinfo: &DevInfo,
        deltas: &[u64],
    ) -> SmallVec<[CounterSample; 16]> {
        self.counters
            .iter()
            .map(|spec| CounterSample {
                symbol: spec.symbol,
                value: (spec.read)(devinfo, deltas),
                max: (spec.max)(devinfo),
            })
            .collect()
    }
}

fn scale_ticks_ns(devinfo: &DevInfo, ticks: u64) -> u64 {
    (ticks as u128 * 1_000_000_000 / devinfo.timestamp_frequency as u128) as u64
}

fn ratio_percent(numerator: u64, denominator: u64) -> CounterValue {
    CounterValue::F32((100.0 * numerator as f64 / denominator.max(1) as f64) as f32)
}

fn max_percent(_: &DevInfo) -> f64 {
    100.0
}

fn max_unbounded(_: &DevInfo) -> f64 {
    0.0
}

// ── Haswell render basic (A45_B8_C8) ─────────────────────────────────────────
//
// Delta slots: [0] timestamp ticks, [1..46] A0-A44, [46..54] B0-B7,
// [54..62] C0-C7.

fn hsw_gpu_time(devinfo: &DevInfo, deltas: &[u64]) -> CounterValue {
    CounterValue::U64(scale_ticks_ns(devinfo, deltas[0]))
}

fn hsw_eu_active(_: &DevInfo, deltas: &[u64]) -> CounterValue {
    ratio_percent(deltas[1 + 8], deltas[1])
}

fn hsw_eu_stall(_: &DevInfo, deltas: &[u64]) -> CounterValue {
    ratio_percent(deltas[1 + 9], deltas[1])
}

fn hsw_sampler_busy(_: &DevInfo, deltas: &[u64]) -> CounterValue {
    ratio_percent(deltas[1 + 22], deltas[1])
}

static HSW_RENDER_BASIC_COUNTERS: [CounterSpec; 4] = [
    CounterSpec {
        name: "GPU Time Elapsed",
        symbol: "gpu_time",
        desc: "Time elapsed on the GPU during the measurement",
        units: CounterUnits::Ns,
        read: hsw_gpu_time,
        max: max_unbounded,
    },
    CounterSpec {
        name: "EU Active",
        symbol: "eu_active",
        desc: "Percentage of time the Execution Units were actively processing",
        units: CounterUnits::Percent,
        read: hsw_eu_active,
        max: max_percent,
    },
    CounterSpec {
        name: "EU Stall",
        symbol: "eu_stall",
        desc: "Percentage of time the Execution Units were stalled",
        units: CounterUnits::Percent,
        read: hsw_eu_stall,
        max: max_percent,
    },
    CounterSpec {
        name: "Sampler Busy",
        symbol: "sampler_busy",
        desc: "Percentage of time the texture samplers were busy",
        units: CounterUnits::Percent,
        read: hsw_sampler_busy,
        max: max_percent,
    },
];

static HSW_RENDER_BASIC: MetricSet = MetricSet {
    name: "Render Metrics Basic (Haswell)",
    symbol: "render_basic_hsw",
    oa_format: format::OA_FORMAT_A45_B8_C8,
    report_size: format::REPORT_SIZE,
    counters: &HSW_RENDER_BASIC_COUNTERS,
};

pub fn render_basic_hsw() -> &'static MetricSet {
    &HSW_RENDER_BASIC
}

// ── Broadwell render basic (A32u40_A4u32_B8_C8) ──────────────────────────────
//
// Delta slots: [0] timestamp ticks, [1] GPU clock ticks, [2..34] A0-A31
// (40-bit), [34..38] A32-A35, [38..46] B0-B7, [46..54] C0-C7.

fn bdw_gpu_time(devinfo: &DevInfo, deltas: &[u64]) -> CounterValue {
    CounterValue::U64(scale_ticks_ns(devinfo, deltas[0]))
}

fn bdw_gpu_core_clocks(_: &DevInfo, deltas: &[u64]) -> CounterValue {
    CounterValue::U64(deltas[1])
}

fn bdw_gpu_busy(_: &DevInfo, deltas: &[u64]) -> CounterValue {
    ratio_percent(deltas[2], deltas[1])
}

fn bdw_eu_active(devinfo: &DevInfo, deltas: &[u64]) -> CounterValue {
    ratio_percent(deltas[2 + 7], deltas[1] * devinfo.n_eus)
}

fn bdw_eu_stall(devinfo: &DevInfo, deltas: &[u64]) -> CounterValue {
    ratio_percent(deltas[2 + 8], deltas[1] * devinfo.n_eus)
}

static BDW_RENDER_BASIC_COUNTERS: [CounterSpec; 5] = [
    CounterSpec {
        name: "GPU Time Elapsed",
        symbol: "gpu_time",
        desc: "Time elapsed on the GPU during the measurement",
        units: CounterUnits::Ns,
        read: bdw_gpu_time,
        max: max_unbounded,
    },
    CounterSpec {
        name: "GPU Core Clocks",
        symbol: "gpu_core_clocks",
        desc: "Clock ticks elapsed on the GPU core",
        units: CounterUnits::Cycles,
        read: bdw_gpu_core_clocks,
        max: max_unbounded,
    },
    CounterSpec {
        name: "GPU Busy",
        symbol: "gpu_busy",
        desc: "Percentage of time the GPU had work queued",
        units: CounterUnits::Percent,
        read: bdw_gpu_busy,
        max: max_percent,
    },
    CounterSpec {
        name: "EU Active",
        symbol: "eu_active",
        desc: "Percentage of time the Execution Units were actively processing",
        units: CounterUnits::Percent,
        read: bdw_eu_active,
        max: max_percent,
    },
    CounterSpec {
        name: "EU Stall",
        symbol: "eu_stall",
        desc: "Percentage of time the Execution Units were stalled",
        units: CounterUnits::Percent,
        read: bdw_eu_stall,
        max: max_percent,
    },
];

static BDW_RENDER_BASIC: MetricSet = MetricSet {
    name: "Render Metrics Basic (Broadwell)",
    symbol: "render_basic_bdw",
    oa_format: format::OA_FORMAT_A32U40_A4U32_B8_C8,
    report_size: format::REPORT_SIZE,
    counters: &BDW_RENDER_BASIC_COUNTERS,
};

pub fn render_basic_bdw() -> &'static MetricSet {
    &BDW_RENDER_BASIC
}
