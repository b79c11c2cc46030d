pub mod accumulator;
pub mod clock;
pub mod fake;
pub mod format;
pub mod metrics;
pub mod stream;

pub use accumulator::{AccumulateError, OaAccumulator, MAX_OA_COUNTERS};
pub use clock::OaClock;
pub use format::{ReportFormat, INVALID_CTX_ID};
pub use metrics::{CounterSample, CounterSpec, CounterUnits, CounterValue, DevInfo, MetricSet};
pub use stream::{
    PerfStream, SampleMode, StreamConfig, StreamError, StreamStats, TraceBuffer, WindowReason,
    WindowReport,
};
