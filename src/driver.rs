//! Tokio poll-cycle driver.
//!
//! The stream itself performs no I/O multiplexing; it only needs someone to
//! call [`PerfStream::poll`] when data may be available. Hosts with their own
//! event loop should do exactly that. For everyone else this driver runs the
//! cycle on a tokio interval until cancelled.

use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::oa::stream::{PerfStream, StreamError};

/// Poll `stream` every `cadence` until `token` is cancelled.
///
/// The cadence must stay well under the OA timestamp wrap period (~343s at
/// 80ns ticks) or the accumulated clock silently loses laps; in practice
/// cadences are milliseconds.
pub async fn run(
    stream: &mut PerfStream,
    cadence: Duration,
    token: CancellationToken,
) -> Result<(), StreamError> {
    let mut ticker = time::interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            _ = ticker.tick() => stream.poll()?,
        }
    }
}
