//! Monotonic time reconstruction from the OA unit's 32-bit tick counter.
//!
//! OA reports carry a 32-bit timestamp counting in device ticks (80ns on the
//! generations handled here), so it wraps roughly every six minutes. This
//! clock accumulates those ticks into a 64-bit nanosecond timestamp, relying
//! on wrapping u32 subtraction to recover the forward delta across a wrap.
//!
//! Contract: `advance` must be called at intervals shorter than one wrap
//! period (2^32 ticks, ~343s at 80ns). If more than one wrap elapses between
//! calls the missed laps are silently lost — a documented limitation of the
//! 32-bit source counter, not something this type can detect.

#[derive(Debug, Clone)]
pub struct OaClock {
    ticks_per_second: u64,
    start_ns: u64,
    timestamp_ns: u64,
    last_raw: u32,
    initialized: bool,
}

impl OaClock {
    pub fn new(ticks_per_second: u64) -> Self {
        assert!(ticks_per_second > 0, "device timestamp frequency is zero");
        OaClock {
            ticks_per_second,
            start_ns: 0,
            timestamp_ns: 0,
            last_raw: 0,
            initialized: false,
        }
    }

    /// Scale a tick count to nanoseconds at this device's frequency.
    pub fn scale_ns(&self, ticks: u64) -> u64 {
        (ticks as u128 * 1_000_000_000 / self.ticks_per_second as u128) as u64
    }

    /// Seed the clock from the first observed raw timestamp. Must happen
    /// once per epoch, before any `advance`.
    pub fn init(&mut self, raw: u32) {
        self.start_ns = self.scale_ns(raw as u64);
        self.timestamp_ns = self.start_ns;
        self.last_raw = raw;
        self.initialized = true;
    }

    /// Fold a newer raw timestamp into the clock. The wrapping subtraction
    /// yields the correct forward delta even when `raw` has numerically
    /// wrapped below `last_raw`.
    pub fn advance(&mut self, raw: u32) {
        debug_assert!(self.initialized, "clock advanced before init");
        let delta = raw.wrapping_sub(self.last_raw);
        self.timestamp_ns += self.scale_ns(delta as u64);
        self.last_raw = raw;
    }

    /// Current monotonic timestamp in nanoseconds.
    pub fn now(&self) -> u64 {
        self.timestamp_ns
    }

    /// Timestamp the clock was seeded with.
    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Forget the epoch entirely. Only for starting a brand-new stream; a
    /// reporting-window boundary must NOT reset the clock, since the hardware
    /// tick counter keeps running across windows.
    pub fn reset(&mut self) {
        self.start_ns = 0;
        self.timestamp_ns = 0;
        self.last_raw = 0;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 80ns per tick.
    const HZ_12_5_MHZ: u64 = 12_500_000;

    #[test]
    fn test_scaling_80ns_ticks() {
        let clock = OaClock::new(HZ_12_5_MHZ);
        assert_eq!(clock.scale_ns(1), 80);
        assert_eq!(clock.scale_ns(1000), 80_000);
    }

    #[test]
    fn test_advance_accumulates() {
        let mut clock = OaClock::new(HZ_12_5_MHZ);
        clock.init(1000);
        assert_eq!(clock.now(), 80_000);
        clock.advance(1080);
        assert_eq!(clock.now(), 86_400);
        clock.advance(1080); // no progress, no change
        assert_eq!(clock.now(), 86_400);
    }

    #[test]
    fn test_wraparound_recovers_forward_delta() {
        let mut clock = OaClock::new(HZ_12_5_MHZ);
        clock.init(u32::MAX - 99);
        let before = clock.now();
        // 100 ticks to the wrap boundary, 50 past it.
        clock.advance(50);
        assert_eq!(clock.now() - before, 150 * 80);
    }

    #[test]
    fn test_monotonic_across_many_wraps() {
        let mut clock = OaClock::new(HZ_12_5_MHZ);
        clock.init(0);
        let step = u32::MAX / 3; // well under half a wrap per call
        let mut raw = 0u32;
        let mut prev = clock.now();
        for _ in 0..16 {
            raw = raw.wrapping_add(step);
            clock.advance(raw);
            assert!(clock.now() > prev);
            prev = clock.now();
        }
    }

    #[test]
    fn test_reset_forgets_epoch() {
        let mut clock = OaClock::new(HZ_12_5_MHZ);
        clock.init(500);
        clock.advance(600);
        clock.reset();
        assert!(!clock.is_initialized());
        assert_eq!(clock.now(), 0);
    }
}
