use quanta::Clock;
use quanta::Instant;

/// Millisecond time source shared by every window, node and rule of an engine.
///
/// Timestamps are offsets from an anchor taken when the source is created, so
/// they start near zero and only move forward. Cloning shares the clock, which
/// lets tests drive every component from a single `Clock::mock()`.
#[derive(Clone, Debug)]
pub struct TimeSource {
    clock: Clock,
    anchor: Instant,
}

impl TimeSource {
    pub fn new() -> Self {
        Self::with_clock(Clock::new())
    }

    pub fn with_clock(clock: Clock) -> Self {
        let anchor = clock.now();
        Self { clock, anchor }
    }

    /// Milliseconds elapsed since the anchor.
    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_millis() as u64
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::new()
    }
}
