use std::time::Duration;

/// Upper bound on a single recorded response time, in milliseconds.
pub const DEFAULT_STATISTIC_MAX_RT: u64 = 4900;
/// Resources beyond this count are admitted without a chain.
pub const DEFAULT_MAX_SLOT_CHAINS: usize = 6000;
/// Distinct explicit context names beyond this count are not tracked.
pub const DEFAULT_MAX_CONTEXT_NAMES: usize = 2000;

/// Engine wide settings.
///
/// Every field has a production default; use the `with_*` methods to
/// override individual values.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GuardConfig {
    /// Number of buckets in the second-level window.
    pub sample_count: u32,
    /// Span of the second-level window in milliseconds.
    pub interval_ms: u64,
    /// Number of buckets in the minute-level window.
    pub minute_sample_count: u32,
    /// Span of the minute-level window in milliseconds.
    pub minute_interval_ms: u64,
    /// Response times above this value are clamped to it.
    pub statistic_max_rt: u64,
    pub max_slot_chains: usize,
    pub max_context_names: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sample_count: 2,
            interval_ms: 1000,
            minute_sample_count: 60,
            minute_interval_ms: 60_000,
            statistic_max_rt: DEFAULT_STATISTIC_MAX_RT,
            max_slot_chains: DEFAULT_MAX_SLOT_CHAINS,
            max_context_names: DEFAULT_MAX_CONTEXT_NAMES,
        }
    }
}

impl GuardConfig {
    /// Set the second-level window: `sample_count` buckets over `interval`.
    ///
    /// The interval is rounded down to a whole number of milliseconds per
    /// bucket, and buckets are at least one millisecond long.
    pub fn with_window(mut self, sample_count: u32, interval: Duration) -> Self {
        self.sample_count = sample_count.max(1);
        self.interval_ms = aligned_interval(self.sample_count, interval);
        self
    }

    /// Set the minute-level window used for totals.
    pub fn with_minute_window(mut self, sample_count: u32, interval: Duration) -> Self {
        self.minute_sample_count = sample_count.max(1);
        self.minute_interval_ms = aligned_interval(self.minute_sample_count, interval);
        self
    }

    /// Set the response time drop valve.
    pub fn with_statistic_max_rt(mut self, max_rt: Duration) -> Self {
        self.statistic_max_rt = max_rt.as_millis() as u64;
        self
    }

    pub fn with_max_slot_chains(mut self, max: usize) -> Self {
        self.max_slot_chains = max;
        self
    }

    pub fn with_max_context_names(mut self, max: usize) -> Self {
        self.max_context_names = max;
        self
    }

    /// The same settings with both windows split into whole, non-empty
    /// buckets. Fields set directly or deserialized may not be.
    pub fn normalized(self) -> Self {
        let (sample_count, interval_ms) = (self.sample_count, self.interval_ms);
        let (minute_sample_count, minute_interval_ms) = (self.minute_sample_count, self.minute_interval_ms);
        let config = self
            .with_window(sample_count, Duration::from_millis(interval_ms))
            .with_minute_window(minute_sample_count, Duration::from_millis(minute_interval_ms));
        if config.sample_count != sample_count || config.interval_ms != interval_ms {
            tracing::warn!(
                sample_count,
                interval_ms,
                aligned_sample_count = config.sample_count,
                aligned_interval_ms = config.interval_ms,
                "second window adjusted to whole buckets"
            );
        }
        if config.minute_sample_count != minute_sample_count || config.minute_interval_ms != minute_interval_ms {
            tracing::warn!(
                minute_sample_count,
                minute_interval_ms,
                aligned_sample_count = config.minute_sample_count,
                aligned_interval_ms = config.minute_interval_ms,
                "minute window adjusted to whole buckets"
            );
        }
        config
    }

    pub fn window_length_ms(&self) -> u64 {
        self.interval_ms / u64::from(self.sample_count)
    }

    pub fn minute_window_length_ms(&self) -> u64 {
        self.minute_interval_ms / u64::from(self.minute_sample_count)
    }
}

fn aligned_interval(sample_count: u32, interval: Duration) -> u64 {
    let samples = u64::from(sample_count);
    let length = (interval.as_millis() as u64 / samples).max(1);
    length * samples
}
