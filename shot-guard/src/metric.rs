use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::config::DEFAULT_STATISTIC_MAX_RT;
use crate::window::Bucket;
use crate::window::LeapArray;

/// Counters kept by every [`MetricBucket`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricEvent {
    Pass,
    Block,
    Exception,
    /// Calls that completed without error.
    Success,
    /// Cumulative response time of successful calls, in milliseconds.
    Rt,
}

impl MetricEvent {
    const COUNT: usize = 5;

    fn index(self) -> usize {
        self as usize
    }
}

/// Atomic counter set of one window.
#[derive(Debug)]
pub struct MetricBucket {
    counters: [AtomicU64; MetricEvent::COUNT],
    min_rt: AtomicU64,
}

impl Default for MetricBucket {
    fn default() -> Self {
        Self {
            counters: Default::default(),
            min_rt: AtomicU64::new(DEFAULT_STATISTIC_MAX_RT),
        }
    }
}

impl Bucket for MetricBucket {
    fn reset(&self) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.min_rt.store(DEFAULT_STATISTIC_MAX_RT, Ordering::Relaxed);
    }
}

impl MetricBucket {
    #[inline]
    pub fn add(&self, event: MetricEvent, n: u64) {
        self.counters[event.index()].fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn get(&self, event: MetricEvent) -> u64 {
        self.counters[event.index()].load(Ordering::Relaxed)
    }

    /// Adds `rt` to the cumulative response time and lowers the minimum.
    pub fn add_rt(&self, rt: u64) {
        self.add(MetricEvent::Rt, rt);
        self.min_rt.fetch_min(rt, Ordering::Relaxed);
    }

    pub fn min_rt(&self) -> u64 {
        self.min_rt.load(Ordering::Relaxed)
    }
}

/// A [`LeapArray`] of [`MetricBucket`]s with aggregate reads.
///
/// Every read takes the current time and ignores expired windows.
#[derive(Debug)]
pub struct ArrayMetric {
    data: LeapArray<MetricBucket>,
}

impl ArrayMetric {
    pub fn new(sample_count: u32, interval_ms: u64) -> Self {
        Self {
            data: LeapArray::new(sample_count, interval_ms),
        }
    }

    pub fn add(&self, event: MetricEvent, n: u64, now_ms: u64) {
        self.data.current_window(now_ms).value().add(event, n);
    }

    /// Records a successful completion: one success per acquired unit and
    /// the response time.
    pub fn add_success(&self, rt: u64, count: u64, now_ms: u64) {
        let window = self.data.current_window(now_ms);
        window.value().add(MetricEvent::Success, count);
        window.value().add_rt(rt);
    }

    pub fn sum(&self, event: MetricEvent, now_ms: u64) -> u64 {
        self.data
            .list(now_ms)
            .iter()
            .map(|window| window.value().get(event))
            .sum()
    }

    /// Smallest response time seen in the live windows.
    pub fn min_rt(&self, now_ms: u64) -> u64 {
        self.data
            .list(now_ms)
            .iter()
            .map(|window| window.value().min_rt())
            .min()
            .unwrap_or(DEFAULT_STATISTIC_MAX_RT)
            .max(1)
    }

    /// Highest success count of a single live window.
    pub fn max_success_per_window(&self, now_ms: u64) -> u64 {
        self.data
            .list(now_ms)
            .iter()
            .map(|window| window.value().get(MetricEvent::Success))
            .max()
            .unwrap_or(0)
    }

    /// Counter of the window just before the current one.
    pub fn previous(&self, event: MetricEvent, now_ms: u64) -> u64 {
        self.data
            .previous_window(now_ms)
            .map_or(0, |window| window.value().get(event))
    }

    pub fn interval_sec(&self) -> f64 {
        self.data.interval_sec()
    }

    pub fn window_length_ms(&self) -> u64 {
        self.data.window_length_ms()
    }

    pub fn sample_count(&self) -> usize {
        self.data.sample_count()
    }
}
