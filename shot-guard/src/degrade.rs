use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::context::Context;
use crate::entry::EntryState;
use crate::error::BlockError;
use crate::error::GuardError;
use crate::node::StatisticNode;
use crate::rules::RuleManager;
use crate::slot::Next;
use crate::slot::ProcessorSlot;
use crate::time::TimeSource;

/// Consecutive slow checks tolerated before the RT strategy trips, and the
/// minimum QPS the exception ratio strategy needs.
const MAX_EXCEED: u32 = 5;

/// Strategy a degrade rule trips on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DegradeGrade {
    /// Average response time in milliseconds.
    #[default]
    AvgRt,
    /// Exceptions per successful call.
    ExceptionRatio,
    /// Exceptions over the minute window.
    ExceptionCount,
}

/// Runtime state of one rule's breaker.
#[derive(Debug, Default)]
struct BreakerState {
    cut: AtomicBool,
    open_until_ms: AtomicU64,
    violations: AtomicU32,
    lock: Mutex<()>,
}

/// A circuit breaker on one resource.
///
/// The breaker is closed until the strategy trips, then rejects every call
/// for `time_window_sec` seconds without evaluating anything. The first
/// check after the window closes it again and evaluates afresh.
///
/// Clones share the breaker state; installing a rule set creates fresh
/// breakers.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DegradeRule {
    pub resource: String,
    pub grade: DegradeGrade,
    /// Threshold of the strategy: milliseconds, a ratio or a count.
    pub count: f64,
    pub time_window_sec: u64,
    #[cfg_attr(feature = "serde", serde(skip))]
    breaker: Arc<BreakerState>,
}

impl DegradeRule {
    pub fn new(resource: impl Into<String>, grade: DegradeGrade, count: f64, time_window_sec: u64) -> Self {
        Self {
            resource: resource.into(),
            grade,
            count,
            time_window_sec,
            breaker: Arc::default(),
        }
    }

    pub fn is_valid(&self) -> bool {
        let count_ok = match self.grade {
            DegradeGrade::ExceptionRatio => (0.0..=1.0).contains(&self.count),
            DegradeGrade::AvgRt | DegradeGrade::ExceptionCount => {
                self.count.is_finite() && self.count >= 0.0
            }
        };
        !self.resource.is_empty() && count_ok && self.time_window_sec > 0
    }

    /// The same rule with a closed breaker of its own.
    pub(crate) fn with_fresh_breaker(self) -> Self {
        Self {
            breaker: Arc::default(),
            ..self
        }
    }

    /// Whether the breaker rejects calls at `now_ms`.
    pub fn is_open(&self, now_ms: u64) -> bool {
        self.breaker.cut.load(Ordering::Acquire)
            && now_ms < self.breaker.open_until_ms.load(Ordering::Acquire)
    }

    /// Decides whether a call may proceed, tripping the breaker if the
    /// strategy says so. `node` is the resource wide node.
    pub fn pass_check(&self, node: &StatisticNode, now_ms: u64) -> bool {
        let breaker = &self.breaker;
        if breaker.cut.load(Ordering::Acquire) {
            if now_ms < breaker.open_until_ms.load(Ordering::Acquire) {
                return false;
            }
            self.close(now_ms);
        }

        let pass = match self.grade {
            DegradeGrade::AvgRt => {
                if node.avg_rt() < self.count {
                    breaker.violations.store(0, Ordering::Release);
                    true
                } else {
                    breaker.violations.fetch_add(1, Ordering::AcqRel) + 1 < MAX_EXCEED
                }
            }
            DegradeGrade::ExceptionRatio => {
                let exception = node.exception_qps();
                let success = node.success_qps();
                if node.total_qps() < f64::from(MAX_EXCEED) {
                    true
                } else if success <= exception && exception < f64::from(MAX_EXCEED) {
                    true
                } else {
                    let ratio = if success == 0.0 {
                        f64::INFINITY
                    } else {
                        exception / success
                    };
                    ratio < self.count
                }
            }
            DegradeGrade::ExceptionCount => (node.total_exception() as f64) < self.count,
        };
        if !pass {
            self.open(now_ms);
        }
        pass
    }

    fn open(&self, now_ms: u64) {
        let breaker = &self.breaker;
        let _guard = breaker.lock.lock();
        if !breaker.cut.load(Ordering::Acquire) {
            let until = now_ms.saturating_add(self.time_window_sec.saturating_mul(1000));
            breaker.open_until_ms.store(until, Ordering::Release);
            breaker.cut.store(true, Ordering::Release);
            tracing::warn!(
                resource = %self.resource,
                grade = ?self.grade,
                threshold = self.count,
                time_window_sec = self.time_window_sec,
                "circuit breaker opened"
            );
        }
    }

    fn close(&self, now_ms: u64) {
        let breaker = &self.breaker;
        let _guard = breaker.lock.lock();
        if breaker.cut.load(Ordering::Acquire)
            && now_ms >= breaker.open_until_ms.load(Ordering::Acquire)
        {
            breaker.violations.store(0, Ordering::Release);
            breaker.cut.store(false, Ordering::Release);
            tracing::info!(resource = %self.resource, grade = ?self.grade, "circuit breaker closed");
        }
    }
}

impl PartialEq for DegradeRule {
    fn eq(&self, other: &Self) -> bool {
        self.resource == other.resource
            && self.grade == other.grade
            && self.count == other.count
            && self.time_window_sec == other.time_window_sec
    }
}

/// Check stage applying the degrade rules of the chain's resource.
#[derive(Debug)]
pub struct DegradeSlot {
    rules: Arc<RuleManager>,
    time: TimeSource,
}

impl DegradeSlot {
    pub fn new(rules: Arc<RuleManager>, time: TimeSource) -> Self {
        Self { rules, time }
    }
}

impl ProcessorSlot for DegradeSlot {
    fn entry(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) -> Result<(), GuardError> {
        if let (Some(rules), Some(node)) = (
            self.rules.degrade_rules(entry.resource().name()),
            entry.cluster_node(),
        ) {
            let now = self.time.now_ms();
            for rule in rules.iter() {
                if !rule.pass_check(node, now) {
                    return Err(BlockError::Degrade {
                        resource: entry.resource().name().to_string(),
                        rule: rule.clone(),
                    }
                    .into());
                }
            }
        }
        next.fire_entry(ctx, entry)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use quanta::Clock;

    use super::*;
    use crate::config::GuardConfig;

    fn mock_node() -> (StatisticNode, TimeSource, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        let time = TimeSource::with_clock(clock);
        (StatisticNode::new(&GuardConfig::default(), time.clone()), time, mock)
    }

    #[test]
    fn rt_breaker_tolerates_four_slow_checks() {
        let (node, time, mock) = mock_node();
        let rule = DegradeRule::new("orders", DegradeGrade::AvgRt, 10.0, 2);
        node.add_rt(50, 1);

        for _ in 0..4 {
            assert!(rule.pass_check(&node, time.now_ms()));
        }
        assert!(!rule.pass_check(&node, time.now_ms()));
        assert!(rule.is_open(time.now_ms()));

        // Rejected without looking at RT
        node.add_rt(1, 1000);
        assert!(!rule.pass_check(&node, time.now_ms()));

        mock.increment(Duration::from_secs(2));
        assert!(rule.pass_check(&node, time.now_ms()));
        assert!(!rule.is_open(time.now_ms()));
    }

    #[test]
    fn a_fast_check_resets_the_violation_count() {
        let (node, time, mock) = mock_node();
        let rule = DegradeRule::new("orders", DegradeGrade::AvgRt, 10.0, 1);
        node.add_rt(50, 1);
        for _ in 0..4 {
            assert!(rule.pass_check(&node, time.now_ms()));
        }

        mock.increment(Duration::from_secs(1));
        node.add_rt(5, 1);
        assert!(rule.pass_check(&node, time.now_ms()));

        mock.increment(Duration::from_secs(1));
        node.add_rt(50, 1);
        for _ in 0..4 {
            assert!(rule.pass_check(&node, time.now_ms()));
        }
    }

    #[test]
    fn rt_breaker_passes_without_evidence() {
        let (node, time, _mock) = mock_node();
        let rule = DegradeRule::new("orders", DegradeGrade::AvgRt, 10.0, 1);
        node.add_pass(100);
        for _ in 0..10 {
            assert!(rule.pass_check(&node, time.now_ms()));
        }
    }

    #[test]
    fn ratio_breaker_needs_a_sample_floor() {
        let (node, time, _mock) = mock_node();
        let rule = DegradeRule::new("orders", DegradeGrade::ExceptionRatio, 0.5, 1);
        node.add_pass(4);
        node.add_exception(4);
        assert!(rule.pass_check(&node, time.now_ms()));

        node.add_pass(6);
        node.add_rt(1, 4);
        node.add_exception(2);
        // 6 exceptions over 4 successes
        assert!(!rule.pass_check(&node, time.now_ms()));
    }

    #[test]
    fn ratio_breaker_ignores_low_evidence() {
        let (node, time, _mock) = mock_node();
        let rule = DegradeRule::new("orders", DegradeGrade::ExceptionRatio, 0.5, 1);
        node.add_pass(10);
        node.add_rt(1, 1);
        node.add_exception(4);
        assert!(rule.pass_check(&node, time.now_ms()));

        node.add_rt(1, 9);
        node.add_exception(1);
        // 5 exceptions over 10 successes
        assert!(!rule.pass_check(&node, time.now_ms()));
    }

    #[test]
    fn ratio_below_threshold_passes() {
        let (node, time, _mock) = mock_node();
        let rule = DegradeRule::new("orders", DegradeGrade::ExceptionRatio, 0.5, 1);
        node.add_pass(20);
        node.add_rt(1, 14);
        node.add_exception(6);
        assert!(rule.pass_check(&node, time.now_ms()));
    }

    #[test]
    fn count_breaker_uses_minute_totals() {
        let (node, time, mock) = mock_node();
        let rule = DegradeRule::new("orders", DegradeGrade::ExceptionCount, 3.0, 5);
        node.add_exception(2);
        assert!(rule.pass_check(&node, time.now_ms()));

        mock.increment(Duration::from_secs(10));
        node.add_exception(1);
        assert!(!rule.pass_check(&node, time.now_ms()));

        mock.increment(Duration::from_secs(5));
        // Still three exceptions in the minute window, trips again
        assert!(!rule.pass_check(&node, time.now_ms()));

        mock.increment(Duration::from_secs(60));
        assert!(rule.pass_check(&node, time.now_ms()));
    }

    #[test]
    fn clones_share_the_breaker() {
        let (node, time, _mock) = mock_node();
        let rule = DegradeRule::new("orders", DegradeGrade::ExceptionCount, 1.0, 10);
        let copy = rule.clone();
        node.add_exception(1);
        assert!(!rule.pass_check(&node, time.now_ms()));
        assert!(copy.is_open(time.now_ms()));
        assert_eq!(rule, copy);
    }

    #[test]
    fn validity() {
        assert!(DegradeRule::new("a", DegradeGrade::ExceptionRatio, 0.5, 1).is_valid());
        assert!(!DegradeRule::new("a", DegradeGrade::ExceptionRatio, 1.5, 1).is_valid());
        assert!(!DegradeRule::new("a", DegradeGrade::AvgRt, 10.0, 0).is_valid());
        assert!(!DegradeRule::new("", DegradeGrade::AvgRt, 10.0, 1).is_valid());
    }
}
