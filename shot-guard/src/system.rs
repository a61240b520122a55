use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::entry::EntryState;
use crate::error::BlockError;
use crate::error::GuardError;
use crate::node::StatisticNode;
use crate::resource::EntryType;
use crate::rules::RuleManager;
use crate::slot::Next;
use crate::slot::ProcessorSlot;

/// Limits on the whole inbound traffic of the process.
///
/// Every field is optional. When several rules are installed each limit is
/// the smallest value any rule sets.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SystemRule {
    pub qps: Option<f64>,
    pub max_thread: Option<u64>,
    /// Average response time in milliseconds.
    pub avg_rt: Option<f64>,
}

impl SystemRule {
    pub fn with_qps(mut self, qps: f64) -> Self {
        self.qps = Some(qps);
        self
    }

    pub fn with_max_thread(mut self, max_thread: u64) -> Self {
        self.max_thread = Some(max_thread);
        self
    }

    pub fn with_avg_rt(mut self, avg_rt: f64) -> Self {
        self.avg_rt = Some(avg_rt);
        self
    }

    pub fn is_valid(&self) -> bool {
        let non_negative = |v: Option<f64>| v.is_none_or(|v| v.is_finite() && v >= 0.0);
        (self.qps.is_some() || self.max_thread.is_some() || self.avg_rt.is_some())
            && non_negative(self.qps)
            && non_negative(self.avg_rt)
    }
}

/// The effective limits after merging every installed system rule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SystemThresholds {
    pub qps: Option<f64>,
    pub max_thread: Option<u64>,
    pub avg_rt: Option<f64>,
}

impl SystemThresholds {
    pub fn merge<'a>(rules: impl IntoIterator<Item = &'a SystemRule>) -> Self {
        rules.into_iter().fold(Self::default(), |acc, rule| Self {
            qps: min_of(acc.qps, rule.qps, f64::min),
            max_thread: min_of(acc.max_thread, rule.max_thread, u64::min),
            avg_rt: min_of(acc.avg_rt, rule.avg_rt, f64::min),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.qps.is_none() && self.max_thread.is_none() && self.avg_rt.is_none()
    }

    /// The first limit `node` would exceed by admitting `acquire_count`
    /// more calls.
    pub fn check(&self, node: &StatisticNode, acquire_count: u32) -> Option<SystemLimit> {
        if let Some(qps) = self.qps
            && node.pass_qps() + f64::from(acquire_count) > qps
        {
            return Some(SystemLimit::Qps(qps));
        }
        if let Some(max_thread) = self.max_thread
            && node.cur_thread_num() + 1 > max_thread
        {
            return Some(SystemLimit::Thread(max_thread));
        }
        if let Some(avg_rt) = self.avg_rt
            && node.avg_rt() > avg_rt
        {
            return Some(SystemLimit::AvgRt(avg_rt));
        }
        None
    }
}

fn min_of<T>(a: Option<T>, b: Option<T>, min: impl Fn(T, T) -> T) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(min(a, b)),
        (a, b) => a.or(b),
    }
}

/// The system limit that rejected a call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SystemLimit {
    Qps(f64),
    Thread(u64),
    AvgRt(f64),
}

impl fmt::Display for SystemLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Qps(qps) => write!(f, "inbound qps limit {qps}"),
            Self::Thread(max) => write!(f, "inbound thread limit {max}"),
            Self::AvgRt(rt) => write!(f, "inbound average rt limit {rt}ms"),
        }
    }
}

/// Check stage protecting the process as a whole. Only inbound resources
/// are checked, against the global inbound node.
#[derive(Debug)]
pub struct SystemSlot {
    rules: Arc<RuleManager>,
    entry_node: Arc<StatisticNode>,
}

impl SystemSlot {
    pub fn new(rules: Arc<RuleManager>, entry_node: Arc<StatisticNode>) -> Self {
        Self { rules, entry_node }
    }
}

impl ProcessorSlot for SystemSlot {
    fn entry(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) -> Result<(), GuardError> {
        if entry.resource().entry_type() == EntryType::In {
            let thresholds = self.rules.system_thresholds();
            if let Some(limit) = thresholds.check(&self.entry_node, entry.acquire_count()) {
                return Err(BlockError::System {
                    resource: entry.resource().name().to_string(),
                    limit,
                }
                .into());
            }
        }
        next.fire_entry(ctx, entry)
    }
}
