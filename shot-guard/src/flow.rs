use std::fmt;
use std::sync::Arc;

use crate::cluster::ClusterTokenClient;
use crate::cluster::TokenResultStatus;
use crate::context::Context;
use crate::entry::EntryState;
use crate::error::BlockError;
use crate::error::GuardError;
use crate::node::StatisticNode;
use crate::rules::RuleManager;
use crate::slot::Next;
use crate::slot::ProcessorSlot;

/// `limit_app` value matching every caller, checked on the cluster node.
pub const LIMIT_APP_DEFAULT: &str = "default";
/// `limit_app` value matching callers no other rule of the resource names.
pub const LIMIT_APP_OTHER: &str = "other";

/// Metric a flow rule compares against its threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FlowGrade {
    /// Concurrent calls in flight.
    Thread,
    /// Admitted calls per second.
    #[default]
    Qps,
}

/// Cluster mode settings of a flow rule.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ClusterFlowConfig {
    /// Id of the rule on the token server.
    pub flow_id: u64,
    /// Check the local threshold when the token server cannot answer.
    pub fallback_to_local: bool,
}

/// A threshold on the traffic admitted to one resource.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowRule {
    pub resource: String,
    /// Which callers the rule applies to: [`LIMIT_APP_DEFAULT`],
    /// [`LIMIT_APP_OTHER`] or an origin name.
    pub limit_app: String,
    pub grade: FlowGrade,
    pub count: f64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub cluster: Option<ClusterFlowConfig>,
}

impl FlowRule {
    /// A QPS rule applying to every caller.
    pub fn new(resource: impl Into<String>, count: f64) -> Self {
        Self {
            resource: resource.into(),
            limit_app: LIMIT_APP_DEFAULT.to_string(),
            grade: FlowGrade::Qps,
            count,
            cluster: None,
        }
    }

    pub fn with_grade(mut self, grade: FlowGrade) -> Self {
        self.grade = grade;
        self
    }

    pub fn with_limit_app(mut self, limit_app: impl Into<String>) -> Self {
        self.limit_app = limit_app.into();
        self
    }

    /// Ask the cluster token server instead of checking locally.
    pub fn with_cluster(mut self, flow_id: u64, fallback_to_local: bool) -> Self {
        self.cluster = Some(ClusterFlowConfig {
            flow_id,
            fallback_to_local,
        });
        self
    }

    pub fn is_valid(&self) -> bool {
        !self.resource.is_empty()
            && !self.limit_app.is_empty()
            && self.count.is_finite()
            && self.count >= 0.0
    }

    pub(crate) fn controller(&self) -> DefaultController {
        DefaultController::new(self.count, self.grade)
    }
}

/// Stateless threshold comparison against live node metrics.
#[derive(Clone, Copy, Debug)]
pub struct DefaultController {
    count: f64,
    grade: FlowGrade,
}

impl DefaultController {
    pub fn new(count: f64, grade: FlowGrade) -> Self {
        Self { count, grade }
    }

    /// Admits iff the current metric plus `acquire_count` stays within the
    /// threshold.
    pub fn can_pass(&self, node: &StatisticNode, acquire_count: u32) -> bool {
        let current = match self.grade {
            FlowGrade::Thread => node.cur_thread_num() as f64,
            FlowGrade::Qps => node.pass_qps(),
        };
        current + f64::from(acquire_count) <= self.count
    }
}

/// Check stage applying the flow rules of the chain's resource.
pub struct FlowSlot {
    rules: Arc<RuleManager>,
    cluster_client: Arc<dyn ClusterTokenClient>,
}

impl FlowSlot {
    pub fn new(rules: Arc<RuleManager>, cluster_client: Arc<dyn ClusterTokenClient>) -> Self {
        Self {
            rules,
            cluster_client,
        }
    }

    fn can_pass(&self, rule: &FlowRule, rules: &[FlowRule], ctx: &Context, entry: &EntryState) -> bool {
        let count = entry.acquire_count();
        if let Some(cluster) = &rule.cluster {
            let result = self.cluster_client.request_token(cluster.flow_id, count);
            match result.status {
                TokenResultStatus::Ok => return true,
                // Checks never sleep; a grant that is not due yet is a block.
                TokenResultStatus::ShouldWait if result.wait.is_zero() => return true,
                TokenResultStatus::ShouldWait => {
                    tracing::debug!(
                        resource = %entry.resource(),
                        flow_id = cluster.flow_id,
                        wait = ?result.wait,
                        "cluster token not due yet"
                    );
                    return false;
                }
                TokenResultStatus::Blocked => return false,
                status => {
                    tracing::debug!(
                        resource = %entry.resource(),
                        flow_id = cluster.flow_id,
                        ?status,
                        "cluster token unavailable"
                    );
                    if !cluster.fallback_to_local {
                        return true;
                    }
                }
            }
        }
        match select_node(rule, rules, ctx, entry) {
            Some(node) => rule.controller().can_pass(node, count),
            None => true,
        }
    }
}

/// The node a rule is checked against for this caller, if the rule applies.
fn select_node<'a>(
    rule: &FlowRule,
    rules: &[FlowRule],
    ctx: &Context,
    entry: &'a EntryState,
) -> Option<&'a StatisticNode> {
    let origin = ctx.origin();
    match rule.limit_app.as_str() {
        LIMIT_APP_DEFAULT => entry.cluster_node().map(|node| &***node),
        LIMIT_APP_OTHER => {
            let named = rules.iter().any(|other| other.limit_app == origin);
            if origin.is_empty() || named {
                None
            } else {
                entry.origin_node().map(|node| &**node)
            }
        }
        app if app == origin => entry.origin_node().map(|node| &**node),
        _ => None,
    }
}

impl ProcessorSlot for FlowSlot {
    fn entry(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) -> Result<(), GuardError> {
        if let Some(rules) = self.rules.flow_rules(entry.resource().name()) {
            for rule in rules.iter() {
                if !self.can_pass(rule, &rules, ctx, entry) {
                    return Err(BlockError::Flow {
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

impl fmt::Debug for FlowSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowSlot")
            .field("rules", &self.rules)
            .finish_non_exhaustive()
    }
}
