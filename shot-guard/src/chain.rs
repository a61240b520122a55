use std::sync::Arc;

use crate::callback::CallbackRegistry;
use crate::cluster::ClusterTokenClient;
use crate::config::GuardConfig;
use crate::degrade::DegradeSlot;
use crate::flow::FlowSlot;
use crate::node::NodeRegistry;
use crate::node::StatisticNode;
use crate::rules::RuleManager;
use crate::selector::ClusterBuilderSlot;
use crate::selector::NodeSelectorSlot;
use crate::slot::ProcessorSlot;
use crate::slot::SlotChain;
use crate::statistic::StatisticSlot;
use crate::system::SystemSlot;
use crate::time::TimeSource;

/// Engine services available to a chain builder.
#[derive(Clone)]
pub struct ChainEnv {
    pub config: GuardConfig,
    pub time: TimeSource,
    pub nodes: Arc<NodeRegistry>,
    pub rules: Arc<RuleManager>,
    pub callbacks: Arc<CallbackRegistry>,
    /// Node aggregating every inbound call of the process.
    pub entry_node: Arc<StatisticNode>,
    pub cluster_client: Arc<dyn ClusterTokenClient>,
}

impl std::fmt::Debug for ChainEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainEnv")
            .field("config", &self.config)
            .field("rules", &self.rules)
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}

/// Assembles the chain of a resource.
///
/// Called once per resource, off the hot path. An engine has exactly one
/// builder.
pub trait SlotChainBuilder: Send + Sync {
    fn build(&self, env: &ChainEnv) -> SlotChain;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// The built-in stage order: node selection, statistics, custom stages,
/// then system, flow and degrade checks.
///
/// Statistics wraps every stage after it, so it observes their decision.
#[derive(Debug, Default)]
pub struct DefaultSlotChainBuilder {
    custom: Vec<Arc<dyn ProcessorSlot>>,
}

impl DefaultSlotChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stage that runs after statistics and before the rule checks.
    pub fn with_slot(mut self, slot: Arc<dyn ProcessorSlot>) -> Self {
        self.custom.push(slot);
        self
    }
}

impl SlotChainBuilder for DefaultSlotChainBuilder {
    fn build(&self, env: &ChainEnv) -> SlotChain {
        let mut chain = SlotChain::new();
        chain.add_last(Arc::new(NodeSelectorSlot::new(Arc::clone(&env.nodes))));
        chain.add_last(Arc::new(ClusterBuilderSlot::new(Arc::clone(&env.nodes))));
        chain.add_last(Arc::new(StatisticSlot::new(
            Arc::clone(&env.entry_node),
            Arc::clone(&env.callbacks),
            env.time.clone(),
            env.config.statistic_max_rt,
        )));
        for slot in &self.custom {
            chain.add_last(Arc::clone(slot));
        }
        chain.add_last(Arc::new(SystemSlot::new(
            Arc::clone(&env.rules),
            Arc::clone(&env.entry_node),
        )));
        chain.add_last(Arc::new(FlowSlot::new(
            Arc::clone(&env.rules),
            Arc::clone(&env.cluster_client),
        )));
        chain.add_last(Arc::new(DegradeSlot::new(Arc::clone(&env.rules), env.time.clone())));
        chain
    }

    fn name(&self) -> &str {
        "default"
    }
}
