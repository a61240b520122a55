use std::sync::Arc;
use std::sync::OnceLock;

use dashmap::DashMap;

use crate::context::Context;
use crate::entry::EntryState;
use crate::error::GuardError;
use crate::node::ClusterNode;
use crate::node::NodeRegistry;
use crate::node::StatisticNode;
use crate::slot::Next;
use crate::slot::ProcessorSlot;

/// Resolves the node of the chain's resource within the entry's context.
///
/// A chain serves exactly one resource, so keying by context name is
/// enough. Nodes are created on first use and never removed.
#[derive(Debug)]
pub struct NodeSelectorSlot {
    nodes: DashMap<String, Arc<StatisticNode>>,
    registry: Arc<NodeRegistry>,
}

impl NodeSelectorSlot {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            nodes: DashMap::new(),
            registry,
        }
    }

    fn node_for(&self, ctx: &Context) -> Arc<StatisticNode> {
        if let Some(node) = self.nodes.get(ctx.name()) {
            return Arc::clone(node.value());
        }
        let node = self
            .nodes
            .entry(ctx.name().to_string())
            .or_insert_with(|| Arc::new(self.registry.new_node()));
        Arc::clone(node.value())
    }
}

impl ProcessorSlot for NodeSelectorSlot {
    fn entry(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) -> Result<(), GuardError> {
        entry.set_node(self.node_for(ctx));
        next.fire_entry(ctx, entry)
    }
}

/// Attaches the resource wide node and, when the context carries an
/// origin, the per-origin node.
#[derive(Debug)]
pub struct ClusterBuilderSlot {
    cluster: OnceLock<Arc<ClusterNode>>,
    registry: Arc<NodeRegistry>,
}

impl ClusterBuilderSlot {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            cluster: OnceLock::new(),
            registry,
        }
    }
}

impl ProcessorSlot for ClusterBuilderSlot {
    fn entry(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) -> Result<(), GuardError> {
        let cluster = self
            .cluster
            .get_or_init(|| self.registry.cluster_node(entry.resource().name()));
        if !ctx.origin().is_empty() {
            entry.set_origin_node(cluster.origin_node(ctx.origin()));
        }
        entry.set_cluster_node(Arc::clone(cluster));
        next.fire_entry(ctx, entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GuardConfig;
    use crate::context::ContextKind;
    use crate::resource::ResourceWrapper;
    use crate::slot::SlotChain;
    use crate::time::TimeSource;

    fn chain(registry: &Arc<NodeRegistry>) -> SlotChain {
        let mut chain = SlotChain::new();
        chain.add_last(Arc::new(NodeSelectorSlot::new(Arc::clone(registry))));
        chain.add_last(Arc::new(ClusterBuilderSlot::new(Arc::clone(registry))));
        chain
    }

    fn state() -> EntryState {
        EntryState::new(ResourceWrapper::from("orders"), 1, Vec::new(), 0, None)
    }

    #[test]
    fn each_context_gets_its_own_node() {
        let registry = Arc::new(NodeRegistry::new(GuardConfig::default(), TimeSource::new()));
        let chain = chain(&registry);
        let web = Context::new("web", "", ContextKind::Explicit);
        let rpc = Context::new("rpc", "", ContextKind::Explicit);

        let (a, b, c) = (state(), state(), state());
        chain.entry(&web, &a).unwrap();
        chain.entry(&web, &b).unwrap();
        chain.entry(&rpc, &c).unwrap();

        assert!(Arc::ptr_eq(a.node().unwrap(), b.node().unwrap()));
        assert!(!Arc::ptr_eq(a.node().unwrap(), c.node().unwrap()));
        assert!(Arc::ptr_eq(a.cluster_node().unwrap(), c.cluster_node().unwrap()));
        assert!(Arc::ptr_eq(
            a.cluster_node().unwrap(),
            &registry.cluster_node("orders")
        ));
    }

    #[test]
    fn origin_node_only_with_an_origin() {
        let registry = Arc::new(NodeRegistry::new(GuardConfig::default(), TimeSource::new()));
        let chain = chain(&registry);

        let anonymous = state();
        chain
            .entry(&Context::new("web", "", ContextKind::Explicit), &anonymous)
            .unwrap();
        assert!(anonymous.origin_node().is_none());

        let known = state();
        chain
            .entry(&Context::new("web", "app-a", ContextKind::Explicit), &known)
            .unwrap();
        let origin = known.origin_node().unwrap();
        assert!(Arc::ptr_eq(
            origin,
            &registry.cluster_node("orders").origin_node("app-a")
        ));
    }
}
