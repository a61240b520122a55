use std::sync::Arc;

use crate::callback::CallbackRegistry;
use crate::context::Context;
use crate::entry::EntryError;
use crate::entry::EntryState;
use crate::error::GuardError;
use crate::node::StatisticNode;
use crate::resource::EntryType;
use crate::slot::Next;
use crate::slot::ProcessorSlot;
use crate::time::TimeSource;

/// Records the outcome of every call on each node the entry is tied to.
///
/// On entry the rest of the chain runs first so the decision of the check
/// stages is known. Inbound resources also feed the global inbound node,
/// which system protection reads.
#[derive(Debug)]
pub struct StatisticSlot {
    entry_node: Arc<StatisticNode>,
    callbacks: Arc<CallbackRegistry>,
    time: TimeSource,
    max_rt_ms: u64,
}

impl StatisticSlot {
    pub fn new(
        entry_node: Arc<StatisticNode>,
        callbacks: Arc<CallbackRegistry>,
        time: TimeSource,
        max_rt_ms: u64,
    ) -> Self {
        Self {
            entry_node,
            callbacks,
            time,
            max_rt_ms,
        }
    }

    fn each_node(&self, entry: &EntryState, mut f: impl FnMut(&StatisticNode)) {
        if let Some(node) = entry.node() {
            f(node);
        }
        if let Some(node) = entry.origin_node() {
            f(node);
        }
        if let Some(node) = entry.cluster_node() {
            f(node);
        }
        if entry.resource().entry_type() == EntryType::In {
            f(&self.entry_node);
        }
    }
}

impl ProcessorSlot for StatisticSlot {
    fn entry(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) -> Result<(), GuardError> {
        let count = entry.acquire_count();
        match next.fire_entry(ctx, entry) {
            Ok(()) => {
                self.each_node(entry, |node| {
                    node.increase_thread_num();
                    node.add_pass(count);
                });
                for (_, callback) in self.callbacks.entry_callbacks().iter() {
                    callback.on_pass(ctx, entry);
                }
                Ok(())
            }
            Err(GuardError::Blocked(block)) => {
                entry.set_error(EntryError::Blocked(block.clone()));
                self.each_node(entry, |node| node.add_block(count));
                for (_, callback) in self.callbacks.entry_callbacks().iter() {
                    callback.on_blocked(&block, ctx, entry);
                }
                Err(GuardError::Blocked(block))
            }
            Err(err) => {
                entry.set_error(EntryError::Slot(err.to_string()));
                self.each_node(entry, |node| node.add_exception(count));
                Err(err)
            }
        }
    }

    fn exit(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) {
        let count = entry.acquire_count();
        let completed = !entry.has_error();
        let rt = self
            .time
            .now_ms()
            .saturating_sub(entry.create_time_ms())
            .min(self.max_rt_ms);
        self.each_node(entry, |node| {
            if completed {
                node.add_rt(rt, count);
            }
            node.decrease_thread_num();
        });
        for (_, callback) in self.callbacks.exit_callbacks().iter() {
            callback.on_exit(ctx, entry);
        }
        next.fire_exit(ctx, entry);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use quanta::Clock;

    use super::*;
    use crate::callback::EntryCallback;
    use crate::callback::ExitCallback;
    use crate::config::GuardConfig;
    use crate::context::ContextKind;
    use crate::error::BlockError;
    use crate::node::NodeRegistry;
    use crate::resource::ResourceWrapper;
    use crate::selector::ClusterBuilderSlot;
    use crate::selector::NodeSelectorSlot;
    use crate::slot::SlotChain;

    #[derive(Debug)]
    struct Reject;

    impl ProcessorSlot for Reject {
        fn entry(&self, _ctx: &Context, entry: &EntryState, _next: Next<'_>) -> Result<(), GuardError> {
            Err(BlockError::Custom {
                resource: entry.resource().name().to_string(),
                reason: "closed".to_string(),
            }
            .into())
        }
    }

    #[derive(Default)]
    struct Counting {
        passed: AtomicUsize,
        blocked: AtomicUsize,
        exited: AtomicUsize,
    }

    impl EntryCallback for Counting {
        fn on_pass(&self, _ctx: &Context, _entry: &EntryState) {
            self.passed.fetch_add(1, Ordering::SeqCst);
        }

        fn on_blocked(&self, _block: &BlockError, _ctx: &Context, _entry: &EntryState) {
            self.blocked.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ExitCallback for Counting {
        fn on_exit(&self, _ctx: &Context, _entry: &EntryState) {
            self.exited.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        chain: SlotChain,
        registry: Arc<NodeRegistry>,
        entry_node: Arc<StatisticNode>,
        counting: Arc<Counting>,
        time: TimeSource,
        mock: Arc<quanta::Mock>,
    }

    fn fixture(reject: bool) -> Fixture {
        let (clock, mock) = Clock::mock();
        let time = TimeSource::with_clock(clock);
        let config = GuardConfig::default();
        let registry = Arc::new(NodeRegistry::new(config.clone(), time.clone()));
        let entry_node = Arc::new(registry.new_node());
        let callbacks = Arc::new(CallbackRegistry::new());
        let counting = Arc::new(Counting::default());
        callbacks.register_entry_callback("count", counting.clone());
        callbacks.register_exit_callback("count", counting.clone());

        let mut chain = SlotChain::new();
        chain.add_last(Arc::new(NodeSelectorSlot::new(Arc::clone(&registry))));
        chain.add_last(Arc::new(ClusterBuilderSlot::new(Arc::clone(&registry))));
        chain.add_last(Arc::new(StatisticSlot::new(
            Arc::clone(&entry_node),
            callbacks,
            time.clone(),
            config.statistic_max_rt,
        )));
        if reject {
            chain.add_last(Arc::new(Reject));
        }
        Fixture {
            chain,
            registry,
            entry_node,
            counting,
            time,
            mock,
        }
    }

    #[test]
    fn a_pass_counts_and_exit_records_rt() {
        let f = fixture(false);
        let ctx = Context::new("web", "app-a", ContextKind::Explicit);
        let entry = EntryState::new(ResourceWrapper::inbound("orders"), 2, Vec::new(), f.time.now_ms(), None);

        f.chain.entry(&ctx, &entry).unwrap();
        let cluster = f.registry.cluster_node("orders");
        assert_eq!(cluster.pass_qps(), 2.0);
        assert_eq!(cluster.cur_thread_num(), 1);
        assert_eq!(entry.origin_node().unwrap().cur_thread_num(), 1);
        assert_eq!(f.entry_node.pass_qps(), 2.0);

        f.mock.increment(Duration::from_millis(40));
        f.chain.exit(&ctx, &entry);
        assert_eq!(cluster.cur_thread_num(), 0);
        assert_eq!(cluster.success_qps(), 2.0);
        // One response time over two acquired units
        assert_eq!(cluster.avg_rt(), 20.0);
        assert_eq!(f.counting.passed.load(Ordering::SeqCst), 1);
        assert_eq!(f.counting.exited.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn outbound_calls_skip_the_inbound_node() {
        let f = fixture(false);
        let ctx = Context::new("web", "", ContextKind::Explicit);
        let entry = EntryState::new(ResourceWrapper::outbound("db"), 1, Vec::new(), 0, None);

        f.chain.entry(&ctx, &entry).unwrap();
        assert_eq!(f.registry.cluster_node("db").pass_qps(), 1.0);
        assert_eq!(f.entry_node.pass_qps(), 0.0);
    }

    #[test]
    fn a_block_counts_without_touching_the_gauge() {
        let f = fixture(true);
        let ctx = Context::new("web", "", ContextKind::Explicit);
        let entry = EntryState::new(ResourceWrapper::inbound("orders"), 1, Vec::new(), 0, None);

        let err = f.chain.entry(&ctx, &entry).unwrap_err();
        assert!(err.is_blocked());
        assert!(matches!(entry.error(), Some(EntryError::Blocked(_))));

        let cluster = f.registry.cluster_node("orders");
        assert_eq!(cluster.block_qps(), 1.0);
        assert_eq!(cluster.pass_qps(), 0.0);
        assert_eq!(cluster.cur_thread_num(), 0);
        assert_eq!(f.entry_node.block_qps(), 1.0);
        assert_eq!(f.counting.blocked.load(Ordering::SeqCst), 1);
        assert_eq!(f.counting.passed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn rt_is_clamped_and_skipped_on_error() {
        let f = fixture(false);
        let ctx = Context::new("web", "", ContextKind::Explicit);

        let slow = EntryState::new(ResourceWrapper::from("slow"), 1, Vec::new(), f.time.now_ms(), None);
        f.chain.entry(&ctx, &slow).unwrap();
        f.mock.increment(Duration::from_millis(10_000));
        f.chain.exit(&ctx, &slow);
        assert_eq!(f.registry.cluster_node("slow").avg_rt(), 4900.0);

        let failed = EntryState::new(ResourceWrapper::from("failed"), 1, Vec::new(), f.time.now_ms(), None);
        f.chain.entry(&ctx, &failed).unwrap();
        failed.set_error(EntryError::Business("boom".to_string()));
        f.chain.exit(&ctx, &failed);
        let node = f.registry.cluster_node("failed");
        assert_eq!(node.success_qps(), 0.0);
        assert_eq!(node.cur_thread_num(), 0);
    }
}
