use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use dashmap::DashSet;
use quanta::Clock;

use crate::callback::CallbackRegistry;
use crate::callback::EntryCallback;
use crate::callback::ExitCallback;
use crate::chain::ChainEnv;
use crate::chain::DefaultSlotChainBuilder;
use crate::chain::SlotChainBuilder;
use crate::cluster::ClusterTokenClient;
use crate::cluster::DefaultClusterTokenClient;
use crate::config::GuardConfig;
use crate::context;
use crate::context::Context;
use crate::context::ContextKind;
use crate::context::DEFAULT_CONTEXT_NAME;
use crate::degrade::DegradeRule;
use crate::entry;
use crate::entry::Arg;
use crate::entry::Entry;
use crate::entry::EntryState;
use crate::error::GuardError;
use crate::flow::FlowRule;
use crate::node::ClusterNode;
use crate::node::NodeRegistry;
use crate::node::StatisticNode;
use crate::resource::ResourceWrapper;
use crate::rules::RuleManager;
use crate::slot::SlotChain;
use crate::system::SystemRule;
use crate::time::TimeSource;

/// Assembles a [`Sentinel`].
#[derive(Default)]
pub struct SentinelBuilder {
    config: GuardConfig,
    clock: Option<Clock>,
    chain_builder: Option<Arc<dyn SlotChainBuilder>>,
    cluster_client: Option<Arc<dyn ClusterTokenClient>>,
}

impl SentinelBuilder {
    pub fn with_config(mut self, config: GuardConfig) -> Self {
        self.config = config;
        self
    }

    /// Drive every window and breaker from `clock`. Tests pass
    /// `Clock::mock()` here.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the built-in stage order.
    pub fn with_chain_builder(mut self, builder: Arc<dyn SlotChainBuilder>) -> Self {
        self.chain_builder = Some(builder);
        self
    }

    pub fn with_cluster_client(mut self, client: Arc<dyn ClusterTokenClient>) -> Self {
        self.cluster_client = Some(client);
        self
    }

    /// Builds the engine. Window settings that do not split into whole
    /// buckets are aligned first, with a warning.
    pub fn build(self) -> Sentinel {
        let config = self.config.normalized();
        let time = self.clock.map(TimeSource::with_clock).unwrap_or_default();
        let nodes = Arc::new(NodeRegistry::new(config.clone(), time.clone()));
        let builder = self
            .chain_builder
            .unwrap_or_else(|| Arc::new(DefaultSlotChainBuilder::new()));
        tracing::info!(builder = builder.name(), "resolved slot chain builder");

        let env = ChainEnv {
            entry_node: Arc::new(nodes.new_node()),
            config,
            time,
            nodes,
            rules: Arc::new(RuleManager::new()),
            callbacks: Arc::new(CallbackRegistry::new()),
            cluster_client: self
                .cluster_client
                .unwrap_or_else(|| Arc::new(DefaultClusterTokenClient::default())),
        };
        Sentinel {
            env,
            builder,
            chains: DashMap::new(),
            context_names: DashSet::new(),
            chain_cap_warned: AtomicBool::new(false),
            context_cap_warned: AtomicBool::new(false),
        }
    }
}

/// A traffic guard engine.
///
/// Every guarded call acquires an [`Entry`] for its resource, which runs
/// the resource's slot chain. Dropping or exiting the entry completes the
/// call. Engines are independent of each other; share one through an
/// `Arc`.
pub struct Sentinel {
    env: ChainEnv,
    builder: Arc<dyn SlotChainBuilder>,
    chains: DashMap<ResourceWrapper, Arc<SlotChain>>,
    context_names: DashSet<String>,
    chain_cap_warned: AtomicBool,
    context_cap_warned: AtomicBool,
}

impl Sentinel {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> SentinelBuilder {
        SentinelBuilder::default()
    }

    /// The context bound to the calling thread, creating and binding an
    /// explicit one if there is none.
    ///
    /// An already bound context is returned as is, whatever its name.
    pub fn enter_context(&self, name: &str, origin: &str) -> Context {
        if let Some(ctx) = context::bound() {
            return ctx;
        }
        let ctx = self.new_context(name, origin);
        context::bind(ctx.clone());
        ctx
    }

    /// An explicit context that is not bound to any thread.
    ///
    /// Use it with [`Sentinel::entry_in`] when the call tree moves between
    /// threads, as async tasks do.
    pub fn new_context(&self, name: &str, origin: &str) -> Context {
        let kind = if self.track_context_name(name) {
            ContextKind::Explicit
        } else {
            ContextKind::Unguarded
        };
        Context::new(name, origin, kind)
    }

    /// Unbinds the calling thread's context if it has no active entry.
    pub fn exit_context(&self) -> Option<Context> {
        match context::bound() {
            Some(ctx) if ctx.depth() == 0 => context::unbind(),
            Some(ctx) => {
                tracing::debug!(context = ctx.name(), depth = ctx.depth(), "context still has active entries");
                None
            }
            None => None,
        }
    }

    pub fn current_context(&self) -> Option<Context> {
        context::bound()
    }

    /// Enters `resource` once, in the calling thread's context.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::Blocked`] when a check stage rejects the call.
    pub fn entry(&self, resource: impl Into<ResourceWrapper>) -> Result<Entry, GuardError> {
        self.entry_with(resource, 1, Vec::new())
    }

    /// Enters `resource` in the calling thread's context, creating a default
    /// context if none is bound. The default context is torn down when its
    /// last entry exits.
    pub fn entry_with(
        &self,
        resource: impl Into<ResourceWrapper>,
        acquire_count: u32,
        args: Vec<Arg>,
    ) -> Result<Entry, GuardError> {
        let ctx = match context::bound() {
            Some(ctx) => ctx,
            None => {
                let ctx = Context::new(DEFAULT_CONTEXT_NAME, "", ContextKind::Default);
                context::bind(ctx.clone());
                ctx
            }
        };
        self.entry_in(&ctx, resource, acquire_count, args)
    }

    /// Enters `resource` within `ctx`.
    pub fn entry_in(
        &self,
        ctx: &Context,
        resource: impl Into<ResourceWrapper>,
        acquire_count: u32,
        args: Vec<Arg>,
    ) -> Result<Entry, GuardError> {
        let resource = resource.into();
        let now = self.env.time.now_ms();
        let chain = if ctx.is_unguarded() {
            None
        } else {
            self.lookup_chain(&resource)
        };
        let Some(chain) = chain else {
            if ctx.is_default() && ctx.depth() == 0 {
                context::unbind_if(ctx);
            }
            let state = EntryState::new(resource, acquire_count, args, now, None);
            return Ok(Entry::detached(Arc::new(state)));
        };

        let state = Arc::new(EntryState::new(
            resource,
            acquire_count,
            args,
            now,
            Some(Arc::clone(&chain)),
        ));
        ctx.push_entry(Arc::clone(&state));
        match chain.entry(ctx, &state) {
            Ok(()) => Ok(Entry::new(state, ctx.clone())),
            Err(err) => {
                entry::discard(ctx, &state);
                Err(err)
            }
        }
    }

    /// Replaces every flow rule. Returns the number of rules installed.
    pub fn install_flow_rules(&self, rules: impl IntoIterator<Item = FlowRule>) -> usize {
        self.env.rules.install_flow_rules(rules)
    }

    /// Replaces every degrade rule. Open breakers of the old rules are
    /// discarded.
    pub fn install_degrade_rules(&self, rules: impl IntoIterator<Item = DegradeRule>) -> usize {
        self.env.rules.install_degrade_rules(rules)
    }

    pub fn install_system_rules(&self, rules: impl IntoIterator<Item = SystemRule>) -> usize {
        self.env.rules.install_system_rules(rules)
    }

    /// Registers an observer of passes and blocks. A callback registered
    /// under an existing name replaces it.
    pub fn register_entry_callback(&self, name: impl Into<String>, callback: Arc<dyn EntryCallback>) {
        self.env.callbacks.register_entry_callback(name, callback);
    }

    pub fn register_exit_callback(&self, name: impl Into<String>, callback: Arc<dyn ExitCallback>) {
        self.env.callbacks.register_exit_callback(name, callback);
    }

    pub fn remove_entry_callback(&self, name: &str) -> bool {
        self.env.callbacks.remove_entry_callback(name)
    }

    pub fn remove_exit_callback(&self, name: &str) -> bool {
        self.env.callbacks.remove_exit_callback(name)
    }

    /// Resource wide statistics, once the resource has been entered.
    pub fn cluster_node(&self, resource: &str) -> Option<Arc<ClusterNode>> {
        self.env.nodes.find_cluster_node(resource)
    }

    /// Statistics of every inbound call of this engine.
    pub fn entry_node(&self) -> &Arc<StatisticNode> {
        &self.env.entry_node
    }

    pub fn rules(&self) -> &RuleManager {
        &self.env.rules
    }

    pub fn config(&self) -> &GuardConfig {
        &self.env.config
    }

    pub fn time(&self) -> &TimeSource {
        &self.env.time
    }

    /// Number of resources with a chain.
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    fn lookup_chain(&self, resource: &ResourceWrapper) -> Option<Arc<SlotChain>> {
        if let Some(chain) = self.chains.get(resource) {
            return Some(Arc::clone(chain.value()));
        }
        if self.chains.len() >= self.env.config.max_slot_chains {
            if !self.chain_cap_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    max = self.env.config.max_slot_chains,
                    %resource,
                    "slot chain limit reached, new resources are not guarded"
                );
            }
            return None;
        }
        let chain = self.chains.entry(resource.clone()).or_insert_with(|| {
            let chain = self.builder.build(&self.env);
            tracing::debug!(%resource, stages = chain.len(), "built slot chain");
            Arc::new(chain)
        });
        Some(Arc::clone(chain.value()))
    }

    fn track_context_name(&self, name: &str) -> bool {
        if self.context_names.contains(name) {
            return true;
        }
        if self.context_names.len() >= self.env.config.max_context_names {
            if !self.context_cap_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    max = self.env.config.max_context_names,
                    context = name,
                    "context name limit reached, new contexts are not guarded"
                );
            }
            return false;
        }
        self.context_names.insert(name.to_string());
        true
    }
}

impl Default for Sentinel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Sentinel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sentinel")
            .field("builder", &self.builder.name())
            .field("chains", &self.chains.len())
            .field("config", &self.env.config)
            .finish_non_exhaustive()
    }
}
