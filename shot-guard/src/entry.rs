use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;

use crate::context;
use crate::context::Context;
use crate::error::BlockError;
use crate::error::GuardError;
use crate::node::ClusterNode;
use crate::node::StatisticNode;
use crate::resource::ResourceWrapper;
use crate::slot::SlotChain;

/// An argument of a guarded invocation, visible to every stage.
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for Arg {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Arg {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Why an entry did not complete normally.
#[derive(Clone, Debug)]
pub enum EntryError {
    Blocked(BlockError),
    /// A stage failed with something other than a block.
    Slot(String),
    /// The guarded operation itself failed.
    Business(String),
}

/// State of one invocation, shared by the caller's [`Entry`] handle, the
/// context stack and the stages of the chain.
pub struct EntryState {
    resource: ResourceWrapper,
    acquire_count: u32,
    args: Vec<Arg>,
    create_time_ms: u64,
    chain: Option<Arc<SlotChain>>,
    node: OnceLock<Arc<StatisticNode>>,
    cluster_node: OnceLock<Arc<ClusterNode>>,
    origin_node: OnceLock<Arc<StatisticNode>>,
    error: Mutex<Option<EntryError>>,
    exited: AtomicBool,
}

impl EntryState {
    pub(crate) fn new(
        resource: ResourceWrapper,
        acquire_count: u32,
        args: Vec<Arg>,
        create_time_ms: u64,
        chain: Option<Arc<SlotChain>>,
    ) -> Self {
        Self {
            resource,
            acquire_count,
            args,
            create_time_ms,
            chain,
            node: OnceLock::new(),
            cluster_node: OnceLock::new(),
            origin_node: OnceLock::new(),
            error: Mutex::new(None),
            exited: AtomicBool::new(false),
        }
    }

    pub fn resource(&self) -> &ResourceWrapper {
        &self.resource
    }

    pub fn acquire_count(&self) -> u32 {
        self.acquire_count
    }

    pub fn args(&self) -> &[Arg] {
        &self.args
    }

    /// Engine time at which the call entered, in milliseconds.
    pub fn create_time_ms(&self) -> u64 {
        self.create_time_ms
    }

    /// Node of this resource within the entry's context.
    pub fn node(&self) -> Option<&Arc<StatisticNode>> {
        self.node.get()
    }

    pub fn cluster_node(&self) -> Option<&Arc<ClusterNode>> {
        self.cluster_node.get()
    }

    /// Node of this resource for the caller's origin, if the context has one.
    pub fn origin_node(&self) -> Option<&Arc<StatisticNode>> {
        self.origin_node.get()
    }

    pub fn error(&self) -> Option<EntryError> {
        self.error.lock().clone()
    }

    pub fn has_error(&self) -> bool {
        self.error.lock().is_some()
    }

    pub fn is_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn set_node(&self, node: Arc<StatisticNode>) {
        let _ = self.node.set(node);
    }

    pub fn set_cluster_node(&self, node: Arc<ClusterNode>) {
        let _ = self.cluster_node.set(node);
    }

    pub fn set_origin_node(&self, node: Arc<StatisticNode>) {
        let _ = self.origin_node.set(node);
    }

    pub fn set_error(&self, error: EntryError) {
        *self.error.lock() = Some(error);
    }

    /// Runs the chain's exit pipeline exactly once.
    fn run_exit(&self, ctx: &Context) {
        if self.exited.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(chain) = &self.chain {
            chain.exit(ctx, self);
        }
    }

    /// Marks the entry finished without running any exit stage.
    fn discard(&self) {
        self.exited.store(true, Ordering::Release);
    }
}

impl fmt::Debug for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryState")
            .field("resource", &self.resource.name())
            .field("acquire_count", &self.acquire_count)
            .field("create_time_ms", &self.create_time_ms)
            .field("error", &*self.error.lock())
            .field("exited", &self.is_exited())
            .finish_non_exhaustive()
    }
}

/// An active invocation of a guarded resource.
///
/// Exiting is mandatory: dropping an `Entry` exits it, so a call that
/// returns early or unwinds still releases its thread count and records
/// its statistics. Call [`Entry::exit`] to observe ordering violations.
#[must_use = "dropping an entry exits it immediately"]
pub struct Entry {
    state: Arc<EntryState>,
    context: Option<Context>,
}

impl Entry {
    pub(crate) fn new(state: Arc<EntryState>, context: Context) -> Self {
        Self {
            state,
            context: Some(context),
        }
    }

    /// An entry that is not tracked by any context.
    pub(crate) fn detached(state: Arc<EntryState>) -> Self {
        Self {
            state,
            context: None,
        }
    }

    pub fn resource(&self) -> &ResourceWrapper {
        self.state.resource()
    }

    pub fn state(&self) -> &Arc<EntryState> {
        &self.state
    }

    pub fn context(&self) -> Option<&Context> {
        self.context.as_ref()
    }

    /// Records a failure of the guarded operation.
    ///
    /// The exception is counted on every node of this entry and the error
    /// slot is filled, so the exit will not record a response time.
    pub fn trace_error(&self, error: &dyn fmt::Display) {
        if self.context.is_none() || self.state.is_exited() {
            return;
        }
        let count = self.state.acquire_count();
        if let Some(node) = self.state.node() {
            node.add_exception(count);
        }
        if let Some(node) = self.state.cluster_node() {
            node.add_exception(count);
        }
        if let Some(node) = self.state.origin_node() {
            node.add_exception(count);
        }
        self.state.set_error(EntryError::Business(error.to_string()));
    }

    /// Exits the entry.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::EntryOrder`] if this entry is not the current
    /// entry of its context. Every active entry of the context has been
    /// exited by then.
    pub fn exit(mut self) -> Result<(), GuardError> {
        self.exit_inner()
    }

    fn exit_inner(&mut self) -> Result<(), GuardError> {
        match self.context.take() {
            Some(ctx) => exit_for_context(&ctx, &self.state),
            None => Ok(()),
        }
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        if let Err(err) = self.exit_inner() {
            tracing::error!(resource = %self.state.resource(), %err, "entry dropped out of order");
        }
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("state", &self.state)
            .field("context", &self.context.as_ref().map(Context::name))
            .finish()
    }
}

pub(crate) fn exit_for_context(ctx: &Context, state: &Arc<EntryState>) -> Result<(), GuardError> {
    if state.is_exited() {
        return Ok(());
    }
    match ctx.pop_if_current(state) {
        Ok(parent) => {
            state.run_exit(ctx);
            if parent.is_none() && ctx.is_default() {
                context::unbind_if(ctx);
            }
            Ok(())
        }
        Err(current) => {
            let current = current.map(|entry| entry.resource().name().to_string());
            unwind(ctx);
            tracing::error!(
                context = ctx.name(),
                current = current.as_deref().unwrap_or("none"),
                expected = state.resource().name(),
                "entry exit order violated, context unwound"
            );
            Err(GuardError::EntryOrder {
                current,
                expected: state.resource().name().to_string(),
            })
        }
    }
}

/// Drops an entry whose entry pipeline failed. No exit stage runs.
pub(crate) fn discard(ctx: &Context, state: &Arc<EntryState>) {
    state.discard();
    match ctx.pop_if_current(state) {
        Ok(None) if ctx.is_default() => context::unbind_if(ctx),
        Ok(_) => {}
        Err(_) => unwind(ctx),
    }
}

/// Exits every active entry of `ctx`, innermost first.
fn unwind(ctx: &Context) {
    while let Some(entry) = ctx.take_current() {
        entry.run_exit(ctx);
    }
    if ctx.is_default() {
        context::unbind_if(ctx);
    }
}
