use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::EntryState;

/// Name of the context created for calls made outside any explicit one.
pub const DEFAULT_CONTEXT_NAME: &str = "shot_guard_default_context";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ContextKind {
    /// Created by the caller; lives until the caller exits it.
    Explicit,
    /// Created implicitly; torn down as soon as its stack empties.
    Default,
    /// Over the context name cap: entries pass through untracked.
    Unguarded,
}

/// One logical call tree.
///
/// A context owns the stack of active entries: the top is the current
/// entry and everything below it are its ancestors. Exits must happen in
/// LIFO order. Cloning shares the same tree; a context must not be shared
/// between independent logical calls.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    name: String,
    origin: String,
    kind: ContextKind,
    stack: Mutex<Vec<Arc<EntryState>>>,
}

impl Context {
    pub(crate) fn new(name: impl Into<String>, origin: impl Into<String>, kind: ContextKind) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name: name.into(),
                origin: origin.into(),
                kind,
                stack: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Caller identity, empty when unknown.
    pub fn origin(&self) -> &str {
        &self.inner.origin
    }

    pub fn is_default(&self) -> bool {
        self.inner.kind == ContextKind::Default
    }

    /// Whether entries in this context skip every stage.
    pub fn is_unguarded(&self) -> bool {
        self.inner.kind == ContextKind::Unguarded
    }

    /// The innermost active entry.
    pub fn current_entry(&self) -> Option<Arc<EntryState>> {
        self.inner.stack.lock().last().cloned()
    }

    /// Number of active entries.
    pub fn depth(&self) -> usize {
        self.inner.stack.lock().len()
    }

    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn push_entry(&self, entry: Arc<EntryState>) {
        self.inner.stack.lock().push(entry);
    }

    /// Pops `entry` if it is the current one.
    ///
    /// On success returns the new current entry (its parent). Otherwise the
    /// stack is untouched and the actual current entry is returned as the
    /// error.
    pub(crate) fn pop_if_current(
        &self,
        entry: &Arc<EntryState>,
    ) -> Result<Option<Arc<EntryState>>, Option<Arc<EntryState>>> {
        let mut stack = self.inner.stack.lock();
        match stack.last() {
            Some(top) if Arc::ptr_eq(top, entry) => {
                stack.pop();
                Ok(stack.last().cloned())
            }
            top => Err(top.cloned()),
        }
    }

    /// Removes and returns the current entry.
    pub(crate) fn take_current(&self) -> Option<Arc<EntryState>> {
        self.inner.stack.lock().pop()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("origin", &self.inner.origin)
            .field("kind", &self.inner.kind)
            .field("depth", &self.depth())
            .finish()
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
}

/// The context bound to the calling thread.
pub(crate) fn bound() -> Option<Context> {
    CURRENT.with(|current| current.borrow().clone())
}

pub(crate) fn bind(context: Context) {
    CURRENT.with(|current| *current.borrow_mut() = Some(context));
}

/// Unbinds `context` if it is the one bound to the calling thread.
pub(crate) fn unbind_if(context: &Context) {
    CURRENT.with(|current| {
        let mut current = current.borrow_mut();
        if current.as_ref().is_some_and(|bound| bound.ptr_eq(context)) {
            *current = None;
        }
    });
}

pub(crate) fn unbind() -> Option<Context> {
    CURRENT.with(|current| current.borrow_mut().take())
}
