use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::context::Context;
use crate::entry::EntryState;
use crate::error::BlockError;

/// Observer of entry outcomes, invoked by the statistics stage.
///
/// Callbacks run on every guarded call and must not block.
pub trait EntryCallback: Send + Sync {
    fn on_pass(&self, ctx: &Context, entry: &EntryState);

    fn on_blocked(&self, block: &BlockError, ctx: &Context, entry: &EntryState);
}

/// Observer of exits, invoked by the statistics stage.
pub trait ExitCallback: Send + Sync {
    fn on_exit(&self, ctx: &Context, entry: &EntryState);
}

type Registered<T> = Vec<(String, Arc<T>)>;

/// Named, ordered observer lists.
///
/// Reads on the hot path are a single atomic load; registration copies the
/// list and swaps it in. Registering an existing name replaces that
/// observer in place.
pub struct CallbackRegistry {
    entry: ArcSwap<Registered<dyn EntryCallback>>,
    exit: ArcSwap<Registered<dyn ExitCallback>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            entry: ArcSwap::from_pointee(Vec::new()),
            exit: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub fn register_entry_callback(&self, name: impl Into<String>, callback: Arc<dyn EntryCallback>) {
        register(&self.entry, name.into(), callback);
    }

    pub fn register_exit_callback(&self, name: impl Into<String>, callback: Arc<dyn ExitCallback>) {
        register(&self.exit, name.into(), callback);
    }

    pub fn remove_entry_callback(&self, name: &str) -> bool {
        remove(&self.entry, name)
    }

    pub fn remove_exit_callback(&self, name: &str) -> bool {
        remove(&self.exit, name)
    }

    pub fn entry_callbacks(&self) -> Arc<Registered<dyn EntryCallback>> {
        self.entry.load_full()
    }

    pub fn exit_callbacks(&self) -> Arc<Registered<dyn ExitCallback>> {
        self.exit.load_full()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("entry", &names::<dyn EntryCallback>(&self.entry.load_full()))
            .field("exit", &names::<dyn ExitCallback>(&self.exit.load_full()))
            .finish()
    }
}

fn names<T: ?Sized>(list: &Registered<T>) -> Vec<String> {
    list.iter().map(|(name, _)| name.clone()).collect()
}

fn register<T: ?Sized>(list: &ArcSwap<Registered<T>>, name: String, callback: Arc<T>) {
    list.rcu(|current| {
        let mut next = Vec::clone(current);
        match next.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = Arc::clone(&callback),
            None => next.push((name.clone(), Arc::clone(&callback))),
        }
        next
    });
}

fn remove<T: ?Sized>(list: &ArcSwap<Registered<T>>, name: &str) -> bool {
    let previous = list.rcu(|current| {
        current
            .iter()
            .filter(|(existing, _)| existing != name)
            .cloned()
            .collect::<Vec<_>>()
    });
    previous.iter().any(|(existing, _)| existing == name)
}
