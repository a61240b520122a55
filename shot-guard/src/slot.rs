use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::entry::EntryState;
use crate::error::GuardError;

/// A stage of the per-resource pipeline.
///
/// Stages run like nested scopes: `entry` does its work and calls
/// `next.fire_entry` to run the rest of the chain (or calls it first, to
/// observe the outcome of later stages). A stage that returns an error from
/// `entry` stops the pipeline; later stages never see the call and no
/// `exit` runs for it.
///
/// Both methods run on every guarded call and must not block.
pub trait ProcessorSlot: Send + Sync + fmt::Debug {
    fn entry(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) -> Result<(), GuardError>;

    fn exit(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) {
        next.fire_exit(ctx, entry);
    }
}

/// The remainder of a chain, handed to each stage.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    slots: &'a [Arc<dyn ProcessorSlot>],
}

impl Next<'_> {
    pub fn fire_entry(self, ctx: &Context, entry: &EntryState) -> Result<(), GuardError> {
        match self.slots.split_first() {
            Some((slot, rest)) => slot.entry(ctx, entry, Next { slots: rest }),
            None => Ok(()),
        }
    }

    pub fn fire_exit(self, ctx: &Context, entry: &EntryState) {
        if let Some((slot, rest)) = self.slots.split_first() {
            slot.exit(ctx, entry, Next { slots: rest });
        }
    }
}

/// Ordered stages bound to one resource.
#[derive(Debug, Default)]
pub struct SlotChain {
    slots: Vec<Arc<dyn ProcessorSlot>>,
}

impl SlotChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_first(&mut self, slot: Arc<dyn ProcessorSlot>) {
        self.slots.insert(0, slot);
    }

    pub fn add_last(&mut self, slot: Arc<dyn ProcessorSlot>) {
        self.slots.push(slot);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Arc<dyn ProcessorSlot>] {
        &self.slots
    }

    pub fn entry(&self, ctx: &Context, entry: &EntryState) -> Result<(), GuardError> {
        Next { slots: &self.slots }.fire_entry(ctx, entry)
    }

    pub fn exit(&self, ctx: &Context, entry: &EntryState) {
        Next { slots: &self.slots }.fire_exit(ctx, entry);
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::context::ContextKind;
    use crate::error::BlockError;
    use crate::resource::ResourceWrapper;

    #[derive(Debug)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        block: bool,
    }

    impl ProcessorSlot for Recorder {
        fn entry(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) -> Result<(), GuardError> {
            self.log.lock().push(format!("entry:{}", self.name));
            if self.block {
                return Err(BlockError::Custom {
                    resource: entry.resource().name().to_string(),
                    reason: self.name.to_string(),
                }
                .into());
            }
            let result = next.fire_entry(ctx, entry);
            self.log.lock().push(format!("entered:{}", self.name));
            result
        }

        fn exit(&self, ctx: &Context, entry: &EntryState, next: Next<'_>) {
            self.log.lock().push(format!("exit:{}", self.name));
            next.fire_exit(ctx, entry);
        }
    }

    fn chain(names: &[(&'static str, bool)], log: &Arc<Mutex<Vec<String>>>) -> SlotChain {
        let mut chain = SlotChain::new();
        for &(name, block) in names {
            chain.add_last(Arc::new(Recorder {
                name,
                log: Arc::clone(log),
                block,
            }));
        }
        chain
    }

    fn state() -> EntryState {
        EntryState::new(ResourceWrapper::from("res"), 1, Vec::new(), 0, None)
    }

    #[test]
    fn stages_nest_on_entry_and_exit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&[("a", false), ("b", false)], &log);
        let ctx = Context::new("ctx", "", ContextKind::Explicit);
        let entry = state();

        chain.entry(&ctx, &entry).unwrap();
        chain.exit(&ctx, &entry);
        assert_eq!(
            *log.lock(),
            vec!["entry:a", "entry:b", "entered:b", "entered:a", "exit:a", "exit:b"]
        );
    }

    #[test]
    fn a_block_skips_later_stages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let chain = chain(&[("a", false), ("b", true), ("c", false)], &log);
        let ctx = Context::new("ctx", "", ContextKind::Explicit);

        let err = chain.entry(&ctx, &state()).unwrap_err();
        assert!(err.is_blocked());
        assert_eq!(*log.lock(), vec!["entry:a", "entry:b", "entered:a"]);
    }

    #[test]
    fn add_first_prepends() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = chain(&[("b", false)], &log);
        chain.add_first(Arc::new(Recorder {
            name: "a",
            log: Arc::clone(&log),
            block: false,
        }));
        assert_eq!(chain.len(), 2);

        let ctx = Context::new("ctx", "", ContextKind::Explicit);
        chain.entry(&ctx, &state()).unwrap();
        assert_eq!(log.lock()[0], "entry:a");
    }
}
