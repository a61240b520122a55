use std::fmt;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Arc;

/// Direction of a guarded call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryType {
    /// Traffic entering this process. Counted on the global inbound node and
    /// subject to system rules.
    In,
    #[default]
    Out,
}

/// Identity of a protected operation.
///
/// Two wrappers with the same name are the same resource regardless of
/// direction: they share one cluster node and one slot chain.
#[derive(Clone, Debug)]
pub struct ResourceWrapper {
    name: Arc<str>,
    entry_type: EntryType,
}

impl ResourceWrapper {
    pub fn new(name: impl Into<Arc<str>>, entry_type: EntryType) -> Self {
        Self {
            name: name.into(),
            entry_type,
        }
    }

    pub fn inbound(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, EntryType::In)
    }

    pub fn outbound(name: impl Into<Arc<str>>) -> Self {
        Self::new(name, EntryType::Out)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }
}

impl PartialEq for ResourceWrapper {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for ResourceWrapper {}

impl Hash for ResourceWrapper {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for ResourceWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl From<&str> for ResourceWrapper {
    fn from(name: &str) -> Self {
        Self::outbound(name)
    }
}

impl From<String> for ResourceWrapper {
    fn from(name: String) -> Self {
        Self::outbound(name)
    }
}
