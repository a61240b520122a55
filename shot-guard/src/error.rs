use crate::degrade::DegradeRule;
use crate::flow::FlowRule;
use crate::system::SystemLimit;

/// Rejections raised by the check stages of a slot chain.
///
/// A block is expected traffic control, never an exception: it is counted on
/// the block counters and handed back to the caller unchanged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BlockError {
    /// A flow rule's threshold was reached.
    #[error("flow control rejected {resource} (threshold {})", .rule.count)]
    Flow { resource: String, rule: FlowRule },

    /// A circuit breaker is open, or a degrade strategy just tripped.
    #[error("circuit breaker open for {resource} ({:?})", .rule.grade)]
    Degrade { resource: String, rule: DegradeRule },

    /// The global inbound traffic exceeded a system rule.
    #[error("system protection rejected {resource} ({limit})")]
    System { resource: String, limit: SystemLimit },

    /// A custom stage refused the call.
    #[error("{resource} rejected: {reason}")]
    Custom { resource: String, reason: String },
}

impl BlockError {
    pub fn resource(&self) -> &str {
        match self {
            Self::Flow { resource, .. }
            | Self::Degrade { resource, .. }
            | Self::System { resource, .. }
            | Self::Custom { resource, .. } => resource,
        }
    }
}

/// Errors surfaced by entering or exiting a guarded resource.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GuardError {
    /// The call was rejected by a check stage.
    #[error(transparent)]
    Blocked(#[from] BlockError),

    /// An entry was exited while it was not the top of its context.
    ///
    /// This is a contract violation by the caller. The context has already
    /// been unwound when this is returned.
    #[error(
        "the order of entry exit can't be paired with the order of entry, current entry in context: <{}>, but expected: <{expected}>",
        .current.as_deref().unwrap_or("none")
    )]
    EntryOrder {
        current: Option<String>,
        expected: String,
    },

    /// A stage failed for a reason other than a block.
    #[error("slot failure: {0}")]
    Slot(String),
}

impl GuardError {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked(_))
    }

    pub fn as_block(&self) -> Option<&BlockError> {
        match self {
            Self::Blocked(block) => Some(block),
            _ => None,
        }
    }
}
