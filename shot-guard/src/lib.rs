//! # shot-guard
//!
//! `shot-guard` is an in-process traffic guard. Every protected call enters
//! a named resource, passes through an ordered pipeline of stages (node
//! selection, statistics, system protection, flow control, circuit
//! breaking) and exits again, recording what happened.
//!
//! ## Core Philosophy
//!
//! The guard sits on the hot path of every call. Statistics live in
//! sliding windows of atomic counters that rotate without a lock in the
//! common case; rules are swapped in atomically and read with a single
//! load; circuit breakers reset lazily on the next check instead of
//! through background timers.
//!
//! ## Key Concepts
//!
//! * **Resource**: a named operation, inbound or outbound.
//! * **Context**: one logical call tree, holding the stack of active entries.
//! * **Entry**: one active call. Dropping it exits it; exits must be LIFO.
//! * **Slot chain**: the stages a resource's calls run through, built once
//!   per resource.
//! * **Node**: windowed statistics of a resource in some scope.
//!
//! ## Example
//!
//! ```rust
//! use shot_guard::FlowRule;
//! use shot_guard::Sentinel;
//!
//! let sentinel = Sentinel::new();
//! sentinel.install_flow_rules(vec![FlowRule::new("orders", 1.0)]);
//!
//! let entry = sentinel.entry("orders").expect("first call is admitted");
//! assert!(sentinel.entry("orders").unwrap_err().is_blocked());
//! entry.exit().expect("exits in order");
//! ```

mod callback;
mod chain;
mod cluster;
mod config;
mod context;
mod degrade;
mod entry;
mod error;
mod flow;
mod metric;
mod node;
mod resource;
mod rules;
mod selector;
mod sentinel;
mod slot;
mod statistic;
mod system;
mod time;
mod window;

pub use callback::CallbackRegistry;
pub use callback::EntryCallback;
pub use callback::ExitCallback;
pub use chain::ChainEnv;
pub use chain::DefaultSlotChainBuilder;
pub use chain::SlotChainBuilder;
pub use cluster::ClusterClientConfig;
pub use cluster::ClusterTokenClient;
pub use cluster::DefaultClusterTokenClient;
pub use cluster::TokenResult;
pub use cluster::TokenResultStatus;
pub use config::DEFAULT_MAX_CONTEXT_NAMES;
pub use config::DEFAULT_MAX_SLOT_CHAINS;
pub use config::DEFAULT_STATISTIC_MAX_RT;
pub use config::GuardConfig;
pub use context::Context;
pub use context::DEFAULT_CONTEXT_NAME;
pub use degrade::DegradeGrade;
pub use degrade::DegradeRule;
pub use degrade::DegradeSlot;
pub use entry::Arg;
pub use entry::Entry;
pub use entry::EntryError;
pub use entry::EntryState;
pub use error::BlockError;
pub use error::GuardError;
pub use flow::ClusterFlowConfig;
pub use flow::DefaultController;
pub use flow::FlowGrade;
pub use flow::FlowRule;
pub use flow::FlowSlot;
pub use flow::LIMIT_APP_DEFAULT;
pub use flow::LIMIT_APP_OTHER;
pub use metric::ArrayMetric;
pub use metric::MetricBucket;
pub use metric::MetricEvent;
pub use node::ClusterNode;
pub use node::NodeRegistry;
pub use node::StatisticNode;
pub use resource::EntryType;
pub use resource::ResourceWrapper;
pub use rules::RuleManager;
pub use selector::ClusterBuilderSlot;
pub use selector::NodeSelectorSlot;
pub use sentinel::Sentinel;
pub use sentinel::SentinelBuilder;
pub use slot::Next;
pub use slot::ProcessorSlot;
pub use slot::SlotChain;
pub use statistic::StatisticSlot;
pub use system::SystemLimit;
pub use system::SystemRule;
pub use system::SystemSlot;
pub use system::SystemThresholds;
pub use time::TimeSource;
pub use window::Bucket;
pub use window::LeapArray;
pub use window::Window;
