use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::degrade::DegradeRule;
use crate::flow::FlowRule;
use crate::system::SystemRule;
use crate::system::SystemThresholds;

type RuleMap<R> = HashMap<String, Arc<[R]>>;

/// The active rule sets consulted by the check stages.
///
/// Each install replaces the whole set for its kind in one atomic swap, so
/// a check sees either the old rules or the new ones. Invalid rules are
/// dropped with a warning.
#[derive(Debug, Default)]
pub struct RuleManager {
    flow: ArcSwap<RuleMap<FlowRule>>,
    degrade: ArcSwap<RuleMap<DegradeRule>>,
    system: ArcSwap<SystemThresholds>,
}

impl RuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces every flow rule. Returns the number of rules installed.
    pub fn install_flow_rules(&self, rules: impl IntoIterator<Item = FlowRule>) -> usize {
        let (map, installed) = group(rules, FlowRule::is_valid, |rule| &rule.resource, "flow");
        self.flow.store(Arc::new(map));
        installed
    }

    /// Replaces every degrade rule, with fresh breakers.
    pub fn install_degrade_rules(&self, rules: impl IntoIterator<Item = DegradeRule>) -> usize {
        let (map, installed) = group(
            rules.into_iter().map(DegradeRule::with_fresh_breaker),
            DegradeRule::is_valid,
            |rule| &rule.resource,
            "degrade",
        );
        self.degrade.store(Arc::new(map));
        installed
    }

    /// Replaces every system rule.
    pub fn install_system_rules(&self, rules: impl IntoIterator<Item = SystemRule>) -> usize {
        let (valid, invalid): (Vec<_>, Vec<_>) = rules.into_iter().partition(SystemRule::is_valid);
        for rule in &invalid {
            tracing::warn!(?rule, "ignoring invalid system rule");
        }
        let thresholds = SystemThresholds::merge(&valid);
        tracing::info!(installed = valid.len(), ?thresholds, "system rules loaded");
        self.system.store(Arc::new(thresholds));
        valid.len()
    }

    pub fn flow_rules(&self, resource: &str) -> Option<Arc<[FlowRule]>> {
        self.flow.load().get(resource).cloned()
    }

    pub fn degrade_rules(&self, resource: &str) -> Option<Arc<[DegradeRule]>> {
        self.degrade.load().get(resource).cloned()
    }

    pub fn system_thresholds(&self) -> Arc<SystemThresholds> {
        self.system.load_full()
    }
}

fn group<R: std::fmt::Debug>(
    rules: impl IntoIterator<Item = R>,
    is_valid: impl Fn(&R) -> bool,
    resource: impl Fn(&R) -> &String,
    kind: &'static str,
) -> (RuleMap<R>, usize) {
    let mut grouped: HashMap<String, Vec<R>> = HashMap::new();
    let mut installed = 0;
    for rule in rules {
        if !is_valid(&rule) {
            tracing::warn!(kind, ?rule, "ignoring invalid rule");
            continue;
        }
        installed += 1;
        grouped.entry(resource(&rule).clone()).or_default().push(rule);
    }
    tracing::info!(kind, installed, resources = grouped.len(), "rules loaded");
    let map = grouped
        .into_iter()
        .map(|(resource, rules)| (resource, Arc::from(rules)))
        .collect();
    (map, installed)
}
