use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::config::GuardConfig;
use crate::metric::ArrayMetric;
use crate::metric::MetricEvent;
use crate::time::TimeSource;

/// Real-time statistics of a resource within some scope.
///
/// Rates come from a second-level window, totals from a minute-level one.
/// The thread count is a live gauge, not windowed. All writes are atomic
/// and reads never block writers.
#[derive(Debug)]
pub struct StatisticNode {
    second: ArrayMetric,
    minute: ArrayMetric,
    cur_thread_num: AtomicI64,
    time: TimeSource,
}

impl StatisticNode {
    pub fn new(config: &GuardConfig, time: TimeSource) -> Self {
        Self {
            second: ArrayMetric::new(config.sample_count, config.interval_ms),
            minute: ArrayMetric::new(config.minute_sample_count, config.minute_interval_ms),
            cur_thread_num: AtomicI64::new(0),
            time,
        }
    }

    pub fn add_pass(&self, count: u32) {
        self.add(MetricEvent::Pass, count);
    }

    pub fn add_block(&self, count: u32) {
        self.add(MetricEvent::Block, count);
    }

    pub fn add_exception(&self, count: u32) {
        self.add(MetricEvent::Exception, count);
    }

    /// Records a successful completion taking `rt_ms`.
    pub fn add_rt(&self, rt_ms: u64, success_count: u32) {
        let now = self.time.now_ms();
        self.second.add_success(rt_ms, u64::from(success_count), now);
        self.minute.add_success(rt_ms, u64::from(success_count), now);
    }

    pub fn increase_thread_num(&self) {
        self.cur_thread_num.fetch_add(1, Ordering::AcqRel);
    }

    pub fn decrease_thread_num(&self) {
        self.cur_thread_num.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn cur_thread_num(&self) -> u64 {
        self.cur_thread_num.load(Ordering::Acquire).max(0) as u64
    }

    pub fn pass_qps(&self) -> f64 {
        self.rate(MetricEvent::Pass)
    }

    pub fn block_qps(&self) -> f64 {
        self.rate(MetricEvent::Block)
    }

    pub fn exception_qps(&self) -> f64 {
        self.rate(MetricEvent::Exception)
    }

    pub fn success_qps(&self) -> f64 {
        self.rate(MetricEvent::Success)
    }

    /// Admitted calls per second. Blocked attempts are not included.
    pub fn total_qps(&self) -> f64 {
        self.pass_qps()
    }

    /// Average response time of successful calls in the live windows.
    ///
    /// Returns `0.0` when no call completed successfully, meaning there is
    /// no evidence either way.
    pub fn avg_rt(&self) -> f64 {
        let now = self.time.now_ms();
        let success = self.second.sum(MetricEvent::Success, now);
        if success == 0 {
            return 0.0;
        }
        self.second.sum(MetricEvent::Rt, now) as f64 / success as f64
    }

    pub fn min_rt(&self) -> u64 {
        self.second.min_rt(self.time.now_ms())
    }

    /// Best observed success rate, extrapolated from the busiest window.
    pub fn max_success_qps(&self) -> f64 {
        let per_window = self.second.max_success_per_window(self.time.now_ms());
        per_window as f64 * self.second.sample_count() as f64 / self.second.interval_sec()
    }

    /// Pass count of the preceding window, as a per second rate.
    pub fn previous_pass_qps(&self) -> f64 {
        self.previous_rate(MetricEvent::Pass)
    }

    pub fn previous_block_qps(&self) -> f64 {
        self.previous_rate(MetricEvent::Block)
    }

    /// Pass and block counts over the minute window.
    pub fn total_request(&self) -> u64 {
        let now = self.time.now_ms();
        self.minute.sum(MetricEvent::Pass, now) + self.minute.sum(MetricEvent::Block, now)
    }

    pub fn total_pass(&self) -> u64 {
        self.minute.sum(MetricEvent::Pass, self.time.now_ms())
    }

    pub fn total_success(&self) -> u64 {
        self.minute.sum(MetricEvent::Success, self.time.now_ms())
    }

    pub fn total_exception(&self) -> u64 {
        self.minute.sum(MetricEvent::Exception, self.time.now_ms())
    }

    fn add(&self, event: MetricEvent, count: u32) {
        let now = self.time.now_ms();
        self.second.add(event, u64::from(count), now);
        self.minute.add(event, u64::from(count), now);
    }

    fn rate(&self, event: MetricEvent) -> f64 {
        self.second.sum(event, self.time.now_ms()) as f64 / self.second.interval_sec()
    }

    fn previous_rate(&self, event: MetricEvent) -> f64 {
        let count = self.second.previous(event, self.time.now_ms());
        count as f64 * 1000.0 / self.second.window_length_ms() as f64
    }
}

/// Statistics of one resource across every context and origin, plus the
/// per-origin breakdown.
#[derive(Debug)]
pub struct ClusterNode {
    name: String,
    stats: StatisticNode,
    origins: DashMap<String, Arc<StatisticNode>>,
    config: GuardConfig,
    time: TimeSource,
}

impl ClusterNode {
    pub fn new(name: impl Into<String>, config: &GuardConfig, time: TimeSource) -> Self {
        Self {
            name: name.into(),
            stats: StatisticNode::new(config, time.clone()),
            origins: DashMap::new(),
            config: config.clone(),
            time,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node counting calls from `origin`, created on first use.
    pub fn origin_node(&self, origin: &str) -> Arc<StatisticNode> {
        if let Some(node) = self.origins.get(origin) {
            return Arc::clone(node.value());
        }
        let node = self
            .origins
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(StatisticNode::new(&self.config, self.time.clone())));
        Arc::clone(node.value())
    }

    pub fn find_origin_node(&self, origin: &str) -> Option<Arc<StatisticNode>> {
        self.origins.get(origin).map(|node| Arc::clone(node.value()))
    }

    pub fn origins(&self) -> Vec<String> {
        self.origins.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl Deref for ClusterNode {
    type Target = StatisticNode;

    fn deref(&self) -> &Self::Target {
        &self.stats
    }
}

/// Process wide map of resource name to cluster node.
///
/// Concurrent first use of a name resolves to a single node: the first
/// insertion wins and every other caller reuses it.
#[derive(Debug)]
pub struct NodeRegistry {
    clusters: DashMap<String, Arc<ClusterNode>>,
    config: GuardConfig,
    time: TimeSource,
}

impl NodeRegistry {
    pub fn new(config: GuardConfig, time: TimeSource) -> Self {
        Self {
            clusters: DashMap::new(),
            config,
            time,
        }
    }

    pub fn cluster_node(&self, resource: &str) -> Arc<ClusterNode> {
        if let Some(node) = self.clusters.get(resource) {
            return Arc::clone(node.value());
        }
        let node = self.clusters.entry(resource.to_string()).or_insert_with(|| {
            Arc::new(ClusterNode::new(resource, &self.config, self.time.clone()))
        });
        Arc::clone(node.value())
    }

    pub fn find_cluster_node(&self, resource: &str) -> Option<Arc<ClusterNode>> {
        self.clusters.get(resource).map(|node| Arc::clone(node.value()))
    }

    /// A new node sharing this registry's window layout and clock.
    pub fn new_node(&self) -> StatisticNode {
        StatisticNode::new(&self.config, self.time.clone())
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use more_asserts::assert_le;
    use quanta::Clock;

    use super::*;

    fn mock_node() -> (StatisticNode, Arc<quanta::Mock>) {
        let (clock, mock) = Clock::mock();
        let node = StatisticNode::new(&GuardConfig::default(), TimeSource::with_clock(clock));
        (node, mock)
    }

    #[test]
    fn it_reports_rates_over_the_retained_span() {
        let (node, _mock) = mock_node();
        node.add_pass(8);
        node.add_block(2);
        node.add_exception(1);
        node.add_rt(30, 1);
        node.add_rt(10, 1);

        assert_eq!(node.pass_qps(), 8.0);
        assert_eq!(node.block_qps(), 2.0);
        assert_eq!(node.exception_qps(), 1.0);
        assert_eq!(node.success_qps(), 2.0);
        assert_eq!(node.total_qps(), node.pass_qps());
        assert_eq!(node.avg_rt(), 20.0);
        assert_eq!(node.min_rt(), 10);
        assert_eq!(node.total_request(), 10);
        assert_eq!(node.total_exception(), 1);
        assert_eq!(node.total_success(), 2);
    }

    #[test]
    fn avg_rt_without_successes_is_zero() {
        let (node, _mock) = mock_node();
        node.add_pass(3);
        assert_eq!(node.avg_rt(), 0.0);
    }

    #[test]
    fn it_forgets_everything_after_an_idle_interval() {
        let (node, mock) = mock_node();
        node.add_pass(5);
        node.add_block(5);
        node.add_rt(100, 1);
        node.add_exception(1);

        mock.increment(Duration::from_millis(1000));
        assert_eq!(node.pass_qps(), 0.0);
        assert_eq!(node.block_qps(), 0.0);
        assert_eq!(node.exception_qps(), 0.0);
        assert_eq!(node.avg_rt(), 0.0);
        // Minute totals outlive the second window
        assert_eq!(node.total_exception(), 1);

        mock.increment(Duration::from_secs(60));
        assert_eq!(node.total_request(), 0);
        assert_eq!(node.total_exception(), 0);
    }

    #[test]
    fn rates_use_the_whole_span_across_windows() {
        let (node, mock) = mock_node();
        node.add_pass(4);
        mock.increment(Duration::from_millis(500));
        node.add_pass(6);
        assert_eq!(node.pass_qps(), 10.0);
        assert_eq!(node.previous_pass_qps(), 8.0);

        mock.increment(Duration::from_millis(500));
        assert_eq!(node.pass_qps(), 6.0);
    }

    #[test]
    fn max_success_qps_extrapolates_the_busiest_window() {
        let (node, mock) = mock_node();
        node.add_rt(1, 3);
        mock.increment(Duration::from_millis(500));
        node.add_rt(1, 1);
        assert_eq!(node.max_success_qps(), 6.0);
    }

    #[test]
    fn pass_and_block_are_not_double_counted() {
        let (node, _mock) = mock_node();
        let attempts: u32 = 50;
        for i in 0..attempts {
            if i % 3 == 0 {
                node.add_block(1);
            } else {
                node.add_pass(1);
            }
        }
        assert_le!(node.pass_qps() + node.block_qps(), f64::from(attempts));
        assert_eq!(node.total_request(), u64::from(attempts));
    }

    #[test]
    fn thread_gauge_is_balanced() {
        let node = Arc::new(StatisticNode::new(&GuardConfig::default(), TimeSource::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let node = Arc::clone(&node);
                thread::spawn(move || {
                    for _ in 0..500 {
                        node.increase_thread_num();
                        node.decrease_thread_num();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(node.cur_thread_num(), 0);
    }

    #[test]
    fn first_writer_wins_on_registry_insert() {
        let registry = Arc::new(NodeRegistry::new(GuardConfig::default(), TimeSource::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.cluster_node("orders"))
            })
            .collect();
        let nodes: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(nodes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn origin_nodes_are_scoped_to_their_cluster() {
        let registry = NodeRegistry::new(GuardConfig::default(), TimeSource::new());
        let orders = registry.cluster_node("orders");
        let users = registry.cluster_node("users");

        let a = orders.origin_node("app-a");
        assert!(Arc::ptr_eq(&a, &orders.origin_node("app-a")));
        assert!(!Arc::ptr_eq(&a, &users.origin_node("app-a")));
        assert!(orders.find_origin_node("app-b").is_none());
        assert_eq!(orders.origins(), vec!["app-a".to_string()]);
    }
}
