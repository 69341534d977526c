// Trait for the remote stats services the engine consumes
use crate::domain::node::{DisplayPreferences, NodeStats};
use async_trait::async_trait;

/// Parameters of one detail-stats request. Times are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetailQuery {
    pub node_name: String,
    pub start: i64,
    pub stop: i64,
    pub step: i64,
    /// Display refresh rate echoed to the server as a bucketing hint.
    pub interval: u64,
    pub name: String,
}

impl DetailQuery {
    pub fn expected_buckets(&self) -> usize {
        ((self.stop - self.start) / self.step) as usize
    }
}

#[async_trait]
pub trait StatsApi: Send + Sync {
    /// User display settings
    async fn get_settings(&self) -> anyhow::Result<DisplayPreferences>;

    /// Aggregate per-node stats; the listing order defines the roster order
    async fn get_moloch_stats(&self, query: &str) -> anyhow::Result<Vec<NodeStats>>;

    /// Bucketed values for one node and metric, one per step in [start, stop)
    async fn get_detail_stats(&self, query: &DetailQuery) -> anyhow::Result<Vec<f64>>;
}
