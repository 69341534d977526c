// In-memory stats services and clocks for engine tests
use crate::application::clock::Clock;
use crate::application::stats_api::{DetailQuery, StatsApi};
use crate::domain::node::{DisplayPreferences, NodeStats};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Fixed(Vec<f64>),
    Fill(f64),
    Fail,
}

pub struct FakeStatsApi {
    nodes: Vec<String>,
    replies: Mutex<HashMap<String, Reply>>,
    queries: Mutex<Vec<DetailQuery>>,
    settings: Mutex<Option<DisplayPreferences>>,
    stats_available: Mutex<bool>,
    delay: Mutex<Option<Duration>>,
}

impl FakeStatsApi {
    /// Every node answers with a full window of `1.0` until told otherwise.
    pub fn new(nodes: &[&str]) -> Self {
        Self {
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
            replies: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            settings: Mutex::new(Some(DisplayPreferences::default())),
            stats_available: Mutex::new(true),
            delay: Mutex::new(None),
        }
    }

    pub fn respond(&self, node: &str, values: Vec<f64>) {
        self.set_reply(node, Reply::Fixed(values));
    }

    pub fn fill(&self, node: &str, value: f64) {
        self.set_reply(node, Reply::Fill(value));
    }

    pub fn fail(&self, node: &str) {
        self.set_reply(node, Reply::Fail);
    }

    pub fn set_settings(&self, settings: Option<DisplayPreferences>) {
        *self.settings.lock().unwrap() = settings;
    }

    pub fn set_stats_available(&self, available: bool) {
        *self.stats_available.lock().unwrap() = available;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn detail_queries(&self) -> Vec<DetailQuery> {
        self.queries.lock().unwrap().clone()
    }

    pub fn queries_for(&self, node: &str) -> Vec<DetailQuery> {
        self.detail_queries()
            .into_iter()
            .filter(|q| q.node_name == node)
            .collect()
    }

    fn set_reply(&self, node: &str, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .insert(node.to_string(), reply);
    }
}

#[async_trait]
impl StatsApi for FakeStatsApi {
    async fn get_settings(&self) -> anyhow::Result<DisplayPreferences> {
        self.settings
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("settings unavailable"))
    }

    async fn get_moloch_stats(&self, _query: &str) -> anyhow::Result<Vec<NodeStats>> {
        if !*self.stats_available.lock().unwrap() {
            anyhow::bail!("stats listing unavailable");
        }
        Ok(self.nodes.iter().map(NodeStats::new).collect())
    }

    async fn get_detail_stats(&self, query: &DetailQuery) -> anyhow::Result<Vec<f64>> {
        self.queries.lock().unwrap().push(query.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&query.node_name)
            .cloned()
            .unwrap_or(Reply::Fill(1.0));
        match reply {
            Reply::Fixed(values) => Ok(values),
            Reply::Fill(value) => Ok(vec![value; query.expected_buckets()]),
            Reply::Fail => anyhow::bail!("connection refused"),
        }
    }
}

/// Clock that only moves when a test moves it.
pub struct ManualClock(AtomicI64);

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self(AtomicI64::new(now))
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Clock following tokio's (pausable) time, for timer-driven tests.
pub struct TokioClock {
    origin: tokio::time::Instant,
    base: i64,
}

impl TokioClock {
    pub fn new(base: i64) -> Self {
        Self {
            origin: tokio::time::Instant::now(),
            base,
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> i64 {
        self.base + self.origin.elapsed().as_secs() as i64
    }
}
