// Series context - Timer-driven acquisition into per-node bucket buffers
use crate::application::clock::Clock;
use crate::application::metric_fetcher::MetricFetcher;
use crate::application::visibility_gate::Pollable;
use crate::domain::node::NodeRoster;
use crate::domain::selector::{MetricSelector, RefreshRate};
use crate::domain::stream::{Bucket, NodeStream};
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub const DEFAULT_WINDOW_SIZE: usize = 1440;
pub const DEFAULT_OVERLAP_BUCKETS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ContextId(u64);

impl ContextId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    pub fn is_current(&self, current: &AtomicU64) -> bool {
        current.load(Ordering::SeqCst) == self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextParams {
    pub selector: MetricSelector,
    pub refresh: RefreshRate,
    pub window_size: usize,
    /// Populated buckets re-requested each tick so provisional values get corrected.
    pub overlap_buckets: usize,
}

impl ContextParams {
    pub fn new(selector: MetricSelector, refresh: RefreshRate) -> Self {
        Self {
            selector,
            refresh,
            window_size: DEFAULT_WINDOW_SIZE,
            overlap_buckets: DEFAULT_OVERLAP_BUCKETS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    pub node_id: String,
    pub buckets: Vec<Bucket>,
    pub consecutive_failures: u32,
}

/// Immutable view of a context's streams, published after every tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub context_id: ContextId,
    pub selector: MetricSelector,
    pub window_size: usize,
    pub window_start: i64,
    pub window_stop: i64,
    pub streams: Vec<StreamSnapshot>,
}

impl SeriesSnapshot {
    pub fn stream(&self, node_id: &str) -> Option<&StreamSnapshot> {
        self.streams.iter().find(|s| s.node_id == node_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.streams.iter().map(|s| s.node_id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub window_start: i64,
    pub window_stop: i64,
    pub requested: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Applied(TickReport),
    /// A newer context took over; the results were dropped.
    Superseded,
}

/// Timeline and streams of one context. Only its own driver mutates it.
#[derive(Debug)]
pub struct Timeline {
    id: ContextId,
    params: ContextParams,
    streams: Vec<NodeStream>,
    last_tick: Option<i64>,
}

impl Timeline {
    pub fn new(id: ContextId, params: ContextParams, roster: &NodeRoster) -> Self {
        let step = params.selector.step();
        let streams = roster
            .nodes()
            .iter()
            .map(|node| NodeStream::new(node.clone(), step, params.window_size))
            .collect();
        Self {
            id,
            params,
            streams,
            last_tick: None,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn stream(&self, node_id: &str) -> Option<&NodeStream> {
        self.streams.iter().find(|s| s.node_id() == node_id)
    }

    /// `[stop - window_size * step, stop)` with `stop` aligned down to the step.
    pub fn window_at(&self, now: i64) -> (i64, i64) {
        let step = self.params.selector.step();
        let stop = now.div_euclid(step) * step;
        (stop - self.params.window_size as i64 * step, stop)
    }

    fn request_start(&self, stream: &NodeStream, window_start: i64) -> i64 {
        let step = self.params.selector.step();
        let mut start = window_start;
        if let Some(front) = stream.buckets().next().map(|b| b.timestamp) {
            start = start.max(front);
        }
        if let Some(last) = stream.last_populated() {
            let resume = last + step - self.params.overlap_buckets as i64 * step;
            start = start.max(resume);
        }
        start
    }

    /// Fetch the newest buckets for every node and fold them into the buffers.
    pub async fn tick(
        &mut self,
        fetcher: &MetricFetcher,
        now: i64,
        current: &AtomicU64,
    ) -> TickOutcome {
        if !self.id.is_current(current) {
            return TickOutcome::Superseded;
        }

        let (window_start, window_stop) = self.window_at(now);
        let step = self.params.selector.step();
        let metric = self.params.selector.metric_name().to_string();
        let interval = self.params.refresh.as_millis();

        let requests: Vec<(usize, i64)> = self
            .streams
            .iter()
            .enumerate()
            .map(|(idx, stream)| (idx, self.request_start(stream, window_start)))
            .filter(|(_, start)| *start < window_stop)
            .collect();

        let fetches = requests.iter().map(|(idx, start)| {
            let node = self.streams[*idx].node_id().to_string();
            let metric = metric.as_str();
            async move {
                fetcher
                    .fetch(&node, metric, *start, window_stop, step, interval)
                    .await
            }
        });
        let results = join_all(fetches).await;

        // In-flight fetches may outlive their context; never apply them then.
        if !self.id.is_current(current) {
            tracing::debug!(context = %self.id, "discarding tick results from superseded context");
            return TickOutcome::Superseded;
        }

        let mut failed = 0;
        for ((idx, start), result) in requests.iter().zip(results) {
            let stream = &mut self.streams[*idx];
            let count = ((window_stop - start) / step) as usize;
            let failure = match result {
                Ok(values) => stream.write_segment(*start, &values, window_start).err().map(
                    |e| format!("response rejected: {e}"),
                ),
                Err(e) => {
                    if let Err(rejected) = stream.mark_missing(*start, count, window_start) {
                        tracing::debug!(
                            node = stream.node_id(),
                            context = %self.id,
                            "gap marking rejected, padding instead: {rejected}"
                        );
                    }
                    Some(e.to_string())
                }
            };

            match failure {
                None => {
                    if stream.record_success() {
                        tracing::info!(node = stream.node_id(), context = %self.id, "metric fetch recovered");
                    }
                }
                Some(reason) => {
                    failed += 1;
                    // A rejected segment still leaves its new buckets as gaps.
                    stream.pad_to(window_stop, window_start);
                    if stream.record_failure() {
                        tracing::warn!(node = stream.node_id(), context = %self.id, %reason, "metric fetch failed, recording gaps");
                    } else {
                        tracing::debug!(
                            node = stream.node_id(),
                            failures = stream.consecutive_failures(),
                            %reason,
                            "metric fetch still failing"
                        );
                    }
                }
            }
        }

        for stream in &mut self.streams {
            stream.evict(window_start);
        }
        self.last_tick = Some(now);

        TickOutcome::Applied(TickReport {
            window_start,
            window_stop,
            requested: requests.len(),
            failed,
        })
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        let (window_start, window_stop) = match self.last_tick {
            Some(now) => self.window_at(now),
            None => (0, 0),
        };
        SeriesSnapshot {
            context_id: self.id,
            selector: self.params.selector.clone(),
            window_size: self.params.window_size,
            window_start,
            window_stop,
            streams: self
                .streams
                .iter()
                .map(|s| StreamSnapshot {
                    node_id: s.node_id().to_string(),
                    buckets: s.to_vec(),
                    consecutive_failures: s.consecutive_failures(),
                })
                .collect(),
        }
    }
}

/// Handle on a running (or paused) acquisition loop.
///
/// Dropping the handle retires the loop: the driver finishes the tick in
/// progress, if any, and exits together with its buffers.
pub struct SeriesContext {
    id: ContextId,
    params: ContextParams,
    running: watch::Sender<bool>,
    snapshots: watch::Receiver<Arc<SeriesSnapshot>>,
}

impl SeriesContext {
    pub fn new(
        id: ContextId,
        params: ContextParams,
        roster: &NodeRoster,
        fetcher: MetricFetcher,
        clock: Arc<dyn Clock>,
        current: Arc<AtomicU64>,
    ) -> Self {
        let fetcher = fetcher.with_timeout(params.refresh.fetch_timeout());
        let timeline = Timeline::new(id, params.clone(), roster);
        let (running, running_rx) = watch::channel(false);
        let (snapshot_tx, snapshots) = watch::channel(Arc::new(timeline.snapshot()));

        tracing::info!(
            context = %id,
            metric = params.selector.metric_name(),
            step = params.selector.step_seconds(),
            refresh_ms = params.refresh.as_millis(),
            nodes = roster.len(),
            "series context created"
        );

        tokio::spawn(drive(
            timeline,
            fetcher,
            clock,
            current,
            running_rx,
            snapshot_tx,
        ));

        Self {
            id,
            params,
            running,
            snapshots,
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn params(&self) -> &ContextParams {
        &self.params
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SeriesSnapshot>> {
        self.snapshots.clone()
    }

    pub fn latest(&self) -> Arc<SeriesSnapshot> {
        self.snapshots.borrow().clone()
    }
}

impl Pollable for SeriesContext {
    fn start(&self) {
        if self.running.send_if_modified(|running| !std::mem::replace(running, true)) {
            tracing::debug!(context = %self.id, "ticking started");
        }
    }

    fn stop(&self) {
        if self.running.send_if_modified(|running| std::mem::replace(running, false)) {
            tracing::debug!(context = %self.id, "ticking stopped");
        }
    }
}

impl Drop for SeriesContext {
    fn drop(&mut self) {
        tracing::debug!(context = %self.id, "series context retired");
    }
}

async fn drive(
    mut timeline: Timeline,
    fetcher: MetricFetcher,
    clock: Arc<dyn Clock>,
    current: Arc<AtomicU64>,
    mut running: watch::Receiver<bool>,
    snapshots: watch::Sender<Arc<SeriesSnapshot>>,
) {
    let period = timeline.params.refresh.period();
    loop {
        while !*running.borrow_and_update() {
            if running.changed().await.is_err() {
                return;
            }
        }

        // A fresh interval on every resume fires immediately.
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match timeline.tick(&fetcher, clock.now(), &current).await {
                        TickOutcome::Applied(report) => {
                            tracing::debug!(
                                context = %timeline.id(),
                                window_start = report.window_start,
                                window_stop = report.window_stop,
                                requested = report.requested,
                                failed = report.failed,
                                "tick applied"
                            );
                            snapshots.send_replace(Arc::new(timeline.snapshot()));
                        }
                        TickOutcome::Superseded => return,
                    }
                }
                changed = running.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*running.borrow_and_update() {
                        break;
                    }
                }
            }
        }
    }
}
