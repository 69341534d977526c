// Stats engine - Owns the current series context and rebuilds it on user changes
use crate::application::clock::Clock;
use crate::application::metric_fetcher::MetricFetcher;
use crate::application::render_surface::{HorizonFrame, RenderCommand, RenderSurface, run_surface};
use crate::application::series_context::{
    ContextId, ContextParams, DEFAULT_OVERLAP_BUCKETS, DEFAULT_WINDOW_SIZE, SeriesContext,
};
use crate::application::stats_api::StatsApi;
use crate::application::visibility_gate::{GateState, Pollable, Visibility, VisibilityGate};
use crate::domain::node::{DisplayPreferences, NodeRoster, NodeStats};
use crate::domain::selector::{MetricSelector, RefreshRate, SelectorError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("failed to load display preferences: {0:#}")]
    PreferencesLoad(anyhow::Error),
    #[error("failed to load node stats: {0:#}")]
    RosterLoad(anyhow::Error),
    #[error("invalid selection: {0}")]
    InvalidSelection(#[from] SelectorError),
    #[error("node stats are not loaded")]
    NotReady,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum EngineStatus {
    Loading,
    Ready,
    Error { message: String },
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub selector: MetricSelector,
    pub refresh: RefreshRate,
    pub window_size: usize,
    pub overlap_buckets: usize,
    pub palette: Vec<String>,
    pub initial_visibility: Visibility,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            selector: MetricSelector::default(),
            refresh: RefreshRate::default(),
            window_size: DEFAULT_WINDOW_SIZE,
            overlap_buckets: DEFAULT_OVERLAP_BUCKETS,
            palette: Vec::new(),
            initial_visibility: Visibility::Visible,
        }
    }
}

/// A user change to any of the graph controls. Absent fields keep their value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Selection {
    pub metric: Option<String>,
    /// Bucket width in seconds
    pub interval: Option<u32>,
    /// Milliseconds between ticks
    pub refresh: Option<u64>,
}

pub struct StatsEngine {
    api: Arc<dyn StatsApi>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    status: EngineStatus,
    preferences: DisplayPreferences,
    stats: Vec<NodeStats>,
    roster: NodeRoster,
    selector: MetricSelector,
    refresh: RefreshRate,
    gate: VisibilityGate,
    context: Option<SeriesContext>,
    next_id: u64,
    current: Arc<AtomicU64>,
    render: mpsc::Sender<RenderCommand>,
    frames: watch::Receiver<Arc<HorizonFrame>>,
}

impl StatsEngine {
    /// Must be called inside a tokio runtime: the render surface runs as a task.
    pub fn new(api: Arc<dyn StatsApi>, clock: Arc<dyn Clock>, settings: EngineSettings) -> Self {
        let surface = RenderSurface::new(settings.palette.clone(), DisplayPreferences::default());
        let (render, commands) = mpsc::channel(16);
        let (frames_tx, frames) = watch::channel(Arc::new(HorizonFrame::default()));
        tokio::spawn(run_surface(surface, commands, frames_tx));

        Self {
            api,
            clock,
            status: EngineStatus::Loading,
            preferences: DisplayPreferences::default(),
            stats: Vec::new(),
            roster: NodeRoster::default(),
            selector: settings.selector.clone(),
            refresh: settings.refresh,
            gate: VisibilityGate::new(settings.initial_visibility),
            context: None,
            next_id: 0,
            current: Arc::new(AtomicU64::new(0)),
            render,
            frames,
            settings,
        }
    }

    /// Load preferences and the node listing, then build and start the first context.
    pub async fn init(&mut self) -> Result<(), EngineError> {
        match self.api.get_settings().await {
            Ok(preferences) => self.preferences = preferences,
            Err(e) => {
                let err = EngineError::PreferencesLoad(e);
                tracing::warn!(error = %err, "falling back to local timezone");
                self.preferences = DisplayPreferences::default();
            }
        }
        self.send_render(RenderCommand::Preferences(self.preferences.clone()))
            .await;

        let stats = match self.api.get_moloch_stats("").await {
            Ok(stats) => stats,
            Err(e) => {
                let err = EngineError::RosterLoad(e);
                tracing::error!(error = %err, "stats view unavailable");
                self.status = EngineStatus::Error {
                    message: err.to_string(),
                };
                self.send_render(RenderCommand::Error(err.to_string())).await;
                return Err(err);
            }
        };

        self.roster = NodeRoster::from_stats(&stats);
        self.stats = stats;
        self.status = EngineStatus::Ready;
        tracing::info!(nodes = self.roster.len(), "node roster loaded");

        self.rebuild().await;
        Ok(())
    }

    pub async fn set_metric(&mut self, metric: &str) -> Result<(), EngineError> {
        let selector = self.selector.with_metric(metric)?;
        self.reconfigure(selector, self.refresh).await
    }

    pub async fn set_interval(&mut self, step_seconds: u32) -> Result<(), EngineError> {
        let selector = self.selector.with_step(step_seconds)?;
        self.reconfigure(selector, self.refresh).await
    }

    pub async fn set_refresh_rate(&mut self, millis: u64) -> Result<(), EngineError> {
        let refresh = RefreshRate::from_millis(millis)?;
        self.reconfigure(self.selector.clone(), refresh).await
    }

    /// Apply several control changes at once, rebuilding the context a single time.
    pub async fn apply_selection(&mut self, selection: Selection) -> Result<(), EngineError> {
        let mut selector = self.selector.clone();
        if let Some(metric) = &selection.metric {
            selector = selector.with_metric(metric.as_str())?;
        }
        if let Some(step) = selection.interval {
            selector = selector.with_step(step)?;
        }
        let refresh = match selection.refresh {
            Some(millis) => RefreshRate::from_millis(millis)?,
            None => self.refresh,
        };
        self.reconfigure(selector, refresh).await
    }

    pub fn set_visibility(&mut self, visibility: Visibility) {
        let target = self.context.as_ref().map(|ctx| ctx as &dyn Pollable);
        self.gate.signal(visibility, target);
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }

    pub fn preferences(&self) -> &DisplayPreferences {
        &self.preferences
    }

    pub fn stats(&self) -> &[NodeStats] {
        &self.stats
    }

    pub fn roster(&self) -> &NodeRoster {
        &self.roster
    }

    pub fn selector(&self) -> &MetricSelector {
        &self.selector
    }

    pub fn refresh(&self) -> RefreshRate {
        self.refresh
    }

    pub fn gate_state(&self) -> GateState {
        self.gate.state()
    }

    pub fn context(&self) -> Option<&SeriesContext> {
        self.context.as_ref()
    }

    pub fn frames(&self) -> watch::Receiver<Arc<HorizonFrame>> {
        self.frames.clone()
    }

    /// Stop polling for good; the last frame stays readable.
    pub fn shutdown(&mut self) {
        self.current.store(0, Ordering::SeqCst);
        if let Some(ctx) = self.context.take() {
            tracing::info!(context = %ctx.id(), "stats engine shut down");
        }
    }

    async fn reconfigure(
        &mut self,
        selector: MetricSelector,
        refresh: RefreshRate,
    ) -> Result<(), EngineError> {
        if self.status != EngineStatus::Ready {
            return Err(EngineError::NotReady);
        }
        if selector == self.selector && refresh == self.refresh && self.context.is_some() {
            return Ok(());
        }
        self.selector = selector;
        self.refresh = refresh;
        self.rebuild().await;
        Ok(())
    }

    async fn rebuild(&mut self) {
        // Retire the old context first so none of its late results land.
        self.next_id += 1;
        self.current.store(self.next_id, Ordering::SeqCst);
        self.context = None;

        let params = ContextParams {
            window_size: self.settings.window_size,
            overlap_buckets: self.settings.overlap_buckets,
            ..ContextParams::new(self.selector.clone(), self.refresh)
        };
        let ctx = SeriesContext::new(
            ContextId::new(self.next_id),
            params,
            &self.roster,
            MetricFetcher::new(self.api.clone()),
            self.clock.clone(),
            self.current.clone(),
        );
        self.gate.attach(&ctx);
        self.send_render(RenderCommand::Attach(ctx.subscribe())).await;
        self.context = Some(ctx);
    }

    async fn send_render(&self, command: RenderCommand) {
        if self.render.send(command).await.is_err() {
            tracing::debug!("render surface is gone, dropping command");
        }
    }
}
