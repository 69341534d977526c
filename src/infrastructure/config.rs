use crate::application::render_surface::DEFAULT_PALETTE;
use crate::application::series_context::{DEFAULT_OVERLAP_BUCKETS, DEFAULT_WINDOW_SIZE};
use crate::application::stats_engine::EngineSettings;
use crate::application::visibility_gate::Visibility;
use crate::domain::selector::{
    DEFAULT_METRIC, DEFAULT_REFRESH_MS, DEFAULT_STEP_SECONDS, MetricSelector, RefreshRate,
    SelectorError,
};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub viewer: ViewerSettings,
    #[serde(default)]
    pub graph: GraphSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ViewerSettings {
    pub base_url: String,
    #[serde(default)]
    pub cookie: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GraphSettings {
    #[serde(default = "default_metric")]
    pub metric: String,
    #[serde(default = "default_interval")]
    pub interval_seconds: u32,
    #[serde(default = "default_refresh")]
    pub refresh_ms: u64,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap_buckets: usize,
    #[serde(default = "default_palette")]
    pub palette: Vec<String>,
    /// Start suspended until the page reports itself visible.
    #[serde(default)]
    pub start_hidden: bool,
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            metric: default_metric(),
            interval_seconds: default_interval(),
            refresh_ms: default_refresh(),
            window_size: default_window_size(),
            overlap_buckets: default_overlap(),
            palette: default_palette(),
            start_hidden: false,
        }
    }
}

impl GraphSettings {
    pub fn engine_settings(&self) -> Result<EngineSettings, SelectorError> {
        if self.window_size == 0 {
            return Err(SelectorError::ZeroWindow);
        }
        Ok(EngineSettings {
            selector: MetricSelector::new(self.metric.clone(), self.interval_seconds)?,
            refresh: RefreshRate::from_millis(self.refresh_ms)?,
            window_size: self.window_size,
            overlap_buckets: self.overlap_buckets,
            palette: self.palette.clone(),
            initial_visibility: Visibility::from_hidden(self.start_hidden),
        })
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metric() -> String {
    DEFAULT_METRIC.to_string()
}

fn default_interval() -> u32 {
    DEFAULT_STEP_SECONDS
}

fn default_refresh() -> u64 {
    DEFAULT_REFRESH_MS
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_overlap() -> usize {
    DEFAULT_OVERLAP_BUCKETS
}

fn default_palette() -> Vec<String> {
    DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect()
}

/// `config/stats.{toml,yaml,json}` if present, overridden by `STATS_HORIZON__*` variables.
pub fn load_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/stats").required(false))
        .add_source(config::Environment::with_prefix("STATS_HORIZON").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
