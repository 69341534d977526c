// What is being visualized and how often it is refreshed
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_METRIC: &str = "deltaPacketsPerSec";
pub const DEFAULT_STEP_SECONDS: u32 = 5;
pub const DEFAULT_REFRESH_MS: u64 = 5000;
pub const MAX_REFRESH_MS: u64 = 24 * 60 * 60 * 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("metric name must not be empty")]
    EmptyMetric,
    #[error("step must be greater than zero seconds")]
    ZeroStep,
    #[error("refresh rate must be greater than zero milliseconds")]
    ZeroRefresh,
    #[error("refresh rate must be at most {max} milliseconds, got {millis}")]
    RefreshTooLong { millis: u64, max: u64 },
    #[error("window must hold at least one bucket")]
    ZeroWindow,
}

/// Metric and bucket width shared by every stream of a context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricSelector {
    metric_name: String,
    step_seconds: u32,
}

impl MetricSelector {
    pub fn new(metric_name: impl Into<String>, step_seconds: u32) -> Result<Self, SelectorError> {
        let metric_name = metric_name.into();
        if metric_name.trim().is_empty() {
            return Err(SelectorError::EmptyMetric);
        }
        if step_seconds == 0 {
            return Err(SelectorError::ZeroStep);
        }
        Ok(Self {
            metric_name,
            step_seconds,
        })
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn step_seconds(&self) -> u32 {
        self.step_seconds
    }

    pub fn step(&self) -> i64 {
        i64::from(self.step_seconds)
    }

    pub fn with_metric(&self, metric_name: impl Into<String>) -> Result<Self, SelectorError> {
        Self::new(metric_name, self.step_seconds)
    }

    pub fn with_step(&self, step_seconds: u32) -> Result<Self, SelectorError> {
        Self::new(self.metric_name.clone(), step_seconds)
    }
}

impl Default for MetricSelector {
    fn default() -> Self {
        Self {
            metric_name: DEFAULT_METRIC.to_string(),
            step_seconds: DEFAULT_STEP_SECONDS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RefreshRate(u64);

impl RefreshRate {
    pub fn from_millis(millis: u64) -> Result<Self, SelectorError> {
        if millis == 0 {
            return Err(SelectorError::ZeroRefresh);
        }
        if millis > MAX_REFRESH_MS {
            return Err(SelectorError::RefreshTooLong {
                millis,
                max: MAX_REFRESH_MS,
            });
        }
        Ok(Self(millis))
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.0)
    }

    /// Fetch deadline, kept below the period so a slow tick never overlaps the next one.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis((self.0 / 10).saturating_mul(9).max(1))
    }
}

impl Default for RefreshRate {
    fn default() -> Self {
        Self(DEFAULT_REFRESH_MS)
    }
}
