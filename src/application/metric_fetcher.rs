// Stateless fetch of one bucketed segment for one node
use crate::application::stats_api::{DetailQuery, StatsApi};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid window [{start}, {stop}) with step {step}s")]
    InvalidRange { start: i64, stop: i64, step: i64 },
    #[error("transport failure: {0:#}")]
    Transport(anyhow::Error),
    #[error("malformed response: expected {expected} buckets, got {actual}")]
    Malformed { expected: usize, actual: usize },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Clone)]
pub struct MetricFetcher {
    api: Arc<dyn StatsApi>,
    timeout: Option<Duration>,
}

impl MetricFetcher {
    pub fn new(api: Arc<dyn StatsApi>) -> Self {
        Self { api, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Fetch one value per bucket in `[window_start, window_stop)`.
    pub async fn fetch(
        &self,
        node_id: &str,
        metric_name: &str,
        window_start: i64,
        window_stop: i64,
        step_seconds: i64,
        interval: u64,
    ) -> Result<Vec<f64>, FetchError> {
        if step_seconds <= 0 || window_start >= window_stop {
            return Err(FetchError::InvalidRange {
                start: window_start,
                stop: window_stop,
                step: step_seconds,
            });
        }

        let query = DetailQuery {
            node_name: node_id.to_string(),
            start: window_start,
            stop: window_stop,
            step: step_seconds,
            interval,
            name: metric_name.to_string(),
        };
        let expected = query.expected_buckets();

        let request = self.api.get_detail_stats(&query);
        let values = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| FetchError::Timeout(limit))?,
            None => request.await,
        }
        .map_err(FetchError::Transport)?;

        if values.len() != expected {
            return Err(FetchError::Malformed {
                expected,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::test_support::FakeStatsApi;

    #[tokio::test]
    async fn test_fetch_returns_one_value_per_bucket() {
        let api = Arc::new(FakeStatsApi::new(&["node-a"]));
        api.respond("node-a", vec![1.0, 2.0, 3.0, 4.0]);
        let fetcher = MetricFetcher::new(api.clone());

        let values = fetcher
            .fetch("node-a", "deltaPacketsPerSec", 0, 20, 5, 5000)
            .await
            .unwrap();
        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);

        let queries = api.detail_queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].name, "deltaPacketsPerSec");
        assert_eq!(queries[0].interval, 5000);
        assert_eq!(queries[0].expected_buckets(), 4);
    }

    #[tokio::test]
    async fn test_short_response_is_malformed() {
        let api = Arc::new(FakeStatsApi::new(&["node-a"]));
        api.respond("node-a", vec![1.0, 2.0, 3.0]);
        let fetcher = MetricFetcher::new(api);

        let err = fetcher
            .fetch("node-a", "deltaPacketsPerSec", 0, 20, 5, 5000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Malformed {
                expected: 4,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_range_skips_network() {
        let api = Arc::new(FakeStatsApi::new(&["node-a"]));
        let fetcher = MetricFetcher::new(api.clone());

        let err = fetcher.fetch("node-a", "m", 20, 20, 5, 5000).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRange { .. }));
        let err = fetcher.fetch("node-a", "m", 0, 20, 0, 5000).await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidRange { .. }));
        assert!(api.detail_queries().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let api = Arc::new(FakeStatsApi::new(&["node-a"]));
        api.fail("node-a");
        let fetcher = MetricFetcher::new(api);

        let err = fetcher.fetch("node-a", "m", 0, 10, 5, 5000).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_bounds_slow_requests() {
        let api = Arc::new(FakeStatsApi::new(&["node-a"]));
        api.respond("node-a", vec![1.0, 2.0]);
        api.set_delay(Duration::from_secs(10));
        let fetcher = MetricFetcher::new(api).with_timeout(Duration::from_secs(1));

        let err = fetcher.fetch("node-a", "m", 0, 10, 5, 5000).await.unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }
}
