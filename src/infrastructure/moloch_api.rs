// Viewer stats API client over HTTP
use crate::application::stats_api::{DetailQuery, StatsApi};
use crate::domain::node::{DisplayPreferences, NodeStats};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

#[derive(Debug, Clone)]
pub struct MolochApi {
    base_url: String,
    cookie: Option<String>,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct StatsListing {
    #[serde(default)]
    data: Vec<NodeStats>,
}

impl MolochApi {
    pub fn new(base_url: String, cookie: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            cookie,
            client: reqwest::Client::new(),
        }
    }

    fn build_url(&self, path: &str, params: &[(&str, String)]) -> String {
        let mut url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        for (i, (key, value)) in params.iter().enumerate() {
            url.push(if i == 0 { '?' } else { '&' });
            url.push_str(key);
            url.push('=');
            url.push_str(&urlencoding::encode(value));
        }
        url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(cookie) = &self.cookie {
            request = request.header("Cookie", cookie);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Viewer request failed with status {}: {}", status, body);
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }
}

#[async_trait]
impl StatsApi for MolochApi {
    async fn get_settings(&self) -> Result<DisplayPreferences> {
        let url = self.build_url("user/settings", &[]);
        self.get_json(&url).await
    }

    async fn get_moloch_stats(&self, query: &str) -> Result<Vec<NodeStats>> {
        let params = if query.is_empty() {
            Vec::new()
        } else {
            vec![("filter", query.to_string())]
        };
        let url = self.build_url("stats.json", &params);
        let listing: StatsListing = self.get_json(&url).await?;
        tracing::debug!("Loaded stats for {} nodes", listing.data.len());
        Ok(listing.data)
    }

    async fn get_detail_stats(&self, query: &DetailQuery) -> Result<Vec<f64>> {
        let url = self.build_url(
            "dstats.json",
            &[
                ("nodeName", query.node_name.clone()),
                ("start", query.start.to_string()),
                ("stop", query.stop.to_string()),
                ("step", query.step.to_string()),
                ("interval", query.interval.to_string()),
                ("name", query.name.clone()),
            ],
        );
        self.get_json(&url).await
    }
}
