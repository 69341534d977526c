// Node roster, aggregate snapshot and display preferences
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of the aggregate stats listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    #[serde(rename = "nodeName")]
    pub node_name: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl NodeStats {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            fields: Map::new(),
        }
    }
}

/// Ordered node names, loaded once and read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NodeRoster {
    nodes: Vec<String>,
}

impl NodeRoster {
    pub fn new(nodes: Vec<String>) -> Self {
        Self { nodes }
    }

    pub fn from_stats(stats: &[NodeStats]) -> Self {
        Self::new(stats.iter().map(|s| s.node_name.clone()).collect())
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayPreferences {
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_timezone() -> String {
    "local".to_string()
}

impl Default for DisplayPreferences {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl DisplayPreferences {
    /// Axis labels are UTC for "gmt"/"utc", local time otherwise.
    pub fn uses_utc(&self) -> bool {
        matches!(self.timezone.to_ascii_lowercase().as_str(), "gmt" | "utc")
    }
}
