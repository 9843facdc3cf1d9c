//! Web search tool backed by a Tavily-compatible search API.
//!
//! Failures never reach the orchestrator: an unreachable provider, a
//! non-success status or a malformed body all yield `{query, results: []}`.

use async_trait::async_trait;
use deepdive_config::{MAX_CONTENT_BUDGET, MAX_SEARCH_RESULTS, SearchConfig};
use deepdive_core::error::ToolError;
use deepdive_core::tool::{Tool, ToolKind};
use schemars::{JsonSchema, schema_for};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Arguments accepted by `webSearch`.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct WebSearchInput {
    /// The search query
    pub query: String,
}

/// One trimmed search hit as handed back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<RawHit>,
}

#[derive(Debug, Deserialize)]
struct RawHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

pub struct WebSearchTool {
    client: reqwest::Client,
    config: SearchConfig,
}

impl WebSearchTool {
    /// Result count and content budget are capped at
    /// [`MAX_SEARCH_RESULTS`] and [`MAX_CONTENT_BUDGET`].
    pub fn new(mut config: SearchConfig) -> Self {
        config.max_results = config.max_results.min(MAX_SEARCH_RESULTS);
        config.content_budget = config.content_budget.min(MAX_CONTENT_BUDGET);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, config }
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, String> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or("no search API key configured")?;

        let url = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let body = serde_json::json!({
            "query": query,
            "max_results": self.config.max_results,
            "search_depth": self.config.search_depth,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("search provider returned {status}"));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| format!("malformed search response: {e}"))?;

        Ok(parsed
            .results
            .into_iter()
            .take(self.config.max_results)
            .map(|hit| SearchHit {
                title: hit.title,
                url: hit.url,
                content: truncate_chars(&hit.content, self.config.content_budget),
            })
            .collect())
    }
}

fn truncate_chars(text: &str, budget: usize) -> String {
    text.chars().take(budget).collect()
}

fn parse_input(input: &serde_json::Value) -> Result<WebSearchInput, ToolError> {
    serde_json::from_value(input.clone()).map_err(|e| ToolError::InvalidInput {
        tool_name: ToolKind::WebSearch.name().into(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl Tool for WebSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    fn description(&self) -> &str {
        "Search the web for up-to-date information. Returns up to five results, each with a title, URL and a content excerpt. Call once per distinct sub-topic."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::to_value(schema_for!(WebSearchInput)).unwrap_or_default()
    }

    fn validate(&self, input: &serde_json::Value) -> Result<(), ToolError> {
        parse_input(input).map(|_| ())
    }

    async fn execute(&self, input: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        let WebSearchInput { query } = parse_input(&input)?;

        let results = match self.search(&query).await {
            Ok(results) => {
                debug!(query = %query, count = results.len(), "Search complete");
                results
            }
            Err(reason) => {
                warn!(query = %query, %reason, "Search failed, returning no results");
                Vec::new()
            }
        };

        Ok(serde_json::json!({ "query": query, "results": results }))
    }
}
