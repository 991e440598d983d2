use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::tools::{
    object_schema, PermissionRequest, SafetyLevel, Tool, ToolCategory, ToolContext, ToolError,
    ToolSpec,
};

const TOOL_NAME: &str = "websearch";
pub const DEFAULT_SEARCH_ENDPOINT: &str = "https://mcp.exa.ai/mcp";
const DEFAULT_NUM_RESULTS: u64 = 8;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(25);
pub const NO_RESULTS: &str = "No search results found.";

#[derive(Debug, Deserialize)]
pub struct WebSearchParams {
    pub query: String,
    #[serde(default)]
    pub num_results: Option<u64>,
    #[serde(default)]
    pub livecrawl: Option<String>,
    #[serde(default, rename = "type")]
    pub search_type: Option<String>,
    #[serde(default)]
    pub context_max_characters: Option<u64>,
}

/// Web search through a JSON-RPC search endpoint that answers in event-stream frames.
pub struct WebSearchTool {
    client: reqwest::Client,
    endpoint: String,
}

impl Default for WebSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSearchTool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: DEFAULT_SEARCH_ENDPOINT.to_string(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    type Params = WebSearchParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_NAME,
            "Search the web and return a text digest of the top results.",
            object_schema(
                json!({
                    "query": {"type": "string", "description": "Search query."},
                    "num_results": {"type": "integer", "description": "Number of results (default 8)."},
                    "livecrawl": {"type": "string", "enum": ["fallback", "preferred"]},
                    "type": {"type": "string", "enum": ["auto", "fast", "deep"]},
                    "context_max_characters": {"type": "integer"},
                }),
                &["query"],
            ),
        )
        .with_safety_level(SafetyLevel::Confirm)
        .with_category(ToolCategory::Web)
    }

    async fn execute(&self, params: WebSearchParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let query = params.query.trim();
        if query.is_empty() {
            return Err(ToolError::invalid_arguments(TOOL_NAME, "query must not be empty."));
        }
        let endpoint = Url::parse(&self.endpoint)
            .map_err(|error| ToolError::failed(TOOL_NAME, format!("Invalid search endpoint: {error}")))?;

        ctx.ask(
            PermissionRequest::new(TOOL_NAME, vec![query.to_string()])
                .with_always(vec!["*".to_string()])
                .with_metadata("query", query),
        )
        .await?;

        let body = search_request(query, &params);
        let request = self
            .client
            .post(endpoint)
            .timeout(REQUEST_TIMEOUT)
            .header(ACCEPT, "application/json, text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string());

        let text = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            response = async {
                let response = request.send().await?;
                response.text().await
            } => response.map_err(|error| ToolError::failed(TOOL_NAME, format!("Search failed: {error}")))?,
        };

        Ok(first_result_text(&text).unwrap_or_else(|| NO_RESULTS.to_string()))
    }
}

fn search_request(query: &str, params: &WebSearchParams) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "tools/call",
        "params": {
            "name": "web_search_exa",
            "arguments": {
                "query": query,
                "type": params.search_type.as_deref().unwrap_or("auto"),
                "numResults": params.num_results.unwrap_or(DEFAULT_NUM_RESULTS),
                "livecrawl": params.livecrawl.as_deref().unwrap_or("fallback"),
                "contextMaxCharacters": params.context_max_characters,
            },
        },
    })
}

/// First non-empty `result.content[0].text` among the `data:` frames.
fn first_result_text(body: &str) -> Option<String> {
    body.lines()
        .filter_map(|line| line.trim().strip_prefix("data: "))
        .filter_map(|payload| serde_json::from_str::<Value>(payload).ok())
        .filter_map(|frame| {
            frame
                .pointer("/result/content/0/text")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .find(|text| !text.is_empty())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::tools::AutoApprove;

    #[test]
    fn picks_the_first_non_empty_result_frame() {
        let body = concat!(
            "event: message\n",
            "data: not json\n",
            "data: {\"result\":{\"content\":[{\"text\":\"\"}]}}\n",
            "data: {\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"Rust 1.0 shipped in 2015\"}]}}\n",
        );

        assert_eq!(
            first_result_text(body).as_deref(),
            Some("Rust 1.0 shipped in 2015")
        );
        assert_eq!(first_result_text("data: {}\n"), None);
    }

    #[test]
    fn request_fills_defaults() {
        let params = WebSearchParams {
            query: "tokio".to_string(),
            num_results: None,
            livecrawl: None,
            search_type: Some("fast".to_string()),
            context_max_characters: None,
        };

        let body = search_request("tokio", &params);

        assert_eq!(body["method"], "tools/call");
        assert_eq!(body["params"]["arguments"]["numResults"], 8);
        assert_eq!(body["params"]["arguments"]["type"], "fast");
        assert_eq!(body["params"]["arguments"]["livecrawl"], "fallback");
    }

    #[tokio::test]
    async fn blank_query_is_rejected_before_any_request() {
        let tool = WebSearchTool::new().with_endpoint("http://127.0.0.1:9/unused");
        let ctx = ToolContext::new("s", std::env::temp_dir(), Arc::new(AutoApprove));
        let params = WebSearchParams {
            query: "  ".to_string(),
            num_results: None,
            livecrawl: None,
            search_type: None,
            context_max_characters: None,
        };

        let error = tool.execute(params, &ctx).await.expect_err("blank query");

        assert!(matches!(error, ToolError::InvalidArguments { .. }));
    }
}
