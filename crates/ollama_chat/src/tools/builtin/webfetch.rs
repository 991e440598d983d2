use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::tools::{
    object_schema, PermissionRequest, SafetyLevel, Tool, ToolCategory, ToolContext, ToolError,
    ToolSpec,
};

const TOOL_NAME: &str = "webfetch";
pub const MAX_RESPONSE_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const MAX_TIMEOUT_SECONDS: u64 = 120;

#[derive(Debug, Deserialize)]
pub struct WebFetchParams {
    pub url: String,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

/// HTTP GET returning the response body as text.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl Default for WebFetchTool {
    fn default() -> Self {
        Self::new()
    }
}

impl WebFetchTool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    type Params = WebFetchParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_NAME,
            "Fetch URL content.",
            object_schema(
                json!({
                    "url": {"type": "string", "description": "HTTP or HTTPS URL."},
                    "timeout_seconds": {"type": "integer", "description": "Request timeout, at most 120."},
                }),
                &["url"],
            ),
        )
        .with_safety_level(SafetyLevel::Confirm)
        .with_category(ToolCategory::Web)
    }

    async fn execute(&self, params: WebFetchParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let raw = params.url.trim();
        let url = Url::parse(raw)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| ToolError::invalid_arguments(TOOL_NAME, "Invalid URL scheme."))?;

        ctx.ask(
            PermissionRequest::new(TOOL_NAME, vec![url.to_string()])
                .with_always(vec!["*".to_string()])
                .with_metadata("url", url.to_string()),
        )
        .await?;

        let timeout = params
            .timeout_seconds
            .unwrap_or(DEFAULT_TIMEOUT_SECONDS)
            .clamp(1, MAX_TIMEOUT_SECONDS);
        let request = self
            .client
            .get(url.clone())
            .timeout(Duration::from_secs(timeout))
            .header(ACCEPT, "text/plain;q=1.0, text/markdown;q=0.9, text/html;q=0.8, */*;q=0.1")
            .header(USER_AGENT, concat!("ollama-chat/", env!("CARGO_PKG_VERSION")));

        let mut response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
            response = request.send() => response.map_err(|error| request_failed(&url, &error))?,
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::failed(
                TOOL_NAME,
                format!("Request failed with status code: {}", status.as_u16()),
            ));
        }
        if response
            .content_length()
            .is_some_and(|length| length > MAX_RESPONSE_BYTES as u64)
        {
            return Err(ToolError::failed(TOOL_NAME, "Response too large."));
        }

        let mut body = Vec::new();
        loop {
            let chunk = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled),
                chunk = response.chunk() => chunk.map_err(|error| request_failed(&url, &error))?,
            };
            let Some(chunk) = chunk else {
                break;
            };
            if body.len() + chunk.len() > MAX_RESPONSE_BYTES {
                return Err(ToolError::failed(TOOL_NAME, "Response too large."));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

fn request_failed(url: &Url, error: &reqwest::Error) -> ToolError {
    if error.is_timeout() {
        return ToolError::failed(TOOL_NAME, format!("Request to {url} timed out."));
    }
    ToolError::failed(TOOL_NAME, format!("Request to {url} failed: {error}"))
}
