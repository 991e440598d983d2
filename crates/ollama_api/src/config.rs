use std::collections::BTreeMap;
use std::time::Duration;

use crate::retry::MAX_RETRIES;
use crate::url::DEFAULT_OLLAMA_HOST;

/// Transport configuration for Ollama API requests.
#[derive(Debug, Clone)]
pub struct OllamaApiConfig {
    /// Server base URL, e.g. `http://localhost:11434`.
    pub host: String,
    /// Connect timeout for every request and total timeout for non-streaming calls.
    pub timeout: Option<Duration>,
    /// Additional headers merged into every request.
    pub extra_headers: BTreeMap<String, String>,
    /// Retries after the first attempt for retryable HTTP statuses.
    pub max_retries: u32,
}

impl Default for OllamaApiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_OLLAMA_HOST.to_string(),
            timeout: None,
            extra_headers: BTreeMap::new(),
            max_retries: MAX_RETRIES,
        }
    }
}

impl OllamaApiConfig {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn insert_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.insert(key.into(), value.into());
        self
    }

    pub fn with_headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.extra_headers.extend(headers);
        self
    }
}
