use url::Url;

use crate::error::OllamaApiError;

/// Default base URL of a local Ollama server.
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Normalize a user-supplied host into a base URL without a trailing slash.
///
/// Normalization rules:
/// 1) blank input falls back to [`DEFAULT_OLLAMA_HOST`]
/// 2) a missing scheme defaults to `http://`
/// 3) a trailing `/api` segment is dropped so endpoints can be appended
/// 4) only `http` and `https` are accepted
pub fn normalize_host(input: &str) -> Result<String, OllamaApiError> {
    let trimmed = input.trim();
    let candidate = if trimmed.is_empty() {
        DEFAULT_OLLAMA_HOST.to_string()
    } else if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|error| OllamaApiError::invalid_host(input, error.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(OllamaApiError::invalid_host(
            input,
            format!("unsupported scheme '{}'", parsed.scheme()),
        ));
    }
    if parsed.host_str().is_none() {
        return Err(OllamaApiError::invalid_host(input, "missing host"));
    }

    let base = parsed.as_str().trim_end_matches('/');
    let base = base.strip_suffix("/api").unwrap_or(base);
    Ok(base.to_string())
}

/// Join a normalized host with an `/api/...` endpoint name.
pub fn endpoint(host: &str, name: &str) -> String {
    format!("{}/api/{}", host.trim_end_matches('/'), name.trim_start_matches('/'))
}
