use std::future::Future;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::OllamaApiConfig;
use crate::error::{parse_error_message, OllamaApiError};
use crate::events::{ChatResponseChunk, PullStatus, ShowResponse, TagsResponse, VersionResponse};
use crate::ndjson::NdjsonStreamParser;
use crate::payload::OllamaChatRequest;
use crate::retry::{is_retryable_http_error, retry_delay};
use crate::url::{endpoint, normalize_host};

/// Parsed frames of one streamed chat turn, ending after the `done` frame.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatResponseChunk, OllamaApiError>> + Send>>;

#[derive(Debug)]
pub struct OllamaApiClient {
    http: Client,
    config: OllamaApiConfig,
    host: String,
}

impl OllamaApiClient {
    pub fn new(config: OllamaApiConfig) -> Result<Self, OllamaApiError> {
        let host = normalize_host(&config.host)?;
        let mut builder = Client::builder().default_headers(build_headers(&config)?);
        if let Some(timeout) = config.timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http, config, host })
    }

    pub fn config(&self) -> &OllamaApiConfig {
        &self.config
    }

    /// Normalized base URL every endpoint is joined onto.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Opens a streamed chat turn.
    ///
    /// Retryable HTTP statuses are retried before any body byte is read. Once
    /// streaming, an `error` frame ends the stream with [`OllamaApiError::Backend`]
    /// and cancellation ends it with [`OllamaApiError::Cancelled`].
    pub async fn chat_stream(
        &self,
        request: &OllamaChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkStream, OllamaApiError> {
        let url = endpoint(&self.host, "chat");
        let response = self
            .send_with_retry(|| self.http.post(&url).json(request), Some(&cancel))
            .await?;
        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut parser = NdjsonStreamParser::<ChatResponseChunk>::default();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    next = bytes.next() => Some(next),
                };
                let Some(next) = next else {
                    yield Err(OllamaApiError::Cancelled);
                    return;
                };

                let (frames, finished) = match next {
                    Some(Ok(chunk)) => (parser.feed(&chunk), false),
                    Some(Err(error)) => {
                        yield Err(OllamaApiError::from(error));
                        return;
                    }
                    None => (parser.finish().into_iter().collect::<Vec<_>>(), true),
                };

                for mut frame in frames {
                    if let Some(message) = frame.error.take() {
                        yield Err(OllamaApiError::Backend(message));
                        return;
                    }
                    let done = frame.done;
                    yield Ok(frame);
                    if done {
                        return;
                    }
                }

                if finished {
                    return;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    /// Describes a model. The raw capability field is preserved so callers can
    /// tell an absent list from an empty one.
    pub async fn show(&self, model: &str) -> Result<ShowResponse, OllamaApiError> {
        let url = endpoint(&self.host, "show");
        let body = json!({ "model": model });
        let response = self
            .send_with_retry(|| self.with_timeout(self.http.post(&url).json(&body)), None)
            .await?;
        Ok(response.json::<ShowResponse>().await?)
    }

    /// Names of locally available models.
    pub async fn tags(&self) -> Result<Vec<String>, OllamaApiError> {
        let url = endpoint(&self.host, "tags");
        let response = self
            .send_with_retry(|| self.with_timeout(self.http.get(&url)), None)
            .await?;
        let tags = response.json::<TagsResponse>().await?;
        Ok(tags
            .models
            .iter()
            .filter_map(|entry| entry.display_name())
            .collect())
    }

    /// Pulls a model and waits for the server to report completion.
    pub async fn pull(&self, model: &str) -> Result<(), OllamaApiError> {
        let url = endpoint(&self.host, "pull");
        let body = json!({ "model": model, "stream": true });
        let response = self
            .send_with_retry(|| self.http.post(&url).json(&body), None)
            .await?;
        let mut bytes = response.bytes_stream();
        let mut parser = NdjsonStreamParser::<PullStatus>::default();

        while let Some(chunk) = bytes.next().await {
            for frame in parser.feed(&chunk?) {
                if let Some(message) = check_pull_frame(frame, model)? {
                    debug!(event = "ollama.pull.status", model, status = %message);
                }
            }
        }
        if let Some(frame) = parser.finish() {
            check_pull_frame(frame, model)?;
        }
        Ok(())
    }

    /// Server version; doubles as a connectivity probe.
    pub async fn version(&self) -> Result<String, OllamaApiError> {
        let url = endpoint(&self.host, "version");
        let response = self
            .send_with_retry(|| self.with_timeout(self.http.get(&url)), None)
            .await?;
        Ok(response.json::<VersionResponse>().await?.version)
    }

    fn with_timeout(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.config.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    async fn send_with_retry<F>(
        &self,
        build: F,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Response, OllamaApiError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        loop {
            if is_cancelled(cancellation) {
                return Err(OllamaApiError::Cancelled);
            }

            let response = await_or_cancel(build().send(), cancellation).await??;
            if response.status().is_success() {
                return Ok(response);
            }

            let status = response.status();
            let body = await_or_cancel(response.text(), cancellation)
                .await?
                .unwrap_or_default();
            let message = parse_error_message(status, &body);

            if attempt < self.config.max_retries && is_retryable_http_error(status.as_u16(), &body) {
                let delay = retry_delay(attempt);
                warn!(
                    event = "ollama.request.retry",
                    status = status.as_u16(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    %message,
                    "retrying request after transient HTTP status"
                );
                await_or_cancel(tokio::time::sleep(delay), cancellation).await?;
                attempt += 1;
                continue;
            }

            return Err(OllamaApiError::status(status, message));
        }
    }
}

fn build_headers(config: &OllamaApiConfig) -> Result<HeaderMap, OllamaApiError> {
    let mut headers = HeaderMap::new();
    for (key, value) in &config.extra_headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| OllamaApiError::InvalidHeader(key.clone()))?;
        let value =
            HeaderValue::from_str(value).map_err(|_| OllamaApiError::InvalidHeader(key.clone()))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

fn check_pull_frame(frame: PullStatus, model: &str) -> Result<Option<String>, OllamaApiError> {
    if let Some(message) = frame.error {
        return Err(OllamaApiError::Backend(format!(
            "pulling '{model}' failed: {message}"
        )));
    }
    Ok(frame.status)
}

fn is_cancelled(cancel: Option<&CancellationToken>) -> bool {
    cancel.is_some_and(CancellationToken::is_cancelled)
}

async fn await_or_cancel<F>(
    future: F,
    cancellation: Option<&CancellationToken>,
) -> Result<F::Output, OllamaApiError>
where
    F: Future,
{
    let Some(cancel) = cancellation else {
        return Ok(future.await);
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OllamaApiError::Cancelled),
        output = future => Ok(output),
    }
}
