use async_trait::async_trait;
use chat_provider::{BackendError, ChatBackend, ChatRequest, DeltaStream, ModelDescription};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::OllamaApiClient;
use crate::config::OllamaApiConfig;
use crate::error::OllamaApiError;
use crate::payload::OllamaChatRequest;

/// Stable backend identifier used for explicit startup selection.
pub const OLLAMA_BACKEND_ID: &str = "ollama";

/// [`ChatBackend`] over the Ollama HTTP API.
#[derive(Debug)]
pub struct OllamaBackend {
    client: OllamaApiClient,
}

impl OllamaBackend {
    pub fn new(config: OllamaApiConfig) -> Result<Self, OllamaApiError> {
        Ok(Self {
            client: OllamaApiClient::new(config)?,
        })
    }

    pub fn client(&self) -> &OllamaApiClient {
        &self.client
    }

    /// Probes the server and returns its version string.
    pub async fn server_version(&self) -> Result<String, BackendError> {
        self.client
            .version()
            .await
            .map_err(|error| error.into_backend_error(self.client.host(), ""))
    }
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn backend_id(&self) -> &str {
        OLLAMA_BACKEND_ID
    }

    fn host(&self) -> &str {
        self.client.host()
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, BackendError> {
        let host = self.client.host().to_string();
        let model = request.model.clone();
        let payload = OllamaChatRequest::from(&request);
        debug!(
            event = "ollama.chat.open",
            model = %model,
            messages = payload.messages.len(),
            tools = payload.tools.len(),
            think = payload.think.is_some(),
        );

        let frames = self
            .client
            .chat_stream(&payload, cancel)
            .await
            .map_err(|error| error.into_backend_error(&host, &model))?;

        Ok(Box::pin(frames.map(move |frame| match frame {
            Ok(frame) => Ok(frame.into_delta()),
            Err(error) => Err(error.into_backend_error(&host, &model)),
        })))
    }

    async fn show_model(&self, model: &str) -> Result<ModelDescription, BackendError> {
        let response = self
            .client
            .show(model)
            .await
            .map_err(|error| error.into_backend_error(self.client.host(), model))?;
        Ok(ModelDescription {
            capabilities: response.capabilities,
        })
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        self.client
            .tags()
            .await
            .map_err(|error| error.into_backend_error(self.client.host(), ""))
    }

    async fn pull_model(&self, model: &str) -> Result<(), BackendError> {
        self.client
            .pull(model)
            .await
            .map_err(|error| error.into_backend_error(self.client.host(), model))
    }
}
