use std::sync::Arc;

use chat_provider::ChatBackend;
use chat_provider_mock::{ScriptedBackend, MOCK_BACKEND_ID};
use ollama_api::{OllamaApiConfig, OllamaBackend, OLLAMA_BACKEND_ID};

use crate::config::OllamaConfig;

/// Builds the backend named by `config.backend`.
pub fn backend_from_config(config: &OllamaConfig) -> Result<Arc<dyn ChatBackend>, String> {
    backend_for_id(config.backend.trim(), config)
}

pub fn backend_for_id(
    backend_id: &str,
    config: &OllamaConfig,
) -> Result<Arc<dyn ChatBackend>, String> {
    match backend_id {
        OLLAMA_BACKEND_ID => {
            let api_config = OllamaApiConfig::new(config.host.clone()).with_timeout(config.timeout());
            let backend = OllamaBackend::new(api_config)
                .map_err(|error| format!("Failed to configure Ollama backend: {error}"))?;
            Ok(Arc::new(backend))
        }
        MOCK_BACKEND_ID => Ok(Arc::new(ScriptedBackend::default())),
        unknown => Err(format!(
            "Unsupported backend '{unknown}'. Available backends: {OLLAMA_BACKEND_ID}, {MOCK_BACKEND_ID}"
        )),
    }
}
