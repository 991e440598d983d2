#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat_provider::ChatBackend;
use chat_provider_mock::ScriptedBackend;
use ollama_chat::agent_loop::{AgentLoop, AgentLoopOptions, ChatChunk, SendRequest};
use ollama_chat::capability::{CapabilityCache, CapabilityManager, CapabilityPreferences};
use ollama_chat::error::ChatError;
use ollama_chat::message_store::MessageStore;
use ollama_chat::tools::{
    object_schema, Tool, ToolContext, ToolError, ToolRegistry, ToolRuntimeOptions, ToolSpec,
};
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub const MODEL: &str = "mock:latest";

pub fn options() -> AgentLoopOptions {
    AgentLoopOptions::new(MODEL)
        .with_retries(2)
        .with_retry_backoff(Duration::from_millis(1))
}

pub fn agent(backend: &Arc<ScriptedBackend>) -> AgentLoop {
    agent_with_store(backend, MessageStore::with_system_prompt("be brief", 50, 4096))
}

pub fn agent_with_store(backend: &Arc<ScriptedBackend>, store: MessageStore) -> AgentLoop {
    agent_with(backend, store, options())
}

pub fn agent_with(
    backend: &Arc<ScriptedBackend>,
    store: MessageStore,
    options: AgentLoopOptions,
) -> AgentLoop {
    let backend: Arc<dyn ChatBackend> = Arc::clone(backend) as Arc<dyn ChatBackend>;
    let capabilities = CapabilityManager::new(
        Arc::clone(&backend),
        CapabilityCache::in_memory(),
        CapabilityPreferences::default(),
    );
    AgentLoop::new(backend, store, capabilities, options)
}

/// Sends `request` and returns the outcome with every emitted chunk.
pub async fn send_collect(
    agent: &mut AgentLoop,
    request: SendRequest,
) -> (Result<(), ChatError>, Vec<ChatChunk>) {
    let cancel = CancellationToken::new();
    let mut chunks = Vec::new();
    let result = agent
        .send(request, &cancel, |chunk| chunks.push(chunk))
        .await;
    (result, chunks)
}

pub fn content_of(chunks: &[ChatChunk]) -> String {
    chunks
        .iter()
        .filter_map(|chunk| match chunk {
            ChatChunk::Content { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn tool_results(chunks: &[ChatChunk]) -> Vec<String> {
    chunks
        .iter()
        .filter_map(|chunk| match chunk {
            ChatChunk::ToolResult { result, .. } => Some(result.clone()),
            _ => None,
        })
        .collect()
}

pub fn history(agent: &AgentLoop) -> Vec<(String, String)> {
    agent
        .messages()
        .iter()
        .map(|message| {
            (
                message.role().as_str().to_string(),
                message.content().to_string(),
            )
        })
        .collect()
}

#[derive(Debug, Deserialize)]
pub struct EchoParams {
    pub text: String,
}

/// Returns its input, prefixed.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    type Params = EchoParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "echo",
            "Echo the given text.",
            object_schema(json!({"text": {"type": "string"}}), &["text"]),
        )
    }

    async fn execute(&self, params: EchoParams, _ctx: &ToolContext) -> Result<String, ToolError> {
        Ok(format!("echo: {}", params.text))
    }
}

pub fn echo_registry() -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new(ToolRuntimeOptions::default());
    registry.register(EchoTool);
    Arc::new(registry)
}
