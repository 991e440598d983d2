//! Streaming tool-calling loop for one user turn.
//!
//! [`AgentLoop::send`] appends the user message, streams model turns, executes
//! requested tools and feeds their results back until the model answers without
//! tool calls or the iteration budget runs out. Any error, including
//! cancellation and dropping the `send` future, removes the user message again.

mod inline;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chat_provider::{
    model_name_matches, ChatBackend, ChatMessage, ChatRequest, Role, ThinkMode, ToolCall,
};
use futures_util::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use inline::parse_inline_tool_calls;

use crate::capability::CapabilityManager;
use crate::error::ChatError;
use crate::message_store::{Message, MessageStore};
use crate::tools::{ApprovalHandler, AutoApprove, ToolContext, ToolError, ToolRegistry};

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;

/// One ordered event of a streamed reply.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    Thinking {
        text: String,
    },
    Content {
        text: String,
    },
    ToolCall {
        name: String,
        arguments: Value,
        index: Option<u32>,
    },
    ToolResult {
        name: String,
        arguments: Value,
        result: String,
    },
}

/// Input of one [`AgentLoop::send`] call.
#[derive(Clone)]
pub struct SendRequest {
    pub text: String,
    /// Base64 images attached to this request only. Never stored in history.
    pub images: Vec<String>,
    pub think: bool,
    pub tools: Option<Arc<ToolRegistry>>,
    pub max_tool_iterations: usize,
}

impl SendRequest {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            images: Vec::new(),
            think: false,
            tools: None,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
        }
    }

    #[must_use]
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    #[must_use]
    pub fn with_think(mut self, think: bool) -> Self {
        self.think = think;
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    #[must_use]
    pub fn with_max_tool_iterations(mut self, max_tool_iterations: usize) -> Self {
        self.max_tool_iterations = max_tool_iterations;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentLoopOptions {
    pub model: String,
    pub retries: u32,
    pub retry_backoff: Duration,
}

impl AgentLoopOptions {
    #[must_use]
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            retries: 2,
            retry_backoff: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    #[must_use]
    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }
}

struct FormattedTools {
    registry: Arc<ToolRegistry>,
    schemas: Vec<Value>,
}

/// Conversation engine bound to one backend.
pub struct AgentLoop {
    backend: Arc<dyn ChatBackend>,
    store: MessageStore,
    capabilities: CapabilityManager,
    options: AgentLoopOptions,
    approver: Arc<dyn ApprovalHandler>,
    session_id: String,
    formatted_tools: Option<FormattedTools>,
}

impl AgentLoop {
    #[must_use]
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        store: MessageStore,
        capabilities: CapabilityManager,
        options: AgentLoopOptions,
    ) -> Self {
        Self {
            backend,
            store,
            capabilities,
            options,
            approver: Arc::new(AutoApprove),
            session_id: Uuid::new_v4().to_string(),
            formatted_tools: None,
        }
    }

    #[must_use]
    pub fn with_approver(mut self, approver: Arc<dyn ApprovalHandler>) -> Self {
        self.approver = approver;
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.options.model
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    #[must_use]
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    #[must_use]
    pub fn capabilities(&self) -> &CapabilityManager {
        &self.capabilities
    }

    pub fn capabilities_mut(&mut self) -> &mut CapabilityManager {
        &mut self.capabilities
    }

    #[must_use]
    pub fn estimated_context_tokens(&self) -> usize {
        self.store.estimated_tokens()
    }

    /// Re-seeds the history from the base messages.
    pub fn clear_history(&mut self) {
        self.store.clear();
    }

    /// Replaces the history, e.g. with a loaded conversation.
    pub fn load_history<I, S>(&mut self, messages: I)
    where
        I: IntoIterator<Item = (Role, S)>,
        S: AsRef<str>,
    {
        self.store.replace_messages(messages);
    }

    /// Switches the active model. Blank names and the current model are ignored.
    pub fn set_model(&mut self, model: &str) {
        let model = model.trim();
        if model.is_empty() || model == self.options.model {
            return;
        }
        info!(event = "chat.model.switch", from = %self.options.model, to = %model);
        self.options.model = model.to_string();
        self.capabilities.set_model(model);
        self.formatted_tools = None;
    }

    pub async fn list_models(&self) -> Result<Vec<String>, ChatError> {
        Ok(self.backend.list_models().await?)
    }

    /// True when the backend answers a model listing.
    pub async fn check_connection(&self) -> bool {
        match self.backend.list_models().await {
            Ok(_) => true,
            Err(error) => {
                debug!(event = "chat.connection.failed", error = %error);
                false
            }
        }
    }

    /// Makes sure the active model is installed, pulling it when allowed.
    pub async fn ensure_model_ready(&self, pull_if_missing: bool) -> Result<(), ChatError> {
        let model = self.options.model.as_str();
        let available = self.backend.list_models().await?;
        if available
            .iter()
            .any(|candidate| model_name_matches(model, candidate))
        {
            info!(event = "chat.model.ready", model = %model);
            return Ok(());
        }

        if !pull_if_missing {
            return Err(ChatError::ModelNotFound {
                model: model.to_string(),
                host: self.backend.host().to_string(),
            });
        }

        info!(event = "chat.model.pull.start", model = %model);
        self.backend.pull_model(model).await?;
        info!(event = "chat.model.pull.complete", model = %model);
        Ok(())
    }

    /// Runs one user turn, passing every chunk to `emit` in order.
    ///
    /// Blank text without images is a no-op. On error the user message is
    /// rolled back before the error is returned.
    pub async fn send<F>(
        &mut self,
        request: SendRequest,
        cancel: &CancellationToken,
        mut emit: F,
    ) -> Result<(), ChatError>
    where
        F: FnMut(ChatChunk) + Send,
    {
        let text = request.text.trim().to_string();
        if text.is_empty() && request.images.is_empty() {
            return Ok(());
        }

        let schemas = self.formatted_tools(request.tools.as_ref());
        let tool_context = request.tools.as_ref().map(|registry| {
            registry
                .context(self.session_id.clone(), Arc::clone(&self.approver))
                .with_cancel(cancel.clone())
        });
        let context_window = u32::try_from(self.store.max_context_tokens()).unwrap_or(u32::MAX);

        self.store.append(Role::User, &text);
        let mut pending = PendingUserTurn::new(&mut self.store);

        let mut messages: Vec<ChatMessage> = pending
            .store()
            .build_api_context(None)
            .iter()
            .map(Message::to_chat_message)
            .collect();
        if !request.images.is_empty() {
            if let Some(last) = messages.last_mut() {
                last.images = request.images.clone();
            }
        }

        let mut turn = Turn {
            backend: self.backend.as_ref(),
            capabilities: &mut self.capabilities,
            options: &self.options,
            cancel,
            context_window,
            think: request.think,
            schemas,
            registry: request.tools.clone(),
            tool_context,
            has_images: !request.images.is_empty(),
        };
        let final_content = turn
            .run(messages, request.max_tool_iterations.max(1), &mut emit)
            .await?;

        pending.commit(&final_content);
        Ok(())
    }

    fn formatted_tools(&mut self, registry: Option<&Arc<ToolRegistry>>) -> Vec<Value> {
        let Some(registry) = registry.filter(|registry| !registry.is_empty()) else {
            return Vec::new();
        };
        match &self.formatted_tools {
            Some(cached) if Arc::ptr_eq(&cached.registry, registry) => cached.schemas.clone(),
            _ => {
                let schemas = registry.tool_schemas();
                self.formatted_tools = Some(FormattedTools {
                    registry: Arc::clone(registry),
                    schemas: schemas.clone(),
                });
                schemas
            }
        }
    }
}

/// Removes the user message again unless the turn completes.
struct PendingUserTurn<'a> {
    store: &'a mut MessageStore,
    armed: bool,
}

impl<'a> PendingUserTurn<'a> {
    fn new(store: &'a mut MessageStore) -> Self {
        Self { store, armed: true }
    }

    fn store(&self) -> &MessageStore {
        self.store
    }

    fn commit(mut self, assistant_content: &str) {
        self.armed = false;
        self.store.append(Role::Assistant, assistant_content);
    }
}

impl Drop for PendingUserTurn<'_> {
    fn drop(&mut self) {
        if self.armed && self.store.rollback_last_user_append() {
            info!(event = "chat.request.rolled_back");
        }
    }
}

#[derive(Debug, Default)]
struct TurnParts {
    thinking: String,
    content: String,
    tool_calls: Vec<ToolCall>,
}

struct Turn<'a> {
    backend: &'a dyn ChatBackend,
    capabilities: &'a mut CapabilityManager,
    options: &'a AgentLoopOptions,
    cancel: &'a CancellationToken,
    context_window: u32,
    think: bool,
    schemas: Vec<Value>,
    registry: Option<Arc<ToolRegistry>>,
    tool_context: Option<ToolContext>,
    has_images: bool,
}

impl Turn<'_> {
    async fn run<F>(
        &mut self,
        mut messages: Vec<ChatMessage>,
        max_iterations: usize,
        emit: &mut F,
    ) -> Result<String, ChatError>
    where
        F: FnMut(ChatChunk) + Send,
    {
        let mut last_iteration_content = String::new();

        for iteration in 0..max_iterations {
            let parts = self.stream_with_retries(&messages, emit).await?;
            if parts.tool_calls.is_empty() {
                return Ok(parts.content.trim().to_string());
            }

            let echoed = parts
                .tool_calls
                .iter()
                .enumerate()
                .map(|(seq, call)| {
                    let index = call
                        .index
                        .unwrap_or_else(|| u32::try_from(seq).unwrap_or(u32::MAX));
                    ToolCall::new(call.name.clone(), call.arguments.clone(), Some(index))
                })
                .collect();
            messages.push(ChatMessage::assistant_tool_calls(
                parts.content.clone(),
                Some(parts.thinking.clone()),
                echoed,
            ));

            for call in &parts.tool_calls {
                info!(
                    event = "chat.tool.call",
                    tool = %call.name,
                    iteration = iteration + 1
                );
                let result = self.execute_tool(call).await?;
                emit(ChatChunk::ToolResult {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: result.clone(),
                });
                messages.push(ChatMessage::tool_result(call.name.clone(), result));
            }

            last_iteration_content = parts.content;
        }

        info!(
            event = "chat.tool.iterations_exhausted",
            max_iterations = max_iterations
        );
        Ok(last_iteration_content.trim().to_string())
    }

    async fn stream_with_retries<F>(
        &mut self,
        messages: &[ChatMessage],
        emit: &mut F,
    ) -> Result<TurnParts, ChatError>
    where
        F: FnMut(ChatChunk) + Send,
    {
        let mut attempt: u32 = 0;
        loop {
            let error = match self.stream_once(messages, emit).await {
                Ok(parts) => return Ok(parts),
                Err(error) => error,
            };

            if matches!(error, ChatError::Cancelled) {
                info!(event = "chat.request.cancelled");
                return Err(error);
            }
            if !error.is_retryable() || attempt >= self.options.retries {
                warn!(
                    event = "chat.request.failed",
                    attempt = attempt + 1,
                    error_type = error.kind(),
                    error = %error
                );
                return Err(error);
            }

            warn!(
                event = "chat.request.retry",
                attempt = attempt + 1,
                error_type = error.kind()
            );
            let delay = self.options.retry_backoff * (attempt + 1);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ChatError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    async fn stream_once<F>(
        &mut self,
        messages: &[ChatMessage],
        emit: &mut F,
    ) -> Result<TurnParts, ChatError>
    where
        F: FnMut(ChatChunk) + Send,
    {
        let model = self.options.model.clone();
        let caps = self.capabilities.ensure_support(&model).await;

        if self.has_images && !caps.supports_vision {
            warn!(event = "chat.images.unsupported", model = %model);
        }
        let think = (self.think && caps.supports_thinking).then(|| ThinkMode::for_model(&model));
        let tools = if caps.supports_tools {
            self.schemas.clone()
        } else {
            Vec::new()
        };
        let allowed = advertised_names(&tools);
        let tools_sent = !tools.is_empty();

        let request = ChatRequest {
            model,
            messages: messages.to_vec(),
            context_window: self.context_window,
            think,
            tools,
        };

        let mut stream = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(ChatError::Cancelled),
            opened = self.backend.stream_chat(request, self.cancel.clone()) => opened?,
        };

        let mut parts = TurnParts::default();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(ChatError::Cancelled),
                next = stream.next() => next,
            };
            let Some(delta) = next else {
                break;
            };
            let delta = delta?;

            if !delta.thinking.is_empty() {
                parts.thinking.push_str(&delta.thinking);
                emit(ChatChunk::Thinking {
                    text: delta.thinking.clone(),
                });
            }
            if !delta.content.is_empty() {
                parts.content.push_str(&delta.content);
                emit(ChatChunk::Content {
                    text: delta.content.clone(),
                });
            }

            let calls = if delta.tool_calls.is_empty() && tools_sent && !delta.content.is_empty() {
                parse_inline_tool_calls(&delta.content, &allowed)
            } else {
                delta.tool_calls
            };
            for call in calls.into_iter().filter(|call| !call.name.is_empty()) {
                let call = ToolCall::new(
                    call.name,
                    inline::object_arguments(Some(&call.arguments)),
                    call.index,
                );
                emit(ChatChunk::ToolCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    index: call.index,
                });
                parts.tool_calls.push(call);
            }

            if delta.done {
                break;
            }
        }

        Ok(parts)
    }

    /// Runs one call. Tool failures become text for the model; only
    /// cancellation aborts the turn.
    async fn execute_tool(&self, call: &ToolCall) -> Result<String, ChatError> {
        let outcome = match (&self.registry, &self.tool_context) {
            (Some(registry), Some(ctx)) => {
                registry
                    .execute(&call.name, call.arguments.clone(), ctx)
                    .await
            }
            _ => Err(ToolError::UnknownTool(call.name.clone())),
        };

        if self.cancel.is_cancelled() {
            return Err(ChatError::Cancelled);
        }
        match outcome {
            Ok(output) => Ok(output),
            Err(ToolError::Cancelled) => Err(ChatError::Cancelled),
            Err(error) => {
                warn!(event = "chat.tool.error", tool = %call.name, error = %error);
                Ok(format!("[Tool error: {error}]"))
            }
        }
    }
}

fn advertised_names(tools: &[Value]) -> BTreeSet<String> {
    tools
        .iter()
        .filter_map(|tool| tool.pointer("/function/name").and_then(Value::as_str))
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
