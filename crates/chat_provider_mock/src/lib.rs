//! Deterministic scripted implementation of the `chat_provider` contract.
//!
//! This crate contains no transport logic. Each `stream_chat` call consumes the
//! next scripted turn, which makes it the fixture of choice for agent-loop tests
//! and for offline runs of the binary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chat_provider::{
    BackendError, ChatBackend, ChatDelta, ChatRequest, DeltaStream, ModelDescription,
};
use futures_util::{stream, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

/// Stable backend identifier used for explicit startup selection.
pub const MOCK_BACKEND_ID: &str = "mock";

const MOCK_HOST: &str = "mock://local";

/// One scripted response to a `stream_chat` call.
#[derive(Debug, Clone)]
pub enum ScriptedTurn {
    /// Streams the deltas, then ends.
    Reply(Vec<ChatDelta>),
    /// Fails before any delta is produced.
    Refuse(BackendError),
    /// Streams the deltas, then yields the error.
    BreakAfter(Vec<ChatDelta>, BackendError),
    /// Streams the deltas, then waits until the request is cancelled.
    Stall(Vec<ChatDelta>),
}

impl ScriptedTurn {
    /// Plain text reply split into the given content pieces.
    #[must_use]
    pub fn text(pieces: &[&str]) -> Self {
        let mut deltas: Vec<ChatDelta> = pieces.iter().map(|piece| ChatDelta::content(*piece)).collect();
        deltas.push(ChatDelta::done());
        Self::Reply(deltas)
    }

    /// Single tool call with an optional batch index.
    #[must_use]
    pub fn tool_call(name: &str, arguments: Value, index: Option<u32>) -> Self {
        Self::Reply(vec![
            ChatDelta::tool_call(name, arguments, index),
            ChatDelta::done(),
        ])
    }
}

#[derive(Debug, Clone)]
enum ShowScript {
    Capabilities(Value),
    Absent,
    Fail(BackendError),
}

/// Scripted backend that records every request it receives.
#[derive(Debug)]
pub struct ScriptedBackend {
    turns: Mutex<VecDeque<ScriptedTurn>>,
    repeat: Option<ScriptedTurn>,
    show: ShowScript,
    models: Vec<String>,
    requests: Mutex<Vec<ChatRequest>>,
    pulled: Mutex<Vec<String>>,
    show_calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Creates a backend that answers `stream_chat` calls with `turns` in order.
    ///
    /// The model reports tools, vision and thinking support unless overridden.
    #[must_use]
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            repeat: None,
            show: ShowScript::Capabilities(json!(["completion", "tools", "vision", "thinking"])),
            models: vec!["mock:latest".to_string()],
            requests: Mutex::new(Vec::new()),
            pulled: Mutex::new(Vec::new()),
            show_calls: AtomicUsize::new(0),
        }
    }

    /// Answers with `turn` once the scripted queue is exhausted.
    #[must_use]
    pub fn with_repeating(mut self, turn: ScriptedTurn) -> Self {
        self.repeat = Some(turn);
        self
    }

    /// Reports `capabilities` verbatim from the describe-model call.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Value) -> Self {
        self.show = ShowScript::Capabilities(capabilities);
        self
    }

    /// Omits the capability field, as older servers do.
    #[must_use]
    pub fn with_unknown_capabilities(mut self) -> Self {
        self.show = ShowScript::Absent;
        self
    }

    /// Fails the describe-model call.
    #[must_use]
    pub fn with_failing_show(mut self, error: BackendError) -> Self {
        self.show = ShowScript::Fail(error);
        self
    }

    #[must_use]
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Requests received so far, in call order.
    #[must_use]
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    #[must_use]
    pub fn stream_calls(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    #[must_use]
    pub fn show_calls(&self) -> usize {
        self.show_calls.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn pulled_models(&self) -> Vec<String> {
        lock_unpoisoned(&self.pulled).clone()
    }

    fn next_turn(&self) -> Option<ScriptedTurn> {
        lock_unpoisoned(&self.turns)
            .pop_front()
            .or_else(|| self.repeat.clone())
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new(Vec::new()).with_repeating(ScriptedTurn::text(&[
            "This reply comes from the scripted mock backend. ",
            "Set OLLAMA_CHAT_BACKEND=ollama to talk to a local Ollama server.",
        ]))
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn backend_id(&self) -> &str {
        MOCK_BACKEND_ID
    }

    fn host(&self) -> &str {
        MOCK_HOST
    }

    async fn stream_chat(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<DeltaStream, BackendError> {
        lock_unpoisoned(&self.requests).push(request);

        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        let Some(turn) = self.next_turn() else {
            return Err(BackendError::streaming("scripted backend has no turn left"));
        };

        let stream: DeltaStream = match turn {
            ScriptedTurn::Reply(deltas) => Box::pin(stream::iter(deltas.into_iter().map(Ok))),
            ScriptedTurn::Refuse(error) => return Err(error),
            ScriptedTurn::BreakAfter(deltas, error) => Box::pin(
                stream::iter(deltas.into_iter().map(Ok)).chain(stream::once(async move { Err(error) })),
            ),
            ScriptedTurn::Stall(deltas) => Box::pin(stream::iter(deltas.into_iter().map(Ok)).chain(
                stream::once(async move {
                    cancel.cancelled().await;
                    Err(BackendError::Cancelled)
                }),
            )),
        };

        Ok(stream)
    }

    async fn show_model(&self, _model: &str) -> Result<ModelDescription, BackendError> {
        self.show_calls.fetch_add(1, Ordering::AcqRel);
        match &self.show {
            ShowScript::Capabilities(value) => Ok(ModelDescription {
                capabilities: Some(value.clone()),
            }),
            ShowScript::Absent => Ok(ModelDescription { capabilities: None }),
            ShowScript::Fail(error) => Err(error.clone()),
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.models.clone())
    }

    async fn pull_model(&self, model: &str) -> Result<(), BackendError> {
        lock_unpoisoned(&self.pulled).push(model.to_string());
        Ok(())
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
