use chat_provider::{ChatMessage, Role};
use serde::Serialize;
use serde_json::Value;
use session_store::StoredMessage;

const ROLE_TOKEN_COST: usize = 2;
const MESSAGE_TOKEN_OVERHEAD: usize = 2;

/// Deterministic token estimate for one message.
///
/// `role cost + chars / 4 + word count + overhead`; no tokenizer involved so
/// trimming decisions are reproducible.
#[must_use]
pub fn estimate_tokens(content: &str) -> usize {
    ROLE_TOKEN_COST
        + content.chars().count() / 4
        + content.split_whitespace().count()
        + MESSAGE_TOKEN_OVERHEAD
}

/// One history entry. The token estimate is cached and recomputed on every
/// content change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    role: Role,
    content: String,
    #[serde(skip)]
    token_estimate: usize,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            role,
            token_estimate: estimate_tokens(&content),
            content,
        }
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub fn token_estimate(&self) -> usize {
        self.token_estimate
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.token_estimate = estimate_tokens(&self.content);
    }

    #[must_use]
    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }

    #[must_use]
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage::new(self.role, self.content.clone())
    }
}

impl From<&Message> for StoredMessage {
    fn from(message: &Message) -> Self {
        StoredMessage::new(message.role, message.content.clone())
    }
}

/// Ordered, bounded conversation history.
///
/// Two independent limits apply: `max_history_messages` caps the number of stored
/// messages (oldest non-system messages are evicted first), and
/// `max_context_tokens` caps what [`MessageStore::build_api_context`] hands to
/// the backend.
#[derive(Debug, Clone)]
pub struct MessageStore {
    base_messages: Vec<Message>,
    messages: Vec<Message>,
    max_history_messages: usize,
    max_context_tokens: usize,
}

impl MessageStore {
    /// Both limits are clamped to at least 1.
    #[must_use]
    pub fn new(
        base_messages: Vec<Message>,
        max_history_messages: usize,
        max_context_tokens: usize,
    ) -> Self {
        let mut store = Self {
            messages: base_messages.clone(),
            base_messages,
            max_history_messages: max_history_messages.max(1),
            max_context_tokens: max_context_tokens.max(1),
        };
        store.trim_by_history_limit();
        store
    }

    /// Store seeded with a single system prompt, or nothing when the prompt is blank.
    #[must_use]
    pub fn with_system_prompt(
        system_prompt: &str,
        max_history_messages: usize,
        max_context_tokens: usize,
    ) -> Self {
        let system_prompt = system_prompt.trim();
        let base = if system_prompt.is_empty() {
            Vec::new()
        } else {
            vec![Message::new(Role::System, system_prompt)]
        };
        Self::new(base, max_history_messages, max_context_tokens)
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn base_messages(&self) -> &[Message] {
        &self.base_messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[must_use]
    pub fn max_history_messages(&self) -> usize {
        self.max_history_messages
    }

    #[must_use]
    pub fn max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    /// Appends a message with trimmed content, then enforces the history limit.
    pub fn append(&mut self, role: Role, content: &str) {
        self.messages.push(Message::new(role, content.trim()));
        self.trim_by_history_limit();
    }

    /// Replaces the whole history, e.g. after loading a saved conversation.
    ///
    /// Content is trimmed and every estimate recomputed. The base system messages
    /// are prepended when the replacement carries no system message of its own.
    /// An empty replacement behaves like [`MessageStore::clear`].
    pub fn replace_messages<I, S>(&mut self, messages: I)
    where
        I: IntoIterator<Item = (Role, S)>,
        S: AsRef<str>,
    {
        let normalized: Vec<Message> = messages
            .into_iter()
            .map(|(role, content)| Message::new(role, content.as_ref().trim()))
            .collect();

        if normalized.is_empty() {
            self.clear();
            return;
        }

        self.messages = if normalized.iter().any(Message::is_system) {
            normalized
        } else {
            self.base_messages.iter().cloned().chain(normalized).collect()
        };
        self.trim_by_history_limit();
    }

    /// Re-seeds the history from the base messages.
    pub fn clear(&mut self) {
        self.messages = self.base_messages.clone();
    }

    /// Sum of cached estimates, never below 1.
    #[must_use]
    pub fn estimated_tokens(&self) -> usize {
        self.messages
            .iter()
            .map(Message::token_estimate)
            .sum::<usize>()
            .max(1)
    }

    /// Messages to send for the next request, within `limit` tokens
    /// (`max_context_tokens` when `None`).
    ///
    /// Every system message is kept and the longest contiguous tail of
    /// non-system messages that fits the remaining budget follows them. Nothing
    /// is ever dropped from the middle. When the system messages alone exceed the
    /// limit they are returned without any other message.
    #[must_use]
    pub fn build_api_context(&self, limit: Option<usize>) -> Vec<Message> {
        let limit = limit.unwrap_or(self.max_context_tokens).max(1);
        let total: usize = self.messages.iter().map(Message::token_estimate).sum();
        if total <= limit {
            return self.messages.clone();
        }

        let (system, rest): (Vec<&Message>, Vec<&Message>) =
            self.messages.iter().partition(|message| message.is_system());
        if rest.is_empty() {
            return self.messages.clone();
        }

        let system_cost: usize = system.iter().map(|message| message.token_estimate).sum();
        let mut remaining = limit.saturating_sub(system_cost);
        let mut kept = 0usize;
        for message in rest.iter().rev() {
            if message.token_estimate > remaining {
                break;
            }
            remaining -= message.token_estimate;
            kept += 1;
        }

        system
            .into_iter()
            .chain(rest[rest.len() - kept..].iter().copied())
            .cloned()
            .collect()
    }

    /// Removes the last message only when it is a user turn.
    pub fn rollback_last_user_append(&mut self) -> bool {
        if self
            .messages
            .last()
            .is_some_and(|message| message.role == Role::User)
        {
            self.messages.pop();
            return true;
        }
        false
    }

    /// Compact `[{"role": ..., "content": ...}]` rendering in store order.
    #[must_use]
    pub fn export_json(&self) -> String {
        Value::Array(
            self.messages
                .iter()
                .map(|message| {
                    serde_json::json!({
                        "role": message.role.as_str(),
                        "content": message.content,
                    })
                })
                .collect(),
        )
        .to_string()
    }

    #[must_use]
    pub fn to_stored(&self) -> Vec<StoredMessage> {
        self.messages.iter().map(StoredMessage::from).collect()
    }

    fn trim_by_history_limit(&mut self) {
        if self.messages.len() <= self.max_history_messages {
            return;
        }

        let system_count = self.messages.iter().filter(|message| message.is_system()).count();
        let keep_other = self.max_history_messages.saturating_sub(system_count);
        let other_count = self.messages.len() - system_count;
        let mut to_evict = other_count.saturating_sub(keep_other);

        self.messages.retain(|message| {
            if to_evict > 0 && !message.is_system() {
                to_evict -= 1;
                return false;
            }
            true
        });
    }
}
