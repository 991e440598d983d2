//! Terminal chat engine for locally hosted Ollama models.
//!
//! ## Backend bootstrap
//!
//! The backend is selected by `ollama.backend` in the config file or by
//! `OLLAMA_CHAT_BACKEND`:
//!
//! - `ollama` streams from the server at `ollama.host` (`OLLAMA_HOST`)
//! - `mock` replies with canned text, for local testing without a server
//!
//! The config file lives at `$OLLAMA_CHAT_CONFIG`, falling back to
//! `$XDG_CONFIG_HOME/ollamaterm/config.toml`. A missing file means defaults.
//! Unknown keys are rejected.
//!
//! ## Conversation contract
//!
//! [`message_store::MessageStore`] owns the model-facing history. A user turn is
//! appended before a request is sent and removed again if the request fails or is
//! cancelled, so the history never ends on an unanswered user message.
//! Tool-calling iterations stay inside [`agent_loop::AgentLoop::send`]; only the
//! final assistant text is committed.

pub mod agent_loop;
pub mod capability;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod message_store;
pub mod providers;
pub mod repl;
pub mod state;
pub mod stream_handler;
pub mod tasks;
pub mod tools;

pub use agent_loop::{AgentLoop, AgentLoopOptions, ChatChunk, SendRequest};
pub use config::Config;
pub use error::ChatError;
pub use message_store::{Message, MessageStore};
pub use state::{ConversationState, StateManager};
pub use stream_handler::{RenderSurface, StreamHandler};
pub use tasks::TaskManager;
