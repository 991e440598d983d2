//! Transport-only client for a local Ollama server.
//!
//! This crate owns request building, NDJSON stream parsing, transport retries,
//! and the mapping of HTTP failures into the backend-neutral error taxonomy. It
//! holds no conversation state.

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod ndjson;
pub mod payload;
pub mod retry;
pub mod url;

pub use backend::{OllamaBackend, OLLAMA_BACKEND_ID};
pub use client::{ChunkStream, OllamaApiClient};
pub use config::OllamaApiConfig;
pub use error::OllamaApiError;
pub use events::{ChatResponseChunk, ResponseMessage, ShowResponse};
pub use ndjson::NdjsonStreamParser;
pub use payload::{encode_image, OllamaChatRequest};
pub use url::{normalize_host, DEFAULT_OLLAMA_HOST};
