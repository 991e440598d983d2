//! TOML configuration for the chat client.
//!
//! Every section defaults independently, so a partial file (or none at all) is
//! valid. [`Config::load`] reads the file, applies environment overrides and
//! validates ranges before anything else uses the values.

use std::env;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::capability::CapabilityPreferences;
use crate::tools::ToolRuntimeOptions;

pub const CONFIG_PATH_ENV: &str = "OLLAMA_CHAT_CONFIG";
pub const HOST_ENV: &str = "OLLAMA_HOST";
pub const MODEL_ENV: &str = "OLLAMA_CHAT_MODEL";
pub const BACKEND_ENV: &str = "OLLAMA_CHAT_BACKEND";

const APP_DIR: &str = "ollamaterm";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OllamaConfig {
    /// `ollama` or `mock`.
    pub backend: String,
    pub host: String,
    pub model: String,
    pub timeout_secs: u64,
    pub system_prompt: String,
    pub max_history_messages: usize,
    pub max_context_tokens: usize,
    pub retries: u32,
    pub retry_backoff_ms: u64,
    pub pull_model_on_start: bool,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            host: "http://localhost:11434".to_string(),
            model: "llama3.2".to_string(),
            timeout_secs: 120,
            system_prompt: "You are a helpful assistant.".to_string(),
            max_history_messages: 200,
            max_context_tokens: 4096,
            retries: 2,
            retry_backoff_ms: 500,
            pull_model_on_start: true,
        }
    }
}

impl OllamaConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CapabilitiesConfig {
    pub think: bool,
    pub show_thinking: bool,
    pub web_search_enabled: bool,
    pub max_tool_iterations: usize,
}

impl Default for CapabilitiesConfig {
    fn default() -> Self {
        Self {
            think: true,
            show_thinking: true,
            web_search_enabled: false,
            max_tool_iterations: 10,
        }
    }
}

impl CapabilitiesConfig {
    #[must_use]
    pub fn preferences(&self) -> CapabilityPreferences {
        CapabilityPreferences {
            show_thinking: self.show_thinking,
            web_search_enabled: self.web_search_enabled,
            max_tool_iterations: self.max_tool_iterations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub directory: String,
    pub metadata_path: String,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: format!("~/.local/state/{APP_DIR}/conversations"),
            metadata_path: format!("~/.local/state/{APP_DIR}/conversations/index.json"),
        }
    }
}

impl PersistenceConfig {
    #[must_use]
    pub fn directory(&self) -> PathBuf {
        expand_home(&self.directory)
    }

    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        expand_home(&self.metadata_path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Optional log file. Log lines are appended; nothing is written to the terminal.
    pub log_file: Option<String>,
    /// Single-line compact records instead of the full format.
    pub compact: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_file: Some(format!("~/.local/state/{APP_DIR}/app.log")),
            compact: false,
        }
    }
}

impl LoggingConfig {
    #[must_use]
    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_file
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(expand_home)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UiConfig {
    pub stream_chunk_size: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            stream_chunk_size: 8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub ollama: OllamaConfig,
    pub tools: ToolRuntimeOptions,
    pub capabilities: CapabilitiesConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    pub ui: UiConfig,
}

impl Config {
    /// Reads the config file from `path` (or the default location), applies
    /// environment overrides and validates the result.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path.map(Path::to_path_buf).or_else(default_config_path);
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            operation: "reading config file",
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Applies `OLLAMA_HOST`, `OLLAMA_CHAT_MODEL` and `OLLAMA_CHAT_BACKEND`.
    /// Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(host) = value(HOST_ENV) {
            self.ollama.host = host;
        }
        if let Some(model) = value(MODEL_ENV) {
            self.ollama.model = model;
        }
        if let Some(backend) = value(BACKEND_ENV) {
            self.ollama.backend = backend.to_ascii_lowercase();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let ollama = &self.ollama;
        let url = Url::parse(ollama.host.trim())
            .map_err(|error| ConfigError::invalid("ollama.host", error.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
            return Err(ConfigError::invalid(
                "ollama.host",
                "must be an http(s) URL with a host",
            ));
        }
        if ollama.model.trim().is_empty() {
            return Err(ConfigError::invalid("ollama.model", "must not be empty"));
        }
        if !matches!(ollama.backend.as_str(), "ollama" | "mock") {
            return Err(ConfigError::invalid(
                "ollama.backend",
                format!("unknown backend '{}', expected ollama or mock", ollama.backend),
            ));
        }
        check_range("ollama.timeout_secs", ollama.timeout_secs, 1..=3600)?;
        check_range("ollama.max_history_messages", ollama.max_history_messages, 1..=100_000)?;
        check_range("ollama.max_context_tokens", ollama.max_context_tokens, 128..=1_000_000)?;
        check_range("ollama.retries", ollama.retries, 0..=10)?;
        check_range("ollama.retry_backoff_ms", ollama.retry_backoff_ms, 0..=60_000)?;

        let tools = &self.tools;
        check_range("tools.command_timeout_seconds", tools.command_timeout_seconds, 1..=600)?;
        check_range("tools.max_output_lines", tools.max_output_lines, 1..=10_000)?;
        check_range("tools.max_output_bytes", tools.max_output_bytes, 256..=5_000_000)?;
        check_range("tools.max_read_bytes", tools.max_read_bytes, 256..=20_000_000)?;
        check_range("tools.max_search_results", tools.max_search_results, 1..=10_000)?;

        check_range(
            "capabilities.max_tool_iterations",
            self.capabilities.max_tool_iterations,
            1..=100,
        )?;
        check_range("ui.stream_chunk_size", self.ui.stream_chunk_size, 1..=1024)?;

        if self.persistence.enabled && self.persistence.directory.trim().is_empty() {
            return Err(ConfigError::invalid(
                "persistence.directory",
                "must not be empty when persistence is enabled",
            ));
        }
        Ok(())
    }

    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.ollama.backend = backend.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.ollama.model = model.into();
        self
    }

    #[must_use]
    pub fn with_tools(mut self, tools: ToolRuntimeOptions) -> Self {
        self.tools = tools;
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: PersistenceConfig) -> Self {
        self.persistence = persistence;
        self
    }
}

fn check_range<T>(field: &'static str, value: T, range: RangeInclusive<T>) -> Result<(), ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    if range.contains(&value) {
        return Ok(());
    }
    Err(ConfigError::invalid(
        field,
        format!(
            "{value} is outside {}..={}",
            range.start(),
            range.end()
        ),
    ))
}

/// `$OLLAMA_CHAT_CONFIG`, else `$XDG_CONFIG_HOME/ollamaterm/config.toml`, else
/// `~/.config/ollamaterm/config.toml`.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    if let Some(explicit) = env::var_os(CONFIG_PATH_ENV).filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(explicit));
    }
    let base = env::var_os("XDG_CONFIG_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".config")))?;
    Some(base.join(APP_DIR).join("config.toml"))
}

/// Directory for caches such as the model capability file.
#[must_use]
pub fn default_cache_dir() -> Option<PathBuf> {
    env::var_os("XDG_CACHE_HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".cache")))
        .map(|base| base.join(APP_DIR))
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn expand_home(raw: &str) -> PathBuf {
    let raw = raw.trim();
    match (raw.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ if raw == "~" => home_dir().unwrap_or_else(|| PathBuf::from(raw)),
        _ => PathBuf::from(raw),
    }
}
