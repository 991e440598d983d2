//! Local tools the model may call.
//!
//! A [`Tool`] declares its JSON schema and a typed parameter struct. The
//! [`ToolRegistry`] validates raw model arguments against the schema, decodes
//! them into that struct, runs the tool, and caps its output before it goes
//! back into the conversation. File access goes through a shared
//! [`PathSandbox`]; anything with side effects asks the [`ApprovalHandler`] first.

pub mod builtin;
mod context;
mod error;
mod registry;
mod sandbox;
mod truncation;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub use context::{
    ApprovalHandler, AutoApprove, DenyAll, MetadataSink, PermissionRequest, ToolContext,
};
pub use error::ToolError;
pub use registry::{ToolRegistry, FAST_TOOLS};
pub use sandbox::PathSandbox;
pub use truncation::{
    default_output_dir, OutputTruncator, TruncateDirection, TruncatedOutput, DEFAULT_MAX_BYTES,
    DEFAULT_MAX_LINES, OUTPUT_RETENTION,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyLevel {
    Safe,
    Confirm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Fs,
    Search,
    Edit,
    Shell,
    Web,
    Meta,
}

/// Schema-level description of a tool, as advertised to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
    pub safety_level: SafetyLevel,
    pub category: ToolCategory,
}

impl ToolSpec {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters_schema,
            safety_level: SafetyLevel::Safe,
            category: ToolCategory::Meta,
        }
    }

    #[must_use]
    pub fn with_safety_level(mut self, safety_level: SafetyLevel) -> Self {
        self.safety_level = safety_level;
        self
    }

    #[must_use]
    pub fn with_category(mut self, category: ToolCategory) -> Self {
        self.category = category;
        self
    }

    /// Function-tool entry in the shape the chat endpoint expects.
    #[must_use]
    pub fn as_function_tool(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters_schema,
            },
        })
    }

    /// Names listed under the schema's `required` key.
    #[must_use]
    pub fn required_arguments(&self) -> Vec<&str> {
        self.parameters_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|required| required.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Closed-object JSON schema with the given properties.
#[must_use]
pub fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// A callable tool with typed parameters.
#[async_trait]
pub trait Tool: Send + Sync + 'static {
    type Params: DeserializeOwned + Send;

    fn spec(&self) -> ToolSpec;

    async fn execute(&self, params: Self::Params, ctx: &ToolContext) -> Result<String, ToolError>;
}

/// Object-safe view of a [`Tool`] over raw JSON arguments.
#[async_trait]
pub(crate) trait DynTool: Send + Sync {
    async fn call(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: Tool> DynTool for T {
    async fn call(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let params = serde_json::from_value::<T::Params>(Value::Object(arguments))
            .map_err(|error| ToolError::invalid_arguments(name, error.to_string()))?;
        self.execute(params, ctx).await
    }
}

/// Limits and policy shared by the built-in tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolRuntimeOptions {
    pub enabled: bool,
    pub workspace_root: PathBuf,
    pub allow_external_directories: bool,
    pub command_timeout_seconds: u64,
    pub max_output_lines: usize,
    pub max_output_bytes: usize,
    pub max_read_bytes: usize,
    pub max_search_results: usize,
    pub default_external_directories: Vec<String>,
    /// Set from the capability preferences rather than the `[tools]` table.
    #[serde(skip)]
    pub web_search_enabled: bool,
}

impl Default for ToolRuntimeOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            workspace_root: PathBuf::from("."),
            allow_external_directories: false,
            command_timeout_seconds: 30,
            max_output_lines: 200,
            max_output_bytes: 50_000,
            max_read_bytes: 200_000,
            max_search_results: 200,
            default_external_directories: Vec::new(),
            web_search_enabled: false,
        }
    }
}

impl ToolRuntimeOptions {
    #[must_use]
    pub fn with_workspace_root(mut self, workspace_root: impl Into<PathBuf>) -> Self {
        self.workspace_root = workspace_root.into();
        self
    }

    #[must_use]
    pub fn with_allow_external_directories(mut self, allow: bool) -> Self {
        self.allow_external_directories = allow;
        self
    }

    #[must_use]
    pub fn with_command_timeout_seconds(mut self, seconds: u64) -> Self {
        self.command_timeout_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search_enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_output_limits(mut self, max_lines: usize, max_bytes: usize) -> Self {
        self.max_output_lines = max_lines;
        self.max_output_bytes = max_bytes;
        self
    }
}
