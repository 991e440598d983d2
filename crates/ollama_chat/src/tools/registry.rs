use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::{
    ApprovalHandler, DynTool, OutputTruncator, Tool, ToolContext, ToolError, ToolRuntimeOptions,
    ToolSpec,
};

/// Tools cheap enough to run on the caller's task. Everything else is spawned.
pub const FAST_TOOLS: &[&str] = &["read", "write", "edit", "glob", "grep", "ls", "list"];

/// How long a cancelled worker gets to tear down its own subprocesses before it is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(5);

struct RegisteredTool {
    spec: ToolSpec,
    tool: Arc<dyn DynTool>,
}

/// Named set of tools plus the output cap applied to every result.
///
/// Assembled once at startup and shared behind an `Arc`; registering a name that
/// already exists replaces the earlier tool.
pub struct ToolRegistry {
    tools: BTreeMap<String, RegisteredTool>,
    options: ToolRuntimeOptions,
    truncator: OutputTruncator,
}

impl ToolRegistry {
    #[must_use]
    pub fn new(options: ToolRuntimeOptions) -> Self {
        let truncator = OutputTruncator::new(options.max_output_lines, options.max_output_bytes);
        Self {
            tools: BTreeMap::new(),
            options,
            truncator,
        }
    }

    #[must_use]
    pub fn with_truncator(mut self, truncator: OutputTruncator) -> Self {
        self.truncator = truncator;
        self
    }

    pub fn register<T: Tool>(&mut self, tool: T) {
        let spec = tool.spec();
        if self.tools.contains_key(&spec.name) {
            debug!(event = "tool.registry.replaced", tool = %spec.name);
        }
        self.tools.insert(
            spec.name.clone(),
            RegisteredTool {
                spec,
                tool: Arc::new(tool),
            },
        );
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name).map(|entry| &entry.spec)
    }

    /// Registered names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn options(&self) -> &ToolRuntimeOptions {
        &self.options
    }

    #[must_use]
    pub fn truncator(&self) -> &OutputTruncator {
        &self.truncator
    }

    /// Function-tool list advertised to the model.
    #[must_use]
    pub fn tool_schemas(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|entry| entry.spec.as_function_tool())
            .collect()
    }

    /// Context carrying this registry's workspace policy.
    #[must_use]
    pub fn context(
        &self,
        session_id: impl Into<String>,
        approver: Arc<dyn ApprovalHandler>,
    ) -> ToolContext {
        ToolContext::new(session_id, self.options.workspace_root.clone(), approver)
            .with_allow_external_directories(self.options.allow_external_directories)
    }

    /// Looks up, validates, runs and truncates one tool call.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        let entry = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let arguments = validate_arguments(&entry.spec, arguments)?;
        ctx.ensure_not_cancelled()?;

        let output = if FAST_TOOLS.contains(&name) {
            entry.tool.call(name, arguments, ctx).await?
        } else {
            run_spawned(name, Arc::clone(&entry.tool), arguments, ctx).await?
        };

        let truncated = self.truncator.truncate(&output);
        if truncated.truncated {
            debug!(
                event = "tool.output.truncated",
                tool = %name,
                saved_to = ?truncated.output_path
            );
        }
        Ok(truncated.content)
    }
}

async fn run_spawned(
    name: &str,
    tool: Arc<dyn DynTool>,
    arguments: Map<String, Value>,
    ctx: &ToolContext,
) -> Result<String, ToolError> {
    let task_ctx = ctx.clone();
    let task_name = name.to_string();
    let mut handle =
        tokio::spawn(async move { tool.call(&task_name, arguments, &task_ctx).await });

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => {
            // The worker sees the same token and cleans up after itself.
            if tokio::time::timeout(CANCEL_GRACE, &mut handle).await.is_err() {
                warn!(event = "tool.worker.abort", tool = %name);
                handle.abort();
            }
            Err(ToolError::Cancelled)
        }
        joined = &mut handle => match joined {
            Ok(result) => result,
            Err(error) if error.is_cancelled() => Err(ToolError::Cancelled),
            Err(error) => {
                warn!(event = "tool.worker.failed", tool = %name, %error);
                Err(ToolError::failed(name, format!("{name} crashed: {error}")))
            }
        },
    }
}

fn validate_arguments(spec: &ToolSpec, arguments: Value) -> Result<Map<String, Value>, ToolError> {
    let arguments = match arguments {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            return Err(ToolError::invalid_arguments(
                &spec.name,
                format!("expected a JSON object, got {other}"),
            ))
        }
    };

    for required in spec.required_arguments() {
        if arguments.get(required).map_or(true, Value::is_null) {
            return Err(ToolError::invalid_arguments(
                &spec.name,
                format!("missing required argument '{required}'"),
            ));
        }
    }
    Ok(arguments)
}
