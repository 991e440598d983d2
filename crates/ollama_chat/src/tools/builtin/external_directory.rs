use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::tools::{
    object_schema, PathSandbox, PermissionRequest, SafetyLevel, Tool, ToolCategory, ToolContext,
    ToolError, ToolSpec,
};

const TOOL_NAME: &str = "external_directory";

#[derive(Debug, Deserialize)]
pub struct ExternalDirectoryParams {
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

/// Manages the session allowlist of directories outside the workspace.
pub struct ExternalDirectoryTool {
    sandbox: Arc<PathSandbox>,
}

impl ExternalDirectoryTool {
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ExternalDirectoryTool {
    type Params = ExternalDirectoryParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            TOOL_NAME,
            "Manage session allowlist for external directories.",
            object_schema(
                json!({
                    "action": {"type": "string", "enum": ["add", "remove", "list"], "description": "Allowlist operation."},
                    "path": {"type": "string", "description": "Directory path for add/remove."},
                }),
                &[],
            ),
        )
        .with_safety_level(SafetyLevel::Confirm)
        .with_category(ToolCategory::Fs)
    }

    async fn execute(
        &self,
        params: ExternalDirectoryParams,
        ctx: &ToolContext,
    ) -> Result<String, ToolError> {
        if !self.sandbox.allows_external_directories() {
            return Err(ToolError::failed(
                TOOL_NAME,
                "external_directory is disabled by policy. Enable tools.allow_external_directories.",
            ));
        }

        let action = params
            .action
            .as_deref()
            .map(|action| action.trim().to_lowercase())
            .filter(|action| !action.is_empty())
            .unwrap_or_else(|| "list".to_string());

        if action == "list" {
            let roots = self.sandbox.allowed_external();
            if roots.is_empty() {
                return Ok("No external directories configured.".to_string());
            }
            return Ok(roots
                .iter()
                .map(|root| root.display().to_string())
                .collect::<Vec<_>>()
                .join("\n"));
        }

        let path_text = params
            .path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .ok_or_else(|| {
                ToolError::invalid_arguments(TOOL_NAME, "external_directory add/remove requires a path.")
            })?;

        match action.as_str() {
            "add" => {
                let candidate = self.sandbox.resolve_any(path_text)?;
                let pattern = candidate.join("*").display().to_string();
                ctx.ask(
                    PermissionRequest::new("external_directory", vec![pattern.clone()])
                        .with_always(vec![pattern])
                        .with_metadata("parentDir", candidate.display().to_string()),
                )
                .await?;
                let added = self.sandbox.allow(path_text)?;
                Ok(format!("Added external directory: {}", added.display()))
            }
            "remove" => {
                let removed = self.sandbox.revoke(path_text)?;
                Ok(format!("Removed external directory: {}", removed.display()))
            }
            _ => Err(ToolError::invalid_arguments(
                TOOL_NAME,
                "external_directory action must be add, remove, or list.",
            )),
        }
    }
}
