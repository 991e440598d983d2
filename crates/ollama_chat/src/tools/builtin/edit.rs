use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::atomic_write;
use crate::tools::{
    object_schema, PathSandbox, PermissionRequest, SafetyLevel, Tool, ToolCategory, ToolContext,
    ToolError, ToolSpec,
};

#[derive(Debug, Deserialize)]
pub struct EditParams {
    pub path: String,
    pub old_text: String,
    pub new_text: String,
    #[serde(default)]
    pub replace_all: bool,
}

/// Snippet replacement inside one existing file.
pub struct EditTool {
    sandbox: Arc<PathSandbox>,
}

impl EditTool {
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for EditTool {
    type Params = EditParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "edit",
            "Replace a snippet in a file.",
            object_schema(
                json!({
                    "path": {"type": "string", "description": "Target file path."},
                    "old_text": {"type": "string", "description": "Text to replace."},
                    "new_text": {"type": "string", "description": "Replacement text."},
                    "replace_all": {"type": "boolean", "description": "Replace all occurrences."},
                }),
                &["path", "old_text", "new_text"],
            ),
        )
        .with_safety_level(SafetyLevel::Confirm)
        .with_category(ToolCategory::Edit)
    }

    async fn execute(&self, params: EditParams, ctx: &ToolContext) -> Result<String, ToolError> {
        if params.old_text.is_empty() {
            return Err(ToolError::failed("edit", "Edit failed: old_text must not be empty."));
        }

        let path = self.sandbox.resolve_existing(&params.path)?;
        let raw = fs::read(&path).map_err(|error| ToolError::io("read", &path, error))?;
        let current = String::from_utf8(raw).map_err(|_| {
            ToolError::failed(
                "edit",
                format!("Edit failed: {} is not valid UTF-8 text.", path.display()),
            )
        })?;
        if !current.contains(&params.old_text) {
            return Err(ToolError::failed("edit", "Edit failed: old_text not found."));
        }

        self.sandbox.authorize_external(ctx, &path, false).await?;
        ctx.ask(
            PermissionRequest::new("edit", vec![self.sandbox.display_relative(&path)])
                .with_metadata("filepath", path.display().to_string()),
        )
        .await?;

        let updated = if params.replace_all {
            current.replace(&params.old_text, &params.new_text)
        } else {
            current.replacen(&params.old_text, &params.new_text, 1)
        };
        atomic_write(&path, &updated)?;
        Ok(format!("Edited file: {}", path.display()))
    }
}
