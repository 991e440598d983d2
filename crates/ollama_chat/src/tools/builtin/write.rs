use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::atomic_write;
use crate::tools::{
    object_schema, PathSandbox, PermissionRequest, SafetyLevel, Tool, ToolCategory, ToolContext,
    ToolError, ToolSpec,
};

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct WriteParams {
    pub path: String,
    pub content: String,
    #[serde(default = "default_true")]
    pub overwrite: bool,
    #[serde(default = "default_true")]
    pub create_dirs: bool,
}

pub struct WriteTool {
    sandbox: Arc<PathSandbox>,
}

impl WriteTool {
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for WriteTool {
    type Params = WriteParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "write",
            "Write full file content atomically.",
            object_schema(
                json!({
                    "path": {"type": "string", "description": "Target file path."},
                    "content": {"type": "string", "description": "Complete file content."},
                    "overwrite": {"type": "boolean", "description": "Allow overwrite of existing file."},
                    "create_dirs": {"type": "boolean", "description": "Create parent directories if missing."},
                }),
                &["path", "content"],
            ),
        )
        .with_safety_level(SafetyLevel::Confirm)
        .with_category(ToolCategory::Edit)
    }

    async fn execute(&self, params: WriteParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let path = self.sandbox.resolve(&params.path)?;
        if path.exists() && !params.overwrite {
            return Err(ToolError::failed(
                "write",
                format!("Refusing to overwrite existing file: '{}'", path.display()),
            ));
        }
        let parent_missing = path.parent().is_some_and(|parent| !parent.exists());
        if parent_missing && !params.create_dirs {
            return Err(ToolError::failed(
                "write",
                "Parent directory missing and create_dirs is false.",
            ));
        }

        self.sandbox.authorize_external(ctx, &path, false).await?;
        ctx.ask(
            PermissionRequest::new("edit", vec![self.sandbox.display_relative(&path)])
                .with_metadata("filepath", path.display().to_string()),
        )
        .await?;

        atomic_write(&path, &params.content)?;
        Ok(format!(
            "Wrote {} bytes to {}",
            params.content.len(),
            path.display()
        ))
    }
}
