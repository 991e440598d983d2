use std::sync::Arc;

use ::glob::Pattern;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::walk_skipping_ignored;
use crate::tools::{
    object_schema, PathSandbox, Tool, ToolCategory, ToolContext, ToolError, ToolSpec,
};

#[derive(Debug, Deserialize)]
pub struct GlobParams {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// Finds files and directories whose base-relative path matches a pattern.
pub struct GlobTool {
    sandbox: Arc<PathSandbox>,
    max_results: usize,
}

impl GlobTool {
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>, max_results: usize) -> Self {
        Self {
            sandbox,
            max_results,
        }
    }
}

#[async_trait]
impl Tool for GlobTool {
    type Params = GlobParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "glob",
            "Find files by glob pattern.",
            object_schema(
                json!({
                    "pattern": {"type": "string", "description": "Glob pattern, e.g. **/*.py"},
                    "path": {"type": "string", "description": "Base path (default workspace root)."},
                    "max_results": {"type": "integer", "description": "Maximum number of matches."},
                }),
                &["pattern"],
            ),
        )
        .with_category(ToolCategory::Search)
    }

    async fn execute(&self, params: GlobParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let base = self
            .sandbox
            .resolve_existing(params.path.as_deref().unwrap_or("."))?;
        if !base.is_dir() {
            return Err(ToolError::failed("glob", "glob path must be a directory."));
        }
        let pattern = Pattern::new(&params.pattern).map_err(|error| {
            ToolError::invalid_arguments("glob", format!("Invalid glob pattern: {error}"))
        })?;
        let max_results = params.max_results.unwrap_or(self.max_results).max(1);

        let mut found = Vec::new();
        for entry in walk_skipping_ignored(&base) {
            ctx.ensure_not_cancelled()?;
            let Ok(relative) = entry.path().strip_prefix(&base) else {
                continue;
            };
            let relative = relative.to_string_lossy();
            if !pattern.matches(&relative) {
                continue;
            }
            let kind = if entry.file_type().is_dir() { "dir" } else { "file" };
            found.push(format!("{kind}: {relative}"));
            if found.len() >= max_results {
                break;
            }
        }

        if found.is_empty() {
            return Ok("No matches found.".to_string());
        }
        Ok(found.join("\n"))
    }
}
