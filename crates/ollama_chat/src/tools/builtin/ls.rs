use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::tools::{
    object_schema, PathSandbox, Tool, ToolCategory, ToolContext, ToolError, ToolSpec,
};

const DEFAULT_MAX_ENTRIES: usize = 200;

#[derive(Debug, Deserialize)]
pub struct LsParams {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub max_entries: Option<usize>,
}

pub struct LsTool {
    sandbox: Arc<PathSandbox>,
}

impl LsTool {
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for LsTool {
    type Params = LsParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "ls",
            "List files and directories.",
            object_schema(
                json!({
                    "path": {"type": "string", "description": "Directory path (default workspace root)."},
                    "max_entries": {"type": "integer", "description": "Maximum entries to return."},
                }),
                &[],
            ),
        )
        .with_category(ToolCategory::Fs)
    }

    async fn execute(&self, params: LsParams, _ctx: &ToolContext) -> Result<String, ToolError> {
        let target = self
            .sandbox
            .resolve_existing(params.path.as_deref().unwrap_or("."))?;
        if !target.is_dir() {
            return Err(ToolError::failed("ls", "ls expects a directory path."));
        }

        let max_entries = params.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES).max(1);
        let mut entries = fs::read_dir(&target)
            .map_err(|error| ToolError::io("list", &target, error))?
            .filter_map(Result::ok)
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| entry.file_name().to_string_lossy().to_lowercase());

        let mut lines = Vec::with_capacity(entries.len().min(max_entries) + 1);
        for entry in entries.iter().take(max_entries) {
            let name = entry.file_name().to_string_lossy().to_string();
            let path = entry.path();
            if path.is_dir() {
                lines.push(format!("[dir ] {name}/"));
            } else {
                let size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or_default();
                lines.push(format!("[file] {name} ({size} bytes)"));
            }
        }
        if entries.len() > max_entries {
            lines.push(format!("... {} more entries", entries.len() - max_entries));
        }

        Ok(lines.join("\n"))
    }
}
