use std::fs;
use std::io::Read as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::tools::{
    object_schema, PathSandbox, Tool, ToolCategory, ToolContext, ToolError, ToolSpec,
};

const DEFAULT_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct ReadParams {
    pub path: String,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Numbered line window of a text file.
pub struct ReadTool {
    sandbox: Arc<PathSandbox>,
    max_read_bytes: usize,
}

impl ReadTool {
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>, max_read_bytes: usize) -> Self {
        Self {
            sandbox,
            max_read_bytes,
        }
    }
}

#[async_trait]
impl Tool for ReadTool {
    type Params = ReadParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "read",
            "Read file contents from workspace with optional line window.",
            object_schema(
                json!({
                    "path": {"type": "string", "description": "Absolute or workspace-relative path."},
                    "offset": {"type": "integer", "description": "1-indexed starting line number."},
                    "limit": {"type": "integer", "description": "Max number of lines to return."},
                }),
                &["path"],
            ),
        )
        .with_category(ToolCategory::Fs)
    }

    async fn execute(&self, params: ReadParams, _ctx: &ToolContext) -> Result<String, ToolError> {
        let path = self.sandbox.resolve_existing(&params.path)?;
        if path.is_dir() {
            return Err(ToolError::failed("read", "read expects a file path."));
        }

        let file = fs::File::open(&path).map_err(|error| ToolError::io("open", &path, error))?;
        let mut raw = Vec::new();
        file.take(self.max_read_bytes as u64)
            .read_to_end(&mut raw)
            .map_err(|error| ToolError::io("read", &path, error))?;
        let text = String::from_utf8_lossy(&raw);

        let offset = params.offset.unwrap_or(1).max(1);
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).max(1);
        let window = text
            .lines()
            .enumerate()
            .skip(offset - 1)
            .take(limit)
            .map(|(index, line)| format!("{:>6}\t{line}", index + 1))
            .collect::<Vec<_>>();

        Ok(window.join("\n"))
    }
}
