use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::json;

use super::walk_skipping_ignored;
use crate::tools::{
    object_schema, PathSandbox, Tool, ToolCategory, ToolContext, ToolError, ToolSpec,
};

#[derive(Debug, Deserialize)]
pub struct GrepParams {
    pub query: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub fixed_strings: bool,
    #[serde(default)]
    pub max_results: Option<usize>,
}

/// Line search over a file or directory tree.
pub struct GrepTool {
    sandbox: Arc<PathSandbox>,
    max_results: usize,
    max_file_bytes: usize,
}

impl GrepTool {
    #[must_use]
    pub fn new(sandbox: Arc<PathSandbox>, max_results: usize, max_file_bytes: usize) -> Self {
        Self {
            sandbox,
            max_results,
            max_file_bytes,
        }
    }
}

#[async_trait]
impl Tool for GrepTool {
    type Params = GrepParams;

    fn spec(&self) -> ToolSpec {
        ToolSpec::new(
            "grep",
            "Search file content and return matching lines.",
            object_schema(
                json!({
                    "query": {"type": "string", "description": "Regex or literal text query."},
                    "path": {"type": "string", "description": "File or directory path."},
                    "case_sensitive": {"type": "boolean", "description": "Case-sensitive search."},
                    "fixed_strings": {"type": "boolean", "description": "Treat query as literal text."},
                    "max_results": {"type": "integer", "description": "Maximum matching lines."},
                }),
                &["query"],
            ),
        )
        .with_category(ToolCategory::Search)
    }

    async fn execute(&self, params: GrepParams, ctx: &ToolContext) -> Result<String, ToolError> {
        let target = self
            .sandbox
            .resolve_existing(params.path.as_deref().unwrap_or("."))?;
        let source = if params.fixed_strings {
            regex::escape(&params.query)
        } else {
            params.query.clone()
        };
        let pattern = RegexBuilder::new(&source)
            .case_insensitive(!params.case_sensitive)
            .build()
            .map_err(|error| ToolError::invalid_arguments("grep", format!("Invalid regex: {error}")))?;
        let max_results = params.max_results.unwrap_or(self.max_results).max(1);

        let files: Vec<PathBuf> = if target.is_file() {
            vec![target]
        } else {
            walk_skipping_ignored(&target)
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .collect()
        };

        let mut matches = Vec::new();
        'files: for file in files {
            ctx.ensure_not_cancelled()?;
            let Ok(metadata) = fs::metadata(&file) else {
                continue;
            };
            if metadata.len() > self.max_file_bytes as u64 {
                continue;
            }
            let Ok(raw) = fs::read(&file) else {
                continue;
            };
            let content = String::from_utf8_lossy(&raw);
            let relative = self.sandbox.display_relative(&file);
            for (index, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    matches.push(format!("{relative}:{}:{line}", index + 1));
                    if matches.len() >= max_results {
                        break 'files;
                    }
                }
            }
        }

        if matches.is_empty() {
            return Ok("No matches found.".to_string());
        }
        Ok(matches.join("\n"))
    }
}
