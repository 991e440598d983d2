//! File, search, shell and web tools bound to one [`PathSandbox`].

mod bash;
mod edit;
mod external_directory;
mod glob;
mod grep;
mod ls;
mod read;
mod webfetch;
mod websearch;
mod write;

use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use walkdir::{DirEntry, WalkDir};

pub use bash::BashTool;
pub use edit::EditTool;
pub use external_directory::ExternalDirectoryTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use ls::LsTool;
pub use read::ReadTool;
pub use webfetch::WebFetchTool;
pub use websearch::WebSearchTool;
pub use write::WriteTool;

use super::{PathSandbox, ToolError, ToolRegistry, ToolRuntimeOptions};

/// Directories never descended into by `glob` and `grep`.
pub const SEARCH_SKIP_DIRS: &[&str] = &[
    ".git",
    ".venv",
    "__pycache__",
    ".mypy_cache",
    ".ruff_cache",
    "node_modules",
];

/// Registry holding every built-in tool, sharing one sandbox.
///
/// `websearch` is only registered when `options.web_search_enabled` is set.
pub fn builtin_registry(options: ToolRuntimeOptions) -> Result<ToolRegistry, ToolError> {
    let sandbox = Arc::new(PathSandbox::from_options(&options)?);
    let mut registry = ToolRegistry::new(options.clone());

    registry.register(ReadTool::new(Arc::clone(&sandbox), options.max_read_bytes));
    registry.register(LsTool::new(Arc::clone(&sandbox)));
    registry.register(GlobTool::new(Arc::clone(&sandbox), options.max_search_results));
    registry.register(GrepTool::new(
        Arc::clone(&sandbox),
        options.max_search_results,
        options.max_read_bytes,
    ));
    registry.register(WriteTool::new(Arc::clone(&sandbox)));
    registry.register(EditTool::new(Arc::clone(&sandbox)));
    registry.register(BashTool::new(
        Arc::clone(&sandbox),
        options.command_timeout_seconds,
    ));
    registry.register(ExternalDirectoryTool::new(Arc::clone(&sandbox)));
    registry.register(WebFetchTool::new());
    if options.web_search_enabled {
        registry.register(WebSearchTool::new());
    }

    Ok(registry)
}

/// Walks `base` depth-first in name order, skipping [`SEARCH_SKIP_DIRS`].
fn walk_skipping_ignored(base: &Path) -> impl Iterator<Item = DirEntry> {
    WalkDir::new(base)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !(entry.file_type().is_dir() && is_skipped_dir(entry)))
        .filter_map(Result::ok)
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| SEARCH_SKIP_DIRS.contains(&name))
}

/// Replaces `path` with `content` through a sibling temp file.
fn atomic_write(path: &Path, content: &str) -> Result<(), ToolError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|error| ToolError::io("create", parent, error))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|error| ToolError::io("create temp file in", parent, error))?;
    temp.write_all(content.as_bytes())
        .map_err(|error| ToolError::io("write", temp.path(), error))?;
    temp.persist(path)
        .map_err(|error| ToolError::io("replace", path, error.error))?;
    Ok(())
}
