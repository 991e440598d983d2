use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Failure of one tool call.
///
/// Every variant except a registry misconfiguration is reported back to the model
/// as the tool's result text; none of them aborts the agent loop.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),

    #[error("invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("Path '{}' is outside allowed workspace roots.", path.display())]
    PathOutsideRoots { path: PathBuf },

    #[error("permission '{permission}' was rejected")]
    PermissionRejected { permission: String },

    #[error("tool execution was cancelled")]
    Cancelled,

    #[error("{tool} timed out after {seconds}s")]
    Timeout { tool: String, seconds: u64 },

    #[error("failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{message}")]
    Failed { tool: String, message: String },
}

impl ToolError {
    pub fn invalid_arguments(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn io(op: &'static str, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn failed(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            tool: tool.into(),
            message: message.into(),
        }
    }

    pub fn rejected(permission: impl Into<String>) -> Self {
        Self::PermissionRejected {
            permission: permission.into(),
        }
    }
}
