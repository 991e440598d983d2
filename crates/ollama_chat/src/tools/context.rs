use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::ToolError;

/// Question put to the approval handler before a side effect.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    pub permission: String,
    pub patterns: Vec<String>,
    pub always: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl PermissionRequest {
    #[must_use]
    pub fn new(permission: impl Into<String>, patterns: Vec<String>) -> Self {
        Self {
            permission: permission.into(),
            patterns,
            always: Vec::new(),
            metadata: Map::new(),
        }
    }

    #[must_use]
    pub fn with_always(mut self, always: Vec<String>) -> Self {
        self.always = always;
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Decides whether a gated operation may proceed.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    async fn ask(&self, request: &PermissionRequest) -> Result<(), ToolError>;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn ask(&self, request: &PermissionRequest) -> Result<(), ToolError> {
        info!(
            event = "tool.permission.auto_approved",
            permission = %request.permission,
            patterns = ?request.patterns
        );
        Ok(())
    }
}

/// Rejects everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAll;

#[async_trait]
impl ApprovalHandler for DenyAll {
    async fn ask(&self, request: &PermissionRequest) -> Result<(), ToolError> {
        Err(ToolError::rejected(request.permission.clone()))
    }
}

/// Receives `(title, metadata)` progress updates from running tools.
pub type MetadataSink = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// Per-call environment handed to a tool.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub message_id: Option<String>,
    pub call_id: Option<String>,
    pub cancel: CancellationToken,
    pub workspace_root: PathBuf,
    pub allow_external_directories: bool,
    approver: Arc<dyn ApprovalHandler>,
    metadata: Option<MetadataSink>,
}

impl ToolContext {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
        approver: Arc<dyn ApprovalHandler>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: None,
            call_id: None,
            cancel: CancellationToken::new(),
            workspace_root: workspace_root.into(),
            allow_external_directories: false,
            approver,
            metadata: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    #[must_use]
    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    #[must_use]
    pub fn with_allow_external_directories(mut self, allow: bool) -> Self {
        self.allow_external_directories = allow;
        self
    }

    #[must_use]
    pub fn with_metadata_sink(mut self, sink: MetadataSink) -> Self {
        self.metadata = Some(sink);
        self
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub async fn ask(&self, request: PermissionRequest) -> Result<(), ToolError> {
        self.approver.ask(&request).await
    }

    pub fn metadata(&self, title: &str, metadata: &Value) {
        if let Some(sink) = &self.metadata {
            sink(title, metadata);
        }
    }

    pub fn ensure_not_cancelled(&self) -> Result<(), ToolError> {
        if self.cancel.is_cancelled() {
            Err(ToolError::Cancelled)
        } else {
            Ok(())
        }
    }
}
