use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use super::{PermissionRequest, ToolContext, ToolError, ToolRuntimeOptions};

/// Confines tool paths to the workspace root and explicitly allowed directories.
///
/// Every path is resolved before any I/O: `~` is expanded, relative paths are
/// joined onto the workspace root, `.`/`..` are folded lexically, and the
/// longest existing ancestor is canonicalised so symlinks cannot point outside.
#[derive(Debug)]
pub struct PathSandbox {
    workspace_root: PathBuf,
    default_external: Vec<PathBuf>,
    allow_external_directories: bool,
    session_allowlist: Mutex<BTreeSet<PathBuf>>,
}

impl PathSandbox {
    pub fn new(workspace_root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = expand_home(&workspace_root.as_ref().to_string_lossy());
        let root = if root.is_absolute() {
            root
        } else {
            let cwd = std::env::current_dir().map_err(|error| ToolError::io("resolve", ".", error))?;
            cwd.join(root)
        };
        let canonical = root
            .canonicalize()
            .map_err(|error| ToolError::io("resolve workspace root", &root, error))?;

        if !canonical.is_dir() {
            return Err(ToolError::failed(
                "sandbox",
                format!("Workspace root must be a directory: {}", canonical.display()),
            ));
        }

        Ok(Self {
            workspace_root: canonical,
            default_external: Vec::new(),
            allow_external_directories: false,
            session_allowlist: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn from_options(options: &ToolRuntimeOptions) -> Result<Self, ToolError> {
        let mut sandbox = Self::new(&options.workspace_root)?
            .with_allow_external_directories(options.allow_external_directories);
        for entry in &options.default_external_directories {
            match resolve_lenient(&normalize_lexically(&expand_home(entry))) {
                Ok(path) => sandbox.default_external.push(path),
                Err(error) => debug!(
                    event = "sandbox.default_external.skipped",
                    path = %entry,
                    error = %error
                ),
            }
        }
        Ok(sandbox)
    }

    #[must_use]
    pub fn with_allow_external_directories(mut self, allow: bool) -> Self {
        self.allow_external_directories = allow;
        self
    }

    #[must_use]
    pub fn with_default_external(mut self, roots: Vec<PathBuf>) -> Self {
        self.default_external = roots;
        self
    }

    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    #[must_use]
    pub fn allows_external_directories(&self) -> bool {
        self.allow_external_directories
    }

    /// Resolves `raw` without any containment check.
    pub fn resolve_any(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let expanded = expand_home(raw);
        let absolute = if expanded.is_absolute() {
            expanded
        } else {
            self.workspace_root.join(expanded)
        };
        resolve_lenient(&normalize_lexically(&absolute))
    }

    /// Resolves `raw` and rejects it unless it lies inside an allowed root.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolve_any(raw)?;
        if self.is_allowed(&resolved) {
            return Ok(resolved);
        }
        warn!(
            event = "tool.sandbox.rejected",
            path = %resolved.display(),
            root = %self.workspace_root.display()
        );
        Err(ToolError::PathOutsideRoots { path: resolved })
    }

    /// [`PathSandbox::resolve`] for paths that must already exist.
    pub fn resolve_existing(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let resolved = self.resolve(raw)?;
        if !resolved.exists() {
            return Err(ToolError::failed(
                "sandbox",
                format!("Path does not exist: '{}'", resolved.display()),
            ));
        }
        Ok(resolved)
    }

    #[must_use]
    pub fn is_allowed(&self, path: &Path) -> bool {
        if path.starts_with(&self.workspace_root)
            || self.default_external.iter().any(|root| path.starts_with(root))
        {
            return true;
        }
        self.allow_external_directories
            && self
                .lock_allowlist()
                .iter()
                .any(|root| path.starts_with(root))
    }

    /// Adds a directory to the session allowlist. The directory must exist.
    pub fn allow(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let path = self.resolve_any(raw)?;
        if !path.is_dir() {
            return Err(ToolError::failed(
                "external-directory",
                "Path must exist and be a directory.",
            ));
        }
        self.lock_allowlist().insert(path.clone());
        info!(event = "sandbox.allowlist.add", path = %path.display());
        Ok(path)
    }

    /// Removes a directory from the session allowlist. Returns the resolved path.
    pub fn revoke(&self, raw: &str) -> Result<PathBuf, ToolError> {
        let path = self.resolve_any(raw)?;
        if self.lock_allowlist().remove(&path) {
            info!(event = "sandbox.allowlist.remove", path = %path.display());
        }
        Ok(path)
    }

    #[must_use]
    pub fn allowed_external(&self) -> Vec<PathBuf> {
        self.lock_allowlist().iter().cloned().collect()
    }

    pub fn reset_session(&self) {
        self.lock_allowlist().clear();
    }

    /// Asks for `external_directory` approval when `path` is outside the workspace root.
    pub async fn authorize_external(
        &self,
        ctx: &ToolContext,
        path: &Path,
        is_directory: bool,
    ) -> Result<(), ToolError> {
        if path.starts_with(&self.workspace_root) {
            return Ok(());
        }

        let parent = if is_directory {
            path.to_path_buf()
        } else {
            path.parent().map(Path::to_path_buf).unwrap_or_else(|| path.to_path_buf())
        };
        let pattern = parent.join("*").display().to_string();
        ctx.ask(
            PermissionRequest::new("external_directory", vec![pattern.clone()])
                .with_always(vec![pattern])
                .with_metadata("filepath", path.display().to_string())
                .with_metadata("parentDir", parent.display().to_string()),
        )
        .await
    }

    /// `path` relative to the workspace root when it lies inside it.
    #[must_use]
    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace_root)
            .map(|relative| relative.display().to_string())
            .unwrap_or_else(|_| path.display().to_string())
    }

    fn lock_allowlist(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        match self.session_allowlist.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn expand_home(raw: &str) -> PathBuf {
    let raw = raw.trim();
    let home = std::env::var_os("HOME").map(PathBuf::from);
    match (raw, home) {
        ("~", Some(home)) => home,
        (text, Some(home)) if text.starts_with("~/") => home.join(&text[2..]),
        (text, _) => PathBuf::from(text),
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// Canonicalises the longest existing ancestor and re-appends the missing tail.
fn resolve_lenient(path: &Path) -> Result<PathBuf, ToolError> {
    let mut existing = path;
    let mut missing: Vec<OsString> = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(path.to_path_buf()),
        }
    }

    let mut resolved = existing
        .canonicalize()
        .map_err(|error| ToolError::io("resolve", existing, error))?;
    for name in missing.iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}
