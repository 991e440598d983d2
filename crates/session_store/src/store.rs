use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::SessionStoreError;
use crate::paths::{export_file_name, resolve_inside, restrict_permissions, snapshot_file_name};
use crate::schema::{Conversation, IndexEntry, StoredMessage};

/// Saves conversation snapshots as JSON files and keeps a metadata index of them.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    enabled: bool,
    directory: PathBuf,
    metadata_path: PathBuf,
}

impl ConversationStore {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, metadata_path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            directory: directory.into(),
            metadata_path: metadata_path.into(),
        }
    }

    /// A disabled store refuses `save` and `export_markdown` but can still list
    /// and load existing snapshots.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Writes a snapshot and appends it to the index. Returns the snapshot path.
    pub fn save(
        &self,
        messages: &[StoredMessage],
        model: &str,
        name: Option<&str>,
    ) -> Result<PathBuf, SessionStoreError> {
        if !self.enabled {
            return Err(SessionStoreError::Disabled);
        }
        self.ensure_paths()?;

        let now = OffsetDateTime::now_utc();
        let created_at = now.format(&Rfc3339).map_err(SessionStoreError::ClockFormat)?;
        let target = self
            .directory
            .join(snapshot_file_name(now, &Uuid::new_v4().to_string()));
        let name = name
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToString::to_string);

        let conversation = Conversation {
            created_at: created_at.clone(),
            model: model.to_string(),
            messages: messages.to_vec(),
            name: name.clone(),
        };
        let body = serde_json::to_string_pretty(&conversation)
            .map_err(|source| SessionStoreError::json_serialize(&target, source))?;
        fs::write(&target, body)
            .map_err(|source| SessionStoreError::io("writing conversation snapshot", &target, source))?;
        restrict_permissions(&target, 0o600);

        let mut rows = self.read_index();
        rows.push(IndexEntry {
            path: target.display().to_string(),
            created_at,
            name,
        });
        self.write_index(&rows)?;

        debug!(
            event = "session_store.save",
            path = %target.display(),
            messages = messages.len()
        );
        Ok(target)
    }

    /// Reads one snapshot.
    pub fn load(&self, path: &Path) -> Result<Conversation, SessionStoreError> {
        let body = fs::read_to_string(path)
            .map_err(|source| SessionStoreError::io("reading conversation snapshot", path, source))?;
        serde_json::from_str::<Conversation>(&body)
            .map_err(|source| SessionStoreError::json_parse(path, source))
    }

    /// Indexed snapshots, newest first. An unreadable index yields an empty list.
    #[must_use]
    pub fn list(&self) -> Vec<IndexEntry> {
        let mut rows = self.read_index();
        rows.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        rows
    }

    /// Loads the newest indexed snapshot, if it still exists inside the store directory.
    pub fn load_latest(&self) -> Result<Option<Conversation>, SessionStoreError> {
        let Some(latest) = self.list().into_iter().next() else {
            return Ok(None);
        };
        let Some(path) = resolve_inside(&self.directory, &latest.path) else {
            warn!(
                event = "session_store.latest.rejected",
                path = %latest.path,
                "indexed snapshot is missing or outside the store directory"
            );
            return Ok(None);
        };
        self.load(&path).map(Some)
    }

    /// Writes a Markdown transcript next to the snapshots. Returns its path.
    pub fn export_markdown(
        &self,
        messages: &[StoredMessage],
        model: &str,
    ) -> Result<PathBuf, SessionStoreError> {
        if !self.enabled {
            return Err(SessionStoreError::Disabled);
        }
        self.ensure_paths()?;

        let target = self
            .directory
            .join(export_file_name(OffsetDateTime::now_utc()));
        fs::write(&target, render_markdown(messages, model))
            .map_err(|source| SessionStoreError::io("writing markdown export", &target, source))?;
        restrict_permissions(&target, 0o600);
        Ok(target)
    }

    fn ensure_paths(&self) -> Result<(), SessionStoreError> {
        fs::create_dir_all(&self.directory).map_err(|source| {
            SessionStoreError::io("creating conversation directory", &self.directory, source)
        })?;
        restrict_permissions(&self.directory, 0o700);

        if let Some(parent) = self.metadata_path.parent() {
            fs::create_dir_all(parent).map_err(|source| {
                SessionStoreError::io("creating metadata directory", parent, source)
            })?;
        }
        if !self.metadata_path.exists() {
            fs::write(&self.metadata_path, "[]").map_err(|source| {
                SessionStoreError::io("initializing metadata index", &self.metadata_path, source)
            })?;
        }
        restrict_permissions(&self.metadata_path, 0o600);
        Ok(())
    }

    fn read_index(&self) -> Vec<IndexEntry> {
        let Ok(body) = fs::read_to_string(&self.metadata_path) else {
            return Vec::new();
        };
        let Ok(Value::Array(rows)) = serde_json::from_str::<Value>(&body) else {
            return Vec::new();
        };

        rows.into_iter()
            .filter_map(|row| serde_json::from_value::<IndexEntry>(row).ok())
            .map(|mut row| {
                row.name = row
                    .name
                    .map(|name| name.trim().to_string())
                    .filter(|name| !name.is_empty());
                row
            })
            .collect()
    }

    fn write_index(&self, rows: &[IndexEntry]) -> Result<(), SessionStoreError> {
        let body = serde_json::to_string_pretty(rows)
            .map_err(|source| SessionStoreError::json_serialize(&self.metadata_path, source))?;
        fs::write(&self.metadata_path, body).map_err(|source| {
            SessionStoreError::io("writing metadata index", &self.metadata_path, source)
        })?;
        restrict_permissions(&self.metadata_path, 0o600);
        Ok(())
    }
}

fn render_markdown(messages: &[StoredMessage], model: &str) -> String {
    let mut lines = vec![format!("# Conversation Export ({model})"), String::new()];
    for message in messages {
        lines.push(format!("## {}", capitalize(message.role.as_str())));
        lines.push(String::new());
        lines.push(message.content.trim().to_string());
        lines.push(String::new());
    }
    format!("{}\n", lines.join("\n").trim())
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use chat_provider::Role;

    use super::*;

    #[test]
    fn markdown_uses_capitalized_role_sections() {
        let rendered = render_markdown(
            &[
                StoredMessage::new(Role::User, "  hi  "),
                StoredMessage::new(Role::Assistant, "hello"),
            ],
            "llama3.2",
        );

        assert_eq!(
            rendered,
            "# Conversation Export (llama3.2)\n\n## User\n\nhi\n\n## Assistant\n\nhello\n"
        );
    }

    #[test]
    fn snapshot_names_use_compact_timestamp_and_short_id() {
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).expect("valid timestamp");
        assert_eq!(
            snapshot_file_name(now, "0123abcd-ef45-6789-aaaa-bbbbccccdddd"),
            "20231114-221320-0123abcd.json"
        );
        assert_eq!(export_file_name(now), "20231114-221320-export.md");
    }
}
