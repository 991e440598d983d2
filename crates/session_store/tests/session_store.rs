use std::fs;
use std::path::PathBuf;

use chat_provider::Role;
use pretty_assertions::assert_eq;
use session_store::{ConversationStore, SessionStoreError, StoredMessage};
use tempfile::TempDir;

fn store_in(dir: &TempDir) -> ConversationStore {
    ConversationStore::new(
        dir.path().join("conversations"),
        dir.path().join("conversations").join("index.json"),
    )
}

fn sample_messages() -> Vec<StoredMessage> {
    vec![
        StoredMessage::new(Role::System, "You are a helpful assistant."),
        StoredMessage::new(Role::User, "What is Rust?"),
        StoredMessage::new(Role::Assistant, "A systems programming language."),
    ]
}

#[test]
fn save_then_load_round_trips_messages_and_metadata() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = store_in(&dir);

    let path = store
        .save(&sample_messages(), "llama3.2", Some("  rust intro "))
        .expect("save should succeed");
    let loaded = store.load(&path).expect("load should succeed");

    assert_eq!(loaded.messages, sample_messages());
    assert_eq!(loaded.model, "llama3.2");
    assert_eq!(loaded.name.as_deref(), Some("rust intro"));
    assert!(!loaded.created_at.is_empty());

    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .expect("snapshot file name");
    assert!(file_name.ends_with(".json"));
    assert_eq!(file_name.len(), "YYYYMMDD-HHMMSS-abcdef12.json".len());
}

#[test]
fn list_is_newest_first_and_load_latest_follows_it() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = store_in(&dir);

    let first = store
        .save(&sample_messages(), "llama3.2", None)
        .expect("first save should succeed");
    let second = store
        .save(&[StoredMessage::new(Role::User, "later")], "qwen3", Some("second"))
        .expect("second save should succeed");

    let rows = store.list();
    assert_eq!(rows.len(), 2);
    assert_eq!(PathBuf::from(&rows[0].path), second);
    assert_eq!(PathBuf::from(&rows[1].path), first);
    assert_eq!(rows[0].name.as_deref(), Some("second"));
    assert_eq!(rows[1].name, None);

    let latest = store
        .load_latest()
        .expect("load_latest should succeed")
        .expect("latest conversation should exist");
    assert_eq!(latest.model, "qwen3");
}

#[test]
fn unreadable_index_lists_nothing() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = store_in(&dir);
    fs::create_dir_all(dir.path().join("conversations")).expect("directory should be created");
    fs::write(dir.path().join("conversations").join("index.json"), "{not json")
        .expect("index should be written");

    assert!(store.list().is_empty());
    assert!(store
        .load_latest()
        .expect("load_latest should not fail")
        .is_none());
}

#[test]
fn index_entries_outside_the_directory_are_ignored_by_load_latest() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = store_in(&dir);
    store
        .save(&sample_messages(), "llama3.2", None)
        .expect("save should succeed");

    let outside = dir.path().join("outside.json");
    fs::write(
        &outside,
        r#"{"created_at":"2999-01-01T00:00:00Z","model":"evil","messages":[]}"#,
    )
    .expect("outside snapshot should be written");
    let index_path = dir.path().join("conversations").join("index.json");
    let mut rows: Vec<serde_json::Value> =
        serde_json::from_str(&fs::read_to_string(&index_path).expect("index readable"))
            .expect("index should parse");
    rows.push(serde_json::json!({
        "path": outside.display().to_string(),
        "created_at": "2999-01-01T00:00:00Z"
    }));
    fs::write(&index_path, serde_json::to_string(&rows).expect("index serializes"))
        .expect("index should be written");

    assert_eq!(store.list()[0].created_at, "2999-01-01T00:00:00Z");
    assert!(store
        .load_latest()
        .expect("load_latest should not fail")
        .is_none());
}

#[test]
fn disabled_store_refuses_writes() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = store_in(&dir).with_enabled(false);

    let error = store
        .save(&sample_messages(), "llama3.2", None)
        .expect_err("disabled store must refuse save");
    assert!(matches!(error, SessionStoreError::Disabled));

    let error = store
        .export_markdown(&sample_messages(), "llama3.2")
        .expect_err("disabled store must refuse export");
    assert!(matches!(error, SessionStoreError::Disabled));
    assert!(!dir.path().join("conversations").exists());
}

#[test]
fn export_markdown_writes_role_sections() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = store_in(&dir);

    let path = store
        .export_markdown(&sample_messages(), "llama3.2")
        .expect("export should succeed");
    let body = fs::read_to_string(&path).expect("export should be readable");

    assert!(body.starts_with("# Conversation Export (llama3.2)\n"));
    assert!(body.contains("## System\n\nYou are a helpful assistant."));
    assert!(body.contains("## Assistant\n\nA systems programming language."));
    assert!(path.to_string_lossy().ends_with("-export.md"));
}

#[test]
fn load_rejects_malformed_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = store_in(&dir);
    let path = dir.path().join("broken.json");
    fs::write(&path, r#"{"messages":[{"role":"narrator","content":"x"}]}"#)
        .expect("snapshot should be written");

    let error = store.load(&path).expect_err("unknown role must fail");
    assert!(matches!(error, SessionStoreError::JsonParse { .. }));

    let missing = store
        .load(&dir.path().join("missing.json"))
        .expect_err("missing file must fail");
    assert!(matches!(missing, SessionStoreError::Io { .. }));
}

#[cfg(unix)]
#[test]
fn snapshots_are_private_to_the_owner() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().expect("tempdir should be created");
    let store = store_in(&dir);
    let path = store
        .save(&sample_messages(), "llama3.2", None)
        .expect("save should succeed");

    let mode = fs::metadata(&path).expect("metadata").permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);
}
