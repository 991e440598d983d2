use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tracing::{debug, warn};

use super::CapabilityReport;

pub const CAPABILITY_CACHE_FILE: &str = "model_capabilities.json";
pub const DEFAULT_CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Capability flags remembered for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedCapabilities {
    pub model_name: String,
    pub supports_tools: bool,
    pub supports_vision: bool,
    pub supports_thinking: bool,
    pub raw_capabilities: Vec<String>,
    /// Seconds since the Unix epoch.
    pub timestamp: f64,
}

impl CachedCapabilities {
    /// Flags for `report`, stamped with the current time. An unknown report
    /// yields every flag set.
    #[must_use]
    pub fn from_report(model_name: &str, report: &CapabilityReport) -> Self {
        Self {
            model_name: model_name.to_string(),
            supports_tools: report.supports("tools"),
            supports_vision: report.supports("vision"),
            supports_thinking: report.supports("thinking"),
            raw_capabilities: report.caps().iter().cloned().collect(),
            timestamp: unix_now(),
        }
    }

    #[must_use]
    pub fn is_stale(&self, max_age: Duration) -> bool {
        unix_now() - self.timestamp > max_age.as_secs_f64()
    }
}

/// JSON file of [`CachedCapabilities`] keyed by model name.
///
/// Unreadable entries are skipped with a warning and write failures are logged;
/// neither ever fails the caller.
#[derive(Debug, Clone, Default)]
pub struct CapabilityCache {
    path: Option<PathBuf>,
    entries: BTreeMap<String, CachedCapabilities>,
}

impl CapabilityCache {
    /// Loads the cache stored at `path`, if any.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        Self {
            path: Some(path),
            entries,
        }
    }

    /// Cache that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for `model` unless it is older than `max_age`.
    #[must_use]
    pub fn get(&self, model: &str, max_age: Duration) -> Option<&CachedCapabilities> {
        self.entries
            .get(model)
            .filter(|entry| !entry.is_stale(max_age))
    }

    pub fn set(&mut self, entry: CachedCapabilities) {
        self.entries.insert(entry.model_name.clone(), entry);
        self.save();
    }

    pub fn invalidate(&mut self, model: &str) {
        self.entries.remove(model);
        self.save();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.save();
    }

    fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };

        let result = serde_json::to_string_pretty(&self.entries)
            .map_err(|error| error.to_string())
            .and_then(|body| {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).map_err(|error| error.to_string())?;
                }
                fs::write(path, body).map_err(|error| error.to_string())
            });

        match result {
            Ok(()) => debug!(
                event = "capability_cache.save",
                path = %path.display(),
                entries = self.entries.len()
            ),
            Err(error) => warn!(
                event = "capability_cache.save.failed",
                path = %path.display(),
                %error,
                "unable to persist model capability cache"
            ),
        }
    }
}

fn load_entries(path: &Path) -> BTreeMap<String, CachedCapabilities> {
    let mut entries = BTreeMap::new();
    if !path.exists() {
        return entries;
    }

    let raw = match fs::read_to_string(path)
        .map_err(|error| error.to_string())
        .and_then(|body| {
            serde_json::from_str::<BTreeMap<String, Value>>(&body).map_err(|error| error.to_string())
        }) {
        Ok(raw) => raw,
        Err(error) => {
            warn!(
                event = "capability_cache.load.failed",
                path = %path.display(),
                %error,
                "ignoring unreadable model capability cache"
            );
            return entries;
        }
    };

    for (model, value) in raw {
        match serde_json::from_value::<CachedCapabilities>(value) {
            Ok(entry) => {
                entries.insert(model, entry);
            }
            Err(error) => warn!(
                event = "capability_cache.load.entry_invalid",
                model = %model,
                %error,
                "skipping invalid capability cache entry"
            ),
        }
    }
    entries
}

/// Seconds since the Unix epoch, the shape stored in the cache file.
fn unix_now() -> f64 {
    (OffsetDateTime::now_utc() - OffsetDateTime::UNIX_EPOCH).as_seconds_f64()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entry(model: &str, timestamp: f64) -> CachedCapabilities {
        CachedCapabilities {
            model_name: model.to_string(),
            supports_tools: true,
            supports_vision: false,
            supports_thinking: true,
            raw_capabilities: vec!["completion".to_string(), "tools".to_string()],
            timestamp,
        }
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(CAPABILITY_CACHE_FILE);

        let mut cache = CapabilityCache::open(&path);
        cache.set(entry("llama3.2", unix_now()));

        let reopened = CapabilityCache::open(&path);
        let cached = reopened
            .get("llama3.2", DEFAULT_CACHE_MAX_AGE)
            .expect("entry should be cached");
        assert!(cached.supports_tools);
        assert!(!cached.supports_vision);
    }

    #[test]
    fn fresh_entries_carry_epoch_seconds() {
        let cached = CachedCapabilities::from_report("llama3.2", &CapabilityReport::known(["tools"]));
        let wall_clock = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock after epoch")
            .as_secs_f64();

        assert!((cached.timestamp - wall_clock).abs() < 5.0);
        assert!(!cached.is_stale(Duration::from_secs(60)));
    }

    #[test]
    fn stale_entries_are_not_returned() {
        let mut cache = CapabilityCache::in_memory();
        cache.set(entry("old", unix_now() - 2.0 * 86_400.0));

        assert!(cache.get("old", DEFAULT_CACHE_MAX_AGE).is_none());
        assert!(cache.get("old", Duration::from_secs(3 * 86_400)).is_some());
    }

    #[test]
    fn invalid_entries_are_skipped_and_valid_ones_kept() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(CAPABILITY_CACHE_FILE);
        let good = serde_json::to_value(entry("good", unix_now())).expect("entry serializes");
        fs::write(
            &path,
            json!({ "good": good, "bad": { "model_name": "bad" } }).to_string(),
        )
        .expect("cache file should be written");

        let cache = CapabilityCache::open(&path);

        assert_eq!(cache.len(), 1);
        assert!(cache.get("good", DEFAULT_CACHE_MAX_AGE).is_some());
    }

    #[test]
    fn malformed_file_loads_as_empty() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join(CAPABILITY_CACHE_FILE);
        fs::write(&path, "not json").expect("cache file should be written");

        assert!(CapabilityCache::open(&path).is_empty());
    }

    #[test]
    fn invalidate_and_clear_persist() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let path = dir.path().join("nested").join(CAPABILITY_CACHE_FILE);

        let mut cache = CapabilityCache::open(&path);
        cache.set(entry("a", unix_now()));
        cache.set(entry("b", unix_now()));
        cache.invalidate("a");
        assert_eq!(CapabilityCache::open(&path).len(), 1);

        cache.clear();
        assert!(CapabilityCache::open(&path).is_empty());
    }

    #[test]
    fn unknown_report_caches_permissive_flags() {
        let cached = CachedCapabilities::from_report("mystery", &CapabilityReport::unknown());
        assert!(cached.supports_tools && cached.supports_vision && cached.supports_thinking);
        assert!(cached.raw_capabilities.is_empty());
    }
}
