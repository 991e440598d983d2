use std::path::{Path, PathBuf};

use time::OffsetDateTime;

fn compact_timestamp(now: OffsetDateTime) -> String {
    format!(
        "{:04}{:02}{:02}-{:02}{:02}{:02}",
        now.year(),
        u8::from(now.month()),
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// `YYYYMMDD-HHMMSS-<8 hex>.json`
#[must_use]
pub fn snapshot_file_name(now: OffsetDateTime, id: &str) -> String {
    let short: String = id.chars().filter(|c| *c != '-').take(8).collect();
    format!("{}-{short}.json", compact_timestamp(now))
}

/// `YYYYMMDD-HHMMSS-export.md`
#[must_use]
pub fn export_file_name(now: OffsetDateTime) -> String {
    format!("{}-export.md", compact_timestamp(now))
}

/// Resolves an indexed snapshot path, accepting it only when it lies inside `base`.
pub(crate) fn resolve_inside(base: &Path, raw: &str) -> Option<PathBuf> {
    let base = base.canonicalize().ok()?;
    let candidate = Path::new(raw);
    let candidate = if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    };
    let resolved = candidate.canonicalize().ok()?;
    resolved.starts_with(&base).then_some(resolved)
}

#[cfg(unix)]
pub(crate) fn restrict_permissions(path: &Path, mode: u32) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(error) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)) {
        tracing::debug!(path = %path.display(), %error, "failed to restrict permissions");
    }
}

#[cfg(not(unix))]
pub(crate) fn restrict_permissions(_path: &Path, _mode: u32) {}
