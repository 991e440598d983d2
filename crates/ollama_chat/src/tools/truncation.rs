use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_LINES: usize = 2000;
pub const DEFAULT_MAX_BYTES: usize = 50 * 1024;
pub const OUTPUT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const OUTPUT_PREFIX: &str = "tool_";
const TRUNCATION_HINT: &str =
    "Refine your query or use read with offset/limit to page through the file.";

/// Which end of an oversized output survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TruncateDirection {
    #[default]
    Head,
    Tail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncatedOutput {
    pub content: String,
    pub truncated: bool,
    pub output_path: Option<PathBuf>,
}

/// Caps tool output by line count and byte size.
///
/// When an output is cut, the complete text is written next to the other spilled
/// outputs so the model can page through it with `read`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputTruncator {
    max_lines: usize,
    max_bytes: usize,
    direction: TruncateDirection,
    output_dir: Option<PathBuf>,
}

impl Default for OutputTruncator {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_MAX_LINES,
            max_bytes: DEFAULT_MAX_BYTES,
            direction: TruncateDirection::Head,
            output_dir: default_output_dir(),
        }
    }
}

impl OutputTruncator {
    #[must_use]
    pub fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            max_bytes: max_bytes.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_direction(mut self, direction: TruncateDirection) -> Self {
        self.direction = direction;
        self
    }

    #[must_use]
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(output_dir.into());
        self
    }

    #[must_use]
    pub fn without_output_dir(mut self) -> Self {
        self.output_dir = None;
        self
    }

    #[must_use]
    pub fn output_dir(&self) -> Option<&Path> {
        self.output_dir.as_deref()
    }

    pub fn truncate(&self, text: &str) -> TruncatedOutput {
        let lines: Vec<&str> = text.lines().collect();
        if lines.len() <= self.max_lines && text.len() <= self.max_bytes {
            return TruncatedOutput {
                content: text.to_string(),
                truncated: false,
                output_path: None,
            };
        }

        let mut kept: Vec<&str> = Vec::new();
        let mut kept_bytes = 0usize;
        let ordered: Box<dyn Iterator<Item = &&str> + '_> = match self.direction {
            TruncateDirection::Head => Box::new(lines.iter()),
            TruncateDirection::Tail => Box::new(lines.iter().rev()),
        };
        for &line in ordered {
            let separator = usize::from(!kept.is_empty());
            let candidate = kept_bytes + separator + line.len();
            if kept.len() + 1 > self.max_lines || candidate > self.max_bytes {
                break;
            }
            kept.push(line);
            kept_bytes = candidate;
        }
        if self.direction == TruncateDirection::Tail {
            kept.reverse();
        }

        let hidden_lines = lines.len().saturating_sub(kept.len());
        let hidden_bytes = text.len().saturating_sub(kept_bytes);
        let output_path = self.spill(text);

        let mut content = kept.join("\n");
        content.push_str(&format!(
            "\n... {hidden_lines} lines / {hidden_bytes} bytes truncated ...\n\n"
        ));
        if let Some(path) = &output_path {
            content.push_str(&format!("Full output saved to: {}\n", path.display()));
        }
        content.push_str(TRUNCATION_HINT);

        TruncatedOutput {
            content,
            truncated: true,
            output_path,
        }
    }

    fn spill(&self, text: &str) -> Option<PathBuf> {
        let dir = self.output_dir.as_ref()?;
        let suffix = Uuid::new_v4().simple().to_string();
        let path = dir.join(format!(
            "{OUTPUT_PREFIX}{}_{}.txt",
            epoch_millis(SystemTime::now()),
            &suffix[..8]
        ));

        let result = fs::create_dir_all(dir).and_then(|()| fs::write(&path, text));
        match result {
            Ok(()) => Some(path),
            Err(error) => {
                warn!(
                    event = "tool.output.spill_failed",
                    path = %path.display(),
                    %error
                );
                None
            }
        }
    }

    /// Deletes spilled outputs older than `retention`. Returns how many were removed.
    pub fn cleanup_old_outputs(&self, retention: Duration) -> usize {
        let Some(dir) = &self.output_dir else {
            return 0;
        };
        cleanup_old_outputs(dir, retention, SystemTime::now())
    }
}

/// `~/.local/share/ollamaterm/tool-output`, when a home directory is known.
#[must_use]
pub fn default_output_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| {
        PathBuf::from(home)
            .join(".local")
            .join("share")
            .join("ollamaterm")
            .join("tool-output")
    })
}

fn cleanup_old_outputs(dir: &Path, retention: Duration, now: SystemTime) -> usize {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };

    let now_ms = epoch_millis(now);
    let retention_ms = retention.as_millis();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(stamp) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.strip_prefix(OUTPUT_PREFIX))
            .and_then(|rest| rest.split('_').next())
            .and_then(|millis| millis.parse::<u128>().ok())
        else {
            continue;
        };

        if now_ms.saturating_sub(stamp) > retention_ms && fs::remove_file(&path).is_ok() {
            removed += 1;
        }
    }

    if removed > 0 {
        debug!(event = "tool.output.cleanup", removed, dir = %dir.display());
    }
    removed
}

fn epoch_millis(at: SystemTime) -> u128 {
    at.duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default()
}
