use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::config::{ConfigError, LoggingConfig};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` wins over the configured level. Records go to the configured log
/// file when one is set, otherwise to stderr. Returns `false` when a subscriber
/// was already installed, which makes repeated calls harmless.
pub fn init(config: &LoggingConfig) -> Result<bool, ConfigError> {
    let filter = env_filter(&config.level);

    let installed = match config.log_file() {
        Some(path) => {
            let file = open_log_file(&path)?;
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file));
            if config.compact {
                builder.compact().try_init().is_ok()
            } else {
                builder.try_init().is_ok()
            }
        }
        None => {
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr);
            if config.compact {
                builder.compact().try_init().is_ok()
            } else {
                builder.try_init().is_ok()
            }
        }
    };
    Ok(installed)
}

fn env_filter(level: &str) -> EnvFilter {
    let level = level.trim().to_ascii_lowercase();
    let level = if level.is_empty() { "info" } else { level.as_str() };
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log_file(path: &Path) -> Result<File, ConfigError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConfigError::Io {
            operation: "creating log directory",
            path: parent.to_path_buf(),
            source,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| ConfigError::Io {
            operation: "opening log file",
            path: path.to_path_buf(),
            source,
        })
}
