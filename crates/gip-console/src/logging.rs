use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

pub const ENV_FILTER: &str = "GIP_LOG";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    /// Append to a file; the terminal belongs to the TUI.
    File(PathBuf),
    Stderr,
}

/// `$XDG_STATE_HOME/gip-console/console.log`, else under `~/.local/state`,
/// else the system temp dir.
pub fn default_log_path() -> PathBuf {
    state_dir().join("console.log")
}

fn state_dir() -> PathBuf {
    if let Some(state) = std::env::var_os("XDG_STATE_HOME").filter(|s| !s.is_empty()) {
        PathBuf::from(state).join("gip-console")
    } else if let Some(home) = std::env::var_os("HOME").filter(|s| !s.is_empty()) {
        PathBuf::from(home)
            .join(".local")
            .join("state")
            .join("gip-console")
    } else {
        std::env::temp_dir().join("gip-console")
    }
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(ENV_FILTER).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_log(path: &Path) -> Result<fs::File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| {
            Error::msg(format!("failed to create log directory {}: {e}", dir.display()))
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::msg(format!("failed to open log file {}: {e}", path.display())))
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(target: &LogTarget, json: bool) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(false);
    let installed = match (target, json) {
        (LogTarget::File(path), false) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(open_log(path)?))
            .try_init(),
        (LogTarget::File(path), true) => builder
            .json()
            .with_writer(Mutex::new(open_log(path)?))
            .try_init(),
        (LogTarget::Stderr, false) => builder.with_writer(std::io::stderr).try_init(),
        (LogTarget::Stderr, true) => builder.json().with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| Error::msg(format!("failed to install logger: {e}")))?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        target = ?target,
        "gip-console starting"
    );
    Ok(())
}
