//! Logging init: file under the XDG state dir, or stderr when that fails.

use anyhow::Result;
use std::fs;
use std::io;
use tracing_subscriber::EnvFilter;

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,httpmux=debug"))
}

/// Initialize structured logging to `~/.local/state/httpmux/httpmux.log`.
/// Returns Err when the log file cannot be opened so the caller can fall
/// back to [`init_logging_stderr`].
pub fn init_logging() -> Result<()> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("httpmux")?;
    let log_dir = xdg_dirs.get_state_home();
    fs::create_dir_all(&log_dir)?;
    let path = log_dir.join("httpmux.log");

    let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;

    // Each event re-clones the handle; if that ever fails, the event goes to
    // stderr instead of being dropped.
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(move || match file.try_clone() {
            Ok(f) => Box::new(f) as Box<dyn io::Write + Send>,
            Err(_) => Box::new(io::stderr()) as Box<dyn io::Write + Send>,
        })
        .with_ansi(false)
        .init();

    tracing::info!("httpmux logging initialized at {}", path.display());
    Ok(())
}

/// Initialize logging to stderr only (no file).
pub fn init_logging_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(default_filter())
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}
