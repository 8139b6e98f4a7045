//! Client tunables, consulted by the scheduler at construction.

use anyhow::Result;
use curl::easy::{Easy2, Handler, HttpVersion};
use curl::multi::Multi;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Pool and poll tunables. The defaults are the regression-test baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Active-transfer cap; also the permit count of the admission budget.
    pub max_connections: usize,
    /// Upper bound on one poll cycle when the transport has no earlier deadline.
    pub poll_interval_ms: u64,
    /// Number of completed-transfer speed samples kept per direction.
    pub speed_window_size: usize,
    /// Transport-level connection cap per host.
    pub max_host_connections: usize,
    /// Transport-level cap on simultaneously open connections.
    pub max_total_connections: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_connections: 8,
            poll_interval_ms: 100,
            speed_window_size: 128,
            max_host_connections: 2,
            max_total_connections: 4,
        }
    }
}

impl ClientSettings {
    /// Apply the per-handle transport defaults every transfer starts from:
    /// follow redirects, keep connection reuse and keepalive on, let the
    /// transport negotiate the HTTP version, and prefer multiplexing over
    /// opening extra connections.
    pub fn apply_easy_defaults<H: Handler>(&self, easy: &mut Easy2<H>) -> Result<(), curl::Error> {
        easy.follow_location(true)?;
        easy.forbid_reuse(false)?;
        easy.tcp_keepalive(true)?;
        easy.http_version(HttpVersion::Any)?;
        easy.pipewait(true)?;
        easy.max_connects(self.max_connections as u32)?;
        Ok(())
    }

    /// Apply the multiplex-level connection pool limits.
    pub fn apply_multi_defaults(&self, multi: &mut Multi) -> Result<(), curl::MultiError> {
        multi.pipelining(false, true)?;
        multi.set_max_host_connections(self.max_host_connections)?;
        multi.set_max_total_connections(self.max_total_connections)?;
        multi.set_max_connects(self.max_connections)?;
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("httpmux")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load settings from disk, writing a default file first if none exists.
pub fn load_or_init() -> Result<ClientSettings> {
    let path = config_path()?;
    if !path.exists() {
        let defaults = ClientSettings::default();
        let toml = toml::to_string_pretty(&defaults)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(defaults);
    }

    let data = fs::read_to_string(&path)?;
    let settings: ClientSettings = toml::from_str(&data)?;
    Ok(settings)
}
