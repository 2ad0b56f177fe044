//! CLI configuration.
//!
//! Settings are layered, lowest precedence first: built-in defaults, the JSON
//! file at `<config dir>/scoreplay/config.json`, then the `API_URL` and
//! `S3_HOST` environment variables and the matching flags (clap resolves
//! those two, flags winning).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use scoreplay_api::ClientConfig;
use scoreplay_upload::DEFAULT_CONCURRENCY;

/// Contents of `config.json`. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub api_url: Option<String>,
    pub s3_host: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub transfer_timeout_secs: Option<u64>,
    /// Attempts for idempotent control-plane calls, first one included.
    pub max_attempts: Option<u32>,
    pub concurrency: Option<usize>,
    /// Overrides `<config dir>/scoreplay/sessions`.
    pub journal_dir: Option<PathBuf>,
}

impl ConfigFile {
    /// Reads `path`. A missing file yields defaults; so does one that does
    /// not parse, after a warning.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(file) => Ok(file),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub client: ClientConfig,
    pub concurrency: usize,
    pub journal_dir: PathBuf,
}

impl Settings {
    /// Applies `file` over the defaults, then the environment/flag values.
    pub fn resolve(
        file: ConfigFile,
        api_url: Option<String>,
        s3_host: Option<String>,
        app_dir: &Path,
    ) -> Self {
        let mut client = ClientConfig::default();
        if let Some(url) = non_empty(file.api_url) {
            client.api_url = url;
        }
        client.s3_host = non_empty(file.s3_host);
        if let Some(secs) = file.request_timeout_secs {
            client.request_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.transfer_timeout_secs {
            client.transfer_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = file.max_attempts {
            client.retry.max_attempts = attempts.max(1);
        }

        if let Some(url) = non_empty(api_url) {
            client.api_url = url;
        }
        if let Some(host) = non_empty(s3_host) {
            client.s3_host = Some(host);
        }

        Self {
            client,
            concurrency: file.concurrency.unwrap_or(DEFAULT_CONCURRENCY).max(1),
            journal_dir: file
                .journal_dir
                .unwrap_or_else(|| app_dir.join("sessions")),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// `<config dir>/scoreplay`.
pub fn app_dir() -> PathBuf {
    config_base_dir(
        std::env::var("XDG_CONFIG_HOME").ok(),
        std::env::var("HOME").ok(),
    )
    .join("scoreplay")
}

/// Default location of `config.json`.
pub fn default_config_path() -> PathBuf {
    app_dir().join("config.json")
}

fn config_base_dir(xdg_config_home: Option<String>, home: Option<String>) -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let _ = (xdg_config_home, home);
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(xdg) = xdg_config_home.filter(|d| !d.is_empty()) {
            return PathBuf::from(xdg);
        }
        let home = home.unwrap_or_else(|| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}
