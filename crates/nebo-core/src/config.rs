//! Platform configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

fn default_supervise_interval_secs() -> u64 {
    15
}

fn default_max_restarts_per_hour() -> u32 {
    5
}

fn default_http_timeout_secs() -> u64 {
    5
}

fn default_tee_logs() -> bool {
    true
}

fn default_inspector_capacity() -> usize {
    1024
}

fn default_watch_debounce_ms() -> u64 {
    500
}

fn default_binary_size_limit() -> u64 {
    500 * 1024 * 1024
}

/// Configuration for the app runtime platform.
///
/// Loaded from the host's TOML config; every field except the two
/// directories has a serde default matching the platform constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Directory holding installed apps (one subdirectory per app id).
    pub apps_dir: PathBuf,
    /// Directory holding per-app data directories.
    pub data_dir: PathBuf,
    /// Supervisor loop period.
    #[serde(default = "default_supervise_interval_secs")]
    pub supervise_interval_secs: u64,
    /// Restart budget per app per hour.
    #[serde(default = "default_max_restarts_per_hour")]
    pub max_restarts_per_hour: u32,
    /// Base URL of the signing-key / revocation / download service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    /// Timeout for key, revocation, and download HTTP calls.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
    /// Whether app stdout/stderr are tee'd to log files and host stderr.
    #[serde(default = "default_tee_logs")]
    pub tee_logs: bool,
    /// Ring-buffer capacity for the gRPC inspector.
    #[serde(default = "default_inspector_capacity")]
    pub inspector_capacity: usize,
    /// Filesystem-watcher debounce window, in milliseconds.
    #[serde(default = "default_watch_debounce_ms")]
    pub watch_debounce_ms: u64,
    /// Maximum accepted app binary size, in bytes.
    #[serde(default = "default_binary_size_limit")]
    pub binary_size_limit: u64,
}

impl PlatformConfig {
    /// A config rooted at the given directories with default tunables.
    #[must_use]
    pub fn new(apps_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            apps_dir: apps_dir.into(),
            data_dir: data_dir.into(),
            supervise_interval_secs: default_supervise_interval_secs(),
            max_restarts_per_hour: default_max_restarts_per_hour(),
            api_base_url: None,
            http_timeout_secs: default_http_timeout_secs(),
            tee_logs: default_tee_logs(),
            inspector_capacity: default_inspector_capacity(),
            watch_debounce_ms: default_watch_debounce_ms(),
            binary_size_limit: default_binary_size_limit(),
        }
    }

    /// Parse a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Config`] on parse failure.
    pub fn from_toml_str(text: &str) -> CoreResult<Self> {
        toml::from_str(text).map_err(|e| CoreError::Config(e.to_string()))
    }

    /// Load a config from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a parse error
    /// per [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: &Path) -> CoreResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Supervisor loop period as a [`Duration`].
    #[must_use]
    pub fn supervise_interval(&self) -> Duration {
        Duration::from_secs(self.supervise_interval_secs)
    }

    /// HTTP timeout as a [`Duration`].
    #[must_use]
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Watcher debounce window as a [`Duration`].
    #[must_use]
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// The directory for a given app.
    #[must_use]
    pub fn app_dir(&self, id: &crate::AppId) -> PathBuf {
        self.apps_dir.join(id.as_str())
    }

    /// The data directory for a given app.
    #[must_use]
    pub fn app_data_dir(&self, id: &crate::AppId) -> PathBuf {
        self.data_dir.join(id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlatformConfig::new("/var/nebo/apps", "/var/nebo/data");
        assert_eq!(config.supervise_interval(), Duration::from_secs(15));
        assert_eq!(config.max_restarts_per_hour, 5);
        assert_eq!(config.watch_debounce(), Duration::from_millis(500));
        assert!(config.tee_logs);
    }

    #[test]
    fn test_toml_partial() {
        let config = PlatformConfig::from_toml_str(
            r#"
            apps_dir = "/srv/apps"
            data_dir = "/srv/data"
            max_restarts_per_hour = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.max_restarts_per_hour, 3);
        assert_eq!(config.supervise_interval_secs, 15);
    }

    #[test]
    fn test_toml_missing_dirs_rejected() {
        assert!(PlatformConfig::from_toml_str("max_restarts_per_hour = 3").is_err());
    }

    #[test]
    fn test_app_dirs() {
        let config = PlatformConfig::new("/srv/apps", "/srv/data");
        let id = crate::AppId::from_static("com.example.a");
        assert_eq!(config.app_dir(&id), PathBuf::from("/srv/apps/com.example.a"));
        assert_eq!(
            config.app_data_dir(&id),
            PathBuf::from("/srv/data/com.example.a")
        );
    }
}
