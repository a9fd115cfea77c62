//! User preferences (settings.json in the data directory).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::diff::DiffMode;
use crate::sync::EngineOptions;

/// Settings file name inside the data directory.
pub const SETTINGS_FILE: &str = "settings.json";

/// Snapshot file name inside the data directory.
pub const SNAPSHOT_FILE: &str = "snapshot.json";

/// How alerts are delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifierKind {
    #[default]
    Console,
    Desktop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// RSS channel listing the circulars.
    pub source_url: String,
    pub notifications_enabled: bool,
    /// Used only to register the periodic task.
    pub poll_interval_minutes: u64,
    pub diff_mode: DiffMode,
    pub notifier: NotifierKind,
    /// `host:port` that must accept a connection before each cycle; unset means always online.
    pub reachability_addr: Option<String>,
    pub emit_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            notifications_enabled: true,
            poll_interval_minutes: 15,
            diff_mode: DiffMode::Length,
            notifier: NotifierKind::Console,
            reachability_addr: None,
            emit_timeout_secs: 10,
        }
    }
}

impl Settings {
    /// Load settings from `data_dir`.
    ///
    /// Returns defaults if the file doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn load(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(SETTINGS_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid settings in {}", path.display()))
    }

    /// Write settings to `data_dir`, creating it if needed.
    pub async fn save(&self, data_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .context("Failed to create data directory")?;
        let path = data_dir.join(SETTINGS_FILE);
        let contents = serde_json::to_string_pretty(self)?;
        tokio::fs::write(&path, contents)
            .await
            .context("Failed to save settings")?;
        Ok(path)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            diff_mode: self.diff_mode,
            notifications_enabled: self.notifications_enabled,
            emit_timeout: Duration::from_secs(self.emit_timeout_secs),
        }
    }
}

/// Platform data directory, e.g. `~/.local/share/circular-watch`.
pub fn default_data_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "circular-watch")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("Could not determine a home directory; pass --data-dir")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let settings = Settings::load(dir.path()).await.unwrap();

        assert_eq!(settings, Settings::default());
        assert!(settings.notifications_enabled);
        assert_eq!(settings.poll_interval_minutes, 15);
    }

    #[tokio::test]
    async fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let json = r#"{
            "source_url": "https://example.com/feed",
            "diff_mode": "by_id",
            "notifier": "desktop"
        }"#;
        std::fs::write(dir.path().join(SETTINGS_FILE), json).unwrap();

        let settings = Settings::load(dir.path()).await.unwrap();

        assert_eq!(settings.source_url, "https://example.com/feed");
        assert_eq!(settings.diff_mode, DiffMode::ById);
        assert_eq!(settings.notifier, NotifierKind::Desktop);
        assert_eq!(settings.poll_interval_minutes, 15);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "poll_interval_minutes = 5").unwrap();

        assert!(Settings::load(dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            notifications_enabled: false,
            poll_interval_minutes: 60,
            ..Default::default()
        };

        settings.save(dir.path()).await.unwrap();

        assert_eq!(Settings::load(dir.path()).await.unwrap(), settings);
    }

    #[test]
    fn engine_options_follow_settings() {
        let settings = Settings {
            notifications_enabled: false,
            diff_mode: DiffMode::ById,
            emit_timeout_secs: 3,
            ..Default::default()
        };

        let options = settings.engine_options();

        assert!(!options.notifications_enabled);
        assert_eq!(options.diff_mode, DiffMode::ById);
        assert_eq!(options.emit_timeout, Duration::from_secs(3));
    }
}
