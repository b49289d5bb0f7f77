use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::traits::ArchiveHandle;

/// Overrides the platform config directory.
pub const CONFIG_DIR_ENV: &str = "ARCHIVE_EXPLORER_CONFIG_DIR";
pub const CONFIG_FILE: &str = "config.json";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No valid config directory found for the system")]
    NoConfigDir,
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only source of the archive to reopen at startup.
pub trait RecentSource {
    fn last_opened(&self) -> Option<ArchiveHandle>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Extraction jobs allowed to run at once
    pub max_concurrent_extractions: usize,

    /// Capacity of each engine subscription. A worker that gets this far
    /// ahead of the subscription's reader waits for it to catch up.
    pub event_buffer: usize,

    /// Cancel a session whose password prompt stays unanswered this long
    pub challenge_timeout_secs: Option<u64>,

    /// Most recent first
    pub recently_viewed: VecDeque<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: 1,
            event_buffer: 64,
            challenge_timeout_secs: None,
            recently_viewed: VecDeque::new(),
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        std::env::var_os(CONFIG_DIR_ENV)
            .map(PathBuf::from)
            .or_else(|| dirs::config_dir().map(|dir| dir.join("archive-explorer")))
            .ok_or(ConfigError::NoConfigDir)
    }

    #[instrument]
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_dir()?)
    }

    #[instrument]
    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        info!("Loading config");
        let bytes = std::fs::read(dir.join(CONFIG_FILE))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(ConfigError::IoError(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config file, using defaults");
                Self::default()
            }
            Err(e) => {
                warn!(error = %e, "Falling back to default config");
                Self::default()
            }
        }
    }

    pub fn challenge_timeout(&self) -> Option<Duration> {
        self.challenge_timeout_secs.map(Duration::from_secs)
    }
}

impl RecentSource for AppConfig {
    fn last_opened(&self) -> Option<ArchiveHandle> {
        self.recently_viewed
            .iter()
            .find(|path| !path.trim().is_empty())
            .map(ArchiveHandle::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.max_concurrent_extractions, 1);
        assert_eq!(config.event_buffer, 64);
        assert!(config.challenge_timeout().is_none());
        assert!(config.last_opened().is_none());
    }

    #[test]
    fn test_load_from_fills_missing_fields() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"challenge_timeout_secs": 30, "recently_viewed": ["/data/b.zip", "/data/a.zip"]}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.challenge_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.event_buffer, 64);
        assert_eq!(
            config.last_opened(),
            Some(ArchiveHandle::new("/data/b.zip"))
        );
    }

    #[test]
    fn test_load_from_missing_file() {
        let dir = tempdir().unwrap();
        let err = AppConfig::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }

    #[test]
    fn test_load_from_rejects_garbage() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), b"not json").unwrap();
        let err = AppConfig::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_last_opened_skips_blank_entries() {
        let config = AppConfig {
            recently_viewed: VecDeque::from(vec![" ".to_string(), "/x.zip".to_string()]),
            ..Default::default()
        };
        assert_eq!(config.last_opened(), Some(ArchiveHandle::new("/x.zip")));
    }
}
