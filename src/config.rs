//! Configuration for snapshot-bisect
//!
//! Read from ~/.config/snapshot-bisect/config.json. Every field can be
//! overridden from the environment, which takes precedence.

use crate::store::snapshots::DEFAULT_BASE_URL;
use crate::store::Platform;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "snapshot-bisect";

pub const CACHE_DIR_ENV: &str = "SNAPSHOT_BISECT_CACHE_DIR";
pub const BASE_URL_ENV: &str = "SNAPSHOT_BISECT_BASE_URL";
pub const PLATFORM_ENV: &str = "SNAPSHOT_BISECT_PLATFORM";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where downloaded snapshots are unpacked
    pub cache_dir: Option<PathBuf>,
    /// Root of the snapshot bucket
    pub base_url: Option<String>,
    /// Snapshot platform (linux, mac, mac_arm, win32, win64)
    pub platform: Option<String>,
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_DIR))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk and apply environment overrides
    pub fn load() -> Self {
        let mut config = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load from `path`. A missing file gives defaults; a corrupt one is
    /// moved aside and defaults are loaded.
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = fs::read_to_string(path) {
            match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(err) => {
                    preserve_corrupt_config(path, &content);
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "config file was corrupted; a backup was saved and defaults were loaded"
                    );
                }
            }
        }
        Self::default()
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(dir) = lookup(CACHE_DIR_ENV) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = lookup(BASE_URL_ENV) {
            self.base_url = Some(url);
        }
        if let Some(platform) = lookup(PLATFORM_ENV) {
            self.platform = Some(platform);
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(APP_DIR)
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Configured platform, or the host's when unset.
    pub fn platform(&self) -> anyhow::Result<Platform> {
        match self.platform.as_deref() {
            Some(name) => name
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid platform in config: {}", e)),
            None => Platform::current()
                .ok_or_else(|| anyhow::anyhow!("No snapshots are published for this platform")),
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/snapshot-bisect/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert!(config.cache_dir.is_none());
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert!(config.cache_dir().ends_with(APP_DIR));
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"platform": "mac_arm"}"#).unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.platform.as_deref(), Some("mac_arm"));
        assert_eq!(config.platform().unwrap(), Platform::MacArm);
        assert!(config.base_url.is_none());
    }

    #[test]
    fn test_corrupt_config_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config, Config::default());
        assert!(!path.exists());
        let backup = dir.path().join("config.json.corrupt");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{not json");
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = [
            (CACHE_DIR_ENV, "/tmp/snapshots"),
            (BASE_URL_ENV, "http://mirror.test/snapshots"),
            (PLATFORM_ENV, ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config {
            cache_dir: Some(PathBuf::from("/var/cache/old")),
            base_url: None,
            platform: Some("linux".to_string()),
        };
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/snapshots"));
        assert_eq!(config.base_url(), "http://mirror.test/snapshots");
        // Blank values do not override.
        assert_eq!(config.platform.as_deref(), Some("linux"));
    }

    #[test]
    fn test_invalid_platform_is_error() {
        let config = Config {
            platform: Some("beos".to_string()),
            ..Config::default()
        };
        assert!(config.platform().is_err());
    }
}
