//! Application configuration and on-disk layout.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Telegram API credentials, read from `config.json`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    pub api_id: i32,
    pub api_hash: String,
}

impl AppConfig {
    /// Default location: `$XDG_CONFIG_HOME/tg-fuse/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("tg-fuse").join("config.json"))
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Where persistent state lives.
#[derive(Clone, Debug)]
pub struct DataLayout {
    pub root: PathBuf,
}

impl DataLayout {
    /// Default root: `$XDG_DATA_HOME/tg-fuse`.
    pub fn default_root() -> Option<Self> {
        dirs::data_dir().map(|dir| Self {
            root: dir.join("tg-fuse"),
        })
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// RPC client database directory (owned by the client capability).
    pub fn tdlib_dir(&self) -> PathBuf {
        self.root.join("tdlib")
    }

    /// Durable cache database file.
    pub fn cache_db(&self) -> PathBuf {
        self.tdlib_dir().join("cache.db")
    }

    /// Downloaded and uploadable content.
    pub fn files_dir(&self) -> PathBuf {
        self.root.join("files")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Upload spool under the system temp directory.
    pub fn spool_dir() -> PathBuf {
        std::env::temp_dir().join("tg-fuse").join("uploads")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_json() {
        let config = AppConfig {
            api_id: 12345,
            api_hash: "abcdef".into(),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(serde_json::from_str::<AppConfig>(&json).unwrap(), config);
    }

    #[test]
    fn config_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_id": 7, "api_hash": "h"}"#).unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.api_id, 7);
        assert_eq!(config.api_hash, "h");
    }

    #[test]
    fn layout_paths_hang_off_the_root() {
        let layout = DataLayout::at("/data/tg-fuse");
        assert_eq!(layout.cache_db(), PathBuf::from("/data/tg-fuse/tdlib/cache.db"));
        assert_eq!(layout.files_dir(), PathBuf::from("/data/tg-fuse/files"));
        assert_eq!(layout.logs_dir(), PathBuf::from("/data/tg-fuse/logs"));
        assert!(DataLayout::spool_dir().ends_with("tg-fuse/uploads"));
    }
}
