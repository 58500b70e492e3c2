use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub artwork: ArtworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            path: home.join(".nowplaying-rpc"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    pub client_id: String,
    /// Discord drops activity updates sent faster than this
    pub min_update_interval_secs: u64,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            client_id: "1076426618874101871".to_string(),
            min_update_interval_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub auto_start: bool,
    pub poll_interval_secs: u64,
    pub query_timeout_ms: u64,
    /// Apps whose playback is mirrored. Empty allows every app.
    pub allowed_apps: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            auto_start: true,
            poll_interval_secs: 5,
            query_timeout_ms: 2000,
            allowed_apps: default_allowed_apps(),
        }
    }
}

#[cfg(target_os = "macos")]
fn default_allowed_apps() -> Vec<String> {
    vec!["com.tencent.QQMusicMac".to_string()]
}

#[cfg(not(target_os = "macos"))]
fn default_allowed_apps() -> Vec<String> {
    Vec::new()
}

impl DaemonConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn is_allowed(&self, app: Option<&str>) -> bool {
        if self.allowed_apps.is_empty() {
            return true;
        }
        app.is_some_and(|app| self.allowed_apps.iter().any(|allowed| allowed == app))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtworkConfig {
    pub enabled: bool,
    pub search_url: String,
    pub timeout_secs: u64,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            search_url: "https://c.y.qq.com/soso/fcgi-bin/client_search_cp".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nowplaying-rpc")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config from {}", config_path.display()))?;
            let config: Config =
                toml::from_str(&content).with_context(|| "Failed to parse config file")?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).with_context(|| "Failed to serialize config")
    }

    pub fn data_dir(&self) -> &PathBuf {
        &self.storage.path
    }

    pub fn db_path(&self) -> PathBuf {
        self.storage.path.join("cache.db")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.storage.path.join("daemon.sock")
    }

    pub fn pid_path(&self) -> PathBuf {
        self.storage.path.join("daemon.pid")
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.data_dir()).with_context(|| {
            format!(
                "Failed to create data directory: {}",
                self.data_dir().display()
            )
        })?;
        Ok(())
    }
}
