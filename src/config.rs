use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub wechat: WechatConfig,
    #[serde(default = "default_server_config")]
    pub server: ServerConfig,
    #[serde(default = "default_store_config")]
    pub store: StoreConfig,
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub media: MediaConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WechatConfig {
    pub app_id: String,
    pub app_secret: String,
    /// Token configured on the platform side, used to sign webhook requests
    pub token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_webhook_path")]
    pub path: String,
    /// Base URL for the reminder edit/share links embedded in replies
    #[serde(default = "default_site_url")]
    pub site_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeneralConfig {
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: default_utc_offset_hours(),
        }
    }
}

/// Media ids of the QR-code images sent back for menu clicks
#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    #[serde(default = "default_join_group_media")]
    pub join_group: String,
    #[serde(default = "default_donate_media")]
    pub donate: String,
    #[serde(default = "default_add_friend_media")]
    pub add_friend: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            join_group: default_join_group_media(),
            donate: default_donate_media(),
            add_friend: default_add_friend_media(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.weixin.qq.com".to_string()
}

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_webhook_path() -> String {
    "/wechat".to_string()
}

fn default_site_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("remindbot.db")
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_join_group_media() -> String {
    "S8Jjk9aHXZ7wXSwK1qqu2UnkQSAHid-VQv_kxNUZnMI".to_string()
}

fn default_donate_media() -> String {
    "S8Jjk9aHXZ7wXSwK1qqu2b6yDboZT6UIvYWF4dKLyQs".to_string()
}

fn default_add_friend_media() -> String {
    "S8Jjk9aHXZ7wXSwK1qqu2SXTItktLfgk4Cv9bod5l8k".to_string()
}

fn default_server_config() -> ServerConfig {
    ServerConfig {
        listen_addr: default_listen_addr(),
        path: default_webhook_path(),
        site_url: default_site_url(),
    }
}

fn default_store_config() -> StoreConfig {
    StoreConfig {
        database_path: default_db_path(),
    }
}

impl Config {
    /// The local timezone used for display and for "today"/"tomorrow" windows.
    pub fn timezone(&self) -> FixedOffset {
        // Range is checked in `parse`; hand-built configs fall back to UTC.
        FixedOffset::east_opt(self.general.utc_offset_hours * 3600).unwrap_or(Utc.fix())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("Invalid TOML")?;

        if !(-23..=23).contains(&config.general.utc_offset_hours) {
            anyhow::bail!(
                "general.utc_offset_hours must be between -23 and 23, got {}",
                config.general.utc_offset_hours
            );
        }

        let trimmed = config.server.site_url.trim_end_matches('/').to_string();
        config.server.site_url = trimmed;

        Ok(config)
    }
}
