use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    constants::{DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_MAX_FILE_SIZE, DEFAULT_RESOLVE_TIMEOUT},
    settings::Settings,
};

pub trait Param<T> {
    fn param(&self) -> T;
}

impl<T: Clone> Param<T> for T {
    fn param(&self) -> T {
        self.clone()
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub telegram: TelegramConfig,
    pub resolver: ResolverConfig,
    pub mongo: MongoConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub defaults: Settings,
}

impl Config {
    pub fn load_from<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let config_context = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&config_context)?;
        Ok(config)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct TelegramConfig {
    pub token: String,
    // self-hosted bot api server, lifts the 50MB upload limit
    pub api_url: Option<String>,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ResolverConfig {
    pub endpoint: String,
    pub timeout_secs: Option<u64>,
}

impl ResolverConfig {
    pub fn timeout(&self) -> Duration {
        self.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_RESOLVE_TIMEOUT)
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct MongoConfig {
    pub uri: String,
    #[serde(default = "default_database")]
    pub database: String,
}

fn default_database() -> String {
    "teradownloader".to_string()
}

#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_concurrent_jobs: usize,
    pub max_file_size: u64,
    // whole-request timeout for a single download, unlimited when absent
    pub timeout_secs: Option<u64>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            timeout_secs: None,
        }
    }
}

impl Param<TelegramConfig> for Config {
    fn param(&self) -> TelegramConfig {
        self.telegram.clone()
    }
}

impl Param<ResolverConfig> for Config {
    fn param(&self) -> ResolverConfig {
        self.resolver.clone()
    }
}

impl Param<MongoConfig> for Config {
    fn param(&self) -> MongoConfig {
        self.mongo.clone()
    }
}

impl Param<DownloadConfig> for Config {
    fn param(&self) -> DownloadConfig {
        self.download.clone()
    }
}

impl Param<Settings> for Config {
    fn param(&self) -> Settings {
        self.defaults.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [telegram]
            token = "123:abc"

            [resolver]
            endpoint = "https://resolver.example/api"

            [mongo]
            uri = "mongodb://localhost:27017"
            "#,
        )
        .unwrap();

        assert_eq!(config.mongo.database, "teradownloader");
        assert_eq!(config.download.max_concurrent_jobs, 50);
        assert_eq!(config.download.max_file_size, 2 * 1024 * 1024 * 1024);
        assert_eq!(config.resolver.timeout(), DEFAULT_RESOLVE_TIMEOUT);
        assert!(config.telegram.api_url.is_none());
        assert!(!config.defaults.admin_broadcast_enabled);
        assert!(config.defaults.broadcast_chats.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            [telegram]
            token = "123:abc"
            api_url = "http://127.0.0.1:8088"

            [resolver]
            endpoint = "https://resolver.example/api"
            timeout_secs = 5

            [mongo]
            uri = "mongodb://localhost:27017"
            database = "tera"

            [download]
            max_concurrent_jobs = 8
            max_file_size = 1024
            timeout_secs = 600

            [defaults]
            admin_broadcast_enabled = true
            broadcast_chats = [-1002780909369]
            admin_password = "secret"
            "#,
        )
        .unwrap();

        let download: DownloadConfig = config.param();
        assert_eq!(download.max_concurrent_jobs, 8);
        assert_eq!(download.timeout_secs, Some(600));
        assert_eq!(config.resolver.timeout(), Duration::from_secs(5));
        let defaults: Settings = config.param();
        assert!(defaults.admin_broadcast_enabled);
        assert!(!defaults.channel_broadcast_enabled);
        assert_eq!(defaults.broadcast_chats, vec![-1002780909369]);
        assert_eq!(defaults.admin_password, "secret");
    }
}
