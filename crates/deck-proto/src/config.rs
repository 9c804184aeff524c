use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub users: Vec<UserConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// JSON document store holding tracks, artists, albums, playlists and logs.
    #[serde(default = "default_store_file")]
    pub store_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

/// External download broker (WebSocket session + HTTP download endpoints).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// `host:port` of the broker; used for both `ws://` and `http://`.
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_accounts_base")]
    pub accounts_base: String,
    #[serde(default = "default_token_ttl_secs")]
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_unique_tokens")]
    pub unique_tokens: usize,
    #[serde(default = "default_play_per_interval")]
    pub play_per_interval: u32,
    #[serde(default = "default_download_per_interval")]
    pub download_per_interval: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_daemon_url")]
    pub daemon_url: String,
    /// Bearer token sent to the daemon. Must match one of `[[users]]`.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_volume")]
    pub default_volume: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub token: String,
    /// Accreditations in `area:action` form, e.g. `musics:play`.
    #[serde(default = "default_permissions")]
    pub permissions: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            store_file: default_store_file(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            api_base: default_api_base(),
            accounts_base: default_accounts_base(),
            token_ttl_secs: default_token_ttl_secs(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            unique_tokens: default_unique_tokens(),
            play_per_interval: default_play_per_interval(),
            download_per_interval: default_download_per_interval(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            daemon_url: default_daemon_url(),
            token: String::new(),
            default_volume: default_volume(),
        }
    }
}

impl BrokerConfig {
    pub fn ws_endpoint(&self) -> String {
        format!("ws://{}/api/ws", self.host)
    }

    pub fn http_endpoint(&self) -> String {
        format!("http://{}/api", self.host)
    }
}

fn default_store_file() -> PathBuf {
    platform::data_dir().join("store.json")
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8990
}

fn default_broker_host() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_api_base() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_accounts_base() -> String {
    "https://accounts.spotify.com".to_string()
}

fn default_token_ttl_secs() -> u64 {
    3600
}

fn default_interval_secs() -> u64 {
    60
}

fn default_unique_tokens() -> usize {
    500
}

fn default_play_per_interval() -> u32 {
    30
}

fn default_download_per_interval() -> u32 {
    10
}

fn default_daemon_url() -> String {
    format!("http://{}:{}", default_bind_address(), default_port())
}

fn default_volume() -> f32 {
    0.8
}

fn default_permissions() -> Vec<String> {
    vec![
        "app:access".to_string(),
        "musics:play".to_string(),
        "musics:download".to_string(),
    ]
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)?
        } else {
            let config = Self::default();
            config.save()?;
            config
        };
        config.apply_env();
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }

    /// Catalog credentials may come from the environment so they stay out of
    /// the config file.
    fn apply_env(&mut self) {
        if let Ok(id) = std::env::var("DECK_CATALOG_ID") {
            self.catalog.client_id = id;
        }
        if let Ok(secret) = std::env::var("DECK_CATALOG_SECRET") {
            self.catalog.client_secret = secret;
        }
        if let Ok(host) = std::env::var("DECK_BROKER_HOST") {
            self.broker.host = host;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.broker.connect_timeout_ms, 5000);
        assert_eq!(config.rate_limit.play_per_interval, 30);
        assert_eq!(config.rate_limit.download_per_interval, 10);
        assert_eq!(config.player.daemon_url, "http://127.0.0.1:8990");
        assert!(config.daemon.store_file.ends_with("deck/store.json"));
    }

    #[test]
    fn test_broker_endpoints() {
        let broker = BrokerConfig {
            host: "dl.local:9000".to_string(),
            connect_timeout_ms: 100,
        };
        assert_eq!(broker.ws_endpoint(), "ws://dl.local:9000/api/ws");
        assert_eq!(broker.http_endpoint(), "http://dl.local:9000/api");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let content = r#"
            [broker]
            host = "10.0.0.2:8000"

            [[users]]
            id = "u1"
            email = "ana@example.com"
            token = "secret"
        "#;
        let config: Config = toml::from_str(content).unwrap();
        assert_eq!(config.broker.host, "10.0.0.2:8000");
        assert_eq!(config.broker.connect_timeout_ms, 5000);
        assert_eq!(config.users.len(), 1);
        assert!(config.users[0]
            .permissions
            .contains(&"musics:download".to_string()));
        assert_eq!(config.http.port, 8990);
    }
}
