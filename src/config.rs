use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub share: ShareConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Header carrying the caller's owner id, set by the upstream gateway
    #[serde(default = "default_owner_header")]
    pub owner_header: String,
    /// Externally reachable base URL, used in signed retrieval URLs
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_local_path")]
    pub local_path: String,
    /// Largest accepted upload in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Per-owner cap on unique stored bytes; 0 disables the check
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,
    #[serde(default)]
    pub url_secret: String,
    #[serde(default = "default_url_ttl")]
    pub url_ttl_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShareConfig {
    #[serde(default = "default_token_length")]
    pub token_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Public downloads allowed per client address per window
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    1310
}

fn default_owner_header() -> String {
    "x-owner-id".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:1310".to_string()
}

fn default_db_path() -> String {
    "data/dedupvault.db".to_string()
}

fn default_local_path() -> String {
    "data/blobs".to_string()
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}

fn default_quota_bytes() -> u64 {
    10 * 1024 * 1024 * 1024 // 10 GiB
}

fn default_url_ttl() -> u64 {
    3600 // 1 hour
}

fn default_token_length() -> usize {
    24
}

fn default_max_requests() -> u32 {
    30
}

fn default_window_seconds() -> u64 {
    60
}

fn default_sweep_interval() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            owner_header: default_owner_header(),
            public_base_url: default_public_base_url(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_path: default_local_path(),
            max_file_size: default_max_file_size(),
            quota_bytes: default_quota_bytes(),
            url_secret: String::new(),
            url_ttl_seconds: default_url_ttl(),
        }
    }
}

impl StorageConfig {
    /// Quota cap, `None` when disabled
    pub fn quota_limit(&self) -> Option<u64> {
        (self.quota_bytes > 0).then_some(self.quota_bytes)
    }
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            token_length: default_token_length(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_seconds: default_window_seconds(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_env_overrides();
        config.ensure_directories()?;
        config.ensure_url_secret()?;
        tracing::info!(
            "Storage config: local_path={}, max_file_size={}, quota_bytes={}",
            config.storage.local_path,
            config.storage.max_file_size,
            config.storage.quota_bytes
        );
        Ok(config)
    }

    /// Ensure the URL signing secret is set and persisted
    fn ensure_url_secret(&mut self) -> anyhow::Result<()> {
        if !self.storage.url_secret.trim().is_empty() {
            return Ok(());
        }

        let secret_path = Path::new("data/.url_secret");

        if secret_path.exists() {
            // Load existing secret
            let secret = fs::read_to_string(secret_path)?;
            self.storage.url_secret = secret.trim().to_string();
            tracing::info!("Loaded persisted URL secret from data/.url_secret");
        } else {
            // Generate new strong secret
            let secret = format!(
                "{}{}",
                uuid::Uuid::new_v4().simple(),
                uuid::Uuid::new_v4().simple()
            );

            if let Some(parent) = secret_path.parent() {
                fs::create_dir_all(parent)?;
            }

            fs::write(secret_path, &secret)?;
            self.storage.url_secret = secret;
            tracing::info!("Generated and persisted new URL secret to data/.url_secret");
        }
        Ok(())
    }

    /// Load configuration from config.toml
    fn load_from_file() -> anyhow::Result<Self> {
        let config_paths = ["config.toml", "data/config.toml"];

        for path in config_paths {
            if Path::new(path).exists() {
                let content = fs::read_to_string(path)?;
                let config: Config = toml::from_str(&content)?;
                tracing::info!("Loaded configuration from {}", path);
                return Ok(config);
            }
        }

        tracing::info!("No configuration file found, using defaults");
        Ok(Config::default())
    }

    /// Apply environment variable overrides
    /// Format: DV_CONF_<SECTION>_<KEY>
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn parse_into<T: std::str::FromStr>(value: Option<String>, target: &mut T) {
            if let Some(parsed) = value.and_then(|v| v.trim().parse().ok()) {
                *target = parsed;
            }
        }

        // Server overrides
        if let Some(val) = lookup("DV_CONF_SERVER_HOST") {
            self.server.host = val;
        }
        parse_into(lookup("DV_CONF_SERVER_PORT"), &mut self.server.port);
        if let Some(val) = lookup("DV_CONF_SERVER_OWNER_HEADER") {
            if !val.trim().is_empty() {
                self.server.owner_header = val.trim().to_ascii_lowercase();
            }
        }
        if let Some(val) = lookup("DV_CONF_SERVER_PUBLIC_BASE_URL") {
            self.server.public_base_url = val;
        }

        // Database overrides
        if let Some(val) = lookup("DV_CONF_DATABASE_PATH") {
            self.database.path = val;
        }

        // Storage overrides
        if let Some(val) = lookup("DV_CONF_STORAGE_LOCAL_PATH") {
            self.storage.local_path = val;
        }
        parse_into(lookup("DV_CONF_STORAGE_MAX_FILE_SIZE"), &mut self.storage.max_file_size);
        parse_into(lookup("DV_CONF_STORAGE_QUOTA_BYTES"), &mut self.storage.quota_bytes);
        if let Some(val) = lookup("DV_CONF_STORAGE_URL_SECRET") {
            self.storage.url_secret = val;
        }
        parse_into(lookup("DV_CONF_STORAGE_URL_TTL"), &mut self.storage.url_ttl_seconds);

        // Share overrides
        parse_into(lookup("DV_CONF_SHARE_TOKEN_LENGTH"), &mut self.share.token_length);

        // Rate limit overrides
        parse_into(lookup("DV_CONF_RATE_LIMIT_MAX_REQUESTS"), &mut self.rate_limit.max_requests);
        parse_into(lookup("DV_CONF_RATE_LIMIT_WINDOW"), &mut self.rate_limit.window_seconds);
        parse_into(
            lookup("DV_CONF_RATE_LIMIT_SWEEP_INTERVAL"),
            &mut self.rate_limit.sweep_interval_seconds,
        );
    }

    /// Ensure required directories exist
    fn ensure_directories(&self) -> anyhow::Result<()> {
        // Ensure database directory exists
        if let Some(parent) = Path::new(&self.database.path).parent() {
            fs::create_dir_all(parent)?;
        }

        // Ensure local storage directory exists
        fs::create_dir_all(&self.storage.local_path)?;

        Ok(())
    }
}
