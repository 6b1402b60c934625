use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub cors: CorsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("pulse.db")
}

fn default_pool_size() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_days")]
    pub token_ttl_days: i64,
    /// When unset, registering with an `adminCode` is refused.
    #[serde(default)]
    pub admin_registration_code: Option<String>,
    /// How long a resolved API key stays cached. Disabling a key through the
    /// API clears the cache at once; keys removed by another process (such as
    /// `pulse seed-demo`) keep authenticating here until this expires.
    #[serde(default = "default_key_cache_ttl")]
    pub key_cache_ttl_secs: u64,
}

fn default_token_ttl_days() -> i64 {
    30
}

fn default_key_cache_ttl() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,
    /// Seconds between quota replenishments, per client IP.
    #[serde(default = "default_per_second")]
    pub per_second: u64,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            per_second: default_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_rate_limit_enabled() -> bool {
    true
}
fn default_per_second() -> u64 {
    2
}
fn default_burst_size() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    /// 0 disables the response cache.
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origin: default_allowed_origin(),
        }
    }
}

fn default_allowed_origin() -> String {
    "http://localhost:5173".to_string()
}

impl AppConfig {
    /// Validate configuration for security requirements.
    pub fn validate(&self) -> Result<(), String> {
        let secret = &self.auth.jwt_secret;
        if secret.is_empty() || secret == "change-me-in-production" {
            return Err("auth.jwt_secret must be set to a strong, unique value. \
                 Set it in config.toml or via PULSE__AUTH__JWT_SECRET env var."
                .to_string());
        }
        if secret.len() < 32 {
            return Err("auth.jwt_secret must be at least 32 characters. \
                 Set a longer secret in config.toml or via PULSE__AUTH__JWT_SECRET env var."
                .to_string());
        }
        if self.auth.token_ttl_days <= 0 {
            return Err("auth.token_ttl_days must be positive".to_string());
        }
        if self
            .auth
            .admin_registration_code
            .as_deref()
            .is_some_and(|code| code.is_empty())
        {
            return Err("auth.admin_registration_code must not be empty when set".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        // Load from config file
        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // Overlay with environment variables (PULSE__SERVER__PORT=5001, etc.)
        builder = builder.add_source(
            Environment::with_prefix("PULSE")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
