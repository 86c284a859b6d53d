use petid_cache::{PolicyKind, RateLimitPolicy, RedisSettings, StoreOptions};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, time::Duration};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Distributed cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Per route class request budgets
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        if self.cache.enabled {
            if self.cache.url.is_none() && self.cache.host.is_empty() {
                return Err("cache requires either 'url' or 'host' to be set".into());
            }
            if self.cache.url.is_none() && self.cache.port == 0 {
                return Err("cache.port must be > 0".into());
            }
            if self.cache.pool_size == 0 {
                return Err("cache.pool_size must be > 0".into());
            }
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err("cache.sweep_interval_secs must be > 0".into());
        }
        for kind in PolicyKind::ALL {
            let policy = self.rate_limit.get(kind);
            if policy.window_secs == 0 {
                return Err(format!("rate_limit.{kind}.window_secs must be > 0"));
            }
            if policy.max_requests == 0 {
                return Err(format!("rate_limit.{kind}.max_requests must be > 0"));
            }
        }
        if self.auth.default_token_lifetime_secs == 0 {
            return Err("auth.default_token_lifetime_secs must be > 0".into());
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Distributed cache (Redis) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Enable the distributed cache (gracefully degrades without it)
    /// Default: false (single-instance deployments)
    #[serde(default)]
    pub enabled: bool,

    /// Full connection URL; takes precedence over host/port/password/tls
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_cache_host")]
    pub host: String,

    #[serde(default = "default_cache_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    /// Connect with TLS (`rediss://`)
    #[serde(default)]
    pub tls: bool,

    #[serde(default = "default_cache_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_cache_timeout_ms")]
    pub timeout_ms: u64,

    /// Interval between local expiry sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How long a failed backend is skipped before it is retried
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

fn default_cache_host() -> String {
    "localhost".to_string()
}

fn default_cache_port() -> u16 {
    6379
}

fn default_cache_pool_size() -> usize {
    10
}

fn default_cache_timeout_ms() -> u64 {
    5000
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_reconnect_backoff_ms() -> u64 {
    5000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            host: default_cache_host(),
            port: default_cache_port(),
            password: None,
            tls: false,
            pool_size: default_cache_pool_size(),
            timeout_ms: default_cache_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

impl CacheConfig {
    /// Connection URL: `url` when set, otherwise built from host, port,
    /// password and tls.
    pub fn connection_url(&self) -> Result<String, String> {
        if let Some(url) = self.url.as_deref().filter(|u| !u.is_empty()) {
            return Ok(url.to_string());
        }

        let scheme = if self.tls { "rediss" } else { "redis" };
        let mut url = url::Url::parse(&format!("{scheme}://{}:{}", self.host, self.port))
            .map_err(|e| format!("invalid cache host: {e}"))?;
        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password))
                .map_err(|_| "cache password cannot be set on this URL".to_string())?;
        }
        Ok(url.to_string())
    }

    pub fn redis_settings(&self) -> Result<RedisSettings, String> {
        Ok(RedisSettings {
            url: self.connection_url()?,
            pool_size: self.pool_size,
            timeout: Duration::from_millis(self.timeout_ms),
        })
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            sweep_interval: self.sweep_interval(),
            reconnect_backoff: Duration::from_millis(self.reconnect_backoff_ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Request budget of one route class
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub window_secs: u64,
    pub max_requests: u64,
    pub message: String,
}

impl PolicyConfig {
    fn defaults(kind: PolicyKind) -> Self {
        let policy = RateLimitPolicy::default_for(kind);
        Self {
            window_secs: policy.window.as_secs(),
            max_requests: policy.max_requests,
            message: policy.message,
        }
    }
}

fn default_standard_policy() -> PolicyConfig {
    PolicyConfig::defaults(PolicyKind::Standard)
}

fn default_auth_policy() -> PolicyConfig {
    PolicyConfig::defaults(PolicyKind::Auth)
}

fn default_upload_policy() -> PolicyConfig {
    PolicyConfig::defaults(PolicyKind::Upload)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_standard_policy")]
    pub standard: PolicyConfig,
    #[serde(default = "default_auth_policy")]
    pub auth: PolicyConfig,
    #[serde(default = "default_upload_policy")]
    pub upload: PolicyConfig,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            standard: default_standard_policy(),
            auth: default_auth_policy(),
            upload: default_upload_policy(),
        }
    }
}

impl RateLimitConfig {
    pub fn get(&self, kind: PolicyKind) -> &PolicyConfig {
        match kind {
            PolicyKind::Standard => &self.standard,
            PolicyKind::Auth => &self.auth,
            PolicyKind::Upload => &self.upload,
        }
    }

    pub fn policy(&self, kind: PolicyKind) -> RateLimitPolicy {
        let cfg = self.get(kind);
        RateLimitPolicy {
            window: Duration::from_secs(cfg.window_secs),
            max_requests: cfg.max_requests,
            message: cfg.message.clone(),
            ..RateLimitPolicy::default_for(kind)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Revocation lifetime for logged-out tokens without an `exp` claim
    #[serde(default = "default_token_lifetime_secs")]
    pub default_token_lifetime_secs: u64,
}

fn default_token_lifetime_secs() -> u64 {
    86_400
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            default_token_lifetime_secs: default_token_lifetime_secs(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    /// Flat deployment variables and the config keys they override.
    const CACHE_ENV_OVERRIDES: [(&str, &str); 6] = [
        ("CACHE_ENABLED", "cache.enabled"),
        ("CACHE_URL", "cache.url"),
        ("CACHE_HOST", "cache.host"),
        ("CACHE_PORT", "cache.port"),
        ("CACHE_PASSWORD", "cache.password"),
        ("CACHE_TLS", "cache.tls"),
    ];

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or("petid.toml"));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., PETID__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("PETID")
                .try_parsing(true)
                .separator("__"),
        );
        for (var, key) in CACHE_ENV_OVERRIDES {
            let value = std::env::var(var).ok().filter(|v| !v.is_empty());
            builder = builder
                .set_override_option(key, value)
                .map_err(|e| format!("config override error for {var}: {e}"))?;
        }
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }
}
