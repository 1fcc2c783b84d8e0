use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path:?}.")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file at {path:?}.")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("{message}")]
    Validation { message: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub http: HttpConfig,
    pub cache: CacheConfig,
    pub postgres: Option<PostgresConfig>,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Deadline for each marketplace within one search
    pub adapter_timeout_ms: u64,
    /// Longest accepted query, in characters after normalization
    pub max_query_len: usize,
    pub cache_ttl_secs: u64,
}

impl SearchConfig {
    pub fn adapter_timeout(&self) -> Duration {
        Duration::from_millis(self.adapter_timeout_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            adapter_timeout_ms: 5_000,
            max_query_len: 200,
            cache_ttl_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// `redis://` connection target; results stay in process memory when unset
    pub url: Option<String>,
    pub connect_timeout_secs: u64,
}

impl CacheConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    pub dsn: String,
    #[serde(default = "default_pool_max_conns")]
    pub pool_max_conns: u32,
    #[serde(default = "default_pool_min_conns")]
    pub pool_min_conns: u32,
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

fn default_pool_max_conns() -> u32 {
    20
}

fn default_pool_min_conns() -> u32 {
    5
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

pub fn load(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    parse(&raw).map_err(|err| match err {
        ConfigError::Parse { source, .. } => ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    })
}

pub fn parse(raw: &str) -> Result<Config> {
    let cfg: Config = toml::from_str(raw).map_err(|source| ConfigError::Parse {
        path: PathBuf::new(),
        source,
    })?;

    validate(&cfg)?;

    Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
    if cfg.search.adapter_timeout_ms == 0 {
        return Err(validation("search.adapter_timeout_ms must be greater than zero."));
    }
    if cfg.search.max_query_len == 0 {
        return Err(validation("search.max_query_len must be greater than zero."));
    }
    if cfg.search.cache_ttl_secs == 0 {
        return Err(validation("search.cache_ttl_secs must be greater than zero."));
    }
    if cfg.http.timeout_secs == 0 {
        return Err(validation("http.timeout_secs must be greater than zero."));
    }
    if cfg.cache.url.as_deref().is_some_and(|url| url.trim().is_empty()) {
        return Err(validation("cache.url must be non-empty when set."));
    }
    if cfg.cache.connect_timeout_secs == 0 {
        return Err(validation("cache.connect_timeout_secs must be greater than zero."));
    }
    if let Some(postgres) = &cfg.postgres {
        if postgres.dsn.trim().is_empty() {
            return Err(validation("postgres.dsn must be non-empty."));
        }
        if postgres.pool_max_conns == 0 {
            return Err(validation("postgres.pool_max_conns must be greater than zero."));
        }
        if postgres.pool_min_conns > postgres.pool_max_conns {
            return Err(validation(
                "postgres.pool_min_conns must not exceed postgres.pool_max_conns.",
            ));
        }
    }

    Ok(())
}

fn validation(message: &str) -> ConfigError {
    ConfigError::Validation {
        message: message.to_string(),
    }
}
