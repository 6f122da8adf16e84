//! Token store configuration

use confique::Config;
use std::fmt;
use std::str::FromStr;

/// Specifies which token store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
    Sqlite,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            "sqlite" => Ok(StoreBackend::Sqlite),
            other => Err(format!(
                "unknown store backend '{}', expected one of: memory, redis, sqlite",
                other
            )),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Redis => "redis",
            StoreBackend::Sqlite => "sqlite",
        })
    }
}

/// Configuration for the code and token store
#[derive(Debug, Config, Clone)]
pub struct StoreConfig {
    /// Store type: "memory", "redis" or "sqlite" (default: memory)
    #[config(env = "OAUTH_STORE_BACKEND", default = "memory")]
    pub backend: String,

    /// Redis connection string
    #[config(env = "OAUTH_STORE_REDIS_URL", default = "redis://127.0.0.1:6379/")]
    pub redis_url: String,

    /// SQLite connection string
    #[config(env = "OAUTH_STORE_DATABASE_URL", default = "sqlite://oauth.db")]
    pub database_url: String,

    /// Upper bound on a single store call, in milliseconds
    #[config(env = "OAUTH_STORE_TIMEOUT_MS", default = 2000)]
    pub timeout_ms: u64,

    /// Seconds between sweeps of expired rows, 0 disables the sweeper
    #[config(env = "OAUTH_STORE_PURGE_INTERVAL", default = 300)]
    pub purge_interval: u64,
}

impl StoreConfig {
    pub fn backend(&self) -> Result<StoreBackend, String> {
        self.backend.parse()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: "redis://127.0.0.1:6379/".to_string(),
            database_url: "sqlite://oauth.db".to_string(),
            timeout_ms: 2000,
            purge_interval: 300,
        }
    }
}
