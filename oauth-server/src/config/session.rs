//! Login session configuration

use confique::Config;

/// Login session configuration
#[derive(Debug, Config, Clone)]
pub struct SessionConfig {
    /// Session lifetime in seconds (default: 3600 = 1 hour)
    #[config(env = "OAUTH_SESSION_TTL", default = 3600)]
    pub ttl: u64,

    /// Maximum number of concurrent sessions kept in memory
    #[config(env = "OAUTH_SESSION_CAPACITY", default = 100000)]
    pub capacity: u64,

    /// Name of the session cookie
    #[config(env = "OAUTH_SESSION_COOKIE_NAME", default = "oauth_session")]
    pub cookie_name: String,

    /// Mark the session cookie `Secure`; disable only for local development over HTTP
    #[config(env = "OAUTH_SESSION_SECURE_COOKIE", default = true)]
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: 3600,
            capacity: 100_000,
            cookie_name: "oauth_session".to_string(),
            secure_cookie: true,
        }
    }
}
