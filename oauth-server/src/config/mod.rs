pub(crate) use crate::config::oauth::OAuthConfig;
pub(crate) use crate::config::session::SessionConfig;
pub(crate) use crate::config::store::{StoreBackend, StoreConfig};
use confique::Config;
use oauth_core::FlowSettings;
use std::time::Duration;

pub mod oauth;
pub mod session;
pub mod store;

const CONFIG_FILE_ENV: &str = "OAUTH_CONFIG_FILE";
const DEFAULT_CONFIG_FILE: &str = "oauth-server.toml";

/// Main configuration structure for the authorization server.
///
/// Values come from `OAUTH_*` environment variables first, then from the TOML
/// file named by `OAUTH_CONFIG_FILE` (default `oauth-server.toml`, skipped when
/// missing), then from the defaults below.
#[derive(Debug, Config, Clone)]
pub struct ServerConfig {
    /// The port the server will listen to (default: 8080)
    #[config(env = "OAUTH_PORT", default = 8080)]
    pub port: u16,

    /// Public base URL of this server, reported as `iss` by introspection
    #[config(env = "OAUTH_ISSUER", default = "http://localhost:8080")]
    pub issuer: String,

    /// YAML file with the clients and users to serve (memory and redis backends)
    #[config(env = "OAUTH_CREDENTIALS_FILE")]
    pub credentials_file: Option<String>,

    /// OAuth flow configuration
    #[config(nested)]
    pub oauth: OAuthConfig,

    /// Code and token store configuration
    #[config(nested)]
    pub store: StoreConfig,

    /// Login session configuration
    #[config(nested)]
    pub session: SessionConfig,
}

impl ServerConfig {
    /// Loads the configuration from the environment and the optional config file
    pub fn new() -> Result<Self, String> {
        let file =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        let config = Self::builder()
            .env()
            .file(&file)
            .load()
            .map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        self.store.backend()?;
        if self.oauth.code_ttl == 0 || self.oauth.access_token_ttl == 0 {
            return Err("code and access token lifetimes must be positive".to_string());
        }
        if self.oauth.refresh_token_ttl <= self.oauth.access_token_ttl {
            return Err("refresh tokens must outlive access tokens".to_string());
        }
        if !self.oauth.login_path.starts_with('/') {
            return Err(format!(
                "login_path must be an absolute path, got '{}'",
                self.oauth.login_path
            ));
        }
        Ok(())
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            code_ttl: Duration::from_secs(self.oauth.code_ttl),
            access_token_ttl: Duration::from_secs(self.oauth.access_token_ttl),
            refresh_token_ttl: Duration::from_secs(self.oauth.refresh_token_ttl),
            require_state: self.oauth.require_state,
            require_pkce: self.oauth.require_pkce,
            store_timeout: Duration::from_millis(self.store.timeout_ms),
        }
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            port: 0,
            issuer: "http://localhost:8080".to_string(),
            credentials_file: None,
            oauth: OAuthConfig::default(),
            store: StoreConfig {
                purge_interval: 0,
                ..StoreConfig::default()
            },
            session: SessionConfig {
                secure_cookie: false,
                ..SessionConfig::default()
            },
        }
    }
}
