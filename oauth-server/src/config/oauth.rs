//! OAuth 2.0 flow configuration

use confique::Config;
use oauth_core::policy::DEFAULT_SCOPE;

/// OAuth 2.0 flow configuration
#[derive(Debug, Config, Clone)]
pub struct OAuthConfig {
    /// Authorization code lifetime in seconds (default: 600 = 10 minutes)
    #[config(env = "OAUTH_CODE_TTL", default = 600)]
    pub code_ttl: u64,

    /// Access token lifetime in seconds (default: 900 = 15 minutes)
    #[config(env = "OAUTH_ACCESS_TOKEN_TTL", default = 900)]
    pub access_token_ttl: u64,

    /// Refresh token lifetime in seconds (default: 2592000 = 30 days)
    #[config(env = "OAUTH_REFRESH_TOKEN_TTL", default = 2592000)]
    pub refresh_token_ttl: u64,

    /// Scope granted when a client does not ask for one (default: "auth")
    #[config(env = "OAUTH_DEFAULT_SCOPE", default = "auth")]
    pub default_scope: String,

    /// Reject authorization requests without a `state` parameter
    #[config(env = "OAUTH_REQUIRE_STATE", default = false)]
    pub require_state: bool,

    /// Reject authorization requests without a PKCE code challenge
    #[config(env = "OAUTH_REQUIRE_PKCE", default = false)]
    pub require_pkce: bool,

    /// Where unauthenticated users are sent by the authorization endpoint
    #[config(env = "OAUTH_LOGIN_PATH", default = "/login")]
    pub login_path: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            code_ttl: 600,
            access_token_ttl: 900,
            refresh_token_ttl: 2592000,
            default_scope: DEFAULT_SCOPE.to_string(),
            require_state: false,
            require_pkce: false,
            login_path: "/login".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_oauth_config() {
        let config = OAuthConfig::builder().load().unwrap();
        assert_eq!(config.code_ttl, 600);
        assert_eq!(config.access_token_ttl, 900);
        assert_eq!(config.refresh_token_ttl, 2592000);
        assert_eq!(config.default_scope, "auth");
        assert!(!config.require_state);
        assert!(!config.require_pkce);
        assert_eq!(config.login_path, "/login");
    }

    #[test]
    fn test_defaults_match_builder() {
        let built = OAuthConfig::builder().load().unwrap();
        let manual = OAuthConfig::default();
        assert_eq!(built.code_ttl, manual.code_ttl);
        assert_eq!(built.refresh_token_ttl, manual.refresh_token_ttl);
        assert_eq!(built.default_scope, manual.default_scope);
    }
}
