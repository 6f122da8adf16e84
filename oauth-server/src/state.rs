use crate::config::ServerConfig;
use crate::session::SessionStore;
use crate::store::{create_store, Credentials, Store};
use oauth_core::{AuthorizationServer, Scope, ScopePolicy, TokenStore};
use std::sync::Arc;

pub type OAuthServer = AuthorizationServer<Store, Credentials>;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub oauth: Arc<OAuthServer>,
    pub sessions: SessionStore,
}

impl AppState {
    pub async fn new(config: &ServerConfig) -> Result<Self, std::io::Error> {
        let (store, credentials) = create_store(config).await.map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to create store: {}", e),
            )
        })?;
        Ok(Self::with_store(config, store, credentials))
    }

    pub fn with_store(config: &ServerConfig, store: Store, credentials: Credentials) -> Self {
        let policy = ScopePolicy::new(Scope::parse(&config.oauth.default_scope));
        Self {
            config: Arc::new(config.clone()),
            oauth: Arc::new(AuthorizationServer::new(
                store,
                credentials,
                policy,
                config.flow_settings(),
            )),
            sessions: SessionStore::new(&config.session),
        }
    }

    /// Check if all components are healthy
    pub async fn health_check(&self) -> Result<(), String> {
        self.oauth.store().health_check().await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use oauth_core::{MemoryStore, StaticCredentials};

    pub(crate) fn create_test_state(config: &ServerConfig, credentials: StaticCredentials) -> AppState {
        AppState::with_store(
            config,
            Store::Memory(MemoryStore::new()),
            Credentials::Static(credentials),
        )
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let config = ServerConfig::for_test();
        let state = AppState::new(&config).await.unwrap();
        assert!(state.health_check().await.is_ok());
        assert_eq!(
            state.oauth.settings().access_token_ttl.as_secs(),
            config.oauth.access_token_ttl
        );
    }

    #[test]
    fn test_app_state_clone() {
        let state = create_test_state(&ServerConfig::for_test(), StaticCredentials::default());
        let state2 = state.clone();

        // After cloning, both instances should point to the same data
        assert_eq!(Arc::as_ptr(&state.config), Arc::as_ptr(&state2.config));
        assert_eq!(Arc::as_ptr(&state.oauth), Arc::as_ptr(&state2.oauth));
    }
}
