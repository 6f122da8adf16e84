use crate::config::{ServerConfig, StoreBackend};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use oauth_core::{
    AuthorizationCode, Client, CredentialStore, MemoryStore, Principal, StaticCredentials,
    StoreError, TokenPair, TokenStore,
};
use serde::Deserialize;
use std::path::Path;

pub mod reaper;
pub mod redis;
pub mod sqlite;

/// Token store selected at startup from the configuration.
///
/// Dispatches to the concrete backend so the flow can stay generic over a
/// single type.
#[derive(Clone)]
pub enum Store {
    /// In-process store using Moka
    Memory(MemoryStore),
    /// Redis-based store, shared between replicas
    Redis(redis::RedisStore),
    /// Relational store on SQLite
    Sqlite(sqlite::SqliteStore),
}

#[async_trait]
impl TokenStore for Store {
    async fn save_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.save_code(code).await,
            Self::Redis(store) => store.save_code(code).await,
            Self::Sqlite(store) => store.save_code(code).await,
        }
    }

    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        match self {
            Self::Memory(store) => store.find_code(code).await,
            Self::Redis(store) => store.find_code(code).await,
            Self::Sqlite(store) => store.find_code(code).await,
        }
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        match self {
            Self::Memory(store) => store.take_code(code).await,
            Self::Redis(store) => store.take_code(code).await,
            Self::Sqlite(store) => store.take_code(code).await,
        }
    }

    async fn redeem_code(&self, code: &str, pair: &TokenPair) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.redeem_code(code, pair).await,
            Self::Redis(store) => store.redeem_code(code, pair).await,
            Self::Sqlite(store) => store.redeem_code(code, pair).await,
        }
    }

    async fn save_tokens(&self, pair: &TokenPair) -> Result<(), StoreError> {
        match self {
            Self::Memory(store) => store.save_tokens(pair).await,
            Self::Redis(store) => store.save_tokens(pair).await,
            Self::Sqlite(store) => store.save_tokens(pair).await,
        }
    }

    async fn find_access_token(&self, access_token: &str) -> Result<Option<TokenPair>, StoreError> {
        match self {
            Self::Memory(store) => store.find_access_token(access_token).await,
            Self::Redis(store) => store.find_access_token(access_token).await,
            Self::Sqlite(store) => store.find_access_token(access_token).await,
        }
    }

    async fn find_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, StoreError> {
        match self {
            Self::Memory(store) => store.find_refresh_token(refresh_token).await,
            Self::Redis(store) => store.find_refresh_token(refresh_token).await,
            Self::Sqlite(store) => store.find_refresh_token(refresh_token).await,
        }
    }

    async fn take_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, StoreError> {
        match self {
            Self::Memory(store) => store.take_refresh_token(refresh_token).await,
            Self::Redis(store) => store.take_refresh_token(refresh_token).await,
            Self::Sqlite(store) => store.take_refresh_token(refresh_token).await,
        }
    }

    async fn rotate_refresh_token(
        &self,
        refresh_token: &str,
        pair: &TokenPair,
    ) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.rotate_refresh_token(refresh_token, pair).await,
            Self::Redis(store) => store.rotate_refresh_token(refresh_token, pair).await,
            Self::Sqlite(store) => store.rotate_refresh_token(refresh_token, pair).await,
        }
    }

    async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        match self {
            Self::Memory(store) => store.revoke(token).await,
            Self::Redis(store) => store.revoke(token).await,
            Self::Sqlite(store) => store.revoke(token).await,
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        match self {
            Self::Memory(store) => store.purge_expired(now).await,
            Self::Redis(store) => store.purge_expired(now).await,
            Self::Sqlite(store) => store.purge_expired(now).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::Memory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
            Self::Sqlite(store) => store.health_check().await,
        }
    }
}

/// Where clients and users are read from
#[derive(Clone)]
pub enum Credentials {
    /// Loaded once from the credentials file
    Static(StaticCredentials),
    /// The `clients` and `users` tables of the SQLite store
    Sqlite(sqlite::SqliteStore),
}

#[async_trait]
impl CredentialStore for Credentials {
    async fn find_user_by_id(&self, id: &str) -> Result<Option<Principal>, StoreError> {
        match self {
            Self::Static(credentials) => credentials.find_user_by_id(id).await,
            Self::Sqlite(store) => store.find_user_by_id(id).await,
        }
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        match self {
            Self::Static(credentials) => credentials.find_user_by_username(username).await,
            Self::Sqlite(store) => store.find_user_by_username(username).await,
        }
    }

    async fn find_client_by_id(&self, id: &str) -> Result<Option<Client>, StoreError> {
        match self {
            Self::Static(credentials) => credentials.find_client_by_id(id).await,
            Self::Sqlite(store) => store.find_client_by_id(id).await,
        }
    }
}

/// Layout of the credentials file
#[derive(Debug, Default, Deserialize)]
pub struct CredentialsFile {
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default)]
    pub users: Vec<Principal>,
}

impl CredentialsFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            StoreError::Config(format!(
                "failed to read credentials file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, StoreError> {
        serde_yaml::from_str(content)
            .map_err(|e| StoreError::Config(format!("invalid credentials file: {}", e)))
    }
}

fn load_credentials_file(config: &ServerConfig) -> Result<CredentialsFile, StoreError> {
    match &config.credentials_file {
        Some(path) => CredentialsFile::load(path),
        None => Ok(CredentialsFile::default()),
    }
}

/// Factory creating the token store and credential source the configuration asks for.
///
/// The SQLite backend reads clients and users from its own tables, seeding
/// them from the credentials file when one is configured. The other backends
/// only hold codes and tokens, so credentials come from the file.
pub async fn create_store(config: &ServerConfig) -> Result<(Store, Credentials), StoreError> {
    let backend = config.store.backend().map_err(StoreError::Config)?;
    let file = load_credentials_file(config)?;

    match backend {
        StoreBackend::Memory => {
            let credentials = static_credentials(file)?;
            let store = MemoryStore::new();
            Ok((Store::Memory(store), credentials))
        }
        StoreBackend::Redis => {
            if config.store.redis_url.is_empty() {
                return Err(StoreError::Config(
                    "Redis URL is required for the Redis store".to_string(),
                ));
            }
            let credentials = static_credentials(file)?;
            let store = redis::RedisStore::new(&config.store.redis_url)
                .await
                .map_err(StoreError::Config)?;
            Ok((Store::Redis(store), credentials))
        }
        StoreBackend::Sqlite => {
            let store = sqlite::SqliteStore::connect(&config.store.database_url).await?;
            for client in &file.clients {
                store.upsert_client(client).await?;
            }
            for user in &file.users {
                store.upsert_user(user).await?;
            }
            if !file.clients.is_empty() || !file.users.is_empty() {
                info!(
                    "Seeded {} clients and {} users into the SQLite store",
                    file.clients.len(),
                    file.users.len()
                );
            }
            Ok((Store::Sqlite(store.clone()), Credentials::Sqlite(store)))
        }
    }
}

fn static_credentials(file: CredentialsFile) -> Result<Credentials, StoreError> {
    let credentials =
        StaticCredentials::new(file.clients, file.users).map_err(StoreError::Config)?;
    if credentials.client_count() == 0 {
        warn!("No clients configured, every authorization request will be rejected");
    }
    info!(
        "Loaded {} clients and {} users from the credentials file",
        credentials.client_count(),
        credentials.user_count()
    );
    Ok(Credentials::Static(credentials))
}
