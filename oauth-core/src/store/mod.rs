use crate::error::StoreError;
use crate::model::{AuthorizationCode, TokenPair};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

pub mod memory;

/// Persistence contract for authorization codes and token pairs.
///
/// Every backend must make the `take_*`, `redeem_code` and
/// `rotate_refresh_token` operations atomic: when several callers race to
/// redeem the same code or refresh token, exactly one of them wins and every
/// other caller sees `None` or `false`.
///
/// `redeem_code` and `rotate_refresh_token` consume the old credential and
/// store its replacement as one unit. When they fail, or the caller is
/// dropped, either both changes land or neither does, so a failed exchange
/// leaves the old credential usable for a retry.
///
/// Implementations should be thread-safe (Send + Sync) and cheap to clone so
/// that they can be shared across handlers.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_code(&self, code: &AuthorizationCode) -> Result<(), StoreError>;

    /// Reads the code row without consuming it, whether or not it expired
    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError>;

    /// Atomically removes and returns the code row, whether or not it expired
    async fn take_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError>;

    /// Consumes the code and stores `pair` in its place.
    /// Returns `false`, storing nothing, when the code is already gone.
    async fn redeem_code(&self, code: &str, pair: &TokenPair) -> Result<bool, StoreError>;

    async fn save_tokens(&self, pair: &TokenPair) -> Result<(), StoreError>;

    async fn find_access_token(&self, access_token: &str) -> Result<Option<TokenPair>, StoreError>;

    async fn find_refresh_token(&self, refresh_token: &str)
        -> Result<Option<TokenPair>, StoreError>;

    /// Atomically removes the pair the refresh token belongs to and returns it.
    /// The access token minted with it stops resolving as well.
    async fn take_refresh_token(&self, refresh_token: &str)
        -> Result<Option<TokenPair>, StoreError>;

    /// Removes the pair `refresh_token` belongs to and stores `pair` in its place.
    /// Returns `false`, storing nothing, when the refresh token is already gone.
    async fn rotate_refresh_token(
        &self,
        refresh_token: &str,
        pair: &TokenPair,
    ) -> Result<bool, StoreError>;

    /// Deletes the pair identified by either of its tokens.
    /// Returns whether anything was removed.
    async fn revoke(&self, token: &str) -> Result<bool, StoreError>;

    /// Removes rows whose expiry has passed, returning how many were removed.
    /// Backends that expire rows natively may return 0.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Performs a deep health check on the backend.
    ///
    /// Returns Ok(()) if healthy, or Err with a descriptive message if unhealthy.
    async fn health_check(&self) -> Result<(), String>;
}

/// Runs a store operation with an upper bound on how long it may take
pub async fn bounded<T, F>(limit: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
