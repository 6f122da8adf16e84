use super::TokenStore;
use crate::error::StoreError;
use crate::model::{AuthorizationCode, TokenPair};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use moka::future::Cache as MokaCache;
use moka::Expiry;
use std::future::Future;
use std::time::{Duration, Instant};

// Rows stay readable this long past their expiry so that redemption reports
// "expired" rather than "unknown"; `purge_expired` drops them sooner.
const EXPIRY_GRACE: Duration = Duration::from_secs(60);

trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;
}

impl Expiring for AuthorizationCode {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Expiring for TokenPair {
    fn expires_at(&self) -> DateTime<Utc> {
        self.refresh_token_expires_at
    }
}

/// Access token index entry pointing at the pair's refresh token
#[derive(Debug, Clone)]
struct AccessEntry {
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

impl Expiring for AccessEntry {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// Per-entry expiry derived from the row's own `expires_at`
struct ExpireAtRow;

impl ExpireAtRow {
    fn remaining<V: Expiring>(value: &V) -> Duration {
        (value.expires_at() - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO)
            .saturating_add(EXPIRY_GRACE)
    }
}

impl<V: Expiring> Expiry<String, V> for ExpireAtRow {
    fn expire_after_create(&self, _key: &String, value: &V, _created_at: Instant) -> Option<Duration> {
        Some(Self::remaining(value))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &V,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(Self::remaining(value))
    }
}

/// In-process store backed by Moka.
///
/// Token pairs are keyed by refresh token, with a secondary index from access
/// token to refresh token. Redemption relies on `Cache::remove`, which hands
/// the value to exactly one caller.
///
/// The caches are unbounded: a live row is only ever dropped by its own
/// expiry, never by size-based eviction.
#[derive(Clone)]
pub struct MemoryStore {
    codes: MokaCache<String, AuthorizationCode>,
    pairs: MokaCache<String, TokenPair>,
    access_index: MokaCache<String, AccessEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            codes: MokaCache::builder().expire_after(ExpireAtRow).build(),
            pairs: MokaCache::builder().expire_after(ExpireAtRow).build(),
            access_index: MokaCache::builder().expire_after(ExpireAtRow).build(),
        }
    }

    async fn insert_pair(&self, pair: &TokenPair) {
        self.pairs
            .insert(pair.refresh_token.clone(), pair.clone())
            .await;
        self.access_index
            .insert(
                pair.access_token.clone(),
                AccessEntry {
                    refresh_token: pair.refresh_token.clone(),
                    expires_at: pair.access_token_expires_at,
                },
            )
            .await;
    }

    async fn remove_pair(&self, refresh_token: &str) -> Option<TokenPair> {
        let pair = self.pairs.remove(refresh_token).await;
        if let Some(pair) = &pair {
            self.access_index.invalidate(&pair.access_token).await;
        }
        pair
    }
}

/// Runs a remove-then-insert sequence on its own task, so a caller dropped
/// mid-way cannot leave the removal without the insert.
async fn detached<F>(sequence: F) -> Result<bool, StoreError>
where
    F: Future<Output = bool> + Send + 'static,
{
    tokio::spawn(sequence)
        .await
        .map_err(|err| StoreError::Backend(err.to_string()))
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn save_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        self.codes.insert(code.code.clone(), code.clone()).await;
        Ok(())
    }

    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        Ok(self.codes.get(code).await)
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        Ok(self.codes.remove(code).await)
    }

    async fn redeem_code(&self, code: &str, pair: &TokenPair) -> Result<bool, StoreError> {
        let store = self.clone();
        let code = code.to_string();
        let pair = pair.clone();
        detached(async move {
            if store.codes.remove(&code).await.is_none() {
                return false;
            }
            store.insert_pair(&pair).await;
            true
        })
        .await
    }

    async fn save_tokens(&self, pair: &TokenPair) -> Result<(), StoreError> {
        self.insert_pair(pair).await;
        Ok(())
    }

    async fn find_access_token(&self, access_token: &str) -> Result<Option<TokenPair>, StoreError> {
        let Some(entry) = self.access_index.get(access_token).await else {
            return Ok(None);
        };
        Ok(self
            .pairs
            .get(&entry.refresh_token)
            .await
            .filter(|pair| pair.access_token == access_token))
    }

    async fn find_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, StoreError> {
        Ok(self.pairs.get(refresh_token).await)
    }

    async fn take_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, StoreError> {
        Ok(self.remove_pair(refresh_token).await)
    }

    async fn rotate_refresh_token(
        &self,
        refresh_token: &str,
        pair: &TokenPair,
    ) -> Result<bool, StoreError> {
        let store = self.clone();
        let refresh_token = refresh_token.to_string();
        let pair = pair.clone();
        detached(async move {
            if store.remove_pair(&refresh_token).await.is_none() {
                return false;
            }
            store.insert_pair(&pair).await;
            true
        })
        .await
    }

    async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        if let Some(entry) = self.access_index.remove(token).await {
            self.pairs.invalidate(&entry.refresh_token).await;
            return Ok(true);
        }
        Ok(self.remove_pair(token).await.is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut purged = 0;

        let expired_codes: Vec<_> = self
            .codes
            .iter()
            .filter(|(_, code)| code.is_expired(now))
            .map(|(key, _)| key)
            .collect();
        for key in expired_codes {
            if self.codes.remove(key.as_str()).await.is_some() {
                purged += 1;
            }
        }

        let expired_pairs: Vec<_> = self
            .pairs
            .iter()
            .filter(|(_, pair)| pair.is_refresh_expired(now))
            .map(|(_, pair)| pair)
            .collect();
        for pair in expired_pairs {
            if self.pairs.remove(&pair.refresh_token).await.is_some() {
                self.access_index.invalidate(&pair.access_token).await;
                purged += 1;
            }
        }

        let expired_access: Vec<_> = self
            .access_index
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(key, _)| key)
            .collect();
        for key in expired_access {
            self.access_index.invalidate(key.as_str()).await;
        }

        debug!("Purged {} expired rows from the in-memory store", purged);
        Ok(purged)
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
