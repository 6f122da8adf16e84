use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error};
use oauth_core::{AuthorizationCode, StoreError, TokenPair, TokenStore};
use redis::{aio::ConnectionManager, AsyncCommands, Client, Script};

const CODE_PREFIX: &str = "oauth:code:";
const ACCESS_PREFIX: &str = "oauth:access:";
const REFRESH_PREFIX: &str = "oauth:refresh:";

// Keys outlive their row by this much so redemption can tell "expired" from "unknown"
const EXPIRY_GRACE_SECS: u64 = 60;

fn code_key(code: &str) -> String {
    format!("{CODE_PREFIX}{code}")
}

fn access_key(token: &str) -> String {
    format!("{ACCESS_PREFIX}{token}")
}

fn refresh_key(token: &str) -> String {
    format!("{REFRESH_PREFIX}{token}")
}

// KEYS: code, new refresh, new access. ARGV: pair, refresh ttl, refresh token, access ttl
const REDEEM_CODE: &str = r#"
if redis.call('DEL', KEYS[1]) == 0 then
    return 0
end
redis.call('SET', KEYS[2], ARGV[1], 'EX', ARGV[2])
redis.call('SET', KEYS[3], ARGV[3], 'EX', ARGV[4])
return 1
"#;

// KEYS: old refresh, new refresh, new access. ARGV: as above plus the access key prefix
const ROTATE_REFRESH_TOKEN: &str = r#"
local old = redis.call('GET', KEYS[1])
if not old then
    return 0
end
redis.call('DEL', KEYS[1], ARGV[5] .. cjson.decode(old).access_token)
redis.call('SET', KEYS[2], ARGV[1], 'EX', ARGV[2])
redis.call('SET', KEYS[3], ARGV[3], 'EX', ARGV[4])
return 1
"#;

fn ttl_secs(expires_at: DateTime<Utc>) -> u64 {
    let remaining = (expires_at - Utc::now()).num_seconds().max(0) as u64;
    remaining + EXPIRY_GRACE_SECS
}

fn redis_error(operation: &str, err: redis::RedisError) -> StoreError {
    error!("Redis error during {}: {}", operation, err);
    StoreError::Backend(err.to_string())
}

/// Redis-backed store.
///
/// Rows are JSON values with a Redis TTL, so expiry is handled by the server.
/// Codes live under `oauth:code:*`, pairs under `oauth:refresh:*` and an
/// index from access token to refresh token under `oauth:access:*`.
/// `take_*` uses `GETDEL` (Redis 6.2+), which returns the value to exactly
/// one caller. Redeeming a code and rotating a refresh token run as Lua
/// scripts, so the old key is deleted and the new pair written in one step.
#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    conn_manager: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis and verify the connection with a PING
    pub async fn new(redis_url: &str) -> Result<Self, String> {
        let client = match Client::open(redis_url) {
            Ok(client) => client,
            Err(err) => {
                return Err(format!("Failed to connect to Redis: {}", err));
            }
        };

        let conn_manager = match ConnectionManager::new(client.clone()).await {
            Ok(manager) => manager,
            Err(err) => {
                return Err(format!(
                    "Failed to create Redis connection manager: {}",
                    err
                ));
            }
        };

        let mut conn = conn_manager.clone();
        if let Err(err) = redis::cmd("PING").query_async::<String>(&mut conn).await {
            return Err(format!("Failed to ping Redis: {}", err));
        }

        Ok(Self {
            conn_manager,
            _client: client,
        })
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async::<Option<String>>(&mut conn)
            .await
            .map_err(|err| redis_error("GETDEL", err))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn_manager.clone();
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|err| redis_error("GET", err))
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        conn.del::<_, ()>(key)
            .await
            .map_err(|err| redis_error("DEL", err))
    }

    /// Runs a swap script writing `pair` in place of `old_key`
    async fn swap(
        &self,
        source: &str,
        old_key: String,
        pair: &TokenPair,
        operation: &str,
    ) -> Result<bool, StoreError> {
        let serialized = serde_json::to_string(pair)?;
        let mut conn = self.conn_manager.clone();
        let swapped = Script::new(source)
            .key(old_key)
            .key(refresh_key(&pair.refresh_token))
            .key(access_key(&pair.access_token))
            .arg(serialized)
            .arg(ttl_secs(pair.refresh_token_expires_at))
            .arg(&pair.refresh_token)
            .arg(ttl_secs(pair.access_token_expires_at))
            .arg(ACCESS_PREFIX)
            .invoke_async::<i64>(&mut conn)
            .await
            .map_err(|err| redis_error(operation, err))?;
        Ok(swapped == 1)
    }

    fn decode_pair(raw: Option<String>) -> Result<Option<TokenPair>, StoreError> {
        raw.map(|value| serde_json::from_str(&value))
            .transpose()
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl TokenStore for RedisStore {
    async fn save_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(code)?;
        let mut conn = self.conn_manager.clone();
        conn.set_ex::<_, _, ()>(code_key(&code.code), serialized, ttl_secs(code.expires_at))
            .await
            .map_err(|err| redis_error("SET code", err))
    }

    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        self.get(&code_key(code))
            .await?
            .map(|value| serde_json::from_str(&value))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        self.get_del(&code_key(code))
            .await?
            .map(|value| serde_json::from_str(&value))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn redeem_code(&self, code: &str, pair: &TokenPair) -> Result<bool, StoreError> {
        self.swap(REDEEM_CODE, code_key(code), pair, "redeem code").await
    }

    async fn save_tokens(&self, pair: &TokenPair) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(pair)?;
        let mut conn = self.conn_manager.clone();
        redis::pipe()
            .atomic()
            .set_ex(
                refresh_key(&pair.refresh_token),
                serialized,
                ttl_secs(pair.refresh_token_expires_at),
            )
            .ignore()
            .set_ex(
                access_key(&pair.access_token),
                &pair.refresh_token,
                ttl_secs(pair.access_token_expires_at),
            )
            .ignore()
            .query_async::<()>(&mut conn)
            .await
            .map_err(|err| redis_error("SET tokens", err))
    }

    async fn find_access_token(&self, access_token: &str) -> Result<Option<TokenPair>, StoreError> {
        let Some(refresh_token) = self.get(&access_key(access_token)).await? else {
            return Ok(None);
        };
        let pair = Self::decode_pair(self.get(&refresh_key(&refresh_token)).await?)?;
        Ok(pair.filter(|pair| pair.access_token == access_token))
    }

    async fn find_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, StoreError> {
        Self::decode_pair(self.get(&refresh_key(refresh_token)).await?)
    }

    async fn take_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, StoreError> {
        let pair = Self::decode_pair(self.get_del(&refresh_key(refresh_token)).await?)?;
        if let Some(pair) = &pair {
            self.del(&access_key(&pair.access_token)).await?;
        }
        Ok(pair)
    }

    async fn rotate_refresh_token(
        &self,
        refresh_token: &str,
        pair: &TokenPair,
    ) -> Result<bool, StoreError> {
        self.swap(
            ROTATE_REFRESH_TOKEN,
            refresh_key(refresh_token),
            pair,
            "rotate refresh token",
        )
        .await
    }

    async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        if let Some(refresh_token) = self.get_del(&access_key(token)).await? {
            self.del(&refresh_key(&refresh_token)).await?;
            return Ok(true);
        }
        if let Some(pair) = Self::decode_pair(self.get_del(&refresh_key(token)).await?)? {
            self.del(&access_key(&pair.access_token)).await?;
            return Ok(true);
        }
        Ok(false)
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        debug!("Redis expires keys natively, nothing to purge");
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(()),
            Err(err) => Err(format!("Redis health check failed: {}", err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth_core::model::now;
    use oauth_core::secret::generate_token;
    use oauth_core::Scope;
    use redis_test::server::RedisServer;
    use std::sync::Arc;

    fn get_redis_url(server: &RedisServer) -> String {
        match &server.addr {
            redis::ConnectionAddr::Tcp(host, port) => {
                format!("redis://{}:{}/", host, port)
            }
            _ => "redis://127.0.0.1:6379/".to_string(),
        }
    }

    fn sample_code() -> AuthorizationCode {
        AuthorizationCode {
            code: generate_token(),
            expires_at: now() + chrono::Duration::minutes(10),
            redirect_uri: "https://acme.example/cb".to_string(),
            scope: Scope::parse("auth"),
            client_id: "acme.example".to_string(),
            user_id: "1".to_string(),
            code_challenge: None,
            code_challenge_method: None,
        }
    }

    fn sample_pair() -> TokenPair {
        TokenPair {
            access_token: generate_token(),
            access_token_expires_at: now() + chrono::Duration::minutes(15),
            refresh_token: generate_token(),
            refresh_token_expires_at: now() + chrono::Duration::days(30),
            scope: Scope::parse("auth"),
            client_id: "acme.example".to_string(),
            user_id: "1".to_string(),
        }
    }

    #[test]
    fn test_ttl_never_below_grace() {
        assert_eq!(ttl_secs(Utc::now() - chrono::Duration::hours(1)), EXPIRY_GRACE_SECS);
        assert!(ttl_secs(Utc::now() + chrono::Duration::seconds(600)) >= 599 + EXPIRY_GRACE_SECS);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_code_is_taken_once() {
        let server = RedisServer::new();
        let store = Arc::new(RedisStore::new(&get_redis_url(&server)).await.unwrap());
        let code = sample_code();
        store.save_code(&code).await.unwrap();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                let key = code.code.clone();
                tokio::spawn(async move { store.take_code(&key).await.unwrap() })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if let Some(taken) = handle.await.unwrap() {
                assert_eq!(taken, code);
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_token_pair_lifecycle() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();
        let pair = sample_pair();
        store.save_tokens(&pair).await.unwrap();

        assert_eq!(store.find_access_token(&pair.access_token).await.unwrap(), Some(pair.clone()));
        assert_eq!(store.find_refresh_token(&pair.refresh_token).await.unwrap(), Some(pair.clone()));

        assert_eq!(store.take_refresh_token(&pair.refresh_token).await.unwrap(), Some(pair.clone()));
        assert!(store.find_access_token(&pair.access_token).await.unwrap().is_none());
        assert!(store.take_refresh_token(&pair.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_redeem_code_is_all_or_nothing() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();
        let code = sample_code();
        store.save_code(&code).await.unwrap();
        assert_eq!(store.find_code(&code.code).await.unwrap(), Some(code.clone()));

        let pair = sample_pair();
        assert!(store.redeem_code(&code.code, &pair).await.unwrap());
        assert!(store.find_code(&code.code).await.unwrap().is_none());
        assert_eq!(store.find_access_token(&pair.access_token).await.unwrap(), Some(pair.clone()));

        let late = sample_pair();
        assert!(!store.redeem_code(&code.code, &late).await.unwrap());
        assert!(store.find_refresh_token(&late.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_rotate_refresh_token() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();
        let old = sample_pair();
        store.save_tokens(&old).await.unwrap();

        let new = sample_pair();
        assert!(store.rotate_refresh_token(&old.refresh_token, &new).await.unwrap());
        assert!(store.find_refresh_token(&old.refresh_token).await.unwrap().is_none());
        assert!(store.find_access_token(&old.access_token).await.unwrap().is_none());
        assert_eq!(store.find_access_token(&new.access_token).await.unwrap(), Some(new.clone()));

        let late = sample_pair();
        assert!(!store.rotate_refresh_token(&old.refresh_token, &late).await.unwrap());
        assert!(store.find_refresh_token(&late.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_revoke() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();
        let pair = sample_pair();
        store.save_tokens(&pair).await.unwrap();

        assert!(store.revoke(&pair.access_token).await.unwrap());
        assert!(store.find_refresh_token(&pair.refresh_token).await.unwrap().is_none());
        assert!(!store.revoke(&pair.access_token).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_health_check() {
        let server = RedisServer::new();
        let store = RedisStore::new(&get_redis_url(&server)).await.unwrap();
        let result = store.health_check().await;
        assert!(result.is_ok(), "health check failed: {:?}", result);
    }
}
