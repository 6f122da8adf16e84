use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use oauth_core::{
    AuthorizationCode, Client, CredentialStore, GrantType, Principal, Scope, StoreError, TokenPair,
    TokenStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, Row, Sqlite};
use std::collections::BTreeSet;
use std::str::FromStr;

const SCHEMA: [&str; 7] = [
    r"
    CREATE TABLE IF NOT EXISTS clients (
        id TEXT PRIMARY KEY,
        secret TEXT NOT NULL,
        redirect_uri TEXT NOT NULL,
        allowed_grants TEXT NOT NULL DEFAULT 'authorization_code refresh_token',
        access_token_ttl INTEGER,
        refresh_token_ttl INTEGER
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        instance_id TEXT REFERENCES clients(id) ON DELETE SET NULL,
        role TEXT NOT NULL DEFAULT 'viewer'
    )
    ",
    r"
    CREATE TABLE IF NOT EXISTS authorization_codes (
        code TEXT PRIMARY KEY,
        expires_at INTEGER NOT NULL,
        redirect_uri TEXT NOT NULL,
        scope TEXT NOT NULL DEFAULT '',
        client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        code_challenge TEXT,
        code_challenge_method TEXT
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_authorization_codes_expires_at ON authorization_codes(expires_at)",
    r"
    CREATE TABLE IF NOT EXISTS tokens (
        access_token TEXT PRIMARY KEY,
        access_token_expires_at INTEGER NOT NULL,
        refresh_token TEXT NOT NULL UNIQUE,
        refresh_token_expires_at INTEGER NOT NULL,
        scope TEXT NOT NULL DEFAULT '',
        client_id TEXT NOT NULL REFERENCES clients(id) ON DELETE CASCADE,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE
    )
    ",
    "CREATE INDEX IF NOT EXISTS idx_tokens_refresh_expires_at ON tokens(refresh_token_expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_tokens_client_id ON tokens(client_id)",
];

const CODE_COLUMNS: &str =
    "code, expires_at, redirect_uri, scope, client_id, user_id, code_challenge, code_challenge_method";
const TOKEN_COLUMNS: &str = "access_token, access_token_expires_at, refresh_token, refresh_token_expires_at, scope, client_id, user_id";

fn db_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut => StoreError::Timeout(std::time::Duration::ZERO),
        other => StoreError::Backend(other.to_string()),
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| StoreError::Backend(format!("invalid timestamp: {secs}")))
}

fn code_from_row(row: &SqliteRow) -> Result<AuthorizationCode, StoreError> {
    let method: Option<String> = row.try_get("code_challenge_method").map_err(db_error)?;
    Ok(AuthorizationCode {
        code: row.try_get("code").map_err(db_error)?,
        expires_at: timestamp(row.try_get("expires_at").map_err(db_error)?)?,
        redirect_uri: row.try_get("redirect_uri").map_err(db_error)?,
        scope: Scope::parse(row.try_get::<&str, _>("scope").map_err(db_error)?),
        client_id: row.try_get("client_id").map_err(db_error)?,
        user_id: row.try_get("user_id").map_err(db_error)?,
        code_challenge: row.try_get("code_challenge").map_err(db_error)?,
        code_challenge_method: method
            .map(|raw| raw.parse())
            .transpose()
            .map_err(StoreError::Backend)?,
    })
}

fn pair_from_row(row: &SqliteRow) -> Result<TokenPair, StoreError> {
    Ok(TokenPair {
        access_token: row.try_get("access_token").map_err(db_error)?,
        access_token_expires_at: timestamp(row.try_get("access_token_expires_at").map_err(db_error)?)?,
        refresh_token: row.try_get("refresh_token").map_err(db_error)?,
        refresh_token_expires_at: timestamp(
            row.try_get("refresh_token_expires_at").map_err(db_error)?,
        )?,
        scope: Scope::parse(row.try_get::<&str, _>("scope").map_err(db_error)?),
        client_id: row.try_get("client_id").map_err(db_error)?,
        user_id: row.try_get("user_id").map_err(db_error)?,
    })
}

async fn insert_pair<'e, E>(executor: E, pair: &TokenPair) -> Result<(), StoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(&format!(
        "INSERT INTO tokens ({TOKEN_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
    ))
    .bind(&pair.access_token)
    .bind(pair.access_token_expires_at.timestamp())
    .bind(&pair.refresh_token)
    .bind(pair.refresh_token_expires_at.timestamp())
    .bind(pair.scope.to_string())
    .bind(&pair.client_id)
    .bind(&pair.user_id)
    .execute(executor)
    .await
    .map_err(db_error)?;
    Ok(())
}

fn client_from_row(row: &SqliteRow) -> Result<Client, StoreError> {
    let grants: &str = row.try_get("allowed_grants").map_err(db_error)?;
    let allowed_grants = grants
        .split_whitespace()
        .map(GrantType::from_str)
        .collect::<Result<BTreeSet<_>, _>>()
        .map_err(StoreError::Backend)?;
    Ok(Client {
        id: row.try_get("id").map_err(db_error)?,
        secret: row.try_get("secret").map_err(db_error)?,
        redirect_uri: row.try_get("redirect_uri").map_err(db_error)?,
        allowed_grants,
        access_token_ttl: row
            .try_get::<Option<i64>, _>("access_token_ttl")
            .map_err(db_error)?
            .map(|ttl| ttl.max(0) as u64),
        refresh_token_ttl: row
            .try_get::<Option<i64>, _>("refresh_token_ttl")
            .map_err(db_error)?
            .map(|ttl| ttl.max(0) as u64),
    })
}

fn user_from_row(row: &SqliteRow) -> Result<Principal, StoreError> {
    let role: &str = row.try_get("role").map_err(db_error)?;
    Ok(Principal {
        id: row.try_get("id").map_err(db_error)?,
        username: row.try_get("username").map_err(db_error)?,
        password_hash: row.try_get("password_hash").map_err(db_error)?,
        instance_id: row.try_get("instance_id").map_err(db_error)?,
        role: role.parse().map_err(StoreError::Backend)?,
    })
}

/// Relational store on SQLite.
///
/// Owns the `clients` and `users` tables as well as codes and tokens, so it
/// serves as both the token store and the credential store. Codes and tokens
/// reference their client and user with `ON DELETE CASCADE`: removing a tenant
/// or a user drops every outstanding grant. `take_*` uses
/// `DELETE ... RETURNING`, a single statement that hands the row to exactly one
/// caller. Redeeming a code and rotating a refresh token delete the old row
/// and insert the new pair in one transaction, which rolls back when the
/// insert fails or the future is dropped. Expired rows stay until
/// [`TokenStore::purge_expired`] removes them.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database and applies the schema
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| StoreError::Config(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);

        // An in-memory database lives and dies with its connection
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };
        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(db_error)?;

        let store = Self { pool };
        store.migrate().await?;
        info!("Connected to SQLite store at {}", database_url);
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        Ok(())
    }

    /// Inserts or replaces a client
    pub async fn upsert_client(&self, client: &Client) -> Result<(), StoreError> {
        let grants = client
            .allowed_grants
            .iter()
            .map(GrantType::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        sqlx::query(
            r"
            INSERT INTO clients (id, secret, redirect_uri, allowed_grants, access_token_ttl, refresh_token_ttl)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(id) DO UPDATE SET
                secret = excluded.secret,
                redirect_uri = excluded.redirect_uri,
                allowed_grants = excluded.allowed_grants,
                access_token_ttl = excluded.access_token_ttl,
                refresh_token_ttl = excluded.refresh_token_ttl
            ",
        )
        .bind(&client.id)
        .bind(&client.secret)
        .bind(&client.redirect_uri)
        .bind(grants)
        .bind(client.access_token_ttl.map(|ttl| ttl as i64))
        .bind(client.refresh_token_ttl.map(|ttl| ttl as i64))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Inserts or replaces a user
    pub async fn upsert_user(&self, user: &Principal) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO users (id, username, password_hash, instance_id, role)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT(id) DO UPDATE SET
                username = excluded.username,
                password_hash = excluded.password_hash,
                instance_id = excluded.instance_id,
                role = excluded.role
            ",
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.instance_id)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Removes a client; its codes and tokens go with it
    #[cfg(test)]
    pub async fn delete_client(&self, client_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM clients WHERE id = $1")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    /// Removes a user; their codes and tokens go with them
    #[cfg(test)]
    pub async fn delete_user(&self, user_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TokenStore for SqliteStore {
    async fn save_code(&self, code: &AuthorizationCode) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO authorization_codes ({CODE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)"
        ))
        .bind(&code.code)
        .bind(code.expires_at.timestamp())
        .bind(&code.redirect_uri)
        .bind(code.scope.to_string())
        .bind(&code.client_id)
        .bind(&code.user_id)
        .bind(&code.code_challenge)
        .bind(code.code_challenge_method.map(|method| method.as_str()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM authorization_codes WHERE code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(code_from_row).transpose()
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthorizationCode>, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM authorization_codes WHERE code = $1 RETURNING {CODE_COLUMNS}"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(code_from_row).transpose()
    }

    async fn redeem_code(&self, code: &str, pair: &TokenPair) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let consumed = sqlx::query("DELETE FROM authorization_codes WHERE code = $1")
            .bind(code)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();
        if consumed == 0 {
            return Ok(false);
        }
        insert_pair(&mut *tx, pair).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn save_tokens(&self, pair: &TokenPair) -> Result<(), StoreError> {
        insert_pair(&self.pool, pair).await
    }

    async fn find_access_token(&self, access_token: &str) -> Result<Option<TokenPair>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE access_token = $1"
        ))
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(pair_from_row).transpose()
    }

    async fn find_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM tokens WHERE refresh_token = $1"
        ))
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(pair_from_row).transpose()
    }

    async fn take_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<TokenPair>, StoreError> {
        let row = sqlx::query(&format!(
            "DELETE FROM tokens WHERE refresh_token = $1 RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(pair_from_row).transpose()
    }

    async fn rotate_refresh_token(
        &self,
        refresh_token: &str,
        pair: &TokenPair,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let consumed = sqlx::query("DELETE FROM tokens WHERE refresh_token = $1")
            .bind(refresh_token)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?
            .rows_affected();
        if consumed == 0 {
            return Ok(false);
        }
        insert_pair(&mut *tx, pair).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(true)
    }

    async fn revoke(&self, token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tokens WHERE access_token = $1 OR refresh_token = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let codes = sqlx::query("DELETE FROM authorization_codes WHERE expires_at <= $1")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .map_err(db_error)?
            .rows_affected();
        let tokens = sqlx::query("DELETE FROM tokens WHERE refresh_token_expires_at <= $1")
            .bind(now.timestamp())
            .execute(&self.pool)
            .await
            .map_err(db_error)?
            .rows_affected();
        debug!("Purged {} expired codes and {} expired token pairs", codes, tokens);
        Ok(codes + tokens)
    }

    async fn health_check(&self) -> Result<(), String> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| format!("SQLite health check failed: {}", e))
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn find_user_by_id(&self, id: &str) -> Result<Option<Principal>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, instance_id, role FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        let row = sqlx::query(
            "SELECT id, username, password_hash, instance_id, role FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_client_by_id(&self, id: &str) -> Result<Option<Client>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, secret, redirect_uri, allowed_grants, access_token_ttl, refresh_token_ttl
            FROM clients WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(client_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oauth_core::model::{now, Role};
    use oauth_core::secret::generate_token;
    use oauth_core::CodeChallengeMethod;
    use std::sync::Arc;

    async fn seeded_store() -> SqliteStore {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        store
            .upsert_client(&Client::new("acme.example", "acme-secret", "https://acme.example/cb"))
            .await
            .unwrap();
        store
            .upsert_user(&Principal {
                id: "1".to_string(),
                username: "alice".to_string(),
                password_hash: "$2b$04$invalid".to_string(),
                instance_id: Some("acme.example".to_string()),
                role: Role::Editor,
            })
            .await
            .unwrap();
        store
    }

    fn code_expiring_at(expires_at: DateTime<Utc>) -> AuthorizationCode {
        AuthorizationCode {
            code: generate_token(),
            expires_at,
            redirect_uri: "https://acme.example/cb".to_string(),
            scope: Scope::parse("auth"),
            client_id: "acme.example".to_string(),
            user_id: "1".to_string(),
            code_challenge: Some("E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM".to_string()),
            code_challenge_method: Some(CodeChallengeMethod::S256),
        }
    }

    fn pair_expiring_at(expires_at: DateTime<Utc>) -> TokenPair {
        TokenPair {
            access_token: generate_token(),
            access_token_expires_at: expires_at,
            refresh_token: generate_token(),
            refresh_token_expires_at: expires_at,
            scope: Scope::parse("auth read"),
            client_id: "acme.example".to_string(),
            user_id: "1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_credentials_lookup() {
        let store = seeded_store().await;
        let client = store.find_client_by_id("acme.example").await.unwrap().unwrap();
        assert_eq!(client.secret, "acme-secret");
        assert!(client.allows(GrantType::RefreshToken));

        let user = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(user.instance_id.as_deref(), Some("acme.example"));
        assert_eq!(user.role, Role::Editor);
        assert_eq!(store.find_user_by_id("1").await.unwrap(), Some(user));
        assert!(store.find_user_by_id("404").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_code_round_trip_and_single_use() {
        let store = seeded_store().await;
        let code = code_expiring_at(now() + chrono::Duration::minutes(10));
        store.save_code(&code).await.unwrap();

        assert_eq!(store.take_code(&code.code).await.unwrap(), Some(code.clone()));
        assert!(store.take_code(&code.code).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_take_code_has_one_winner() {
        let store = Arc::new(seeded_store().await);
        let code = code_expiring_at(now() + chrono::Duration::minutes(10));
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
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_code_requires_known_client() {
        let store = seeded_store().await;
        let mut code = code_expiring_at(now() + chrono::Duration::minutes(10));
        code.client_id = "evil.example".to_string();
        assert!(store.save_code(&code).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rotation_removes_pair() {
        let store = seeded_store().await;
        let pair = pair_expiring_at(now() + chrono::Duration::days(1));
        store.save_tokens(&pair).await.unwrap();

        assert_eq!(store.find_access_token(&pair.access_token).await.unwrap(), Some(pair.clone()));
        assert_eq!(store.take_refresh_token(&pair.refresh_token).await.unwrap(), Some(pair.clone()));
        assert!(store.find_access_token(&pair.access_token).await.unwrap().is_none());
        assert!(store.take_refresh_token(&pair.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redeem_code_swaps_in_pair() {
        let store = seeded_store().await;
        let code = code_expiring_at(now() + chrono::Duration::minutes(10));
        store.save_code(&code).await.unwrap();
        assert_eq!(store.find_code(&code.code).await.unwrap(), Some(code.clone()));

        let pair = pair_expiring_at(now() + chrono::Duration::days(1));
        assert!(store.redeem_code(&code.code, &pair).await.unwrap());
        assert!(store.find_code(&code.code).await.unwrap().is_none());
        assert_eq!(store.find_access_token(&pair.access_token).await.unwrap(), Some(pair.clone()));

        let late = pair_expiring_at(now() + chrono::Duration::days(1));
        assert!(!store.redeem_code(&code.code, &late).await.unwrap());
        assert!(store.find_refresh_token(&late.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_redeem_keeps_code() {
        let store = seeded_store().await;
        let code = code_expiring_at(now() + chrono::Duration::minutes(10));
        store.save_code(&code).await.unwrap();

        // Unknown user: the insert violates the foreign key and the delete rolls back
        let mut orphan = pair_expiring_at(now() + chrono::Duration::days(1));
        orphan.user_id = "404".to_string();
        assert!(store.redeem_code(&code.code, &orphan).await.is_err());
        assert_eq!(store.find_code(&code.code).await.unwrap(), Some(code.clone()));

        let pair = pair_expiring_at(now() + chrono::Duration::days(1));
        assert!(store.redeem_code(&code.code, &pair).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_old_pair() {
        let store = seeded_store().await;
        let old = pair_expiring_at(now() + chrono::Duration::days(1));
        store.save_tokens(&old).await.unwrap();

        let mut orphan = pair_expiring_at(now() + chrono::Duration::days(1));
        orphan.client_id = "evil.example".to_string();
        assert!(store.rotate_refresh_token(&old.refresh_token, &orphan).await.is_err());
        assert_eq!(store.find_access_token(&old.access_token).await.unwrap(), Some(old.clone()));

        let new = pair_expiring_at(now() + chrono::Duration::days(1));
        assert!(store.rotate_refresh_token(&old.refresh_token, &new).await.unwrap());
        assert!(store.find_refresh_token(&old.refresh_token).await.unwrap().is_none());
        assert!(!store.rotate_refresh_token(&old.refresh_token, &new).await.unwrap());
        assert_eq!(store.find_refresh_token(&new.refresh_token).await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn test_concurrent_redeem_code_stores_one_pair() {
        let store = Arc::new(seeded_store().await);
        let code = code_expiring_at(now() + chrono::Duration::minutes(10));
        store.save_code(&code).await.unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let key = code.code.clone();
                tokio::spawn(async move {
                    let pair = pair_expiring_at(now() + chrono::Duration::days(1));
                    store.redeem_code(&key, &pair).await.unwrap()
                })
            })
            .collect();
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_revoke() {
        let store = seeded_store().await;
        let pair = pair_expiring_at(now() + chrono::Duration::days(1));
        store.save_tokens(&pair).await.unwrap();

        assert!(store.revoke(&pair.refresh_token).await.unwrap());
        assert!(store.find_access_token(&pair.access_token).await.unwrap().is_none());
        assert!(!store.revoke(&pair.access_token).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = seeded_store().await;
        let past = now() - chrono::Duration::seconds(1);
        let future = now() + chrono::Duration::minutes(10);
        let stale_code = code_expiring_at(past);
        let live_code = code_expiring_at(future);
        store.save_code(&stale_code).await.unwrap();
        store.save_code(&live_code).await.unwrap();
        store.save_tokens(&pair_expiring_at(past)).await.unwrap();
        let live_pair = pair_expiring_at(future);
        store.save_tokens(&live_pair).await.unwrap();

        assert_eq!(store.purge_expired(now()).await.unwrap(), 2);
        assert!(store.take_code(&live_code.code).await.unwrap().is_some());
        assert!(store.find_refresh_token(&live_pair.refresh_token).await.unwrap().is_some());
        assert_eq!(store.purge_expired(now()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_deleting_user_cascades() {
        let store = seeded_store().await;
        let code = code_expiring_at(now() + chrono::Duration::minutes(10));
        let pair = pair_expiring_at(now() + chrono::Duration::days(1));
        store.save_code(&code).await.unwrap();
        store.save_tokens(&pair).await.unwrap();

        assert!(store.delete_user("1").await.unwrap());
        assert!(store.take_code(&code.code).await.unwrap().is_none());
        assert!(store.find_refresh_token(&pair.refresh_token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_deleting_client_cascades() {
        let store = seeded_store().await;
        let pair = pair_expiring_at(now() + chrono::Duration::days(1));
        store.save_tokens(&pair).await.unwrap();

        assert!(store.delete_client("acme.example").await.unwrap());
        assert!(store.find_access_token(&pair.access_token).await.unwrap().is_none());
        let user = store.find_user_by_id("1").await.unwrap().unwrap();
        assert!(user.instance_id.is_none());
    }
}
