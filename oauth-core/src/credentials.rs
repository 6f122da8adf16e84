//! Read-only access to the identity data owned by the platform's admin console

use crate::error::StoreError;
use crate::model::{Client, Principal};
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup seam over clients and users.
///
/// Provisioning is external: the authorization server only reads.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_id(&self, id: &str) -> Result<Option<Principal>, StoreError>;

    async fn find_user_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError>;

    async fn find_client_by_id(&self, id: &str) -> Result<Option<Client>, StoreError>;
}

/// Credentials held in memory, typically seeded from a file at startup
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    clients: Arc<HashMap<String, Client>>,
    users: Arc<HashMap<String, Principal>>,
    usernames: Arc<HashMap<String, String>>,
}

impl StaticCredentials {
    /// Builds the lookup tables, rejecting duplicate client ids, user ids or usernames
    pub fn new(clients: Vec<Client>, users: Vec<Principal>) -> Result<Self, String> {
        let mut client_map = HashMap::with_capacity(clients.len());
        for client in clients {
            if client_map.contains_key(&client.id) {
                return Err(format!("duplicate client id '{}'", client.id));
            }
            client_map.insert(client.id.clone(), client);
        }

        let mut user_map = HashMap::with_capacity(users.len());
        let mut usernames = HashMap::with_capacity(users.len());
        for user in users {
            if usernames.contains_key(&user.username) {
                return Err(format!("duplicate username '{}'", user.username));
            }
            if user_map.contains_key(&user.id) {
                return Err(format!("duplicate user id '{}'", user.id));
            }
            if let Some(instance) = &user.instance_id {
                if !client_map.contains_key(instance) {
                    warn!(
                        "User '{}' belongs to unknown instance '{}'",
                        user.username, instance
                    );
                }
            }
            usernames.insert(user.username.clone(), user.id.clone());
            user_map.insert(user.id.clone(), user);
        }

        Ok(Self {
            clients: Arc::new(client_map),
            users: Arc::new(user_map),
            usernames: Arc::new(usernames),
        })
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn find_user_by_id(&self, id: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self.users.get(id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<Principal>, StoreError> {
        Ok(self
            .usernames
            .get(username)
            .and_then(|id| self.users.get(id))
            .cloned())
    }

    async fn find_client_by_id(&self, id: &str) -> Result<Option<Client>, StoreError> {
        Ok(self.clients.get(id).cloned())
    }
}

/// Checks a password against a bcrypt hash on the blocking pool.
///
/// Malformed hashes never verify.
pub async fn verify_password(password: &str, hash: &str) -> bool {
    let password = password.to_owned();
    let hash = hash.to_owned();
    tokio::task::spawn_blocking(move || bcrypt::verify(&password, &hash).unwrap_or(false))
        .await
        .unwrap_or(false)
}

// Well-formed cost-12 hash no password maps to; unknown usernames are checked
// against it so they take as long as a wrong password
const UNKNOWN_USER_HASH: &str = "$2b$12$dummysaltfordummyhasheusedonlytoequalizeloginrespons.";

/// Resolves a username and password to a principal, `None` when either is wrong
pub async fn verify_principal<C>(
    store: &C,
    username: &str,
    password: &str,
) -> Result<Option<Principal>, StoreError>
where
    C: CredentialStore + ?Sized,
{
    let Some(user) = store.find_user_by_username(username).await? else {
        verify_password(password, UNKNOWN_USER_HASH).await;
        return Ok(None);
    };
    if verify_password(password, &user.password_hash).await {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}
