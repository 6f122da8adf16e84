//! Client Registry: resolves tenant clients and authenticates them

use crate::credentials::CredentialStore;
use crate::error::OAuthError;
use crate::model::{Client, ClientCredentials, GrantType};
use crate::secret::constant_time_eq;
use crate::store::bounded;
use log::{debug, warn};
use std::time::Duration;

// Compared against when the client is unknown so both failures cost the same.
const UNKNOWN_CLIENT_SECRET: &str = "unknown-client-placeholder-secret";

#[derive(Debug, Clone)]
pub struct ClientRegistry<C> {
    credentials: C,
    timeout: Duration,
}

impl<C: CredentialStore> ClientRegistry<C> {
    pub fn new(credentials: C, timeout: Duration) -> Self {
        Self {
            credentials,
            timeout,
        }
    }

    pub fn credentials(&self) -> &C {
        &self.credentials
    }

    /// Looks up a client by id without checking its secret
    pub async fn resolve(&self, client_id: &str) -> Result<Client, OAuthError> {
        if client_id.is_empty() {
            return Err(OAuthError::InvalidRequest("client_id is required".to_string()));
        }
        bounded(self.timeout, self.credentials.find_client_by_id(client_id))
            .await?
            .ok_or_else(|| {
                debug!("Unknown client_id: {}", client_id);
                OAuthError::InvalidClient("unknown client".to_string())
            })
    }

    /// Authenticates a client by id and secret.
    ///
    /// Unknown clients and wrong secrets fail identically.
    pub async fn authenticate(&self, credentials: &ClientCredentials) -> Result<Client, OAuthError> {
        let client = bounded(
            self.timeout,
            self.credentials.find_client_by_id(&credentials.client_id),
        )
        .await?;

        let expected = client
            .as_ref()
            .map(|c| c.secret.as_str())
            .unwrap_or(UNKNOWN_CLIENT_SECRET);
        let secret_matches = constant_time_eq(expected, &credentials.client_secret);

        match client {
            Some(client) if secret_matches && !client.secret.is_empty() => Ok(client),
            _ => {
                warn!("Client authentication failed for client_id: {}", credentials.client_id);
                Err(OAuthError::InvalidClient(
                    "client authentication failed".to_string(),
                ))
            }
        }
    }
}

/// Fails with `unauthorized_client` when the client may not use `grant`
pub fn ensure_grant(client: &Client, grant: GrantType) -> Result<(), OAuthError> {
    if client.allows(grant) {
        Ok(())
    } else {
        Err(OAuthError::UnauthorizedClient(format!(
            "client is not allowed to use the {} grant",
            grant
        )))
    }
}
