//! Fixtures shared by the unit tests: two tenants, a member of each and a
//! platform administrator.

use crate::credentials::StaticCredentials;
use crate::flow::{AuthorizationRequest, AuthorizationServer, FlowSettings};
use crate::model::{Client, ClientCredentials, Principal, Role};
use crate::policy::ScopePolicy;
use crate::store::memory::MemoryStore;
use std::sync::OnceLock;

pub(crate) const ACME: &str = "acme.example";
pub(crate) const ACME_SECRET: &str = "acme-secret";
pub(crate) const ACME_REDIRECT: &str = "https://acme.example/cb";
pub(crate) const ALICE_PASSWORD: &str = "wonderland";

fn alice_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| bcrypt::hash(ALICE_PASSWORD, 4).expect("bcrypt hash"))
}

pub(crate) fn acme_client() -> Client {
    Client::new(ACME, ACME_SECRET, ACME_REDIRECT)
}

pub(crate) fn globex_client() -> Client {
    Client::new("globex.example", "globex-secret", "https://globex.example/callback")
}

pub(crate) fn alice() -> Principal {
    Principal {
        id: "1".to_string(),
        username: "alice".to_string(),
        password_hash: alice_hash().to_string(),
        instance_id: Some(ACME.to_string()),
        role: Role::Editor,
    }
}

pub(crate) fn bob() -> Principal {
    Principal {
        id: "2".to_string(),
        username: "bob".to_string(),
        password_hash: String::new(),
        instance_id: Some("globex.example".to_string()),
        role: Role::Editor,
    }
}

pub(crate) fn root() -> Principal {
    Principal {
        id: "3".to_string(),
        username: "root".to_string(),
        password_hash: String::new(),
        instance_id: None,
        role: Role::Admin,
    }
}

pub(crate) fn credentials() -> StaticCredentials {
    StaticCredentials::new(
        vec![acme_client(), globex_client()],
        vec![alice(), bob(), root()],
    )
    .expect("valid fixture credentials")
}

pub(crate) fn acme_credentials() -> ClientCredentials {
    ClientCredentials::new(ACME, ACME_SECRET)
}

pub(crate) fn authorize_request() -> AuthorizationRequest {
    AuthorizationRequest {
        response_type: "code".to_string(),
        client_id: ACME.to_string(),
        redirect_uri: ACME_REDIRECT.to_string(),
        scope: None,
        state: Some("xyz".to_string()),
        code_challenge: None,
        code_challenge_method: None,
    }
}

pub(crate) fn server_with(
    settings: FlowSettings,
) -> AuthorizationServer<MemoryStore, StaticCredentials> {
    AuthorizationServer::new(
        MemoryStore::default(),
        credentials(),
        ScopePolicy::default(),
        settings,
    )
}

pub(crate) fn server() -> AuthorizationServer<MemoryStore, StaticCredentials> {
    server_with(FlowSettings::default())
}
