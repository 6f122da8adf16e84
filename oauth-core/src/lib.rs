//! Core of the tenant OAuth 2.0 authorization server.
//!
//! The crate is framework-agnostic: it knows nothing about HTTP. The server
//! crate maps requests into [`flow::AuthorizationServer`] calls and renders the
//! results, while storage is plugged in through the [`store::TokenStore`] and
//! [`credentials::CredentialStore`] traits.

pub mod credentials;
pub mod error;
pub mod flow;
pub mod model;
pub mod policy;
pub mod registry;
pub mod secret;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use credentials::{CredentialStore, StaticCredentials};
pub use error::{OAuthError, StoreError};
pub use flow::{
    AuthorizationRequest, AuthorizationServer, AuthorizeError, FlowSettings, Grant,
    IntrospectedToken, IssuedCode, IssuedTokens, TokenKind,
};
pub use model::{
    AuthorizationCode, Client, ClientCredentials, GrantType, Principal, Role, Scope, TokenPair,
};
pub use policy::ScopePolicy;
pub use registry::ClientRegistry;
pub use secret::CodeChallengeMethod;
pub use store::memory::MemoryStore;
pub use store::TokenStore;
