use crate::config::ServerConfig;
use crate::create_app;
use crate::state::tests::create_test_state;
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use http::header::{CONTENT_TYPE, COOKIE, LOCATION};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use oauth_core::{Client, Principal, Role, StaticCredentials};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::OnceLock;
use tower::ServiceExt;

pub(crate) const ACME: &str = "acme.example";
pub(crate) const ACME_SECRET: &str = "acme-secret";
pub(crate) const ACME_REDIRECT: &str = "https://acme.example/cb";
pub(crate) const ALICE_PASSWORD: &str = "wonderland";

fn alice_hash() -> &'static str {
    static HASH: OnceLock<String> = OnceLock::new();
    HASH.get_or_init(|| bcrypt::hash(ALICE_PASSWORD, 4).expect("bcrypt hash"))
}

/// Two tenants, a member of each and a platform administrator.
///
/// alice (id "1") belongs to acme, bob (id "2") to globex and root (id "3")
/// administers the platform without a tenant.
pub(crate) fn test_credentials() -> StaticCredentials {
    let clients = vec![
        Client::new(ACME, ACME_SECRET, ACME_REDIRECT),
        Client::new(
            "globex.example",
            "globex-secret",
            "https://globex.example/callback",
        ),
    ];
    let users = vec![
        Principal {
            id: "1".to_string(),
            username: "alice".to_string(),
            password_hash: alice_hash().to_string(),
            instance_id: Some(ACME.to_string()),
            role: Role::Editor,
        },
        Principal {
            id: "2".to_string(),
            username: "bob".to_string(),
            password_hash: alice_hash().to_string(),
            instance_id: Some("globex.example".to_string()),
            role: Role::Editor,
        },
        Principal {
            id: "3".to_string(),
            username: "root".to_string(),
            password_hash: alice_hash().to_string(),
            instance_id: None,
            role: Role::Admin,
        },
    ];
    StaticCredentials::new(clients, users).expect("fixture credentials are unique")
}

/// Test fixture running the full router against an in-memory store.
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     let session = fixture.sign_in("1").await;
///     let response = fixture.get_with_session("/authorize?...", &session).await;
///     response.assert_status(StatusCode::FOUND);
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Configuration the router was built from
    pub config: ServerConfig,
    /// Shared state, for reaching into sessions and the token store
    pub state: AppState,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_config(ServerConfig::for_test()).await
    }

    /// Builds the fixture from a tweaked test configuration
    pub async fn with_config(config: ServerConfig) -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let state = create_test_state(&config, test_credentials());
        let app = create_app(state.clone()).await;

        Self { app, config, state }
    }

    /// Initializes the test logger; repeated calls are ignored.
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder().method(method).uri(uri.as_ref())
    }

    /// Opens a browser session for the user without going through `/login`
    pub async fn sign_in(&self, user_id: &str) -> String {
        self.state.sessions.open(user_id).await
    }

    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        self.get_with_headers(uri, &[]).await
    }

    pub async fn get_with_headers(
        &self,
        uri: impl AsRef<str>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut builder = self.request_builder(Method::GET, uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty()).expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a GET request carrying the session cookie
    pub async fn get_with_session(&self, uri: impl AsRef<str>, session_id: &str) -> TestResponse {
        let cookie = format!("{}={}", self.config.session.cookie_name, session_id);
        self.get_with_headers(uri, &[(COOKIE.as_str(), cookie.as_str())])
            .await
    }

    /// Sends a POST request with an `application/x-www-form-urlencoded` body
    pub async fn post_form(&self, uri: impl AsRef<str>, fields: &[(&str, &str)]) -> TestResponse {
        self.post_form_with_headers(uri, fields, &[]).await
    }

    pub async fn post_form_with_headers(
        &self,
        uri: impl AsRef<str>,
        fields: &[(&str, &str)],
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields)
            .finish();
        let mut builder = self
            .request_builder(Method::POST, uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::from(body))
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn post_json<T: Serialize>(&self, uri: impl AsRef<str>, body: &T) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let request = self
            .request_builder(Method::POST, uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(json_body))
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        // Redirects and revocations have no body
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        TestResponse {
            status,
            headers,
            json,
        }
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub json: Value,
}

impl TestResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        assert!(
            self.is_success(),
            "Expected success but got {} with body: {}",
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self.assert_status(StatusCode::OK)
    }

    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response JSON")
    }

    /// The `Location` header of a redirect
    pub fn location(&self) -> &str {
        self.headers
            .get(LOCATION)
            .expect("response has no Location header")
            .to_str()
            .expect("Location header is not ASCII")
    }
}
