use crate::config::SessionConfig;
use chrono::{DateTime, Utc};
use http::header::COOKIE;
use http::{HeaderMap, HeaderValue};
use log::debug;
use moka::future::Cache as MokaCache;
use oauth_core::secret::{fingerprint, generate_token};
use std::time::Duration;

/// A signed-in browser session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Server-side sessions keyed by an opaque random id.
///
/// Only the session id travels in the cookie; the user is re-read on every
/// request so that role or tenant changes apply immediately.
#[derive(Clone)]
pub struct SessionStore {
    sessions: MokaCache<String, Session>,
    cookie: SessionCookie,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        let sessions = MokaCache::builder()
            .time_to_live(Duration::from_secs(config.ttl))
            .max_capacity(config.capacity)
            .build();
        Self {
            sessions,
            cookie: SessionCookie {
                name: config.cookie_name.clone(),
                max_age: config.ttl,
                secure: config.secure_cookie,
            },
        }
    }

    pub fn cookie(&self) -> &SessionCookie {
        &self.cookie
    }

    /// Starts a session for the user and returns its id
    pub async fn open(&self, user_id: &str) -> String {
        let id = generate_token();
        self.sessions
            .insert(
                id.clone(),
                Session {
                    user_id: user_id.to_string(),
                    created_at: Utc::now(),
                },
            )
            .await;
        debug!("Opened session {} for user {}", fingerprint(&id), user_id);
        id
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.get(id).await
    }

    /// Resolves the session named by the request's cookie
    pub async fn from_headers(&self, headers: &HeaderMap) -> Option<(String, Session)> {
        let id = self.cookie.read(headers)?;
        let session = self.get(&id).await?;
        Some((id, session))
    }

    pub async fn close(&self, id: &str) -> bool {
        self.sessions.remove(id).await.is_some()
    }
}

/// Attributes of the session cookie
#[derive(Debug, Clone)]
pub struct SessionCookie {
    name: String,
    max_age: u64,
    secure: bool,
}

impl SessionCookie {
    /// Finds this cookie's value among the request's `Cookie` headers
    pub fn read(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.name)
            .map(|(_, value)| value.to_string())
            .filter(|value| !value.is_empty())
    }

    /// `Set-Cookie` value carrying a session id
    pub fn issue(&self, session_id: &str) -> Option<HeaderValue> {
        self.format(session_id, self.max_age)
    }

    /// `Set-Cookie` value removing the cookie from the browser
    pub fn clear(&self) -> Option<HeaderValue> {
        self.format("", 0)
    }

    fn format(&self, value: &str, max_age: u64) -> Option<HeaderValue> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            self.name, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }
        HeaderValue::from_str(&cookie).ok()
    }
}
