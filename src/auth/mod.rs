//! Pluggable authentication providers
//!
//! Every outgoing request, static or browser-driven, asks the active
//! provider for headers and cookies to inject. Providers own their state
//! behind copy-on-read locks: many readers snapshot while one refresh
//! mutates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::browser::BrowserPool;
use crate::errors::CrawlResult;
use crate::model::CookieRecord;

mod api_key;
mod basic;
mod form_login;
mod jwt;
mod oauth;
mod session;

pub use api_key::ApiKeyAuth;
pub use basic::BasicAuth;
pub use form_login::{FormLoginAuth, FormLoginConfig};
pub use jwt::JwtAuth;
pub use oauth::{OAuthAuth, OAuthConfig};
pub use session::SessionAuth;

/// Credentials with an expiry are refreshed when this close to expiring
pub const REFRESH_WINDOW: Duration = Duration::from_secs(300);

/// Variant tag for the active provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthKind {
    None,
    Session,
    Basic,
    ApiKey,
    Jwt,
    OAuth,
    FormLogin,
}

/// The provider contract every variant implements
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Perform any initial handshake. Form-login and the OAuth
    /// authorization-code flow drive a pooled browser when one is given.
    async fn authenticate(&self, browser_pool: Option<&Arc<BrowserPool>>) -> CrawlResult<()>;

    /// Headers to add to every outgoing request
    fn headers_to_inject(&self) -> Vec<(String, String)>;

    /// Cookies to attach to every outgoing request
    fn cookies_to_inject(&self) -> Vec<CookieRecord>;

    /// Refresh the credential when it is inside the refresh window, or
    /// after the target rejected it
    ///
    /// Best-effort: failures mark the state unauthenticated but never fail
    /// the crawl. Returns whether a refresh happened.
    async fn refresh_if_needed(&self) -> bool;

    /// Refresh the credential immediately, ignoring the expiry window
    ///
    /// Runs after a request came back with an auth rejection, so the
    /// credential is suspect no matter what its expiry claims. Returns
    /// whether a fresh credential was obtained; variants without a refresh
    /// mechanism return false.
    async fn force_refresh(&self) -> bool {
        false
    }

    /// Record that the target rejected the current credential
    ///
    /// `is_authenticated` reports false until a later refresh succeeds.
    fn mark_unauthenticated(&self) {}

    /// Whether the current state is usable
    fn is_authenticated(&self) -> bool;

    fn kind(&self) -> AuthKind;
}

/// Provider that injects nothing and is always authenticated
#[derive(Debug, Default)]
pub struct NoAuth;

#[async_trait]
impl AuthProvider for NoAuth {
    async fn authenticate(&self, _browser_pool: Option<&Arc<BrowserPool>>) -> CrawlResult<()> {
        Ok(())
    }

    fn headers_to_inject(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn cookies_to_inject(&self) -> Vec<CookieRecord> {
        Vec::new()
    }

    async fn refresh_if_needed(&self) -> bool {
        false
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    fn kind(&self) -> AuthKind {
        AuthKind::None
    }
}

/// Declarative authentication configuration, one of the seven variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthSpec {
    None,
    Session {
        cookies: Vec<CookieRecord>,
    },
    Basic {
        username: String,
        password: String,
    },
    ApiKey {
        headers: std::collections::HashMap<String, String>,
    },
    Jwt {
        token: String,
        refresh_token: Option<String>,
        refresh_url: Option<String>,
    },
    OAuth(OAuthConfig),
    FormLogin(FormLoginConfig),
}

impl Default for AuthSpec {
    fn default() -> Self {
        Self::None
    }
}

/// Build the provider for a spec, sharing the crawl's HTTP client
#[must_use]
pub fn build_provider(spec: &AuthSpec, http: reqwest::Client) -> Arc<dyn AuthProvider> {
    match spec {
        AuthSpec::None => Arc::new(NoAuth),
        AuthSpec::Session { cookies } => {
            let auth = SessionAuth::new();
            for cookie in cookies {
                auth.add_cookie(cookie.clone());
            }
            Arc::new(auth)
        }
        AuthSpec::Basic { username, password } => Arc::new(BasicAuth::new(username, password)),
        AuthSpec::ApiKey { headers } => Arc::new(ApiKeyAuth::new(headers.clone())),
        AuthSpec::Jwt {
            token,
            refresh_token,
            refresh_url,
        } => Arc::new(JwtAuth::new(
            token.clone(),
            refresh_token.clone(),
            refresh_url.clone(),
            http,
        )),
        AuthSpec::OAuth(config) => Arc::new(OAuthAuth::new(config.clone(), http)),
        AuthSpec::FormLogin(config) => Arc::new(FormLoginAuth::new(config.clone())),
    }
}
