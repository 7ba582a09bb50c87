//! OAuth 2.0 authentication
//!
//! Tries the client-credentials grant first; when that fails and a browser
//! pool is available, falls back to the authorization-code flow by driving
//! a page through the authorize URL and harvesting the `code` from the
//! redirect. Tokens are refreshed with the refresh-token grant inside the
//! refresh window.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::RwLock;
use rand::distr::{Alphanumeric, SampleString};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::browser::BrowserPool;
use crate::errors::{classify_reqwest, error_for_status, CrawlError, CrawlResult, ErrorKind};
use crate::model::CookieRecord;

use super::{AuthKind, AuthProvider, REFRESH_WINDOW};

/// Static OAuth client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Wire shape of a token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    token_type: Option<String>,
    expires_in: Option<u64>,
}

#[derive(Debug, Clone, Default)]
struct OAuthTokens {
    access_token: String,
    refresh_token: Option<String>,
    token_type: String,
    expires_at: Option<DateTime<Utc>>,
    /// The target rejected this token or a refresh failed; any successful
    /// token response clears it
    invalidated: bool,
}

pub struct OAuthAuth {
    config: OAuthConfig,
    tokens: RwLock<OAuthTokens>,
    http: reqwest::Client,
}

impl OAuthAuth {
    #[must_use]
    pub fn new(config: OAuthConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            tokens: RwLock::new(OAuthTokens::default()),
            http,
        }
    }

    async fn post_token_request(&self, form: &[(&str, &str)]) -> CrawlResult<()> {
        let response = self
            .http
            .post(&self.config.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, &self.config.token_url, "oauth-token"))?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(error_for_status(status, &self.config.token_url, "oauth-token"));
        }

        let body: TokenResponse = response.json().await.map_err(|e| {
            CrawlError::new(
                ErrorKind::Parse,
                &self.config.token_url,
                "oauth-token",
                e.to_string(),
            )
        })?;

        let mut tokens = self.tokens.write();
        tokens.access_token = body.access_token;
        if let Some(refresh) = body.refresh_token {
            tokens.refresh_token = Some(refresh);
        }
        tokens.token_type = body.token_type.unwrap_or_else(|| "Bearer".to_string());
        tokens.expires_at = body
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs as i64));
        tokens.invalidated = false;
        debug!("OAuth tokens updated, expiry {:?}", tokens.expires_at);
        Ok(())
    }

    async fn client_credentials_grant(&self) -> CrawlResult<()> {
        let scope = self.config.scopes.join(" ");
        let mut form = vec![
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if !scope.is_empty() {
            form.push(("scope", scope.as_str()));
        }
        self.post_token_request(&form).await
    }

    /// Drive a browser through the authorize URL and exchange the code
    async fn authorization_code_grant(&self, pool: &Arc<BrowserPool>) -> CrawlResult<()> {
        let state = Alphanumeric.sample_string(&mut rand::rng(), 24);

        let mut authorize = Url::parse(&self.config.authorize_url).map_err(|e| {
            CrawlError::new(
                ErrorKind::Parse,
                &self.config.authorize_url,
                "oauth-authorize",
                e.to_string(),
            )
        })?;
        authorize
            .query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("state", &state);
        if !self.config.scopes.is_empty() {
            authorize
                .query_pairs_mut()
                .append_pair("scope", &self.config.scopes.join(" "));
        }

        let guard = pool.acquire().await?;
        let page = guard
            .browser()
            .new_page(authorize.as_str())
            .await
            .map_err(|e| {
                crate::errors::classify_browser(e.to_string(), authorize.as_str(), "oauth-authorize")
            })?;

        // Poll for the redirect; authorize pages often bounce through
        // several intermediate URLs first.
        let code = {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
            let mut found = None;
            while tokio::time::Instant::now() < deadline {
                if let Ok(Some(current)) = page.url().await {
                    if current.starts_with(&self.config.redirect_url) {
                        found = extract_code(&current, &state);
                        break;
                    }
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            found
        };

        if let Err(e) = page.close().await {
            debug!("closing oauth page: {e}");
        }
        drop(guard);

        let code = code.ok_or_else(|| {
            CrawlError::new(
                ErrorKind::Auth,
                &self.config.redirect_url,
                "oauth-authorize",
                "no authorization code observed at the redirect URL",
            )
        })?;

        info!("OAuth authorization code obtained, exchanging");
        self.post_token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ])
        .await
    }

    fn needs_refresh(&self) -> bool {
        let tokens = self.tokens.read();
        if tokens.invalidated {
            return true;
        }
        match tokens.expires_at {
            Some(expires_at) => {
                (expires_at - Utc::now()).num_seconds() <= REFRESH_WINDOW.as_secs() as i64
            }
            None => false,
        }
    }

    async fn refresh_grant(&self, refresh_token: &str) -> CrawlResult<()> {
        self.post_token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ])
        .await
    }
}

/// Pull `code` from a redirect URL, checking the anti-forgery `state`
fn extract_code(redirect: &str, expected_state: &str) -> Option<String> {
    let url = Url::parse(redirect).ok()?;
    let mut code = None;
    let mut state_ok = false;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state_ok = value == expected_state,
            _ => {}
        }
    }
    if state_ok {
        code
    } else {
        None
    }
}

#[async_trait]
impl AuthProvider for OAuthAuth {
    async fn authenticate(&self, browser_pool: Option<&Arc<BrowserPool>>) -> CrawlResult<()> {
        match self.client_credentials_grant().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!("client-credentials grant failed: {}", e.message);
                if let Some(pool) = browser_pool {
                    return self.authorization_code_grant(pool).await;
                }
                Err(e)
            }
        }
    }

    fn headers_to_inject(&self) -> Vec<(String, String)> {
        let tokens = self.tokens.read();
        if tokens.access_token.is_empty() {
            return Vec::new();
        }
        let token_type = if tokens.token_type.is_empty() {
            "Bearer"
        } else {
            tokens.token_type.as_str()
        };
        vec![(
            "Authorization".to_string(),
            format!("{token_type} {}", tokens.access_token),
        )]
    }

    fn cookies_to_inject(&self) -> Vec<CookieRecord> {
        Vec::new()
    }

    async fn refresh_if_needed(&self) -> bool {
        if !self.needs_refresh() {
            return false;
        }
        let refresh_token = match self.tokens.read().refresh_token.clone() {
            Some(token) => token,
            None => return false,
        };
        match self.refresh_grant(&refresh_token).await {
            Ok(()) => true,
            Err(e) => {
                warn!("OAuth refresh failed: {}", e.message);
                self.tokens.write().invalidated = true;
                false
            }
        }
    }

    async fn force_refresh(&self) -> bool {
        // No refresh token means the credential came from the
        // client-credentials grant; re-run that grant instead.
        let refresh_token = self.tokens.read().refresh_token.clone();
        let result = match refresh_token {
            Some(token) => self.refresh_grant(&token).await,
            None => self.client_credentials_grant().await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("forced OAuth refresh failed: {}", e.message);
                self.tokens.write().invalidated = true;
                false
            }
        }
    }

    fn mark_unauthenticated(&self) {
        self.tokens.write().invalidated = true;
    }

    fn is_authenticated(&self) -> bool {
        let tokens = self.tokens.read();
        if tokens.invalidated || tokens.access_token.is_empty() {
            return false;
        }
        match tokens.expires_at {
            Some(expires_at) => expires_at > Utc::now(),
            None => true,
        }
    }

    fn kind(&self) -> AuthKind {
        AuthKind::OAuth
    }
}
