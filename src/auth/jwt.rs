//! JWT bearer authentication with optional refresh
//!
//! The token's `exp` claim is read at construction (middle segment,
//! base64url, JSON). When the expiry is inside the refresh window and a
//! refresh endpoint is configured, a new token pair is fetched with the
//! refresh token as bearer.

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, warn};
use parking_lot::RwLock;
use serde::Deserialize;

use crate::browser::BrowserPool;
use crate::errors::{CrawlError, CrawlResult, ErrorKind};
use crate::model::CookieRecord;

use super::{AuthKind, AuthProvider, REFRESH_WINDOW};

/// Parse the `exp` claim (Unix seconds) out of a JWT
///
/// Returns `None` for malformed tokens or tokens without an expiry.
#[must_use]
pub fn parse_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;
    segments.next()?;

    let decoded = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .ok()?;

    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }
    let claims: Claims = serde_json::from_slice(&decoded).ok()?;
    claims.exp.and_then(|exp| Utc.timestamp_opt(exp, 0).single())
}

#[derive(Debug, Clone)]
struct JwtState {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    /// The target rejected this token or a refresh failed; a successful
    /// refresh clears it
    invalidated: bool,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
}

pub struct JwtAuth {
    state: RwLock<JwtState>,
    refresh_url: Option<String>,
    http: reqwest::Client,
}

impl JwtAuth {
    #[must_use]
    pub fn new(
        token: String,
        refresh_token: Option<String>,
        refresh_url: Option<String>,
        http: reqwest::Client,
    ) -> Self {
        let expires_at = parse_expiry(&token);
        Self {
            state: RwLock::new(JwtState {
                access_token: token,
                refresh_token,
                expires_at,
                invalidated: false,
            }),
            refresh_url,
            http,
        }
    }

    /// Current access token (defensive copy)
    #[must_use]
    pub fn access_token(&self) -> String {
        self.state.read().access_token.clone()
    }

    /// Expiry recorded from the current token's `exp` claim
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().expires_at
    }

    fn needs_refresh(&self) -> bool {
        let state = self.state.read();
        if state.invalidated {
            return true;
        }
        match state.expires_at {
            Some(expires_at) => {
                let remaining = expires_at - Utc::now();
                remaining.num_seconds() <= REFRESH_WINDOW.as_secs() as i64
            }
            None => false,
        }
    }

    fn can_refresh(&self) -> bool {
        self.refresh_url.is_some() && self.state.read().refresh_token.is_some()
    }

    async fn refresh(&self) -> CrawlResult<()> {
        let (refresh_url, refresh_token) = {
            let state = self.state.read();
            let url = self.refresh_url.clone().ok_or_else(|| {
                CrawlError::new(ErrorKind::Auth, "", "jwt-refresh", "no refresh URL configured")
            })?;
            let token = state.refresh_token.clone().ok_or_else(|| {
                CrawlError::new(ErrorKind::Auth, "", "jwt-refresh", "no refresh token held")
            })?;
            (url, token)
        };

        let response = self
            .http
            .post(&refresh_url)
            .header("Authorization", format!("Bearer {refresh_token}"))
            .send()
            .await
            .map_err(|e| crate::errors::classify_reqwest(e, &refresh_url, "jwt-refresh"))?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(crate::errors::error_for_status(status, &refresh_url, "jwt-refresh"));
        }

        let body: RefreshResponse = response.json().await.map_err(|e| {
            CrawlError::new(ErrorKind::Parse, &refresh_url, "jwt-refresh", e.to_string())
        })?;

        let mut state = self.state.write();
        state.expires_at = parse_expiry(&body.access_token);
        state.access_token = body.access_token;
        if let Some(new_refresh) = body.refresh_token {
            state.refresh_token = Some(new_refresh);
        }
        state.invalidated = false;
        debug!("JWT refreshed, new expiry {:?}", state.expires_at);
        Ok(())
    }
}

#[async_trait]
impl AuthProvider for JwtAuth {
    async fn authenticate(&self, _browser_pool: Option<&Arc<BrowserPool>>) -> CrawlResult<()> {
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(CrawlError::new(
                ErrorKind::Auth,
                "",
                "jwt-auth",
                "token empty or already expired",
            ))
        }
    }

    fn headers_to_inject(&self) -> Vec<(String, String)> {
        let state = self.state.read();
        if state.access_token.is_empty() {
            return Vec::new();
        }
        vec![(
            "Authorization".to_string(),
            format!("Bearer {}", state.access_token),
        )]
    }

    fn cookies_to_inject(&self) -> Vec<CookieRecord> {
        Vec::new()
    }

    async fn refresh_if_needed(&self) -> bool {
        if !self.needs_refresh() || !self.can_refresh() {
            return false;
        }
        match self.refresh().await {
            Ok(()) => true,
            Err(e) => {
                warn!("JWT refresh failed: {}", e.message);
                self.state.write().invalidated = true;
                false
            }
        }
    }

    async fn force_refresh(&self) -> bool {
        match self.refresh().await {
            Ok(()) => true,
            Err(e) => {
                warn!("forced JWT refresh failed: {}", e.message);
                self.state.write().invalidated = true;
                false
            }
        }
    }

    fn mark_unauthenticated(&self) {
        self.state.write().invalidated = true;
    }

    fn is_authenticated(&self) -> bool {
        let state = self.state.read();
        if state.invalidated || state.access_token.is_empty() {
            return false;
        }
        match state.expires_at {
            Some(expires_at) => expires_at > Utc::now(),
            None => true,
        }
    }

    fn kind(&self) -> AuthKind {
        AuthKind::Jwt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// header `{"alg":"none"}`, payload `{"exp": <exp>}`, empty signature
    fn token_with_exp(exp: i64) -> String {
        let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let header = engine.encode(r#"{"alg":"none"}"#);
        let payload = engine.encode(format!(r#"{{"exp":{exp}}}"#));
        format!("{header}.{payload}.sig")
    }

    #[test]
    fn parses_exp_claim() {
        let exp = 2_000_000_000;
        let parsed = parse_expiry(&token_with_exp(exp)).expect("expiry");
        assert_eq!(parsed.timestamp(), exp);
    }

    #[test]
    fn malformed_tokens_have_no_expiry() {
        assert!(parse_expiry("not-a-jwt").is_none());
        assert!(parse_expiry("a.b").is_none());
        assert!(parse_expiry("a.!!!.c").is_none());
    }

    #[test]
    fn empty_token_is_unauthenticated_and_injects_nothing() {
        let auth = JwtAuth::new(String::new(), None, None, reqwest::Client::new());
        assert!(!auth.is_authenticated());
        assert!(auth.headers_to_inject().is_empty());
    }

    #[test]
    fn expired_token_is_unauthenticated() {
        let auth = JwtAuth::new(token_with_exp(1_000_000), None, None, reqwest::Client::new());
        assert!(!auth.is_authenticated());
    }

    #[test]
    fn live_token_injects_bearer() {
        let token = token_with_exp(4_000_000_000);
        let auth = JwtAuth::new(token.clone(), None, None, reqwest::Client::new());
        assert!(auth.is_authenticated());
        assert_eq!(
            auth.headers_to_inject(),
            [("Authorization".to_string(), format!("Bearer {token}"))]
        );
    }

    #[test]
    fn rejection_marks_a_live_token_unauthenticated() {
        let auth = JwtAuth::new(
            token_with_exp(4_000_000_000),
            None,
            None,
            reqwest::Client::new(),
        );
        assert!(auth.is_authenticated());
        auth.mark_unauthenticated();
        assert!(!auth.is_authenticated());
    }
}
