//! HTTP Basic authentication

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;

use crate::browser::BrowserPool;
use crate::errors::{CrawlError, CrawlResult, ErrorKind};
use crate::model::CookieRecord;

use super::{AuthKind, AuthProvider};

#[derive(Debug)]
pub struct BasicAuth {
    username: String,
    password: String,
    /// Set when the target rejected the credentials; static credentials
    /// cannot refresh themselves, so the flag sticks
    rejected: AtomicBool,
}

impl BasicAuth {
    #[must_use]
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            rejected: AtomicBool::new(false),
        }
    }

    fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }

    fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(raw)
        )
    }
}

#[async_trait]
impl AuthProvider for BasicAuth {
    async fn authenticate(&self, _browser_pool: Option<&Arc<BrowserPool>>) -> CrawlResult<()> {
        if self.has_credentials() {
            Ok(())
        } else {
            Err(CrawlError::new(
                ErrorKind::Auth,
                "",
                "basic-auth",
                "username and password are both empty",
            ))
        }
    }

    fn headers_to_inject(&self) -> Vec<(String, String)> {
        // Still injected after a rejection: only is_authenticated changes
        if !self.has_credentials() {
            return Vec::new();
        }
        vec![("Authorization".to_string(), self.header_value())]
    }

    fn cookies_to_inject(&self) -> Vec<CookieRecord> {
        Vec::new()
    }

    async fn refresh_if_needed(&self) -> bool {
        false
    }

    fn mark_unauthenticated(&self) {
        self.rejected.store(true, Ordering::Relaxed);
    }

    fn is_authenticated(&self) -> bool {
        self.has_credentials() && !self.rejected.load(Ordering::Relaxed)
    }

    fn kind(&self) -> AuthKind {
        AuthKind::Basic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injects_base64_credentials() {
        let auth = BasicAuth::new("admin", "s3cret");
        let headers = auth.headers_to_inject();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, "Authorization");
        // base64("admin:s3cret")
        assert_eq!(headers[0].1, "Basic YWRtaW46czNjcmV0");
    }

    #[test]
    fn empty_credentials_are_unauthenticated() {
        let auth = BasicAuth::new("", "");
        assert!(!auth.is_authenticated());
        assert!(auth.headers_to_inject().is_empty());

        let only_user = BasicAuth::new("admin", "");
        assert!(only_user.is_authenticated());
    }

    #[test]
    fn rejection_marks_unauthenticated_but_keeps_injecting() {
        let auth = BasicAuth::new("admin", "s3cret");
        auth.mark_unauthenticated();
        assert!(!auth.is_authenticated());
        assert_eq!(auth.headers_to_inject().len(), 1);
    }
}
