//! Session-cookie authentication
//!
//! Holds a set of cookies keyed by `(name, domain)`; authentication
//! succeeds as soon as at least one cookie is present.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::browser::BrowserPool;
use crate::errors::{CrawlError, CrawlResult, ErrorKind};
use crate::model::CookieRecord;

use super::{AuthKind, AuthProvider};

#[derive(Debug, Default)]
pub struct SessionAuth {
    cookies: RwLock<Vec<CookieRecord>>,
    /// Set when the target rejected the session; cookies cannot refresh
    /// themselves, so the flag sticks until new cookie material arrives
    rejected: AtomicBool,
}

impl SessionAuth {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by `(name, domain)`: a matching cookie is replaced in place
    ///
    /// Fresh cookie material clears an earlier rejection.
    pub fn add_cookie(&self, cookie: CookieRecord) {
        let mut cookies = self.cookies.write();
        match cookies
            .iter_mut()
            .find(|c| c.name == cookie.name && c.domain == cookie.domain)
        {
            Some(existing) => *existing = cookie,
            None => cookies.push(cookie),
        }
        self.rejected.store(false, Ordering::Relaxed);
    }

    /// Defensive copy of the current cookie set
    #[must_use]
    pub fn cookies(&self) -> Vec<CookieRecord> {
        self.cookies.read().clone()
    }
}

#[async_trait]
impl AuthProvider for SessionAuth {
    async fn authenticate(&self, _browser_pool: Option<&Arc<BrowserPool>>) -> CrawlResult<()> {
        if self.cookies.read().is_empty() {
            return Err(CrawlError::new(
                ErrorKind::Auth,
                "",
                "session-auth",
                "no session cookies configured",
            ));
        }
        Ok(())
    }

    fn headers_to_inject(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn cookies_to_inject(&self) -> Vec<CookieRecord> {
        self.cookies()
    }

    async fn refresh_if_needed(&self) -> bool {
        false
    }

    fn mark_unauthenticated(&self) {
        self.rejected.store(true, Ordering::Relaxed);
    }

    fn is_authenticated(&self) -> bool {
        !self.rejected.load(Ordering::Relaxed) && !self.cookies.read().is_empty()
    }

    fn kind(&self) -> AuthKind {
        AuthKind::Session
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie(name: &str, value: &str, domain: &str) -> CookieRecord {
        CookieRecord {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: "/".into(),
        }
    }

    #[test]
    fn add_cookie_upserts_by_name_and_domain() {
        let auth = SessionAuth::new();
        auth.add_cookie(cookie("sid", "one", "example.com"));
        auth.add_cookie(cookie("sid", "two", "example.com"));
        auth.add_cookie(cookie("sid", "other", "other.com"));

        let cookies = auth.cookies();
        assert_eq!(cookies.len(), 2);
        let same_domain = cookies
            .iter()
            .find(|c| c.domain == "example.com")
            .expect("upserted cookie");
        assert_eq!(same_domain.value, "two");
    }

    #[tokio::test]
    async fn authenticated_iff_cookies_present() {
        let auth = SessionAuth::new();
        assert!(!auth.is_authenticated());
        assert!(auth.authenticate(None).await.is_err());

        auth.add_cookie(cookie("sid", "v", "example.com"));
        assert!(auth.is_authenticated());
        assert!(auth.authenticate(None).await.is_ok());
    }

    #[test]
    fn rejection_marks_unauthenticated_until_new_cookie() {
        let auth = SessionAuth::new();
        auth.add_cookie(cookie("sid", "v", "example.com"));
        assert!(auth.is_authenticated());

        auth.mark_unauthenticated();
        assert!(!auth.is_authenticated());
        // Cookies are still injected; only the usable-state claim changes
        assert_eq!(auth.cookies_to_inject().len(), 1);

        auth.add_cookie(cookie("sid", "v2", "example.com"));
        assert!(auth.is_authenticated());
    }

    #[test]
    fn getter_returns_defensive_copy() {
        let auth = SessionAuth::new();
        auth.add_cookie(cookie("sid", "v", "example.com"));
        let mut copy = auth.cookies();
        copy.clear();
        assert_eq!(auth.cookies().len(), 1);
    }
}
