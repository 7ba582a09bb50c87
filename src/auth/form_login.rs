//! Form-based login driven through a pooled browser
//!
//! Navigates the login page, locates the credential fields (configured
//! selectors first, common fallbacks second), fills and submits them, then
//! harvests the session cookies. Success is judged heuristically: the
//! final URL left the login page, no error banner is visible, and at
//! least one cookie was set.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::Page;
use log::{debug, info, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::browser::eval::eval_typed;
use crate::browser::BrowserPool;
use crate::errors::{classify_browser, CrawlError, CrawlResult, ErrorKind};
use crate::model::CookieRecord;

use super::{AuthKind, AuthProvider};

/// Login page location, credentials and selector hints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormLoginConfig {
    pub login_url: String,
    pub username: String,
    pub password: String,
    /// CSS selector for the username field; name-based fallbacks otherwise
    pub username_field: Option<String>,
    pub password_field: Option<String>,
    /// CSS selector for the submit control; first submit button otherwise
    pub submit_button: Option<String>,
    /// How long a harvested session is trusted before re-login
    #[serde(default = "default_session_lifetime_secs")]
    pub session_lifetime_secs: u64,
}

fn default_session_lifetime_secs() -> u64 {
    1800
}

#[derive(Debug, Default)]
struct FormLoginState {
    cookies: Vec<CookieRecord>,
    last_login: Option<Instant>,
    /// The target rejected the session or a re-login failed; the next
    /// successful login clears it
    invalidated: bool,
}

#[derive(Debug, Deserialize)]
struct FillOutcome {
    filled: bool,
    submitted: bool,
    reason: String,
}

pub struct FormLoginAuth {
    config: FormLoginConfig,
    state: RwLock<FormLoginState>,
    /// Pool captured on first authenticate so refresh can re-login
    pool: RwLock<Option<Arc<BrowserPool>>>,
}

impl FormLoginAuth {
    #[must_use]
    pub fn new(config: FormLoginConfig) -> Self {
        Self {
            config,
            state: RwLock::new(FormLoginState::default()),
            pool: RwLock::new(None),
        }
    }

    fn fill_script(&self) -> String {
        let username_selectors = selector_cascade(
            self.config.username_field.as_deref(),
            &[
                "input[name=\"username\"]",
                "input[type=\"email\"]",
                "input#username",
                "input[name=\"email\"]",
                "input#email",
                "input[name=\"login\"]",
            ],
        );
        let password_selectors = selector_cascade(
            self.config.password_field.as_deref(),
            &["input[name=\"password\"]", "input[type=\"password\"]", "input#password"],
        );
        let submit_selectors = selector_cascade(
            self.config.submit_button.as_deref(),
            &["button[type=\"submit\"]", "input[type=\"submit\"]", "form button"],
        );

        format!(
            r#"
            (() => {{
                const firstMatch = (selectors) => {{
                    for (const sel of selectors) {{
                        const el = document.querySelector(sel);
                        if (el) return el;
                    }}
                    return null;
                }};
                const setValue = (el, value) => {{
                    el.focus();
                    el.value = value;
                    el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                    el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                }};

                const user = firstMatch({user_sels});
                const pass = firstMatch({pass_sels});
                if (!user) return {{ filled: false, submitted: false, reason: 'no username field' }};
                if (!pass) return {{ filled: false, submitted: false, reason: 'no password field' }};

                setValue(user, {username});
                setValue(pass, {password});

                const submit = firstMatch({submit_sels});
                if (submit) {{
                    submit.click();
                    return {{ filled: true, submitted: true, reason: 'clicked submit' }};
                }}
                const form = pass.closest('form');
                if (form) {{
                    form.requestSubmit ? form.requestSubmit() : form.submit();
                    return {{ filled: true, submitted: true, reason: 'form submit' }};
                }}
                pass.dispatchEvent(new KeyboardEvent('keydown', {{
                    key: 'Enter', code: 'Enter', bubbles: true
                }}));
                return {{ filled: true, submitted: true, reason: 'enter key' }};
            }})()
            "#,
            user_sels = json_array(&username_selectors),
            pass_sels = json_array(&password_selectors),
            submit_sels = json_array(&submit_selectors),
            username = json_string(&self.config.username),
            password = json_string(&self.config.password),
        )
    }

    async fn login(&self, pool: &Arc<BrowserPool>) -> CrawlResult<()> {
        let guard = pool.acquire().await?;
        let page = guard
            .browser()
            .new_page("about:blank")
            .await
            .map_err(|e| classify_browser(e.to_string(), &self.config.login_url, "form-login"))?;

        let result = self.login_on_page(&page).await;

        if let Err(e) = page.close().await {
            debug!("closing login page: {e}");
        }
        result
    }

    async fn login_on_page(&self, page: &Page) -> CrawlResult<()> {
        let login_url = &self.config.login_url;

        page.goto(login_url.as_str())
            .await
            .map_err(|e| classify_browser(e.to_string(), login_url, "form-login"))?;
        let _ = page.wait_for_navigation().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let outcome: FillOutcome = eval_typed(page, &self.fill_script(), "form-login-fill").await?;
        if !outcome.filled || !outcome.submitted {
            return Err(CrawlError::new(
                ErrorKind::Auth,
                login_url,
                "form-login",
                format!("could not submit login form: {}", outcome.reason),
            ));
        }
        debug!("login form submitted via {}", outcome.reason);

        let _ = page.wait_for_navigation().await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| login_url.clone());

        let error_visible: bool = eval_typed(
            page,
            r#"
            (() => {
                const sel = '.error, .alert-danger, .login-error, [class*="error-message"]';
                const el = document.querySelector(sel);
                return !!el && el.offsetHeight > 0 && (el.textContent || '').trim().length > 0;
            })()
            "#,
            "form-login-error-check",
        )
        .await
        .unwrap_or(false);

        let cookies = page
            .get_cookies()
            .await
            .map_err(|e| classify_browser(e.to_string(), login_url, "form-login-cookies"))?
            .into_iter()
            .map(|c| CookieRecord {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
            })
            .collect::<Vec<_>>();

        let lowered = final_url.to_lowercase();
        let still_on_login = lowered.contains("login") || lowered.contains("signin");
        if still_on_login || error_visible || cookies.is_empty() {
            return Err(CrawlError::new(
                ErrorKind::Auth,
                login_url,
                "form-login",
                format!(
                    "login did not stick (final URL {final_url}, error banner {error_visible}, {} cookies)",
                    cookies.len()
                ),
            ));
        }

        info!("form login succeeded, {} cookies captured", cookies.len());
        let mut state = self.state.write();
        state.cookies = cookies;
        state.last_login = Some(Instant::now());
        state.invalidated = false;
        Ok(())
    }

    fn session_expired(&self) -> bool {
        let state = self.state.read();
        match state.last_login {
            Some(at) => at.elapsed() > Duration::from_secs(self.config.session_lifetime_secs),
            None => true,
        }
    }
}

fn selector_cascade(configured: Option<&str>, fallbacks: &[&str]) -> Vec<String> {
    let mut selectors = Vec::with_capacity(fallbacks.len() + 1);
    if let Some(sel) = configured {
        if !sel.is_empty() {
            selectors.push(sel.to_string());
        }
    }
    selectors.extend(fallbacks.iter().map(|s| (*s).to_string()));
    selectors
}

fn json_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn json_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[async_trait]
impl AuthProvider for FormLoginAuth {
    async fn authenticate(&self, browser_pool: Option<&Arc<BrowserPool>>) -> CrawlResult<()> {
        let pool = browser_pool.ok_or_else(|| {
            CrawlError::new(
                ErrorKind::Auth,
                &self.config.login_url,
                "form-login",
                "form login requires a browser pool",
            )
        })?;
        *self.pool.write() = Some(Arc::clone(pool));
        self.login(pool).await
    }

    fn headers_to_inject(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn cookies_to_inject(&self) -> Vec<CookieRecord> {
        self.state.read().cookies.clone()
    }

    async fn refresh_if_needed(&self) -> bool {
        let stale = self.session_expired() || self.state.read().invalidated;
        if !stale {
            return false;
        }
        self.force_refresh().await
    }

    async fn force_refresh(&self) -> bool {
        let pool = self.pool.read().clone();
        let Some(pool) = pool else {
            return false;
        };
        match self.login(&pool).await {
            Ok(()) => true,
            Err(e) => {
                warn!("form re-login failed: {}", e.message);
                let mut state = self.state.write();
                state.cookies.clear();
                state.invalidated = true;
                false
            }
        }
    }

    fn mark_unauthenticated(&self) {
        self.state.write().invalidated = true;
    }

    fn is_authenticated(&self) -> bool {
        {
            let state = self.state.read();
            if state.invalidated || state.cookies.is_empty() {
                return false;
            }
        }
        // Separate acquisition: session_expired takes the lock itself
        !self.session_expired()
    }

    fn kind(&self) -> AuthKind {
        AuthKind::FormLogin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> FormLoginConfig {
        FormLoginConfig {
            login_url: "https://example.com/login".into(),
            username: "user".into(),
            password: "pass".into(),
            username_field: Some("#login-user".into()),
            password_field: None,
            submit_button: None,
            session_lifetime_secs: 1800,
        }
    }

    #[test]
    fn configured_selector_leads_the_cascade() {
        let auth = FormLoginAuth::new(config());
        let script = auth.fill_script();
        let user_pos = script.find("#login-user").expect("configured selector present");
        let fallback_pos = script
            .find("input[type=\\\"email\\\"]")
            .or_else(|| script.find("input[type=\"email\"]"))
            .expect("fallback selector present");
        assert!(user_pos < fallback_pos);
    }

    #[test]
    fn credentials_are_json_escaped() {
        let mut cfg = config();
        cfg.password = "pa'ss\"word".into();
        let auth = FormLoginAuth::new(cfg);
        let script = auth.fill_script();
        assert!(script.contains(r#""pa'ss\"word""#));
    }

    #[test]
    fn unauthenticated_until_login_runs() {
        let auth = FormLoginAuth::new(config());
        assert!(!auth.is_authenticated());
        assert!(auth.cookies_to_inject().is_empty());
    }
}
