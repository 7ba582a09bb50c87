//! Client-side framework detectors
//!
//! Each detector is a value implementing one capability set: detect by
//! signature, wait for framework readiness, extract router routes and
//! framework-rendered links, and produce a route-change script. The
//! registry is built explicitly; there is no global registration.

use chromiumoxide::Page;
use log::debug;

use crate::errors::CrawlResult;

use super::eval::{eval_bool, eval_string_vec};

/// One framework's detection and extraction scripts
pub struct FrameworkDetector {
    pub name: &'static str,
    /// Signature check, returns a boolean
    detect_script: &'static str,
    /// Framework-reported readiness, returns a boolean
    ready_script: &'static str,
    /// Router-registered routes, returns `string[]`
    routes_script: &'static str,
    /// Framework-rendered link hrefs, returns `string[]`
    links_script: &'static str,
    /// Digest/refresh nudge run after hash-route changes, if the framework
    /// needs one
    digest_script: Option<&'static str>,
}

impl FrameworkDetector {
    /// Whether this framework's signature is present on the page
    pub async fn detect(&self, page: &Page) -> bool {
        eval_bool(page, self.detect_script).await.unwrap_or(false)
    }

    /// Whether the framework reports itself ready to render
    pub async fn is_ready(&self, page: &Page) -> bool {
        eval_bool(page, self.ready_script).await.unwrap_or(true)
    }

    /// Routes registered with the framework's router
    pub async fn extract_routes(&self, page: &Page) -> CrawlResult<Vec<String>> {
        eval_string_vec(page, self.routes_script).await
    }

    /// Links the framework rendered into the DOM
    pub async fn extract_links(&self, page: &Page) -> CrawlResult<Vec<String>> {
        eval_string_vec(page, self.links_script).await
    }

    /// Script that navigates the client-side router to `route`
    #[must_use]
    pub fn route_change_script(&self, route: &str) -> String {
        let escaped = route.replace('\\', "\\\\").replace('\'', "\\'");
        format!("window.location.hash = '{escaped}';")
    }

    /// Nudge the framework's change detection after a hash change
    pub async fn nudge_digest(&self, page: &Page) {
        if let Some(script) = self.digest_script {
            if let Err(e) = page.evaluate(script).await {
                debug!("{} digest nudge failed: {e}", self.name);
            }
        }
    }

    /// Whether hash navigation needs a digest nudge (AngularJS 1.x)
    #[must_use]
    pub fn needs_digest_nudge(&self) -> bool {
        self.digest_script.is_some()
    }
}

/// The built-in detector list, most specific frameworks first
///
/// The first matching detector is the page's primary framework; routes and
/// links from every matching detector are merged.
#[must_use]
pub fn detector_registry() -> Vec<FrameworkDetector> {
    vec![
        FrameworkDetector {
            name: "angularjs",
            detect_script: r"
                !!(window.angular && window.angular.version &&
                   window.angular.version.major === 1)
            ",
            ready_script: r"
                (() => {
                    try {
                        const injector = window.angular.element(document.body).injector();
                        return injector.get('$http').pendingRequests.length === 0;
                    } catch (e) { return true; }
                })()
            ",
            routes_script: r"
                (() => {
                    try {
                        const injector = window.angular.element(document.body).injector();
                        const $route = injector.get('$route');
                        return Object.keys($route.routes)
                            .filter(r => r && r !== 'null' && !r.includes(':'));
                    } catch (e) { return []; }
                })()
            ",
            links_script: r#"
                Array.from(document.querySelectorAll('a[ng-href], [ui-sref]'))
                    .map(a => a.getAttribute('href') || a.getAttribute('ng-href') || '')
                    .filter(h => h.length > 0)
            "#,
            digest_script: Some(
                r"
                (() => {
                    try {
                        window.angular.element(document.body)
                            .injector().get('$rootScope').$applyAsync();
                    } catch (e) { /* digest already in progress */ }
                })()
            ",
            ),
        },
        FrameworkDetector {
            name: "angular",
            detect_script: r"
                !!(window.ng || document.querySelector('[ng-version]'))
            ",
            ready_script: r"
                (() => {
                    try {
                        return window.getAllAngularTestabilities()
                            .every(t => t.isStable());
                    } catch (e) { return true; }
                })()
            ",
            routes_script: r"[]",
            links_script: r#"
                Array.from(document.querySelectorAll('a[routerlink], a[routerLink]'))
                    .map(a => a.getAttribute('routerlink') || a.getAttribute('routerLink') || '')
                    .filter(h => h.length > 0)
            "#,
            digest_script: None,
        },
        FrameworkDetector {
            name: "react",
            detect_script: r"
                !!(window.React || window.__REACT_DEVTOOLS_GLOBAL_HOOK__ ||
                   document.querySelector('[data-reactroot]') ||
                   (document.getElementById('root') &&
                    Object.keys(document.getElementById('root'))
                        .some(k => k.startsWith('__reactContainer') ||
                                   k.startsWith('_reactRootContainer'))))
            ",
            ready_script: r"
                (() => {
                    const root = document.getElementById('root') ||
                        document.querySelector('[data-reactroot]');
                    return !root || root.children.length > 0;
                })()
            ",
            routes_script: r"[]",
            links_script: r##"
                Array.from(document.querySelectorAll('a[href^="#/"], a[href^="/"]'))
                    .map(a => a.getAttribute('href'))
                    .filter(h => h && h.length > 1)
            "##,
            digest_script: None,
        },
        FrameworkDetector {
            name: "vue",
            detect_script: r"
                !!(window.Vue || window.__VUE__ || window.__VUE_DEVTOOLS_GLOBAL_HOOK__ ||
                   document.querySelector('[data-v-app]'))
            ",
            ready_script: r"
                (() => {
                    const app = document.getElementById('app') ||
                        document.querySelector('[data-v-app]');
                    return !app || app.children.length > 0;
                })()
            ",
            routes_script: r"
                (() => {
                    try {
                        const app = document.getElementById('app');
                        const vue = app && (app.__vue_app__ || app.__vue__);
                        const router = vue &&
                            (vue.config ? vue.config.globalProperties.$router
                                        : vue.$router);
                        if (!router) return [];
                        return router.getRoutes
                            ? router.getRoutes().map(r => r.path).filter(p => !p.includes(':'))
                            : router.options.routes.map(r => r.path).filter(p => !p.includes(':'));
                    } catch (e) { return []; }
                })()
            ",
            links_script: r##"
                Array.from(document.querySelectorAll('a.router-link, a[href^="#/"]'))
                    .map(a => a.getAttribute('href'))
                    .filter(h => h && h.length > 1)
            "##,
            digest_script: None,
        },
        FrameworkDetector {
            name: "ember",
            detect_script: r"!!window.Ember",
            ready_script: r"
                (() => {
                    try {
                        return !window.Ember.run.hasScheduledTimers();
                    } catch (e) { return true; }
                })()
            ",
            routes_script: r"[]",
            links_script: r#"
                Array.from(document.querySelectorAll('a.ember-view[href]'))
                    .map(a => a.getAttribute('href'))
                    .filter(h => h && h.length > 1)
            "#,
            digest_script: None,
        },
        FrameworkDetector {
            name: "generic-spa",
            detect_script: r#"
                (() => {
                    const mount = document.getElementById('root') ||
                        document.getElementById('app') ||
                        document.querySelector('[data-app]');
                    const bundles = document.querySelectorAll(
                        'script[src*="bundle"], script[src*="chunk"], script[src*="main."]');
                    return !!mount && bundles.length > 0;
                })()
            "#,
            ready_script: r"
                (() => {
                    const mount = document.getElementById('root') ||
                        document.getElementById('app');
                    return !mount || mount.children.length > 0;
                })()
            ",
            routes_script: r"[]",
            links_script: r##"
                Array.from(document.querySelectorAll('a[href^="#/"], a[href^="#!"]'))
                    .map(a => a.getAttribute('href'))
                    .filter(h => h && h.length > 1)
            "##,
            digest_script: None,
        },
    ]
}
