//! JavaScript payloads injected into visited pages
//!
//! Each payload is an opaque script whose contract is the shape of what it
//! returns over the eval bridge; the typed helpers in [`super::eval`] are
//! the only consumers. Keep the return shapes in sync with those helpers.

/// Installs `window.__pendingRequests`, a live counter of in-flight
/// XHR/fetch calls. Injected before navigation so it sees every request.
pub const NETWORK_MONITOR_SCRIPT: &str = r#"
    (() => {
        if (window.__pendingRequests !== undefined) return;
        window.__pendingRequests = 0;

        const origFetch = window.fetch;
        if (origFetch) {
            window.fetch = function(...args) {
                window.__pendingRequests++;
                return origFetch.apply(this, args).finally(() => {
                    window.__pendingRequests--;
                });
            };
        }

        const origOpen = XMLHttpRequest.prototype.open;
        const origSend = XMLHttpRequest.prototype.send;
        XMLHttpRequest.prototype.open = function(...args) {
            this.__tracked = true;
            return origOpen.apply(this, args);
        };
        XMLHttpRequest.prototype.send = function(...args) {
            if (this.__tracked) {
                window.__pendingRequests++;
                this.addEventListener('loadend', () => {
                    window.__pendingRequests--;
                }, { once: true });
            }
            return origSend.apply(this, args);
        };
    })()
"#;

/// Anti-detection shims applied when stealth mode is on
pub const STEALTH_SHIM_SCRIPT: &str = r#"
    (() => {
        Object.defineProperty(navigator, 'webdriver', {
            get: () => false
        });
        Object.defineProperty(navigator, 'languages', {
            get: () => ['en-US', 'en']
        });
        Object.defineProperty(navigator, 'plugins', {
            get: () => {
                const mock = [
                    { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer' },
                    { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai' },
                    { name: 'Native Client', filename: 'internal-nacl-plugin' }
                ];
                Object.defineProperty(mock, 'length', { value: 3 });
                return mock;
            }
        });
        if (!window.chrome) {
            window.chrome = { runtime: {} };
        }
    })()
"#;

/// Installs `window.__ajaxCapture.requests`, recording every XHR/fetch the
/// page issues after injection as `{method,url,data,type,trigger,timestamp}`.
pub const AJAX_INTERCEPTOR_SCRIPT: &str = r#"
    (() => {
        if (window.__ajaxCapture) return;
        window.__ajaxCapture = { requests: [] };

        const record = (method, url, data, type) => {
            try {
                window.__ajaxCapture.requests.push({
                    method: (method || 'GET').toUpperCase(),
                    url: String(url),
                    data: data == null ? null : String(data).slice(0, 4096),
                    type: type,
                    trigger: document.activeElement ? document.activeElement.tagName : null,
                    timestamp: Date.now()
                });
            } catch (e) { /* capture must never break the page */ }
        };

        const origFetch = window.fetch;
        if (origFetch) {
            window.fetch = function(input, init) {
                const url = typeof input === 'string' ? input : (input && input.url);
                record(init && init.method, url, init && init.body, 'fetch');
                return origFetch.apply(this, arguments);
            };
        }

        const origOpen = XMLHttpRequest.prototype.open;
        const origSend = XMLHttpRequest.prototype.send;
        XMLHttpRequest.prototype.open = function(method, url) {
            this.__captureMethod = method;
            this.__captureUrl = url;
            return origOpen.apply(this, arguments);
        };
        XMLHttpRequest.prototype.send = function(body) {
            record(this.__captureMethod, this.__captureUrl, body, 'xhr');
            return origSend.apply(this, arguments);
        };
    })()
"#;

/// Clicks elements carrying AJAX-ish attributes and scrolls the page so
/// lazy content loads; returns descriptors of what was triggered.
pub const AJAX_TRIGGER_SCRIPT: &str = r#"
    (() => {
        const triggered = [];
        const selector = [
            '[data-ajax]', '[data-remote]', '[data-url]', '[data-load]',
            '[onclick*="ajax"]', '[onclick*="fetch"]', '[onclick*="load"]'
        ].join(', ');

        document.querySelectorAll(selector).forEach(el => {
            try {
                el.click();
                triggered.push({
                    tag: el.tagName.toLowerCase(),
                    id: el.id || null,
                    text: (el.textContent || '').trim().slice(0, 80)
                });
            } catch (e) { /* keep going */ }
        });

        window.scrollTo(0, document.body.scrollHeight);
        window.scrollTo(0, 0);
        return triggered;
    })()
"#;

/// Polls the common client libraries' pending-request counters until they
/// are all zero or `max_ms` elapses. Resolves to the remaining count.
#[must_use]
pub fn ajax_wait_script(max_ms: u64) -> String {
    format!(
        r#"
        new Promise(resolve => {{
            const started = Date.now();
            const pending = () => {{
                let count = window.__pendingRequests || 0;
                if (window.jQuery && window.jQuery.active) count += window.jQuery.active;
                if (window.axios && window.axios.__pending) count += window.axios.__pending;
                try {{
                    const injector = window.angular &&
                        window.angular.element(document.body).injector();
                    if (injector) {{
                        count += injector.get('$http').pendingRequests.length;
                    }}
                }} catch (e) {{ /* not angular */ }}
                return count;
            }};
            const tick = () => {{
                const count = pending();
                if (count === 0 || Date.now() - started > {max_ms}) {{
                    resolve(count);
                }} else {{
                    setTimeout(tick, 100);
                }}
            }};
            tick();
        }})
        "#
    )
}

/// Scans inline and loaded script text for AJAX call sites; returns
/// `{url, method, source, parameters}[]`.
pub const AJAX_ENDPOINT_EXTRACTOR_SCRIPT: &str = r#"
    (() => {
        const found = [];
        const seen = new Set();
        const push = (url, method, source) => {
            if (!url || seen.has(method + ' ' + url)) return;
            seen.add(method + ' ' + url);
            const params = [];
            const q = url.split('?')[1];
            if (q) {
                q.split('&').forEach(pair => {
                    const name = pair.split('=')[0];
                    if (name) params.push(name);
                });
            }
            found.push({ url: url, method: method, source: source, parameters: params });
        };

        const patterns = [
            { re: /\$\.get\(\s*['"]([^'"]+)['"]/g, method: 'GET', source: 'jquery' },
            { re: /\$\.post\(\s*['"]([^'"]+)['"]/g, method: 'POST', source: 'jquery' },
            { re: /\$\.ajax\(\s*\{[^}]*url\s*:\s*['"]([^'"]+)['"]/g, method: 'GET', source: 'jquery' },
            { re: /fetch\(\s*['"]([^'"]+)['"]/g, method: 'GET', source: 'fetch' },
            { re: /axios\.get\(\s*['"]([^'"]+)['"]/g, method: 'GET', source: 'axios' },
            { re: /axios\.post\(\s*['"]([^'"]+)['"]/g, method: 'POST', source: 'axios' },
            { re: /\$http\.get\(\s*['"]([^'"]+)['"]/g, method: 'GET', source: 'angular' },
            { re: /\$http\.post\(\s*['"]([^'"]+)['"]/g, method: 'POST', source: 'angular' }
        ];

        document.querySelectorAll('script:not([src])').forEach(script => {
            const text = script.textContent || '';
            patterns.forEach(p => {
                let m;
                while ((m = p.re.exec(text)) !== null) {
                    push(m[1], p.method, p.source);
                }
            });
        });
        return found;
    })()
"#;

/// Finds forms wired to AJAX submission (no action, data attributes,
/// onsubmit handlers); returns
/// `{id, name, action, method, submitType, inputs, callbackURL}[]`.
pub const AJAX_FORM_EXTRACTOR_SCRIPT: &str = r#"
    (() => {
        const results = [];
        document.querySelectorAll('form').forEach(form => {
            const onsubmit = form.getAttribute('onsubmit') || '';
            const isAjax = !form.getAttribute('action')
                || form.hasAttribute('data-remote')
                || form.hasAttribute('data-ajax')
                || onsubmit.includes('ajax')
                || onsubmit.includes('fetch')
                || onsubmit.includes('return false');
            if (!isAjax) return;

            const inputs = [];
            form.querySelectorAll('input[name], textarea[name], select[name]').forEach(input => {
                inputs.push({
                    name: input.getAttribute('name'),
                    type: input.getAttribute('type') || input.tagName.toLowerCase()
                });
            });

            let callbackURL = null;
            const urlMatch = onsubmit.match(/['"]((?:https?:)?\/[^'"]*)['"]/);
            if (urlMatch) callbackURL = urlMatch[1];

            results.push({
                id: form.id || null,
                name: form.getAttribute('name'),
                action: form.getAttribute('action'),
                method: (form.getAttribute('method') || 'GET').toUpperCase(),
                submitType: onsubmit ? 'handler' : 'script',
                inputs: inputs,
                callbackURL: callbackURL
            });
        });
        return results;
    })()
"#;

/// Returns normalized visible text plus a structural outline, the input to
/// the content fingerprint.
pub const CONTENT_HASH_SCRIPT: &str = r#"
    (() => {
        const clone = document.body ? document.body.cloneNode(true) : null;
        if (!clone) return '';
        clone.querySelectorAll('script, style, noscript, svg, iframe').forEach(el => el.remove());
        const text = (clone.textContent || '')
            .replace(/\s+/g, ' ')
            .trim()
            .slice(0, 5000);

        const outline = [];
        document.querySelectorAll('h1, h2, h3, a[href], img[src], form').forEach(el => {
            const tag = el.tagName.toLowerCase();
            const head = (el.textContent || el.getAttribute('src') || el.getAttribute('href') || '')
                .trim()
                .slice(0, 20);
            outline.push(tag + ':' + head);
        });

        return text + '||' + outline.join('|');
    })()
"#;

/// Heuristic soft-error check over body text and DOM; returns
/// `{isError: bool, reason: string}`.
pub const SOFT_ERROR_SCRIPT: &str = r#"
    (() => {
        const text = (document.body ? document.body.innerText : '').toLowerCase();
        const patterns = [
            'page not found', '404', 'not found', 'access denied',
            'forbidden', 'something went wrong', 'an error occurred',
            'server error', 'oops'
        ];
        // Short pages dominated by an error phrase are the signal; long
        // pages mentioning "404" in prose are not.
        if (text.length < 2000) {
            for (const p of patterns) {
                if (text.includes(p)) {
                    return { isError: true, reason: 'text match: ' + p };
                }
            }
        }
        const selectors = ['.error-page', '.not-found', '.page-404'];
        for (const sel of selectors) {
            const el = document.querySelector(sel);
            if (el && el.offsetHeight > 0) {
                return { isError: true, reason: 'selector match: ' + sel };
            }
        }
        const generic = document.querySelector('[class*="error"]');
        if (generic && generic.offsetHeight > 200) {
            return { isError: true, reason: 'large error container' };
        }
        return { isError: false, reason: '' };
    })()
"#;

/// Walks open shadow roots collecting links and forms the light DOM
/// extractors cannot see; returns `{type: 'link'|'form', value}[]`.
pub const SHADOW_DOM_SCRIPT: &str = r#"
    (() => {
        const findings = [];
        const walk = (root) => {
            root.querySelectorAll('*').forEach(el => {
                if (el.shadowRoot) {
                    el.shadowRoot.querySelectorAll('a[href]').forEach(a => {
                        findings.push({ type: 'link', value: a.href });
                    });
                    el.shadowRoot.querySelectorAll('form').forEach(f => {
                        findings.push({ type: 'form', value: f.getAttribute('action') || '' });
                    });
                    walk(el.shadowRoot);
                }
            });
        };
        walk(document);
        return findings;
    })()
"#;

/// Readiness probe: spinner visibility, content selectors, body text length
/// and the pending-request counter in one round trip. Returns
/// `{spinnerVisible, contentReady, textLength, pending}`.
#[must_use]
pub fn readiness_probe_script(spinner_selectors: &[String], content_selectors: &[String]) -> String {
    let spinners = serde_json::to_string(spinner_selectors).unwrap_or_else(|_| "[]".to_string());
    let contents = serde_json::to_string(content_selectors).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"
        (() => {{
            const visible = el => el && el.offsetParent !== null && el.offsetHeight > 0;
            const spinners = {spinners};
            const contents = {contents};

            let spinnerVisible = false;
            for (const sel of spinners) {{
                const el = document.querySelector(sel);
                if (visible(el)) {{ spinnerVisible = true; break; }}
            }}

            let contentReady = contents.length === 0;
            for (const sel of contents) {{
                const el = document.querySelector(sel);
                if (el && (el.textContent || '').trim().length > 10) {{
                    contentReady = true;
                    break;
                }}
            }}

            const textLength = document.body
                ? (document.body.innerText || '').trim().length
                : 0;

            return {{
                spinnerVisible: spinnerVisible,
                contentReady: contentReady,
                textLength: textLength,
                pending: window.__pendingRequests || 0
            }};
        }})()
        "#
    )
}
