//! Headless browser discovery and launch
//!
//! Finds a Chrome/Chromium executable (environment override, well-known
//! paths, `which`), falling back to a managed download, then launches it
//! with the argument set the crawler needs and spawns the handler task
//! that drives the CDP websocket.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// User agent presented by browser page visits
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Locate a Chrome/Chromium executable on this machine
pub fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!("using browser from CHROMIUM_PATH: {}", path.display());
            return Ok(path);
        }
        warn!("CHROMIUM_PATH points at a missing file: {}", path.display());
    }

    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            debug!("found browser at {}", path.display());
            return Ok(path);
        }
    }

    for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
        if let Ok(output) = Command::new("which").arg(cmd).output() {
            if output.status.success() {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    debug!("found browser via which: {found}");
                    return Ok(PathBuf::from(found));
                }
            }
        }
    }

    Err(anyhow::anyhow!("no Chrome/Chromium executable found"))
}

/// Download a managed Chromium build into a cache directory
pub async fn download_managed_browser() -> Result<PathBuf> {
    let cache_dir = std::env::temp_dir().join("surfacer_chromium");
    std::fs::create_dir_all(&cache_dir).context("creating browser cache directory")?;

    info!("downloading managed Chromium into {}", cache_dir.display());
    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .context("building fetcher options")?,
    );
    let revision = fetcher.fetch().await.context("fetching browser")?;
    Ok(revision.executable_path)
}

/// Launch one browser instance with an isolated profile directory
///
/// Returns the browser, the CDP handler task, and the profile directory to
/// remove once the browser is gone.
pub async fn launch_browser(headless: bool) -> Result<(Browser, JoinHandle<()>, PathBuf)> {
    let executable = match find_browser_executable() {
        Ok(path) => path,
        Err(_) => download_managed_browser().await?,
    };

    let profile_dir = std::env::temp_dir().join(format!("surfacer_profile_{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&profile_dir).context("creating profile directory")?;

    let mut builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(30))
        .window_size(1366, 900)
        .user_data_dir(profile_dir.clone())
        .chrome_executable(executable);

    builder = if headless {
        builder.headless_mode(HeadlessMode::default())
    } else {
        builder.with_head()
    };

    builder = builder
        .arg(format!("--user-agent={BROWSER_USER_AGENT}"))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-breakpad")
        .arg("--disable-hang-monitor")
        .arg("--disable-prompt-on-repost")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--ignore-certificate-errors")
        .arg("--metrics-recording-only")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--hide-scrollbars")
        .arg("--mute-audio");

    let config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("building browser config: {e}"))?;

    let (browser, mut handler) = Browser::launch(config)
        .await
        .context("launching browser")?;

    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();
                // Chrome emits CDP events chromiumoxide cannot deserialize;
                // those are noise, not failures.
                let benign = message.contains("data did not match any variant")
                    || message.contains("Failed to deserialize WS response");
                if benign {
                    trace!("suppressed benign CDP error: {message}");
                } else {
                    warn!("browser handler error: {message}");
                }
            }
        }
        debug!("browser handler task finished");
    });

    Ok((browser, handler_task, profile_dir))
}
