//! Thin crawl runner: seeds from argv, events to stdout
//!
//! The real surface for embedding is the library; this binary exists to
//! point the engine at a target and watch the event stream.

use anyhow::{bail, Result};
use tracing_subscriber::EnvFilter;

use surfacer::{CrawlConfig, CrawlEngine, CrawlEvent};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let seeds: Vec<String> = std::env::args().skip(1).collect();
    if seeds.is_empty() {
        bail!("usage: surfacer <seed-url> [more-seed-urls...]");
    }

    let config = CrawlConfig::builder().seeds(seeds).build()?;
    let engine = CrawlEngine::new(config).await?;

    let mut events = engine.events().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                CrawlEvent::PageVisited(result) => {
                    println!(
                        "page   {} [{}] {} links, {} forms",
                        result.final_url,
                        result.status,
                        result.links.len(),
                        result.forms.len()
                    );
                }
                CrawlEvent::EndpointDiscovered(endpoint) => {
                    println!("api    {} {}", endpoint.method, endpoint.url);
                }
                CrawlEvent::FormDiscovered { form, page_url } => {
                    println!("form   {} {} (on {page_url})", form.method, form.action);
                }
                CrawlEvent::WebSocketDiscovered { url, .. } => {
                    println!("ws     {url}");
                }
                CrawlEvent::AuthRefreshed(kind) => {
                    println!("auth   refreshed ({kind:?})");
                }
                CrawlEvent::Error { url, kind, .. } => {
                    println!("error  {url} ({})", kind.as_str());
                }
                CrawlEvent::CrawlComplete(stats) => {
                    println!(
                        "done   {} pages, {} endpoints, {} errors in {:.1}s",
                        stats.pages_visited,
                        stats.endpoints_discovered,
                        stats.errors,
                        stats.duration.as_secs_f64()
                    );
                    break;
                }
            }
        }
    });

    let ctrl_c_engine = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_engine.cancellation().cancel();
        }
    });

    engine.run().await?;
    let _ = printer.await;
    Ok(())
}
