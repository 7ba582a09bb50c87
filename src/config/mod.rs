//! Configuration types for the crawl engine

pub mod builder;
pub mod types;

pub use builder::CrawlConfigBuilder;
pub use types::CrawlConfig;
