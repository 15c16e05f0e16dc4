// src/feed/mod.rs
pub mod rss;
pub mod scanner;

use anyhow::Result;
use async_trait::async_trait;

pub use rss::{parse_feed, HttpFeedSource, StaticFeedSource};
pub use scanner::{is_recap_title, matching_interest, FeedScanner, ScanReport};

/// One syndicated item, produced per poll and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    /// Torrent info-hash, when the feed publishes one.
    pub content_id: Option<String>,
    pub source: String,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch and parse `url` into entries, in feed order.
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>>;
}
