// src/feed/rss.rs
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;
use std::time::Duration;

use super::{FeedEntry, FeedSource};

/// Identifier elements, in priority order (compared lowercased).
pub const IDENTIFIER_FIELDS: [&str; 2] = ["nyaa:infohash", "erai:infohash"];

#[derive(Debug, Default)]
struct RawItem {
    title: Option<String>,
    ids: [Option<String>; 2],
}

impl RawItem {
    fn set(&mut self, field: &str, value: &str) {
        if field == "title" {
            if self.title.is_none() {
                self.title = Some(value.to_string());
            }
            return;
        }
        if let Some(i) = IDENTIFIER_FIELDS.iter().position(|f| *f == field) {
            self.ids[i] = Some(value.to_string());
        }
    }

    fn into_entry(self, source: &str) -> FeedEntry {
        let content_id = self
            .ids
            .into_iter()
            .flatten()
            .find(|id| !id.is_empty());
        FeedEntry {
            title: self.title.unwrap_or_default(),
            content_id,
            source: source.to_string(),
        }
    }
}

fn lower_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn is_item(name: &str) -> bool {
    name == "item" || name == "entry"
}

/// Parse RSS `<item>`s (or Atom `<entry>`s) into entries, keeping feed order.
pub fn parse_feed(xml: &str, source: &str) -> Result<Vec<FeedEntry>> {
    let mut reader = Reader::from_str(xml);
    let mut entries = Vec::new();
    let mut current: Option<RawItem> = None;
    let mut field: Option<String> = None;
    let mut text = String::new();

    loop {
        match reader.read_event().context("parsing feed xml")? {
            Event::Start(e) => {
                let name = lower_name(e.name().as_ref());
                if is_item(&name) {
                    current = Some(RawItem::default());
                } else if current.is_some() {
                    field = Some(name);
                    text.clear();
                }
            }
            Event::Text(t) => {
                if field.is_some() {
                    match t.unescape() {
                        Ok(s) => text.push_str(&s),
                        // Unknown entities (HTML ones like &nbsp;) keep their raw text.
                        Err(e) => {
                            let raw = String::from_utf8_lossy(&t);
                            tracing::warn!(target: "feed", %source, error = %e, raw = %raw, "undecodable feed text; keeping it raw");
                            text.push_str(&raw);
                        }
                    }
                }
            }
            Event::CData(c) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(&c.into_inner()));
                }
            }
            Event::End(e) => {
                let name = lower_name(e.name().as_ref());
                if is_item(&name) {
                    if let Some(item) = current.take() {
                        entries.push(item.into_entry(source));
                    }
                    field = None;
                } else if let (Some(item), Some(f)) = (current.as_mut(), field.as_deref()) {
                    if f == name {
                        item.set(f, text.trim());
                        field = None;
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    tracing::debug!(target: "feed", %source, entries = entries.len(), "parsed feed");
    Ok(entries)
}

/// Fetches feeds over HTTP.
pub struct HttpFeedSource {
    client: reqwest::Client,
}

impl HttpFeedSource {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("feedgrab/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building feed http client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        let body = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("feed http get {url}"))?
            .error_for_status()
            .with_context(|| format!("feed http status {url}"))?
            .text()
            .await
            .with_context(|| format!("feed http body {url}"))?;
        parse_feed(&body, url)
    }
}

/// Serves canned XML or entries per URL (tests, offline runs).
#[derive(Debug, Default)]
pub struct StaticFeedSource {
    feeds: HashMap<String, Fixture>,
}

#[derive(Debug)]
enum Fixture {
    Xml(String),
    Entries(Vec<FeedEntry>),
}

impl StaticFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_xml(mut self, url: &str, xml: &str) -> Self {
        self.feeds.insert(url.to_string(), Fixture::Xml(xml.to_string()));
        self
    }

    pub fn with_entries(mut self, url: &str, entries: Vec<FeedEntry>) -> Self {
        self.feeds
            .insert(url.to_string(), Fixture::Entries(entries));
        self
    }
}

#[async_trait]
impl FeedSource for StaticFeedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedEntry>> {
        match self.feeds.get(url) {
            Some(Fixture::Xml(xml)) => parse_feed(xml, url),
            Some(Fixture::Entries(entries)) => Ok(entries.clone()),
            None => Err(anyhow!("no fixture for feed {url}")),
        }
    }
}
