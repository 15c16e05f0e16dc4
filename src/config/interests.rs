// src/config/interests.rs
use anyhow::{anyhow, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Interest list for one feed: the title substrings that make an entry wanted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedInterests {
    pub url: String,
    pub interests: Vec<String>,
}

/// Feed URL → interest list, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterestConfig {
    feeds: Vec<FeedInterests>,
}

impl InterestConfig {
    /// Load from an explicit path. JSON by default, TOML for `.toml` files.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading interest config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::parse(&content, ext.as_str())
            .with_context(|| format!("parsing interest config {}", path.display()))
    }

    pub fn parse(s: &str, hint_ext: &str) -> Result<Self> {
        let raw = if hint_ext == "toml" {
            parse_toml(s)?
        } else {
            parse_json(s)?
        };
        let feeds = raw
            .into_iter()
            .map(|(url, items)| FeedInterests {
                url,
                interests: clean_list(items),
            })
            .collect();
        Ok(Self { feeds })
    }

    pub fn feeds(&self) -> &[FeedInterests] {
        &self.feeds
    }

    pub fn is_empty(&self) -> bool {
        self.feeds.is_empty()
    }
}

fn parse_json(s: &str) -> Result<Vec<(String, Vec<String>)>> {
    let map: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(s).context("interest config must be a JSON object")?;
    map.into_iter()
        .map(|(url, v)| {
            let items: Vec<String> = serde_json::from_value(v)
                .map_err(|e| anyhow!("feed {url}: expected a list of strings ({e})"))?;
            Ok((url, items))
        })
        .collect()
}

fn parse_toml(s: &str) -> Result<Vec<(String, Vec<String>)>> {
    let table: toml::Table = toml::from_str(s).context("interest config must be a TOML table")?;
    table
        .into_iter()
        .map(|(url, v)| {
            let items: Vec<String> = v
                .try_into()
                .map_err(|e| anyhow!("feed {url}: expected a list of strings ({e})"))?;
            Ok((url, items))
        })
        .collect()
}

/// Drop blank entries (they would match every title) and repeated ones.
/// Order and exact text are preserved; matching is case-sensitive.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(items.len());
    for it in items {
        if it.trim().is_empty() {
            tracing::warn!("ignoring blank interest entry");
            continue;
        }
        if seen.insert(it.clone()) {
            out.push(it);
        }
    }
    out
}
