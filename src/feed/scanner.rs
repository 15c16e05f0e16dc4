// src/feed/scanner.rs
//! Feed Scanner: picks wanted, unseen entries out of a feed and dispatches
//! them one at a time, in feed order.

use metrics::counter;

use super::{FeedEntry, FeedSource};
use crate::download::{DispatchReport, DownloadExecutor};
use crate::ledger::LedgerStore;

/// Half-numbered episodes (recaps, specials): the title's last
/// whitespace-delimited token contains ".5".
pub fn is_recap_title(title: &str) -> bool {
    title
        .split_whitespace()
        .next_back()
        .is_some_and(|last| last.contains(".5"))
}

/// First interest that occurs in `title` (case-sensitive substring).
pub fn matching_interest<'a>(title: &str, interests: &'a [String]) -> Option<&'a str> {
    interests
        .iter()
        .find(|want| title.contains(want.as_str()))
        .map(String::as_str)
}

/// What a scan of one feed did.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub feed_url: String,
    pub entries: usize,
    pub skipped_recap: usize,
    pub skipped_untitled: usize,
    pub unmatched: usize,
    pub missing_id: usize,
    pub already_seen: usize,
    pub ledger_errors: usize,
    pub dispatched: Vec<DispatchReport>,
    /// Set when the feed could not be fetched or parsed.
    pub error: Option<String>,
}

impl ScanReport {
    fn new(feed_url: &str) -> Self {
        Self {
            feed_url: feed_url.to_string(),
            ..Self::default()
        }
    }
}

enum Verdict<'a> {
    Untitled,
    Recap,
    Unmatched,
    MissingId,
    Candidate(&'a str),
}

fn classify<'e>(entry: &'e FeedEntry, interests: &[String]) -> Verdict<'e> {
    if entry.title.trim().is_empty() {
        return Verdict::Untitled;
    }
    if is_recap_title(&entry.title) {
        return Verdict::Recap;
    }
    if matching_interest(&entry.title, interests).is_none() {
        return Verdict::Unmatched;
    }
    match entry.content_id.as_deref() {
        Some(id) => Verdict::Candidate(id),
        None => Verdict::MissingId,
    }
}

pub struct FeedScanner<'a> {
    source: &'a dyn FeedSource,
    ledger: &'a dyn LedgerStore,
    executor: &'a DownloadExecutor,
}

impl<'a> FeedScanner<'a> {
    pub fn new(
        source: &'a dyn FeedSource,
        ledger: &'a dyn LedgerStore,
        executor: &'a DownloadExecutor,
    ) -> Self {
        Self {
            source,
            ledger,
            executor,
        }
    }

    /// Scan one feed. Fetch errors are reported in the result, never raised.
    pub async fn scan(&self, feed_url: &str, interests: &[String]) -> ScanReport {
        let mut report = ScanReport::new(feed_url);

        let entries = match self.source.fetch(feed_url).await {
            Ok(v) => v,
            Err(e) => {
                let msg = format!("{e:#}");
                tracing::warn!(target: "feed", feed = %feed_url, error = %msg, "feed fetch failed");
                counter!("feedgrab_feed_errors_total").increment(1);
                report.error = Some(msg);
                return report;
            }
        };
        report.entries = entries.len();
        counter!("feedgrab_entries_total").increment(entries.len() as u64);

        for entry in &entries {
            let id = match classify(entry, interests) {
                Verdict::Untitled => {
                    report.skipped_untitled += 1;
                    continue;
                }
                Verdict::Recap => {
                    tracing::debug!(target: "feed", title = %entry.title, "skipping recap episode");
                    report.skipped_recap += 1;
                    continue;
                }
                Verdict::Unmatched => {
                    report.unmatched += 1;
                    continue;
                }
                Verdict::MissingId => {
                    tracing::debug!(target: "feed", title = %entry.title, "wanted entry has no info hash");
                    report.missing_id += 1;
                    continue;
                }
                Verdict::Candidate(id) => id,
            };

            match self.ledger.contains(id) {
                Ok(true) => {
                    tracing::debug!(target: "feed", title = %entry.title, %id, "already downloaded");
                    report.already_seen += 1;
                }
                Ok(false) => {
                    tracing::info!(target: "feed", title = %entry.title, %id, no_seed = self.executor.policy().seed_time_minutes == 0, "dispatching download");
                    let dispatched = self.executor.dispatch(id, &entry.title).await;
                    report.dispatched.push(dispatched);
                }
                // Unknown ledger state: skip rather than risk a duplicate download.
                Err(e) => {
                    tracing::error!(target: "feed", %id, error = %format!("{e:#}"), "ledger lookup failed; skipping entry");
                    report.ledger_errors += 1;
                }
            }
        }

        tracing::info!(
            target: "feed",
            feed = %feed_url,
            entries = report.entries,
            dispatched = report.dispatched.len(),
            already_seen = report.already_seen,
            recap = report.skipped_recap,
            "feed scanned"
        );
        report
    }
}
