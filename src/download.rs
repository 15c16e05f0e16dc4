//! # Download Executor
//! Runs aria2c for one content identifier, records success in the ledger and
//! hands the results to the post-processing pipeline.
//!
//! Per item: `Pending → Downloading → {Failed | Downloaded} → Processed → Notified`.
//! A failed download is never recorded, so the next run retries it.

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::{DownloaderSettings, Settings};
use crate::ledger::LedgerStore;
use crate::notify::Notifier;
use crate::postprocess::{FileOutcome, Pipeline};
use crate::tools::{Invocation, ToolRunner};

/// Seeding behaviour, fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadPolicy {
    pub seed_time_minutes: u32,
}

impl DownloadPolicy {
    pub fn from_flag(no_seed: bool, default_seed_minutes: u32) -> Self {
        Self {
            seed_time_minutes: if no_seed { 0 } else { default_seed_minutes },
        }
    }
}

pub fn magnet_locator(content_id: &str, tracker_url: &str) -> String {
    format!("magnet:?xt=urn:btih:{content_id}&tr={tracker_url}")
}

/// Full aria2c command line for one item.
pub fn downloader_invocation(
    cfg: &DownloaderSettings,
    download_dir: &Path,
    policy: DownloadPolicy,
    content_id: &str,
) -> Invocation {
    Invocation::new(
        cfg.program.clone(),
        vec![
            format!("--listen-port={}", cfg.listen_ports),
            "--bt-prioritize-piece=head,tail".to_string(),
            format!("--bt-max-peers={}", cfg.max_peers),
            format!("--file-allocation={}", cfg.file_allocation),
            format!("--seed-ratio={}", cfg.seed_ratio),
            "--dir".to_string(),
            download_dir.to_string_lossy().into_owned(),
            magnet_locator(content_id, &cfg.tracker_url),
            format!("--seed-time={}", policy.seed_time_minutes),
        ],
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Downloading,
    Failed,
    Downloaded,
    Processed,
    Notified,
}

impl ItemState {
    pub fn can_advance_to(self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Downloading, Failed)
                | (Downloading, Downloaded)
                | (Downloaded, Processed)
                | (Processed, Notified)
        )
    }
}

/// Result of one dispatch.
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub content_id: String,
    pub title: String,
    pub state: ItemState,
    pub files: Vec<FileOutcome>,
    pub error: Option<String>,
}

impl DispatchReport {
    fn new(content_id: &str, title: &str) -> Self {
        Self {
            content_id: content_id.to_string(),
            title: title.to_string(),
            state: ItemState::Pending,
            files: Vec::new(),
            error: None,
        }
    }

    fn advance(&mut self, next: ItemState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "invalid transition {:?} -> {next:?}",
            self.state
        );
        debug!(target: "download", id = %self.content_id, from = ?self.state, to = ?next, "item state");
        self.state = next;
    }

    pub fn succeeded(&self) -> bool {
        self.state == ItemState::Notified
    }
}

pub struct DownloadExecutor {
    downloader: DownloaderSettings,
    download_dir: PathBuf,
    policy: DownloadPolicy,
    tools: Arc<dyn ToolRunner>,
    ledger: Arc<dyn LedgerStore>,
    notifier: Arc<dyn Notifier>,
    pipeline: Pipeline,
}

impl DownloadExecutor {
    pub fn new(
        settings: &Settings,
        policy: DownloadPolicy,
        tools: Arc<dyn ToolRunner>,
        ledger: Arc<dyn LedgerStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let pipeline = Pipeline::new(
            tools.clone(),
            notifier.clone(),
            settings.mkvmerge.clone(),
            settings.completed_dir.clone(),
        );
        Self {
            downloader: settings.downloader.clone(),
            download_dir: settings.download_dir.clone(),
            policy,
            tools,
            ledger,
            notifier,
            pipeline,
        }
    }

    pub fn policy(&self) -> DownloadPolicy {
        self.policy
    }

    /// Download, record, post-process and notify one item. Blocks until the
    /// downloader exits; never returns an error.
    pub async fn dispatch(&self, content_id: &str, title: &str) -> DispatchReport {
        let mut report = DispatchReport::new(content_id, title);
        let invocation =
            downloader_invocation(&self.downloader, &self.download_dir, self.policy, content_id);

        info!(target: "download", %title, id = %content_id, command = %invocation.display(), "starting download");
        self.notifier
            .send(&format!(
                "Started download for {title}\n```{}```",
                invocation.display()
            ))
            .await;
        report.advance(ItemState::Downloading);
        metrics::counter!("feedgrab_dispatch_total").increment(1);

        let failure = match self.tools.invoke(&invocation).await {
            Ok(out) if out.success() => None,
            Ok(out) => Some(format!("downloader exited with {:?}", out.exit_code)),
            Err(e) => Some(format!("{e:#}")),
        };
        if let Some(reason) = failure {
            error!(target: "download", %title, id = %content_id, %reason, "download failed");
            metrics::counter!("feedgrab_dispatch_failed_total").increment(1);
            self.notifier
                .send(&format!("Error downloading {title}"))
                .await;
            report.error = Some(reason);
            report.advance(ItemState::Failed);
            return report;
        }
        report.advance(ItemState::Downloaded);

        if let Err(e) = self.ledger.record(content_id, Utc::now()) {
            let msg = format!("{e:#}");
            error!(target: "download", %title, id = %content_id, error = %msg, "could not record download in ledger");
            self.notifier
                .send(&format!(
                    "Downloaded {title} but could not record it; it may be fetched again: {msg}"
                ))
                .await;
            report.error = Some(msg);
        }

        report.files = self.pipeline.process_dir(&self.download_dir).await;
        report.advance(ItemState::Processed);

        self.notifier
            .send(&format!("Download completed for {title}"))
            .await;
        report.advance(ItemState::Notified);
        info!(target: "download", %title, files = report.files.len(), "download completed");
        report
    }
}
