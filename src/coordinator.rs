//! # Run Coordinator
//! One scheduled run: lock → prune ledger → load interests → scan each feed
//! sequentially → unlock. The lock is released on every path, including
//! errors and panics (the guard releases on drop).

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{InterestConfig, Settings};
use crate::download::{DownloadExecutor, DownloadPolicy};
use crate::feed::{FeedScanner, FeedSource, HttpFeedSource, ScanReport};
use crate::ledger::{FileLedger, LedgerStore, PruneReport};
use crate::lock::RunLock;
use crate::notify::{self, Notifier};
use crate::tools::{SystemTools, ToolRunner};

/// External collaborators, injected so tests can fake them.
#[derive(Clone)]
pub struct Services {
    pub tools: Arc<dyn ToolRunner>,
    pub ledger: Arc<dyn LedgerStore>,
    pub notifier: Arc<dyn Notifier>,
    pub feeds: Arc<dyn FeedSource>,
}

impl Services {
    /// Real processes, the flat-file ledger, Discord (or log) and HTTP feeds.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            tools: Arc::new(SystemTools),
            ledger: Arc::new(FileLedger::new(settings.ledger_path.clone())),
            notifier: notify::from_settings(settings),
            feeds: Arc::new(HttpFeedSource::new()?),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// `None` when pruning itself failed.
    pub prune: Option<PruneReport>,
    pub scans: Vec<ScanReport>,
}

impl RunSummary {
    pub fn dispatched(&self) -> usize {
        self.scans.iter().map(|s| s.dispatched.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.scans
            .iter()
            .flat_map(|s| &s.dispatched)
            .filter(|d| !d.succeeded())
            .count()
    }

    pub fn files_filed(&self) -> usize {
        self.scans
            .iter()
            .flat_map(|s| &s.dispatched)
            .flat_map(|d| &d.files)
            .filter(|f| f.destination().is_some())
            .count()
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    /// Another run holds a fresh lock; nothing was done.
    Skipped,
    Completed(RunSummary),
}

pub struct RunCoordinator {
    settings: Settings,
    services: Services,
}

impl RunCoordinator {
    pub fn new(settings: Settings, services: Services) -> Self {
        Self { settings, services }
    }

    /// Execute one run. Only lock I/O failures and interest-config errors
    /// are returned as errors; everything else ends up in the summary.
    pub async fn run(&self, no_seed: bool) -> Result<RunOutcome> {
        crate::telemetry::describe_metrics();
        metrics::counter!("feedgrab_runs_total").increment(1);
        info!(no_seed, "run starting");

        let Some(lock) =
            RunLock::try_acquire(&self.settings.lock_path, self.settings.max_lock_age())?
        else {
            info!(
                lock = %self.settings.lock_path.display(),
                "another run holds the lock; exiting"
            );
            metrics::counter!("feedgrab_runs_skipped_total").increment(1);
            return Ok(RunOutcome::Skipped);
        };

        let result = self.run_locked(no_seed).await;

        if let Err(e) = lock.release() {
            warn!(error = %format!("{e:#}"), "failed to release lock");
        }
        result.map(RunOutcome::Completed)
    }

    async fn run_locked(&self, no_seed: bool) -> Result<RunSummary> {
        let mut summary = RunSummary {
            prune: self.prune_ledger(),
            ..RunSummary::default()
        };

        let interests = InterestConfig::load_from(&self.settings.interests_path)
            .context("loading interest configuration")?;
        if interests.is_empty() {
            warn!(path = %self.settings.interests_path.display(), "no feeds configured");
        }

        let policy = DownloadPolicy::from_flag(no_seed, self.settings.downloader.seed_time_minutes);
        let executor = DownloadExecutor::new(
            &self.settings,
            policy,
            self.services.tools.clone(),
            self.services.ledger.clone(),
            self.services.notifier.clone(),
        );
        let scanner = FeedScanner::new(
            self.services.feeds.as_ref(),
            self.services.ledger.as_ref(),
            &executor,
        );

        for feed in interests.feeds() {
            let report = scanner.scan(&feed.url, &feed.interests).await;
            summary.scans.push(report);
        }

        info!(
            feeds = summary.scans.len(),
            dispatched = summary.dispatched(),
            failed = summary.failed(),
            files = summary.files_filed(),
            "run finished"
        );
        Ok(summary)
    }

    fn prune_ledger(&self) -> Option<PruneReport> {
        match self
            .services
            .ledger
            .prune(Utc::now(), self.settings.retention())
        {
            Ok(report) => {
                metrics::counter!("feedgrab_ledger_dropped_total")
                    .increment((report.expired + report.malformed.len()) as u64);
                info!(
                    kept = report.kept,
                    expired = report.expired,
                    malformed = report.malformed.len(),
                    "ledger pruned"
                );
                Some(report)
            }
            Err(e) => {
                error!(error = %format!("{e:#}"), "ledger prune failed; continuing");
                None
            }
        }
    }
}
