//! Logging and metrics setup.

use anyhow::{Context, Result};
use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const ENV_LOG_JSON: &str = "FEEDGRAB_LOG_JSON";

/// Install the global subscriber. `RUST_LOG` wins over the default filter;
/// `FEEDGRAB_LOG_JSON=1` switches to JSON lines. Safe to call twice.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("feedgrab=info,warn"));
    let json = std::env::var(ENV_LOG_JSON).ok().is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().compact()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// One-time metrics registration.
pub fn describe_metrics() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feedgrab_runs_total", "Runs started.");
        describe_counter!(
            "feedgrab_runs_skipped_total",
            "Runs skipped because another run held the lock."
        );
        describe_counter!("feedgrab_entries_total", "Feed entries examined.");
        describe_counter!("feedgrab_feed_errors_total", "Feed fetch/parse errors.");
        describe_counter!("feedgrab_dispatch_total", "Downloads started.");
        describe_counter!(
            "feedgrab_dispatch_failed_total",
            "Downloads whose downloader exited non-zero or could not start."
        );
        describe_counter!(
            "feedgrab_files_total",
            "Downloaded files filed, by outcome."
        );
        describe_counter!(
            "feedgrab_ledger_dropped_total",
            "Ledger lines dropped by pruning (expired or malformed)."
        );
    });
}

/// Prometheus textfile for node_exporter's textfile collector.
pub struct MetricsTextfile {
    handle: PrometheusHandle,
    path: PathBuf,
}

impl MetricsTextfile {
    /// Installs the global recorder; call once per process.
    pub fn install(path: PathBuf) -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_metrics();
        Ok(Self { handle, path })
    }

    /// Write the current snapshot atomically (temp file + rename).
    pub fn write(&self) -> Result<()> {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, self.handle.render())
            .with_context(|| format!("writing metrics {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing metrics {}", self.path.display()))?;
        Ok(())
    }
}
