//! feedgrab: cron entrypoint.
//! Loads settings, runs one lock-guarded pass over the configured feeds and
//! exits. A run skipped because of a held lock still exits 0.

use anyhow::{Context, Result};
use clap::Parser;
use feedgrab::telemetry::{self, MetricsTextfile};
use feedgrab::{RunCoordinator, RunOutcome, Services, Settings};
use std::path::PathBuf;
use std::process::ExitCode;

/// Watch feeds, download wanted torrents once, file the results.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Do not seed after a download completes
    #[arg(long)]
    no_seed: bool,

    /// Path to settings file (TOML)
    #[arg(short, long)]
    settings: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    telemetry::init_tracing();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = Settings::load(args.settings.as_deref()).context("loading settings")?;
    tracing::info!(
        download_dir = %settings.download_dir.display(),
        completed_dir = %settings.completed_dir.display(),
        interests = %settings.interests_path.display(),
        webhook = settings.webhook_url.is_some(),
        "settings loaded"
    );

    let textfile = match settings.metrics_textfile.clone() {
        Some(path) => Some(MetricsTextfile::install(path)?),
        None => None,
    };

    let services = Services::from_settings(&settings)?;
    let coordinator = RunCoordinator::new(settings, services);
    let outcome = coordinator.run(args.no_seed).await;

    if let Some(tf) = &textfile {
        if let Err(e) = tf.write() {
            tracing::warn!(error = %format!("{e:#}"), "could not write metrics textfile");
        }
    }

    match outcome? {
        RunOutcome::Skipped => tracing::info!("run skipped: lock held"),
        RunOutcome::Completed(summary) => tracing::info!(
            dispatched = summary.dispatched(),
            failed = summary.failed(),
            "done"
        ),
    }
    Ok(())
}
