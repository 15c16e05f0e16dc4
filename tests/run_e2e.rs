// tests/run_e2e.rs
mod common;

use chrono::Utc;
use common::*;
use feedgrab::download::ItemState;
use feedgrab::feed::StaticFeedSource;
use feedgrab::ledger::{FileLedger, LedgerRecord, LedgerStore, MemoryLedger};
use feedgrab::postprocess::FileOutcome;
use feedgrab::{MemoryNotifier, RunCoordinator, RunOutcome, RunSummary, Services, Settings};
use std::sync::Arc;

const INTERESTS: &str = r#"{"https://feed.test/rss": ["Interest Show"]}"#;

struct Harness {
    _dir: tempfile::TempDir,
    settings: Settings,
    tools: Arc<FakeTools>,
    notifier: Arc<MemoryNotifier>,
    ledger: Arc<FileLedger>,
}

impl Harness {
    fn new(tools: FakeTools) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(dir.path(), INTERESTS);
        let ledger = Arc::new(FileLedger::new(settings.ledger_path.clone()));
        Self {
            _dir: dir,
            settings,
            tools: Arc::new(tools),
            notifier: Arc::new(MemoryNotifier::new()),
            ledger,
        }
    }

    async fn run_with(&self, feeds: StaticFeedSource, no_seed: bool) -> anyhow::Result<RunOutcome> {
        let services = Services {
            tools: self.tools.clone(),
            ledger: self.ledger.clone(),
            notifier: self.notifier.clone(),
            feeds: Arc::new(feeds),
        };
        RunCoordinator::new(self.settings.clone(), services)
            .run(no_seed)
            .await
    }

    fn messages(&self) -> Vec<String> {
        self.notifier.messages()
    }
}

fn one_entry_feed() -> StaticFeedSource {
    StaticFeedSource::new().with_entries(FEED_URL, vec![entry("Interest Show - 05", Some("abc123"))])
}

fn completed(outcome: RunOutcome) -> RunSummary {
    match outcome {
        RunOutcome::Completed(s) => s,
        RunOutcome::Skipped => panic!("run unexpectedly skipped"),
    }
}

#[tokio::test]
async fn matching_entry_is_downloaded_once_and_recorded() {
    let h = Harness::new(FakeTools::default());
    let summary = completed(h.run_with(one_entry_feed(), false).await.unwrap());

    assert_eq!(summary.dispatched(), 1);
    assert_eq!(summary.failed(), 0);
    assert_eq!(h.tools.calls_to("aria2c").len(), 1);
    assert!(h.ledger.contains("abc123").unwrap());

    let msgs = h.messages();
    assert!(msgs[0].starts_with("Started download for Interest Show - 05"));
    assert!(msgs[0].contains("--seed-time=15"));
    assert_eq!(msgs.last().unwrap(), "Download completed for Interest Show - 05");
    assert!(!h.settings.lock_path.exists(), "lock must be released");
}

#[tokio::test]
async fn seen_identifier_is_not_dispatched_again() {
    let h = Harness::new(FakeTools::default());
    h.ledger.record("abc123", Utc::now()).unwrap();

    let summary = completed(h.run_with(one_entry_feed(), false).await.unwrap());
    assert_eq!(summary.dispatched(), 0);
    assert_eq!(summary.scans[0].already_seen, 1);
    assert!(h.tools.calls().is_empty());
    assert!(h.messages().is_empty());
}

#[tokio::test]
async fn second_run_does_not_repeat_a_download() {
    let h = Harness::new(FakeTools::default());
    completed(h.run_with(one_entry_feed(), false).await.unwrap());
    completed(h.run_with(one_entry_feed(), false).await.unwrap());
    assert_eq!(h.tools.calls_to("aria2c").len(), 1);
}

#[tokio::test]
async fn failed_download_is_not_recorded_or_processed() {
    let h = Harness::new(FakeTools {
        downloader_exit: 1,
        download_files: vec!["Interest Show - 05.mkv".into()],
        ..FakeTools::default()
    });
    let summary = completed(h.run_with(one_entry_feed(), true).await.unwrap());

    let report = &summary.scans[0].dispatched[0];
    assert_eq!(report.state, ItemState::Failed);
    assert!(report.files.is_empty());
    assert_eq!(summary.failed(), 1);
    assert!(!h.ledger.contains("abc123").unwrap());
    assert!(h.tools.calls_to("mkvmerge").is_empty());
    assert!(h
        .messages()
        .contains(&"Error downloading Interest Show - 05".to_string()));
    assert!(h.messages()[0].contains("--seed-time=0"));
}

#[tokio::test]
async fn file_without_english_subtitles_is_moved_without_remux() {
    let h = Harness::new(FakeTools {
        download_files: vec!["Interest Show - 05v2.mkv".into()],
        identify_json: NO_ENG_SUBS_JSON.into(),
        ..FakeTools::default()
    });
    let summary = completed(h.run_with(one_entry_feed(), false).await.unwrap());

    let dest = h.settings.completed_dir.join("Interest Show - 05.mkv");
    assert!(dest.exists());
    assert!(!h.settings.download_dir.join("Interest Show - 05v2.mkv").exists());
    assert!(h.tools.remux_calls().is_empty());
    assert!(matches!(
        &summary.scans[0].dispatched[0].files[0],
        FileOutcome::Moved { dest: d, .. } if *d == dest
    ));
    assert_eq!(summary.files_filed(), 1);
}

#[tokio::test]
async fn english_subtitles_trigger_remux_and_source_cleanup() {
    let h = Harness::new(FakeTools {
        download_files: vec!["Interest Show - 05.mkv".into()],
        identify_json: ENG_SUBS_JSON.into(),
        ..FakeTools::default()
    });
    let summary = completed(h.run_with(one_entry_feed(), false).await.unwrap());

    let remux = h.tools.remux_calls();
    assert_eq!(remux.len(), 1);
    let args = &remux[0].args;
    let dest = h.settings.completed_dir.join("Interest Show - 05.mkv");
    assert_eq!(args[1], dest.to_string_lossy());
    assert_eq!(&args[2..6], ["--audio-tracks", "1", "--subtitle-tracks", "2"]);

    assert_eq!(std::fs::read(&dest).unwrap(), b"remuxed");
    assert!(!h.settings.download_dir.join("Interest Show - 05.mkv").exists());
    assert!(matches!(
        summary.scans[0].dispatched[0].files[0],
        FileOutcome::Remuxed { .. }
    ));
}

#[tokio::test]
async fn mux_failure_still_files_the_original() {
    let h = Harness::new(FakeTools {
        download_files: vec!["Interest Show - 05.mkv".into()],
        identify_json: ENG_SUBS_JSON.into(),
        remux_exit: 2,
        ..FakeTools::default()
    });
    let summary = completed(h.run_with(one_entry_feed(), false).await.unwrap());

    let dest = h.settings.completed_dir.join("Interest Show - 05.mkv");
    assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    let report = &summary.scans[0].dispatched[0];
    assert!(matches!(report.files[0], FileOutcome::MuxFailedMoved { .. }));
    assert!(report.succeeded());

    let msgs = h.messages();
    assert!(msgs.iter().any(|m| m.starts_with("Muxing failed for Interest Show - 05.mkv")));
    assert!(msgs
        .iter()
        .any(|m| m.starts_with("```") && m.contains("could not be opened")));
}

#[tokio::test]
async fn inspection_failure_fails_open_to_move() {
    let h = Harness::new(FakeTools {
        download_files: vec!["Interest Show - 05.mkv".into()],
        identify_json: "not json".into(),
        identify_exit: 2,
        ..FakeTools::default()
    });
    let summary = completed(h.run_with(one_entry_feed(), false).await.unwrap());
    assert!(matches!(
        summary.scans[0].dispatched[0].files[0],
        FileOutcome::Moved { .. }
    ));
    assert!(h.tools.remux_calls().is_empty());
}

#[tokio::test]
async fn recap_and_unwanted_entries_are_never_dispatched() {
    let h = Harness::new(FakeTools::default());
    let feeds = StaticFeedSource::new().with_entries(
        FEED_URL,
        vec![
            entry("Interest Show - 05.5", Some("recap")),
            entry("Other Show - 05", Some("other")),
            entry("Interest Show - 06", None),
            entry("interest show - 07", Some("lower")),
        ],
    );
    let summary = completed(h.run_with(feeds, false).await.unwrap());
    let scan = &summary.scans[0];
    assert_eq!(scan.entries, 4);
    assert_eq!(scan.skipped_recap, 1);
    assert_eq!(scan.unmatched, 2);
    assert_eq!(scan.missing_id, 1);
    assert!(h.tools.calls().is_empty());
}

#[tokio::test]
async fn entries_are_dispatched_in_feed_order() {
    let h = Harness::new(FakeTools::default());
    let feeds = StaticFeedSource::new().with_entries(
        FEED_URL,
        vec![
            entry("Interest Show - 07", Some("h7")),
            entry("Interest Show - 06", Some("h6")),
        ],
    );
    completed(h.run_with(feeds, false).await.unwrap());
    let locators: Vec<String> = h
        .tools
        .calls_to("aria2c")
        .iter()
        .map(|c| c.args[7].clone())
        .collect();
    assert!(locators[0].contains("btih:h7"));
    assert!(locators[1].contains("btih:h6"));
}

#[tokio::test]
async fn held_lock_skips_the_run() {
    let h = Harness::new(FakeTools::default());
    std::fs::write(&h.settings.lock_path, "locked").unwrap();

    let outcome = h.run_with(one_entry_feed(), false).await.unwrap();
    assert!(matches!(outcome, RunOutcome::Skipped));
    assert!(h.tools.calls().is_empty());
    assert!(h.settings.lock_path.exists(), "foreign lock must be left alone");
}

#[tokio::test]
async fn feed_errors_do_not_abort_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(
        dir.path(),
        r#"{"https://broken.test/rss": ["Interest Show"], "https://feed.test/rss": ["Interest Show"]}"#,
    );
    let tools = Arc::new(FakeTools::default());
    let services = Services {
        tools: tools.clone(),
        ledger: Arc::new(FileLedger::new(settings.ledger_path.clone())),
        notifier: Arc::new(MemoryNotifier::new()),
        feeds: Arc::new(one_entry_feed()),
    };
    let summary = completed(
        RunCoordinator::new(settings, services)
            .run(false)
            .await
            .unwrap(),
    );
    assert_eq!(summary.scans.len(), 2);
    assert!(summary.scans[0].error.is_some());
    assert_eq!(summary.scans[1].dispatched.len(), 1);
}

#[tokio::test]
async fn missing_interest_config_is_fatal_but_releases_lock() {
    let h = Harness::new(FakeTools::default());
    std::fs::remove_file(&h.settings.interests_path).unwrap();

    let err = h.run_with(one_entry_feed(), false).await.unwrap_err();
    assert!(format!("{err:#}").contains("interest configuration"));
    assert!(!h.settings.lock_path.exists());
}

#[tokio::test]
async fn run_prunes_expired_ledger_records_first() {
    let h = Harness::new(FakeTools::default());
    std::fs::write(
        &h.settings.ledger_path,
        "abc123|2000-01-01T00:00:00+00:00\ngarbage line\n",
    )
    .unwrap();

    let summary = completed(h.run_with(one_entry_feed(), false).await.unwrap());
    let prune = summary.prune.as_ref().unwrap();
    assert_eq!(prune.expired, 1);
    assert_eq!(prune.malformed.len(), 1);
    // The expired record no longer blocks a fresh download.
    assert_eq!(summary.dispatched(), 1);
}

#[tokio::test]
async fn in_memory_ledger_short_circuits_seen_ids_and_records_new_ones() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings_in(dir.path(), INTERESTS);
    let tools = Arc::new(FakeTools::default());
    let ledger = Arc::new(MemoryLedger::with_records(vec![
        LedgerRecord::new("seen1", Utc::now()),
        LedgerRecord::new("ancient", Utc::now() - chrono::Duration::days(400)),
    ]));
    let services = Services {
        tools: tools.clone(),
        ledger: ledger.clone(),
        notifier: Arc::new(MemoryNotifier::new()),
        feeds: Arc::new(StaticFeedSource::new().with_entries(
            FEED_URL,
            vec![
                entry("Interest Show - 04", Some("seen1")),
                entry("Interest Show - 05", Some("fresh")),
            ],
        )),
    };

    let summary = completed(
        RunCoordinator::new(settings.clone(), services)
            .run(false)
            .await
            .unwrap(),
    );
    assert_eq!(summary.prune.as_ref().unwrap().expired, 1);
    assert_eq!(summary.scans[0].already_seen, 1);
    assert_eq!(summary.dispatched(), 1);
    assert_eq!(tools.calls_to("aria2c").len(), 1);
    assert!(ledger.contains("fresh").unwrap());
    assert!(!ledger.contains("ancient").unwrap());
    assert!(!settings.ledger_path.exists(), "ledger file is never touched");
}
