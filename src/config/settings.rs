// src/config/settings.rs
//! Runtime settings: directories, state files, webhook and external tool tuning.
//!
//! TOML shape (every key optional, defaults shown):
//! ```toml
//! interests_path = "conf/rss.conf"
//! download_dir = ""
//! completed_dir = ""
//! ledger_path = "downloaded_torrents.db"
//! lock_path = "rss_feed.lock"
//! max_lock_age_secs = 3600
//! retention_days = 180
//! webhook_url = "https://discord.com/api/webhooks/..."
//!
//! [downloader]
//! program = "aria2c"
//! seed_time_minutes = 15
//!
//! [mkvmerge]
//! program = "mkvmerge"
//! subtitle_language = "eng"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

// --- env defaults & names ---
pub const DEFAULT_SETTINGS_PATH: &str = "conf/feedgrab.toml";
pub const DEFAULT_INTERESTS_PATH: &str = "conf/rss.conf";
pub const DEFAULT_LEDGER_PATH: &str = "downloaded_torrents.db";
pub const DEFAULT_LOCK_PATH: &str = "rss_feed.lock";
pub const DEFAULT_MAX_LOCK_AGE_SECS: u64 = 3600;
pub const DEFAULT_RETENTION_DAYS: i64 = 180;
pub const DEFAULT_TRACKER_URL: &str = "http://nyaa.tracker.wf:7777/announce";

pub const ENV_SETTINGS_PATH: &str = "FEEDGRAB_SETTINGS";
pub const ENV_WEBHOOK_URL: &str = "FEEDGRAB_WEBHOOK_URL";
pub const ENV_DOWNLOAD_DIR: &str = "FEEDGRAB_DOWNLOAD_DIR";
pub const ENV_COMPLETED_DIR: &str = "FEEDGRAB_COMPLETED_DIR";
pub const ENV_INTERESTS_PATH: &str = "FEEDGRAB_INTERESTS";

/// Everything a run needs to know, built once at process entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub interests_path: PathBuf,
    pub download_dir: PathBuf,
    pub completed_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub lock_path: PathBuf,
    pub max_lock_age_secs: u64,
    pub retention_days: i64,
    pub webhook_url: Option<String>,
    pub webhook_timeout_secs: u64,
    /// Prometheus textfile written at the end of each run.
    pub metrics_textfile: Option<PathBuf>,
    pub downloader: DownloaderSettings,
    pub mkvmerge: MkvmergeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interests_path: PathBuf::from(DEFAULT_INTERESTS_PATH),
            download_dir: PathBuf::new(),
            completed_dir: PathBuf::new(),
            ledger_path: PathBuf::from(DEFAULT_LEDGER_PATH),
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            max_lock_age_secs: DEFAULT_MAX_LOCK_AGE_SECS,
            retention_days: DEFAULT_RETENTION_DAYS,
            webhook_url: None,
            webhook_timeout_secs: 10,
            metrics_textfile: None,
            downloader: DownloaderSettings::default(),
            mkvmerge: MkvmergeSettings::default(),
        }
    }
}

/// aria2c command-line tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DownloaderSettings {
    pub program: String,
    pub tracker_url: String,
    pub listen_ports: String,
    pub max_peers: u32,
    pub file_allocation: String,
    pub seed_ratio: f64,
    /// Seed time (minutes) used unless the run was started with `--no-seed`.
    pub seed_time_minutes: u32,
}

impl Default for DownloaderSettings {
    fn default() -> Self {
        Self {
            program: "aria2c".to_string(),
            tracker_url: DEFAULT_TRACKER_URL.to_string(),
            listen_ports: "60000-65535".to_string(),
            max_peers: 1024,
            file_allocation: "falloc".to_string(),
            seed_ratio: 15.0,
            seed_time_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MkvmergeSettings {
    pub program: String,
    pub subtitle_language: String,
    pub audio_tracks: String,
}

impl Default for MkvmergeSettings {
    fn default() -> Self {
        Self {
            program: "mkvmerge".to_string(),
            subtitle_language: "eng".to_string(),
            audio_tracks: "1".to_string(),
        }
    }
}

impl Settings {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        Self::parse(&data).with_context(|| format!("parsing settings {}", path.display()))
    }

    pub fn parse(s: &str) -> Result<Self> {
        let cfg: Settings = toml::from_str(s)?;
        Ok(cfg)
    }

    /// Resolve settings in order:
    /// 1) explicit path (must exist)
    /// 2) $FEEDGRAB_SETTINGS (must exist)
    /// 3) conf/feedgrab.toml, or built-in defaults when absent
    ///
    /// Env overrides are applied afterwards, then the result is validated.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = if let Some(p) = explicit {
            Self::load_from_file(p)?
        } else if let Ok(p) = env::var(ENV_SETTINGS_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_SETTINGS_PATH} points to non-existent path {}", pb.display());
            }
            Self::load_from_file(&pb)?
        } else {
            let default = PathBuf::from(DEFAULT_SETTINGS_PATH);
            if default.exists() {
                Self::load_from_file(&default)?
            } else {
                Settings::default()
            }
        };
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var(ENV_WEBHOOK_URL) {
            self.webhook_url = Some(v);
        }
        if let Ok(v) = env::var(ENV_DOWNLOAD_DIR) {
            self.download_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var(ENV_COMPLETED_DIR) {
            self.completed_dir = PathBuf::from(v);
        }
        if let Ok(v) = env::var(ENV_INTERESTS_PATH) {
            self.interests_path = PathBuf::from(v);
        }
        // Blank webhook means disabled.
        if self
            .webhook_url
            .as_deref()
            .is_some_and(|u| u.trim().is_empty())
        {
            self.webhook_url = None;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.download_dir.as_os_str().is_empty() {
            bail!("download_dir is not configured (set it in settings or {ENV_DOWNLOAD_DIR})");
        }
        if self.completed_dir.as_os_str().is_empty() {
            bail!("completed_dir is not configured (set it in settings or {ENV_COMPLETED_DIR})");
        }
        if self.download_dir == self.completed_dir {
            bail!("download_dir and completed_dir must differ");
        }
        if self.retention_days < 0 {
            bail!("retention_days must not be negative");
        }
        if chrono::Duration::try_days(self.retention_days).is_none() {
            bail!("retention_days {} is out of range", self.retention_days);
        }
        Ok(())
    }

    pub fn max_lock_age(&self) -> Duration {
        Duration::from_secs(self.max_lock_age_secs)
    }

    /// Saturates at the largest representable duration; `validate` rejects
    /// values that would need it.
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::try_days(self.retention_days).unwrap_or(chrono::Duration::MAX)
    }
}
