//! # Run Lock
//! File marker guaranteeing at most one live run.
//!
//! A marker younger than `max_age` blocks new runs; an older one is stale and
//! may be seized. Fresh markers are created with `create_new`, so two runs
//! racing on an empty slot cannot both win.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_LOCK_AGE: Duration = Duration::from_secs(3600);

/// Try to take the lock at `path`. Returns false when a non-stale marker exists.
pub fn acquire(path: &Path, max_age: Duration) -> Result<bool> {
    acquire_at(path, max_age, SystemTime::now())
}

/// Same as [`acquire`], with an explicit clock for the staleness check.
pub fn acquire_at(path: &Path, max_age: Duration, now: SystemTime) -> Result<bool> {
    match create_marker(path) {
        Ok(()) => return Ok(true),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
        Err(e) => {
            return Err(e).with_context(|| format!("creating lock {}", path.display()));
        }
    }

    let age = match marker_age(path, now) {
        Ok(age) => age,
        // Released between our create attempt and the stat.
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return match create_marker(path) {
                Ok(()) => Ok(true),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                Err(e) => Err(e).with_context(|| format!("creating lock {}", path.display())),
            };
        }
        Err(e) => return Err(e).with_context(|| format!("reading lock {}", path.display())),
    };

    if age <= max_age {
        debug!(target: "lock", path = %path.display(), age_secs = age.as_secs(), "lock held");
        return Ok(false);
    }

    warn!(
        target: "lock",
        path = %path.display(),
        age_secs = age.as_secs(),
        max_age_secs = max_age.as_secs(),
        "seizing stale lock"
    );
    fs::write(path, marker_contents())
        .with_context(|| format!("overwriting stale lock {}", path.display()))?;
    Ok(true)
}

/// Remove the marker. A missing marker is not an error.
pub fn release(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing lock {}", path.display())),
    }
}

fn create_marker(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
    f.write_all(marker_contents().as_bytes())
}

fn marker_contents() -> String {
    format!(
        "locked pid={} at={}\n",
        std::process::id(),
        Utc::now().to_rfc3339()
    )
}

/// Markers with a future mtime count as brand new.
fn marker_age(path: &Path, now: SystemTime) -> std::io::Result<Duration> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(now.duration_since(modified).unwrap_or(Duration::ZERO))
}

/// Scoped lock: released on drop unless released explicitly first.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    held: bool,
}

impl RunLock {
    /// `Ok(None)` means another run holds a fresh lock.
    pub fn try_acquire(path: impl Into<PathBuf>, max_age: Duration) -> Result<Option<Self>> {
        let path = path.into();
        if !acquire(&path, max_age)? {
            return Ok(None);
        }
        info!(target: "lock", path = %path.display(), "lock acquired");
        Ok(Some(Self { path, held: true }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn release(mut self) -> Result<()> {
        self.held = false;
        release(&self.path)?;
        info!(target: "lock", path = %self.path.display(), "lock released");
        Ok(())
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = release(&self.path) {
            warn!(target: "lock", error = %format!("{e:#}"), "failed to release lock on drop");
        }
    }
}
