//! # Dedup Ledger
//! Durable record of content identifiers that were already downloaded.
//!
//! One record per line, `identifier|timestamp`. Records are appended after a
//! successful download and compacted by [`LedgerStore::prune`], which rewrites
//! the file without expired or malformed lines. Lookups treat the ledger as a
//! set of identifiers; duplicate lines are harmless.

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const FIELD_DELIMITER: char = '|';

/// A single persisted `(identifier, timestamp)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub id: String,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerRecord {
    pub fn new(id: impl Into<String>, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            recorded_at,
        }
    }

    pub fn parse_line(line: &str) -> Result<Self> {
        let line = line.trim();
        let fields: Vec<&str> = line.split(FIELD_DELIMITER).collect();
        if fields.len() != 2 {
            bail!("expected 2 fields, found {}", fields.len());
        }
        let recorded_at = parse_timestamp(fields[1])
            .ok_or_else(|| anyhow!("unparsable timestamp {:?}", fields[1]))?;
        Ok(Self::new(fields[0], recorded_at))
    }

    pub fn to_line(&self) -> String {
        format!(
            "{}{}{}",
            self.id,
            FIELD_DELIMITER,
            self.recorded_at.to_rfc3339()
        )
    }

    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        now.signed_duration_since(self.recorded_at) > retention
    }
}

/// RFC 3339, or a naive ISO-8601 stamp (no offset) read as local time.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Outcome of a prune pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: usize,
    pub expired: usize,
    /// Raw text of every dropped malformed line.
    pub malformed: Vec<String>,
}

/// Storage seam for the ledger so the backing format can change without
/// touching the scanner or executor.
pub trait LedgerStore: Send + Sync {
    fn contains(&self, id: &str) -> Result<bool>;
    fn record(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
    fn prune(&self, now: DateTime<Utc>, retention: chrono::Duration) -> Result<PruneReport>;
}

/// Line-oriented flat file. A missing file is an empty ledger.
#[derive(Debug, Clone)]
pub struct FileLedger {
    path: PathBuf,
}

impl FileLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e).with_context(|| format!("reading ledger {}", self.path.display())),
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LedgerStore for FileLedger {
    fn contains(&self, id: &str) -> Result<bool> {
        let Some(content) = self.read_all()? else {
            return Ok(false);
        };
        Ok(content.lines().any(|line| {
            let mut fields = line.trim().split(FIELD_DELIMITER);
            matches!(
                (fields.next(), fields.next(), fields.next()),
                (Some(first), Some(_), None) if first == id
            )
        }))
    }

    fn record(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger dir {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening ledger {}", self.path.display()))?;
        writeln!(file, "{}", LedgerRecord::new(id, at).to_line())
            .with_context(|| format!("appending to ledger {}", self.path.display()))?;
        Ok(())
    }

    fn prune(&self, now: DateTime<Utc>, retention: chrono::Duration) -> Result<PruneReport> {
        let Some(content) = self.read_all()? else {
            return Ok(PruneReport::default());
        };

        let mut report = PruneReport::default();
        let mut survivors = String::with_capacity(content.len());
        for line in content.lines() {
            match LedgerRecord::parse_line(line) {
                Ok(rec) if rec.is_expired(now, retention) => report.expired += 1,
                Ok(_) => {
                    report.kept += 1;
                    survivors.push_str(line.trim());
                    survivors.push('\n');
                }
                Err(e) => {
                    tracing::warn!(target: "ledger", line = %line.trim(), error = %e, "dropping malformed ledger line");
                    report.malformed.push(line.to_string());
                }
            }
        }

        let tmp = self.tmp_path();
        fs::write(&tmp, survivors)
            .with_context(|| format!("writing ledger snapshot {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("replacing ledger {}", self.path.display()))?;
        Ok(report)
    }
}

/// In-memory ledger, for runs that should not touch the ledger file.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    records: Mutex<Vec<LedgerRecord>>,
}

impl MemoryLedger {
    pub fn with_records(records: Vec<LedgerRecord>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl LedgerStore for MemoryLedger {
    fn contains(&self, id: &str) -> Result<bool> {
        let v = self
            .records
            .lock()
            .map_err(|_| anyhow!("ledger mutex poisoned"))?;
        Ok(v.iter().any(|r| r.id == id))
    }

    fn record(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let mut v = self
            .records
            .lock()
            .map_err(|_| anyhow!("ledger mutex poisoned"))?;
        v.push(LedgerRecord::new(id, at));
        Ok(())
    }

    fn prune(&self, now: DateTime<Utc>, retention: chrono::Duration) -> Result<PruneReport> {
        let mut v = self
            .records
            .lock()
            .map_err(|_| anyhow!("ledger mutex poisoned"))?;
        let before = v.len();
        v.retain(|r| !r.is_expired(now, retention));
        Ok(PruneReport {
            kept: v.len(),
            expired: before - v.len(),
            malformed: Vec::new(),
        })
    }
}
