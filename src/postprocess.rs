//! # Post-Processing Pipeline
//! Files finished downloads into the completed directory.
//!
//! Per file: inspect with `mkvmerge -J`, pick subtitle tracks in the wanted
//! language, remux (audio track 1 + those subtitles) into the completed dir
//! under a cleaned name. Without eligible subtitles, or when the remux fails,
//! the original file is moved there instead. Nothing here aborts the run.

use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

use crate::config::MkvmergeSettings;
use crate::notify::Notifier;
use crate::tools::{Invocation, ToolRunner};

/// Drop a `v2` release marker that directly follows two digits
/// (`"Show - 05v2.mkv"` → `"Show - 05.mkv"`), case-insensitively.
pub fn clean_filename(name: &str) -> String {
    static RE_V2: OnceCell<Regex> = OnceCell::new();
    let re = RE_V2.get_or_init(|| Regex::new(r"(?i)(\d{2})v2").expect("valid v2 regex"));
    re.replace_all(name, "$1").into_owned()
}

/// [`clean_filename`] for a path component. Names that are not valid UTF-8
/// are kept byte for byte.
pub fn clean_file_name(name: &OsStr) -> OsString {
    match name.to_str() {
        Some(s) => OsString::from(clean_filename(s)),
        None => name.to_os_string(),
    }
}

/// One track as reported by `mkvmerge -J`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TrackInfo {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: TrackProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TrackProperties {
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Identification {
    #[serde(default)]
    tracks: Vec<TrackInfo>,
}

/// Parse `mkvmerge -J` output into track id → track.
pub fn parse_identification(json: &str) -> Result<BTreeMap<u64, TrackInfo>> {
    let ident: Identification =
        serde_json::from_str(json).context("parsing mkvmerge identification JSON")?;
    Ok(ident.tracks.into_iter().map(|t| (t.id, t)).collect())
}

/// Ids of subtitle tracks tagged with `language`, ascending.
pub fn select_subtitle_tracks(tracks: &BTreeMap<u64, TrackInfo>, language: &str) -> Vec<u64> {
    tracks
        .values()
        .filter(|t| t.kind == "subtitles" && t.properties.language.as_deref() == Some(language))
        .map(|t| t.id)
        .collect()
}

/// What happened to one downloaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Remuxed into `output`; the source was deleted.
    Remuxed { source: PathBuf, output: PathBuf },
    /// Remux failed; the untouched source was moved to `dest`.
    MuxFailedMoved { source: PathBuf, dest: PathBuf },
    /// No eligible subtitle track; the source was moved to `dest`.
    Moved { source: PathBuf, dest: PathBuf },
    /// The file could not be filed at all.
    Failed { source: PathBuf, error: String },
}

impl FileOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FileOutcome::Remuxed { .. } => "remuxed",
            FileOutcome::MuxFailedMoved { .. } => "mux_failed_moved",
            FileOutcome::Moved { .. } => "moved",
            FileOutcome::Failed { .. } => "failed",
        }
    }

    /// Where the file ended up, if it was filed.
    pub fn destination(&self) -> Option<&Path> {
        match self {
            FileOutcome::Remuxed { output, .. } => Some(output),
            FileOutcome::MuxFailedMoved { dest, .. } | FileOutcome::Moved { dest, .. } => {
                Some(dest)
            }
            FileOutcome::Failed { .. } => None,
        }
    }
}

pub struct Pipeline {
    tools: Arc<dyn ToolRunner>,
    notifier: Arc<dyn Notifier>,
    mkvmerge: MkvmergeSettings,
    completed_dir: PathBuf,
}

impl Pipeline {
    pub fn new(
        tools: Arc<dyn ToolRunner>,
        notifier: Arc<dyn Notifier>,
        mkvmerge: MkvmergeSettings,
        completed_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tools,
            notifier,
            mkvmerge,
            completed_dir: completed_dir.into(),
        }
    }

    /// Process every regular file directly inside `dir`, in name order.
    pub async fn process_dir(&self, dir: &Path) -> Vec<FileOutcome> {
        let files = match list_regular_files(dir).await {
            Ok(f) => f,
            Err(e) => {
                warn!(target: "postprocess", dir = %dir.display(), error = %format!("{e:#}"), "cannot list download dir");
                return Vec::new();
            }
        };
        let mut out = Vec::with_capacity(files.len());
        for f in files {
            let outcome = self.process_file(&f).await;
            metrics::counter!("feedgrab_files_total", "outcome" => outcome.label()).increment(1);
            out.push(outcome);
        }
        out
    }

    pub async fn process_file(&self, source: &Path) -> FileOutcome {
        let raw_name = source.file_name().unwrap_or_default();
        let name = raw_name.to_string_lossy().into_owned();
        let dest = self.completed_dir.join(clean_file_name(raw_name));

        if let Err(e) = fs::create_dir_all(&self.completed_dir).await {
            return self
                .fail(source, format!("creating {}: {e}", self.completed_dir.display()))
                .await;
        }

        let subtitle_ids = match self.eligible_subtitle_tracks(source).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(target: "postprocess", file = %name, error = %format!("{e:#}"), "track inspection failed; filing as is");
                Vec::new()
            }
        };

        if subtitle_ids.is_empty() {
            info!(target: "postprocess", file = %name, "no eligible subtitle track; moving file as is");
            return match move_file(source, &dest).await {
                Ok(()) => FileOutcome::Moved {
                    source: source.to_path_buf(),
                    dest,
                },
                Err(e) => self.fail(source, format!("{e:#}")).await,
            };
        }

        let remux = self.remux_invocation(source, &dest, &subtitle_ids);
        let failure = match self.tools.invoke(&remux).await {
            Ok(out) if out.success() => {
                if let Err(e) = fs::remove_file(source).await {
                    warn!(target: "postprocess", file = %name, error = %e, "remuxed but could not delete source");
                }
                info!(target: "postprocess", file = %name, output = %dest.display(), "muxing successful");
                return FileOutcome::Remuxed {
                    source: source.to_path_buf(),
                    output: dest,
                };
            }
            Ok(out) => format!("exit code {:?}\n{}", out.exit_code, out.combined()),
            Err(e) => format!("{e:#}"),
        };

        warn!(target: "postprocess", file = %name, "muxing failed; moving the original file");
        self.notifier
            .send(&format!("Muxing failed for {name}; filing the original file"))
            .await;
        self.notifier.send_code_block(&failure).await;

        if let Err(e) = fs::remove_file(&dest).await {
            if e.kind() != ErrorKind::NotFound {
                warn!(target: "postprocess", output = %dest.display(), error = %e, "could not remove partial remux output");
            }
        }
        match move_file(source, &dest).await {
            Ok(()) => FileOutcome::MuxFailedMoved {
                source: source.to_path_buf(),
                dest,
            },
            Err(e) => self.fail(source, format!("{e:#}")).await,
        }
    }

    async fn eligible_subtitle_tracks(&self, source: &Path) -> Result<Vec<u64>> {
        let inspect = Invocation::new(
            self.mkvmerge.program.clone(),
            vec!["-J".to_string(), source.to_string_lossy().into_owned()],
        )
        .captured();
        let out = self.tools.invoke(&inspect).await?;
        if !out.success() {
            anyhow::bail!("mkvmerge -J exited with {:?}: {}", out.exit_code, out.combined());
        }
        let tracks = parse_identification(&out.stdout)?;
        Ok(select_subtitle_tracks(
            &tracks,
            &self.mkvmerge.subtitle_language,
        ))
    }

    fn remux_invocation(&self, source: &Path, dest: &Path, subtitle_ids: &[u64]) -> Invocation {
        let ids = subtitle_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Invocation::new(
            self.mkvmerge.program.clone(),
            vec![
                "-o".to_string(),
                dest.to_string_lossy().into_owned(),
                "--audio-tracks".to_string(),
                self.mkvmerge.audio_tracks.clone(),
                "--subtitle-tracks".to_string(),
                ids,
                source.to_string_lossy().into_owned(),
            ],
        )
        .captured()
    }

    async fn fail(&self, source: &Path, error: String) -> FileOutcome {
        tracing::error!(target: "postprocess", file = %source.display(), %error, "could not file download");
        self.notifier
            .send(&format!(
                "Could not file {}: {error}",
                source.display()
            ))
            .await;
        FileOutcome::Failed {
            source: source.to_path_buf(),
            error,
        }
    }
}

/// Regular files (symlinks followed) directly inside `dir`, sorted by name.
pub async fn list_regular_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut rd = fs::read_dir(dir)
        .await
        .with_context(|| format!("reading {}", dir.display()))?;
    let mut files = Vec::new();
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Rename, falling back to copy + delete when crossing filesystems.
async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if let Err(rename_err) = fs::rename(from, to).await {
        fs::copy(from, to).await.with_context(|| {
            format!(
                "moving {} to {} (rename: {rename_err})",
                from.display(),
                to.display()
            )
        })?;
        fs::remove_file(from)
            .await
            .with_context(|| format!("removing {} after copy", from.display()))?;
    }
    info!(target: "postprocess", from = %from.display(), to = %to.display(), "filed");
    Ok(())
}
