// tests/common/mod.rs
#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use feedgrab::feed::FeedEntry;
use feedgrab::tools::{Invocation, ToolOutput, ToolRunner};
use feedgrab::Settings;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub const FEED_URL: &str = "https://feed.test/rss";

/// Scripted stand-in for aria2c and mkvmerge.
/// - aria2c: writes `download_files` into `--dir`, exits with `downloader_exit`.
/// - `mkvmerge -J`: prints `identify_json`, exits with `identify_exit`.
/// - `mkvmerge -o`: writes the output file on success, exits with `remux_exit`.
pub struct FakeTools {
    pub calls: Mutex<Vec<Invocation>>,
    pub downloader_exit: i32,
    pub download_files: Vec<String>,
    pub identify_json: String,
    pub identify_exit: i32,
    pub remux_exit: i32,
}

impl Default for FakeTools {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            downloader_exit: 0,
            download_files: Vec::new(),
            identify_json: r#"{"tracks": []}"#.to_string(),
            identify_exit: 0,
            remux_exit: 0,
        }
    }
}

impl FakeTools {
    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Invocation> {
        self.calls()
            .into_iter()
            .filter(|c| c.program == program)
            .collect()
    }

    pub fn remux_calls(&self) -> Vec<Invocation> {
        self.calls_to("mkvmerge")
            .into_iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("-o"))
            .collect()
    }
}

fn arg_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

#[async_trait]
impl ToolRunner for FakeTools {
    async fn invoke(&self, inv: &Invocation) -> Result<ToolOutput> {
        self.calls.lock().unwrap().push(inv.clone());
        let exit = match inv.program.as_str() {
            "aria2c" => {
                if self.downloader_exit == 0 {
                    let dir = PathBuf::from(arg_after(&inv.args, "--dir").expect("--dir"));
                    for name in &self.download_files {
                        std::fs::write(dir.join(name), b"payload")?;
                    }
                }
                self.downloader_exit
            }
            "mkvmerge" if inv.args.first().map(String::as_str) == Some("-J") => {
                return Ok(ToolOutput {
                    exit_code: Some(self.identify_exit),
                    stdout: self.identify_json.clone(),
                    stderr: String::new(),
                });
            }
            "mkvmerge" => {
                if self.remux_exit == 0 {
                    let out = arg_after(&inv.args, "-o").expect("-o");
                    std::fs::write(out, b"remuxed")?;
                } else {
                    let out = arg_after(&inv.args, "-o").expect("-o");
                    std::fs::write(out, b"partial")?;
                    return Ok(ToolOutput {
                        exit_code: Some(self.remux_exit),
                        stdout: String::new(),
                        stderr: "Error: the file could not be opened".to_string(),
                    });
                }
                self.remux_exit
            }
            other => anyhow::bail!("unexpected program {other}"),
        };
        Ok(ToolOutput {
            exit_code: Some(exit),
            ..ToolOutput::default()
        })
    }
}

/// Settings rooted in `root`, with an interest file for `FEED_URL`.
pub fn settings_in(root: &Path, interests_json: &str) -> Settings {
    let download_dir = root.join("incoming");
    let completed_dir = root.join("completed");
    std::fs::create_dir_all(&download_dir).unwrap();
    let interests_path = root.join("rss.conf");
    std::fs::write(&interests_path, interests_json).unwrap();
    Settings {
        interests_path,
        download_dir,
        completed_dir,
        ledger_path: root.join("downloaded_torrents.db"),
        lock_path: root.join("rss_feed.lock"),
        ..Settings::default()
    }
}

pub fn entry(title: &str, id: Option<&str>) -> FeedEntry {
    FeedEntry {
        title: title.to_string(),
        content_id: id.map(str::to_string),
        source: FEED_URL.to_string(),
    }
}

pub const ENG_SUBS_JSON: &str = r#"{
  "tracks": [
    {"id": 0, "type": "video", "properties": {"language": "und"}},
    {"id": 1, "type": "audio", "properties": {"language": "jpn"}},
    {"id": 2, "type": "subtitles", "properties": {"language": "eng"}}
  ]
}"#;

pub const NO_ENG_SUBS_JSON: &str = r#"{
  "tracks": [
    {"id": 0, "type": "video", "properties": {"language": "und"}},
    {"id": 1, "type": "audio", "properties": {"language": "jpn"}},
    {"id": 2, "type": "subtitles", "properties": {"language": "spa"}}
  ]
}"#;
