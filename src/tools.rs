//! External tool seam. Everything that shells out (aria2c, mkvmerge) goes
//! through [`ToolRunner`], so tests can script exit codes and output.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;

/// A program plus arguments. Uncaptured invocations inherit stdout/stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub capture_output: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            capture_output: false,
        }
    }

    pub fn captured(mut self) -> Self {
        self.capture_output = true;
        self
    }

    /// Shell-like rendering for logs and notifications.
    pub fn display(&self) -> String {
        let mut out = self.program.clone();
        for a in &self.args {
            out.push(' ');
            if a.is_empty() || a.contains(char::is_whitespace) {
                out.push_str(&format!("{a:?}"));
            } else {
                out.push_str(a);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{out}\n{err}"),
        }
    }
}

#[async_trait]
pub trait ToolRunner: Send + Sync {
    /// Run to completion. `Err` only when the process could not be started;
    /// a non-zero exit is reported through [`ToolOutput::exit_code`].
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput>;
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTools;

#[async_trait]
impl ToolRunner for SystemTools {
    async fn invoke(&self, invocation: &Invocation) -> Result<ToolOutput> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args).stdin(Stdio::null());

        if invocation.capture_output {
            let out = cmd
                .output()
                .await
                .with_context(|| format!("spawning {}", invocation.program))?;
            Ok(ToolOutput {
                exit_code: out.status.code(),
                stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            })
        } else {
            let status = cmd
                .status()
                .await
                .with_context(|| format!("spawning {}", invocation.program))?;
            Ok(ToolOutput {
                exit_code: status.code(),
                ..ToolOutput::default()
            })
        }
    }
}
