//! Typesetting through the `katex` command-line tool.
//!
//! Each span runs one `katex` process. The LaTeX goes in on stdin, the HTML
//! comes back on stdout, and every macro in the table is forwarded as a
//! `--macro \name:body` argument so the tool resolves commands itself.
//!
//! Process execution sits behind [`CommandExecutor`] so the argument building
//! and exit-status handling can be tested without KaTeX installed.

use super::{RenderedWidget, Typesetter};
use crate::error::TypesetError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{info, warn};
use notetex_macros::MacroTable;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::sync::Arc;

/// Runs a program with arguments and a stdin payload.
pub trait CommandExecutor: Send + Sync + std::fmt::Debug {
    fn execute(&self, program: &Path, args: &[&str], input: &str) -> Result<Output>;
}

/// [`CommandExecutor`] backed by `std::process::Command`.
#[derive(Debug)]
pub struct RealCommandExecutor;

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, program: &Path, args: &[&str], input: &str) -> Result<Output> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow!("Failed to execute command: {}", e))?;

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(input.as_bytes()) {
                Ok(()) => {}
                // The tool exited without reading everything; its status and
                // stderr say why.
                Err(e) if e.kind() == ErrorKind::BrokenPipe => {}
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(anyhow!("Failed to write command input: {}", e));
                }
            }
        }

        child
            .wait_with_output()
            .map_err(|e| anyhow!("Failed to wait for command: {}", e))
    }
}

#[derive(Debug, Clone)]
pub struct KatexTypesetter {
    path: PathBuf,
    executor: Arc<dyn CommandExecutor>,
}

impl KatexTypesetter {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            executor: Arc::new(RealCommandExecutor),
        }
    }

    pub fn with_executor(path: PathBuf, executor: Arc<dyn CommandExecutor>) -> Self {
        Self { path, executor }
    }

    /// Looks for `katex` on `PATH`.
    pub fn detect() -> Option<Self> {
        match which::which("katex") {
            Ok(path) => {
                info!("Detected katex at {:?}", path);
                Some(Self::new(path))
            }
            Err(_) => {
                warn!("katex not found on PATH");
                None
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn arguments(display_mode: bool, macros: &MacroTable) -> Vec<String> {
        let mut args = Vec::with_capacity(1 + macros.len() * 2);
        if display_mode {
            args.push("--display-mode".to_string());
        }
        for (name, replacement) in macros.iter() {
            args.push("--macro".to_string());
            args.push(format!("{name}:{replacement}"));
        }
        args
    }
}

#[async_trait]
impl Typesetter for KatexTypesetter {
    async fn typeset(
        &self,
        latex: &str,
        display_mode: bool,
        macros: &MacroTable,
    ) -> Result<RenderedWidget, TypesetError> {
        let args = Self::arguments(display_mode, macros);
        let executor = Arc::clone(&self.executor);
        let path = self.path.clone();
        let input = latex.to_string();

        let output = tokio::task::spawn_blocking(move || {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            executor.execute(&path, &args, &input)
        })
        .await
        .map_err(|e| TypesetError::Backend(e.to_string()))?
        .map_err(|e| TypesetError::Backend(format!("{e:#}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let message = if stderr.is_empty() {
                format!("katex exited with {}", output.status)
            } else {
                stderr
            };
            return Err(TypesetError::Rejected(message));
        }

        Ok(RenderedWidget {
            html: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            size: None,
        })
    }

    fn name(&self) -> &'static str {
        "katex"
    }
}

/// Executor that records invocations and replays a fixed output.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockCommandExecutor {
    pub stdout: String,
    pub stderr: String,
    pub status_code: i32,
    pub calls: std::sync::Mutex<Vec<(Vec<String>, String)>>,
}

#[cfg(test)]
impl CommandExecutor for MockCommandExecutor {
    fn execute(&self, _program: &Path, args: &[&str], input: &str) -> Result<Output> {
        self.calls
            .lock()
            .unwrap()
            .push((args.iter().map(|a| a.to_string()).collect(), input.to_string()));

        #[cfg(unix)]
        let status = {
            use std::os::unix::process::ExitStatusExt;
            std::process::ExitStatus::from_raw(self.status_code << 8)
        };
        #[cfg(windows)]
        let status = {
            use std::os::windows::process::ExitStatusExt;
            std::process::ExitStatus::from_raw(self.status_code as u32)
        };

        Ok(Output {
            status,
            stdout: self.stdout.as_bytes().to_vec(),
            stderr: self.stderr.as_bytes().to_vec(),
        })
    }
}
