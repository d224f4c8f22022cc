//! Environment abstraction for file and command operations.
//!
//! Built-in tools never touch `std::fs` directly; they go through this
//! trait so production uses the local filesystem and tests use an
//! in-memory one.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Match result from a grep operation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GrepMatch {
    pub path: String,
    pub line_number: usize,
    pub line_content: String,
}

/// Result from command execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl ExecResult {
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// File and command operations available to tools.
#[async_trait]
pub trait Environment: Send + Sync {
    /// Read file contents as UTF-8.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    async fn read_file(&self, path: &str) -> Result<String>;

    /// Write string content, creating or overwriting.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;

    /// # Errors
    /// Returns an error if existence cannot be determined.
    async fn exists(&self, path: &str) -> Result<bool>;

    /// # Errors
    /// Returns an error if the check fails.
    async fn is_dir(&self, path: &str) -> Result<bool>;

    /// Find files under the root matching a glob pattern. Paths come back
    /// relative to the root, sorted.
    ///
    /// # Errors
    /// Returns an error if the walk fails.
    async fn glob(&self, pattern: &str) -> Result<Vec<String>>;

    /// Search file contents for a regex.
    ///
    /// # Errors
    /// Returns an error if the pattern is invalid or the walk fails.
    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>>;

    /// Execute a shell command, optionally streaming stdout chunks.
    ///
    /// Not every environment supports this.
    ///
    /// # Errors
    /// Returns an error if execution is unsupported or fails to start.
    async fn exec(
        &self,
        _command: &str,
        _timeout_ms: Option<u64>,
        _output: Option<mpsc::Sender<String>>,
    ) -> Result<ExecResult> {
        anyhow::bail!("command execution not supported in this environment")
    }

    /// Root/working directory of this environment.
    fn root(&self) -> &str;

    /// Resolve a relative path against the root.
    fn resolve_path(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.root().trim_end_matches('/'), path)
        }
    }
}
