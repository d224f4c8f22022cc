//! Environment implementations: the real filesystem and an in-memory one
//! for tests.

use crate::environment::{Environment, ExecResult, GrepMatch};
use crate::util::glob_match;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::RwLock;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

const MAX_GREP_MATCHES: usize = 1_000;

/// Directories never descended into during walks.
const SKIPPED_DIRS: &[&str] = &[".git", "node_modules", "target", ".venv"];

/// Standard filesystem rooted at a working directory.
pub struct LocalFileSystem {
    root: String,
}

impl LocalFileSystem {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    async fn walk(&self) -> Result<Vec<String>> {
        let root = PathBuf::from(&self.root);
        let mut files = Vec::new();
        let mut stack = vec![root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .with_context(|| format!("failed to read directory {}", dir.display()))?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if !SKIPPED_DIRS.contains(&name.as_str()) {
                        stack.push(path);
                    }
                } else if file_type.is_file()
                    && let Ok(relative) = path.strip_prefix(&root)
                {
                    files.push(relative.to_string_lossy().into_owned());
                }
            }
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl Environment for LocalFileSystem {
    async fn read_file(&self, path: &str) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {path}"))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {path}"))
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }

    async fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false))
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(self
            .walk()
            .await?
            .into_iter()
            .filter(|path| glob_match(pattern, path))
            .collect())
    }

    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>> {
        let re = Regex::new(pattern).with_context(|| format!("invalid pattern {pattern}"))?;
        let scope = if path.is_empty() { None } else { Some(path) };
        let mut matches = Vec::new();

        for relative in self.walk().await? {
            if let Some(scope) = scope
                && !relative.starts_with(scope.trim_start_matches("./"))
            {
                continue;
            }
            let full = format!("{}/{relative}", self.root.trim_end_matches('/'));
            let Ok(content) = tokio::fs::read_to_string(&full).await else {
                continue; // binary or unreadable
            };
            for (number, line) in content.lines().enumerate() {
                if re.is_match(line) {
                    matches.push(GrepMatch {
                        path: relative.clone(),
                        line_number: number + 1,
                        line_content: line.to_string(),
                    });
                    if matches.len() >= MAX_GREP_MATCHES {
                        return Ok(matches);
                    }
                }
            }
        }

        Ok(matches)
    }

    async fn exec(
        &self,
        command: &str,
        timeout_ms: Option<u64>,
        output: Option<mpsc::Sender<String>>,
    ) -> Result<ExecResult> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn: {command}"))?;

        let mut stdout_pipe = child.stdout.take().context("missing stdout pipe")?;
        let mut stderr_pipe = child.stderr.take().context("missing stderr pipe")?;

        // Stream stdout in chunks while the process runs.
        let reader = tokio::spawn(async move {
            let mut collected = String::new();
            let mut buf = [0u8; 4096];
            loop {
                match stdout_pipe.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        collected.push_str(&chunk);
                        if let Some(sink) = &output {
                            let _ = sink.send(chunk).await;
                        }
                    }
                }
            }
            collected
        });

        let wait = async {
            let status = child.wait().await?;
            let mut stderr = String::new();
            let _ = stderr_pipe.read_to_string(&mut stderr).await;
            anyhow::Ok((status, stderr))
        };

        let (status, stderr) = match timeout_ms {
            Some(ms) => tokio::time::timeout(Duration::from_millis(ms), wait)
                .await
                .map_err(|_| anyhow::anyhow!("command timed out after {ms}ms"))??,
            None => wait.await?,
        };

        let stdout = reader.await.unwrap_or_default();
        Ok(ExecResult {
            stdout,
            stderr,
            exit_code: status.code().unwrap_or(-1),
        })
    }

    fn root(&self) -> &str {
        &self.root
    }
}

/// In-memory filesystem for tests. Paths are stored resolved.
pub struct InMemoryFileSystem {
    root: String,
    files: RwLock<HashMap<String, String>>,
    dirs: RwLock<Vec<String>>,
}

impl InMemoryFileSystem {
    #[must_use]
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            files: RwLock::new(HashMap::new()),
            dirs: RwLock::new(Vec::new()),
        }
    }

    pub fn create_dir(&self, path: &str) {
        self.dirs.write().unwrap().push(self.resolve_path(path));
    }

    fn relative<'a>(&self, path: &'a str) -> &'a str {
        path.strip_prefix(self.root.trim_end_matches('/'))
            .map_or(path, |p| p.trim_start_matches('/'))
    }
}

#[async_trait]
impl Environment for InMemoryFileSystem {
    async fn read_file(&self, path: &str) -> Result<String> {
        let resolved = self.resolve_path(path);
        self.files
            .read()
            .unwrap()
            .get(&resolved)
            .cloned()
            .with_context(|| format!("file not found: {resolved}"))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let resolved = self.resolve_path(path);
        self.files
            .write()
            .unwrap()
            .insert(resolved, content.to_string());
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve_path(path);
        Ok(self.files.read().unwrap().contains_key(&resolved)
            || self.dirs.read().unwrap().contains(&resolved))
    }

    async fn is_dir(&self, path: &str) -> Result<bool> {
        let resolved = self.resolve_path(path);
        Ok(self.dirs.read().unwrap().contains(&resolved))
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        let files = self.files.read().unwrap();
        let mut matched: Vec<String> = files
            .keys()
            .map(|k| self.relative(k).to_string())
            .filter(|relative| glob_match(pattern, relative))
            .collect();
        matched.sort();
        Ok(matched)
    }

    async fn grep(&self, pattern: &str, path: &str) -> Result<Vec<GrepMatch>> {
        let re = Regex::new(pattern).with_context(|| format!("invalid pattern {pattern}"))?;
        let files = self.files.read().unwrap();
        let mut matches = Vec::new();
        let mut keys: Vec<&String> = files.keys().collect();
        keys.sort();

        for key in keys {
            let relative = self.relative(key).to_string();
            if !path.is_empty() && !relative.starts_with(path.trim_start_matches("./")) {
                continue;
            }
            for (number, line) in files[key].lines().enumerate() {
                if re.is_match(line) {
                    matches.push(GrepMatch {
                        path: relative.clone(),
                        line_number: number + 1,
                        line_content: line.to_string(),
                    });
                }
            }
        }

        Ok(matches)
    }

    fn root(&self) -> &str {
        &self.root
    }
}
