//! Interactive session lifecycle: transcript, counters, and the
//! SessionStart / SessionEnd / Notification hook boundaries.

use crate::hooks::{HookEngine, HookEvent};
use crate::types::SessionId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// How a session came to start.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartTrigger {
    Startup,
    Resume,
    Clear,
    Compress,
}

impl StartTrigger {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Startup => "Startup",
            Self::Resume => "Resume",
            Self::Clear => "Clear",
            Self::Compress => "Compress",
        }
    }
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndReason {
    Exit,
    Clear,
    Logout,
    Error,
    Timeout,
}

impl EndReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Exit => "Exit",
            Self::Clear => "Clear",
            Self::Logout => "Logout",
            Self::Error => "Error",
            Self::Timeout => "Timeout",
        }
    }
}

/// One line of the append-only transcript.
#[derive(Debug, Serialize, Deserialize)]
pub struct TranscriptRecord {
    pub timestamp: String,
    pub kind: String,
    pub payload: Value,
}

/// Session-scoped counters.
#[derive(Debug, Default)]
pub struct SessionCounters {
    messages: AtomicUsize,
    tool_calls: AtomicUsize,
    tokens: AtomicU64,
}

impl SessionCounters {
    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tool_call(&self) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, tokens: u64) {
        self.tokens.fetch_add(tokens, Ordering::Relaxed);
    }

    #[must_use]
    pub fn messages(&self) -> usize {
        self.messages.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn tool_calls(&self) -> usize {
        self.tool_calls.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::Relaxed)
    }
}

/// One interactive conversation, from startup to exit.
pub struct Session {
    pub id: SessionId,
    pub transcript_path: PathBuf,
    pub cwd: PathBuf,
    hooks: Arc<HookEngine>,
    pub counters: SessionCounters,
}

impl Session {
    #[must_use]
    pub fn new(transcript_path: PathBuf, cwd: PathBuf, hooks: Arc<HookEngine>) -> Self {
        Self {
            id: SessionId::new(),
            transcript_path,
            cwd,
            hooks,
            counters: SessionCounters::default(),
        }
    }

    /// Fire SessionStart hooks; returns extra context to thread into the
    /// first model request.
    pub async fn start(&self, trigger: StartTrigger, cancel: &CancellationToken) -> Vec<String> {
        let outcome = self
            .hooks
            .fire(
                HookEvent::SessionStart,
                Some(trigger.as_str()),
                json!({ "trigger": trigger.as_str() }),
                cancel,
            )
            .await;
        self.record("session_start", json!({ "trigger": trigger.as_str() }))
            .await;
        outcome.additional_context
    }

    /// Fire SessionEnd hooks (advisory only) and close out the transcript.
    pub async fn end(&self, reason: EndReason, cancel: &CancellationToken) {
        let _ = self
            .hooks
            .fire(
                HookEvent::SessionEnd,
                Some(reason.as_str()),
                json!({ "reason": reason.as_str() }),
                cancel,
            )
            .await;
        self.record(
            "session_end",
            json!({
                "reason": reason.as_str(),
                "messages": self.counters.messages(),
                "tool_calls": self.counters.tool_calls(),
                "tokens": self.counters.tokens(),
            }),
        )
        .await;
    }

    /// Fire Notification hooks (advisory) for cross-cutting events such
    /// as permission prompts.
    pub async fn notify(
        &self,
        kind: &str,
        message: &str,
        details: Value,
        cancel: &CancellationToken,
    ) {
        let _ = self
            .hooks
            .fire(
                HookEvent::Notification,
                Some(kind),
                json!({
                    "notification_type": kind,
                    "message": message,
                    "details": details,
                }),
                cancel,
            )
            .await;
    }

    /// Append one record to the JSONL transcript. Transcript failures are
    /// logged, never fatal.
    pub async fn record(&self, kind: &str, payload: Value) {
        let record = TranscriptRecord {
            timestamp: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            kind: kind.to_string(),
            payload,
        };
        if let Err(e) = append_jsonl(&self.transcript_path, &record).await {
            tracing::warn!(
                path = %self.transcript_path.display(),
                error = %e,
                "failed to append transcript record"
            );
        }
    }
}

async fn append_jsonl(path: &Path, record: &TranscriptRecord) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_vec(record).unwrap_or_default();
    line.push(b'\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::config::{HookCommand, HookEntry, HookRegistry, HookSource};

    fn temp_transcript(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("session-test-{}-{name}.jsonl", std::process::id()))
    }

    fn plain_session(name: &str) -> Session {
        Session::new(
            temp_transcript(name),
            PathBuf::from("/tmp"),
            Arc::new(HookEngine::disabled()),
        )
    }

    #[tokio::test]
    async fn transcript_is_append_only_jsonl() {
        let session = plain_session("append");
        let _ = tokio::fs::remove_file(&session.transcript_path).await;

        session.record("user_message", json!({"text": "hi"})).await;
        session
            .record("tool_call", json!({"name": "read_file"}))
            .await;

        let content = tokio::fs::read_to_string(&session.transcript_path)
            .await
            .unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: TranscriptRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.kind, "user_message");
        let second: TranscriptRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.kind, "tool_call");

        let _ = tokio::fs::remove_file(&session.transcript_path).await;
    }

    #[tokio::test]
    async fn lifecycle_records_and_counters() {
        let session = plain_session("lifecycle");
        let _ = tokio::fs::remove_file(&session.transcript_path).await;
        let cancel = CancellationToken::new();

        session.counters.record_message();
        session.counters.record_tool_call();
        session.counters.record_tokens(123);

        session.start(StartTrigger::Startup, &cancel).await;
        session.end(EndReason::Exit, &cancel).await;

        let content = tokio::fs::read_to_string(&session.transcript_path)
            .await
            .unwrap();
        assert!(content.contains("session_start"));
        assert!(content.contains("session_end"));
        assert!(content.contains("\"tokens\":123"));

        let _ = tokio::fs::remove_file(&session.transcript_path).await;
    }

    #[tokio::test]
    async fn session_start_hook_context_is_returned() {
        let mut registry = HookRegistry::default();
        registry.add(HookEntry {
            event: HookEvent::SessionStart,
            matcher: Some("Startup".to_string()),
            sequential: false,
            commands: vec![HookCommand {
                command:
                    r#"echo '{"hookSpecificOutput":{"additionalContext":"branch is main"}}'"#
                        .to_string(),
                timeout_ms: 5_000,
            }],
            source: HookSource::User,
            enabled: true,
        });

        let transcript = temp_transcript("hooked");
        let _ = tokio::fs::remove_file(&transcript).await;
        let hooks = HookEngine::new(
            registry,
            SessionId::new(),
            transcript.clone(),
            PathBuf::from("/tmp"),
        );
        let session = Session::new(transcript.clone(), PathBuf::from("/tmp"), Arc::new(hooks));

        let context = session
            .start(StartTrigger::Startup, &CancellationToken::new())
            .await;
        assert_eq!(context, vec!["branch is main".to_string()]);

        // A Resume trigger does not match the Startup matcher.
        let context = session
            .start(StartTrigger::Resume, &CancellationToken::new())
            .await;
        assert!(context.is_empty());

        let _ = tokio::fs::remove_file(&transcript).await;
    }
}
