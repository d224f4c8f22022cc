//! Core types shared across the engine.
//!
//! This module contains the fundamental types used throughout the crate:
//!
//! - [`SessionId`]: Unique identifier for an interactive session
//! - [`ToolKind`]: Classification that drives default policy posture
//! - [`ToolOrigin`]: Where a tool came from (builtin or discovered)
//! - [`ToolResult`]: Result returned from tool execution
//! - [`TokenUsage`]: Token consumption statistics
//! - [`RetryConfig`]: Backoff policy for the model transport
//! - [`TerminateReason`]: Why an agent run ended
//! - [`EngineError`]: The error taxonomy for the whole engine

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for an interactive session.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification of a tool's effect on the environment.
///
/// Mutating kinds default to requiring user approval; the rest default to
/// being allowed without a prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Read,
    Edit,
    Delete,
    Move,
    Search,
    Execute,
    Think,
    Fetch,
    Other,
}

impl ToolKind {
    /// Whether this kind mutates state outside the conversation.
    #[must_use]
    pub const fn is_mutator(self) -> bool {
        matches!(self, Self::Edit | Self::Delete | Self::Move | Self::Execute)
    }
}

/// Where a tool was registered from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolOrigin {
    Builtin,
    DiscoveredLocal,
    DiscoveredRemote,
}

/// Result of a tool execution.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool execution succeeded
    pub success: bool,
    /// Output content (displayed to user and fed back to the model)
    pub output: String,
    /// Optional structured data
    pub data: Option<serde_json::Value>,
    /// Duration of the tool execution in milliseconds
    pub duration_ms: Option<u64>,
}

impl ToolResult {
    #[must_use]
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn success_with_data(output: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            success: true,
            output: output.into(),
            data: Some(data),
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            output: message.into(),
            data: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub const fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Token usage statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub const fn add(&mut self, other: &Self) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Configuration for retry behavior around the model transport.
///
/// Retries apply to network failures, HTTP 429 and 5xx. A 400 is never
/// retried. Each attempt doubles the delay up to the cap, with a uniform
/// jitter of plus or minus `jitter_fraction`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (first try included)
    pub max_attempts: u32,
    /// Initial backoff delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum backoff delay in milliseconds
    pub max_delay_ms: u64,
    /// Uniform jitter applied to each delay, as a fraction of the delay
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 5_000,
            max_delay_ms: 30_000,
            jitter_fraction: 0.3,
        }
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (for testing)
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter_fraction: 0.0,
        }
    }

    /// Create a retry config with fast retries (for testing)
    #[must_use]
    pub const fn fast() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            jitter_fraction: 0.3,
        }
    }

    /// Compute the backoff delay for the given attempt (1-based).
    ///
    /// Exponential doubling from the initial delay, capped, then jittered
    /// by up to `jitter_fraction` in either direction.
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay_ms
            .saturating_mul(1u64 << attempt.saturating_sub(1).min(16))
            .min(self.max_delay_ms);

        if base == 0 || self.jitter_fraction <= 0.0 {
            return Duration::from_millis(base);
        }

        // Subsecond clock as the jitter source; avoids a rand dependency.
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let span = (base as f64 * self.jitter_fraction) as u64;
        let jitter = if span == 0 {
            0
        } else {
            u64::from(nanos) % (span * 2)
        };
        let low = base.saturating_sub(span);
        Duration::from_millis(low.saturating_add(jitter).min(self.max_delay_ms))
    }
}

/// Why an agent run terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateReason {
    TaskComplete,
    MaxTurns,
    Cancelled,
    QuotaExceeded,
    Timeout,
}

/// Outcome of one agent run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgentOutcome {
    /// Result payload from `complete_task`, if the agent produced one
    pub result: Option<serde_json::Value>,
    pub terminate_reason: TerminateReason,
    /// Number of model turns executed
    pub turns: usize,
    pub usage: TokenUsage,
}

/// The engine error taxonomy.
///
/// Kinds the model can respond to (invalid params, denials, cancellation,
/// tool failures, advisory hook failures) are converted into function
/// responses so the loop continues. Transport and quota errors bubble out
/// of the chat into the executor; `Internal` aborts the agent run.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// Tool call rejected by schema or precondition
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// Policy or hook blocked execution
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// User answered no at an approval prompt
    #[error("user denied: {0}")]
    UserDenied(String),

    /// A cancel signal was observed
    #[error("cancelled")]
    Cancelled,

    /// Exception inside the tool (I/O error, shell non-zero exit, ...)
    #[error("tool failure: {0}")]
    ToolFailure(String),

    /// Network error talking to the model backend, after retry exhaustion
    #[error("transport failure: {0}")]
    Transport(String),

    /// Distinguished transport failure that switches the router into
    /// fallback mode
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Hook subprocess timed out, exited non-zero, or produced invalid JSON
    #[error("hook failure: {0}")]
    HookFailure(String),

    /// Lookup of an unregistered tool name
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Invariant violation
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether this error should be surfaced to the model as a function
    /// response instead of terminating the turn.
    #[must_use]
    pub const fn is_model_facing(&self) -> bool {
        matches!(
            self,
            Self::InvalidParams(_)
                | Self::PolicyDenied(_)
                | Self::UserDenied(_)
                | Self::Cancelled
                | Self::ToolFailure(_)
                | Self::HookFailure(_)
                | Self::ToolNotFound(_)
        )
    }
}
