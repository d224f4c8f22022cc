//! Runs a hook plan: subprocesses with JSON framing over stdin/stdout.

use futures::future::join_all;
use serde_json::Value;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::planner::{HookPlan, PlannedCommand};

/// Decision carried by a hook's stdout JSON.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HookDecision {
    Allow,
    Approve,
    Ask,
    Deny,
    Block,
}

impl HookDecision {
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "allow" => Some(Self::Allow),
            "approve" => Some(Self::Approve),
            "ask" => Some(Self::Ask),
            "deny" => Some(Self::Deny),
            "block" => Some(Self::Block),
            _ => None,
        }
    }

    /// Deny and block stop the event outright.
    #[must_use]
    pub const fn is_blocking(self) -> bool {
        matches!(self, Self::Deny | Self::Block)
    }

    const fn strength(self) -> u8 {
        match self {
            Self::Allow | Self::Approve => 0,
            Self::Ask => 1,
            Self::Deny | Self::Block => 2,
        }
    }
}

/// Aggregated result across every hook in a plan.
#[derive(Clone, Debug)]
pub struct HookOutcome {
    /// Strongest decision seen (block > ask > allow).
    pub decision: Option<HookDecision>,
    pub reason: Option<String>,
    /// `systemMessage` fields, surfaced to the user channel.
    pub system_messages: Vec<String>,
    /// `additionalContext` fields, threaded back into model input.
    pub additional_context: Vec<String>,
    /// False when any hook answered `continue: false`.
    pub proceed: bool,
    pub modified_request: Option<Value>,
    pub synthetic_response: Option<Value>,
    pub modified_response: Option<Value>,
    pub tool_config: Option<Value>,
}

impl Default for HookOutcome {
    fn default() -> Self {
        Self {
            decision: None,
            reason: None,
            system_messages: Vec::new(),
            additional_context: Vec::new(),
            proceed: true,
            modified_request: None,
            synthetic_response: None,
            modified_response: None,
            tool_config: None,
        }
    }
}

impl HookOutcome {
    /// Whether the aggregated decision blocks the event.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        self.decision.is_some_and(HookDecision::is_blocking)
    }

    #[must_use]
    pub fn asks_user(&self) -> bool {
        self.decision == Some(HookDecision::Ask)
    }

    fn absorb(&mut self, output: &Value) {
        if let Some(decision) = output
            .get("decision")
            .and_then(Value::as_str)
            .and_then(HookDecision::parse)
        {
            let stronger = self
                .decision
                .is_none_or(|current| decision.strength() > current.strength());
            if stronger {
                self.decision = Some(decision);
                if let Some(reason) = output.get("reason").and_then(Value::as_str) {
                    self.reason = Some(reason.to_string());
                }
            }
        }
        if self.reason.is_none()
            && let Some(reason) = output.get("reason").and_then(Value::as_str)
        {
            self.reason = Some(reason.to_string());
        }
        if let Some(message) = output.get("systemMessage").and_then(Value::as_str) {
            self.system_messages.push(message.to_string());
        }
        if output.get("continue").and_then(Value::as_bool) == Some(false) {
            self.proceed = false;
        }
        let nested_context = output
            .get("hookSpecificOutput")
            .and_then(|h| h.get("additionalContext"))
            .and_then(Value::as_str);
        let flat_context = output.get("additionalContext").and_then(Value::as_str);
        if let Some(context) = nested_context.or(flat_context) {
            self.additional_context.push(context.to_string());
        }
        for (field, slot) in [
            ("modifiedRequest", &mut self.modified_request),
            ("syntheticResponse", &mut self.synthetic_response),
            ("modifiedResponse", &mut self.modified_response),
            ("toolConfig", &mut self.tool_config),
        ] {
            if let Some(value) = output.get(field) {
                *slot = Some(value.clone());
            }
        }
    }
}

/// Spawns hook subprocesses and aggregates their decisions.
pub struct HookExecutor {
    shell: String,
}

impl Default for HookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HookExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
        }
    }

    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    /// Run every command in the plan and aggregate the outputs.
    ///
    /// Sequential plans run in registration order and stop early on
    /// `continue: false`; parallel plans run all commands concurrently
    /// (an early `continue: false` only affects the overall outcome, not
    /// already-running peers).
    pub async fn run(
        &self,
        plan: &HookPlan,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> HookOutcome {
        let mut outcome = HookOutcome::default();

        if plan.sequential {
            for command in &plan.commands {
                if cancel.is_cancelled() {
                    break;
                }
                if let Some(output) = self.run_command(command, payload, cancel).await {
                    outcome.absorb(&output);
                    if !outcome.proceed {
                        break;
                    }
                }
            }
        } else {
            let runs = plan
                .commands
                .iter()
                .map(|command| self.run_command(command, payload, cancel));
            for output in join_all(runs).await.into_iter().flatten() {
                outcome.absorb(&output);
            }
        }

        outcome
    }

    /// Run one hook command. Returns its parsed stdout, or `None` on any
    /// failure (spawn error, timeout, non-zero exit, invalid JSON) — all
    /// advisory.
    async fn run_command(
        &self,
        command: &PlannedCommand,
        payload: &Value,
        cancel: &CancellationToken,
    ) -> Option<Value> {
        let mut child = match Command::new(&self.shell)
            .arg("-c")
            .arg(&command.command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command = %command.command, error = %e, "hook failed to spawn");
                return None;
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let body = serde_json::to_vec(payload).unwrap_or_default();
            if let Err(e) = stdin.write_all(&body).await {
                tracing::warn!(command = %command.command, error = %e, "failed to write hook stdin");
            }
            // stdin drops here, closing the stream.
        }

        let timeout = Duration::from_millis(command.timeout_ms);
        let output = tokio::select! {
            result = tokio::time::timeout(timeout, child.wait_with_output()) => match result {
                Ok(Ok(output)) => output,
                Ok(Err(e)) => {
                    tracing::warn!(command = %command.command, error = %e, "hook execution failed");
                    return None;
                }
                Err(_) => {
                    tracing::warn!(
                        command = %command.command,
                        timeout_ms = command.timeout_ms,
                        "hook timed out, killing"
                    );
                    return None;
                }
            },
            () = cancel.cancelled() => return None,
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !output.status.success() {
            tracing::warn!(
                command = %command.command,
                exit_code = output.status.code().unwrap_or(-1),
                stderr = %stderr.trim(),
                "hook exited non-zero"
            );
            return None;
        }
        if !stderr.trim().is_empty() {
            tracing::debug!(command = %command.command, stderr = %stderr.trim(), "hook diagnostics");
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let trimmed = stdout.trim();
        if trimmed.is_empty() {
            return Some(Value::Object(serde_json::Map::new()));
        }
        match serde_json::from_str(trimmed) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(command = %command.command, error = %e, "hook produced invalid JSON");
                None
            }
        }
    }
}
