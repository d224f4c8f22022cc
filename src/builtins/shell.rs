use crate::environment::Environment;
use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolResult};
use crate::util::truncate;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Tool for executing shell commands. Output streams to the caller while
/// the command runs; cancellation kills the child.
pub struct ShellTool {
    environment: Arc<dyn Environment>,
}

impl ShellTool {
    #[must_use]
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct ShellInput {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
}

impl Tool for ShellTool {
    fn name(&self) -> &str {
        "run_shell_command"
    }

    fn display_name(&self) -> &str {
        "Shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory and return its output."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Execute
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Timeout in milliseconds (default 120000)"
                }
            },
            "required": ["command"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let input: ShellInput = serde_json::from_value(params)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        if input.command.trim().is_empty() {
            return Err(EngineError::InvalidParams(
                "command must not be empty".to_string(),
            ));
        }
        Ok(Box::new(ShellInvocation {
            environment: Arc::clone(&self.environment),
            input,
        }))
    }
}

struct ShellInvocation {
    environment: Arc<dyn Environment>,
    input: ShellInput,
}

#[async_trait]
impl ToolInvocation for ShellInvocation {
    fn describe(&self) -> String {
        format!("$ {}", truncate(&self.input.command, 80))
    }

    fn needs_confirmation(&self) -> Option<String> {
        Some(format!("Run '{}'?", truncate(&self.input.command, 120)))
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        let timeout = self.input.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

        // Dropping the exec future on cancel kills the child process.
        let result = tokio::select! {
            result = self.environment.exec(&self.input.command, Some(timeout), output) => result,
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        match result {
            Ok(exec) if exec.success() => Ok(ToolResult::success(exec.stdout)),
            Ok(exec) => Ok(ToolResult::error(format!(
                "command exited with {}\n{}{}",
                exec.exit_code,
                exec.stdout,
                if exec.stderr.is_empty() {
                    String::new()
                } else {
                    format!("\nstderr:\n{}", exec.stderr)
                }
            ))),
            Err(e) => Ok(ToolResult::error(format!("command failed: {e}"))),
        }
    }
}
