//! Local tool discovery.
//!
//! A discovery command is any executable that, when run with no arguments,
//! prints a JSON array of function declarations on stdout. Each
//! declaration is wrapped as a tool whose execution shells the same
//! command back out as `<command> call <name>` with the parameter JSON on
//! standard input, and reads the result from standard output.

use crate::llm::FunctionDeclaration;
use crate::tools::{OutputSink, Tool, ToolInvocation, ToolRegistry};
use crate::types::{EngineError, ToolKind, ToolOrigin, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Run a discovery command and register every declared tool.
///
/// # Errors
/// Returns `ToolFailure` when the command cannot be spawned, exits
/// non-zero, or prints something other than a declaration array.
pub async fn discover_local(registry: &mut ToolRegistry, command: &str) -> Result<usize, EngineError> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| EngineError::ToolFailure(format!("failed to spawn discovery command: {e}")))?;

    if !output.status.success() {
        return Err(EngineError::ToolFailure(format!(
            "discovery command exited with {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let declarations: Vec<FunctionDeclaration> = serde_json::from_slice(&output.stdout)
        .map_err(|e| EngineError::ToolFailure(format!("invalid discovery output: {e}")))?;

    let count = declarations.len();
    for decl in declarations {
        tracing::debug!(tool = %decl.name, command, "discovered local tool");
        registry.register(DiscoveredCommandTool {
            command: command.to_string(),
            declaration: decl,
        });
    }
    Ok(count)
}

/// A tool backed by a discovery command.
pub struct DiscoveredCommandTool {
    command: String,
    declaration: FunctionDeclaration,
}

impl Tool for DiscoveredCommandTool {
    fn name(&self) -> &str {
        &self.declaration.name
    }

    fn description(&self) -> &str {
        &self.declaration.description
    }

    fn kind(&self) -> ToolKind {
        // Discovered commands run arbitrary code.
        ToolKind::Execute
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::DiscoveredLocal
    }

    fn input_schema(&self) -> Value {
        self.declaration.parameters.clone()
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        Ok(Box::new(CommandInvocation {
            command: self.command.clone(),
            tool_name: self.declaration.name.clone(),
            params,
        }))
    }
}

struct CommandInvocation {
    command: String,
    tool_name: String,
    params: Value,
}

#[async_trait]
impl ToolInvocation for CommandInvocation {
    fn describe(&self) -> String {
        format!("{} call {}", self.command, self.tool_name)
    }

    fn needs_confirmation(&self) -> Option<String> {
        Some(format!(
            "Run discovered tool '{}' via '{}'?",
            self.tool_name, self.command
        ))
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(format!("{} call {}", self.command, self.tool_name))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::ToolFailure(format!("failed to spawn tool command: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            let body = serde_json::to_vec(&self.params)
                .map_err(|e| EngineError::Internal(format!("unserializable params: {e}")))?;
            stdin
                .write_all(&body)
                .await
                .map_err(|e| EngineError::ToolFailure(format!("failed to write params: {e}")))?;
        }

        let output = tokio::select! {
            result = child.wait_with_output() => {
                result.map_err(|e| EngineError::ToolFailure(format!("tool command failed: {e}")))?
            }
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            Ok(ToolResult::success(stdout))
        } else {
            Ok(ToolResult::error(format!(
                "tool exited with {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_registers_declared_tools() {
        let mut registry = ToolRegistry::new();
        let command = r#"echo '[{"name":"lint","description":"Run the linter","parameters":{"type":"object"}}]'"#;

        let count = discover_local(&mut registry, command).await.expect("discover");
        assert_eq!(count, 1);

        let tool = registry.get("lint").expect("registered");
        assert_eq!(tool.origin(), ToolOrigin::DiscoveredLocal);
        assert_eq!(tool.kind(), ToolKind::Execute);
        assert_eq!(tool.description(), "Run the linter");
    }

    #[tokio::test]
    async fn discovery_rejects_invalid_output() {
        let mut registry = ToolRegistry::new();
        let err = discover_local(&mut registry, "echo not-json")
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ToolFailure(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn discovery_rejects_failing_command() {
        let mut registry = ToolRegistry::new();
        let err = discover_local(&mut registry, "exit 3").await.unwrap_err();
        assert!(matches!(err, EngineError::ToolFailure(_)));
    }

    #[tokio::test]
    async fn discovered_invocation_requires_confirmation() {
        let mut registry = ToolRegistry::new();
        let command = r#"echo '[{"name":"fmt","description":"Format","parameters":{"type":"object"}}]'"#;
        discover_local(&mut registry, command).await.expect("discover");

        let tool = registry.get("fmt").expect("registered");
        let invocation = tool
            .build_invocation(serde_json::json!({}))
            .expect("invocation");
        assert!(invocation.needs_confirmation().is_some());
    }
}
