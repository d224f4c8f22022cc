use crate::environment::Environment;
use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tool for creating or overwriting a file.
pub struct WriteFileTool {
    environment: Arc<dyn Environment>,
}

impl WriteFileTool {
    #[must_use]
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct WriteInput {
    #[serde(alias = "path")]
    file_path: String,
    content: String,
}

impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn display_name(&self) -> &str {
        "Write file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) or overwriting it."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full new content"
                }
            },
            "required": ["file_path", "content"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let input: WriteInput = serde_json::from_value(params)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        Ok(Box::new(WriteInvocation {
            environment: Arc::clone(&self.environment),
            input,
        }))
    }
}

struct WriteInvocation {
    environment: Arc<dyn Environment>,
    input: WriteInput,
}

#[async_trait]
impl ToolInvocation for WriteInvocation {
    fn describe(&self) -> String {
        format!(
            "write {} ({} bytes)",
            self.input.file_path,
            self.input.content.len()
        )
    }

    fn needs_confirmation(&self) -> Option<String> {
        Some(format!("Write {}?", self.input.file_path))
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let path = self.environment.resolve_path(&self.input.file_path);
        let existed = self.environment.exists(&path).await.unwrap_or(false);

        match self.environment.write_file(&path, &self.input.content).await {
            Ok(()) => Ok(ToolResult::success(format!(
                "{} '{path}' ({} bytes)",
                if existed { "Overwrote" } else { "Created" },
                self.input.content.len()
            ))),
            Err(e) => Ok(ToolResult::error(format!("failed to write '{path}': {e}"))),
        }
    }
}
