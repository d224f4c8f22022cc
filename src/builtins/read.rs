use crate::environment::Environment;
use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tool for reading file contents, optionally a line range.
pub struct ReadFileTool {
    environment: Arc<dyn Environment>,
}

impl ReadFileTool {
    #[must_use]
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct ReadInput {
    #[serde(alias = "path")]
    file_path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn display_name(&self) -> &str {
        "Read file"
    }

    fn description(&self) -> &str {
        "Read a file's contents. Supports an optional 1-based line offset and line limit for large files."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-based line number to start from"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return"
                }
            },
            "required": ["file_path"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let input: ReadInput = serde_json::from_value(params)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        Ok(Box::new(ReadInvocation {
            environment: Arc::clone(&self.environment),
            input,
        }))
    }
}

struct ReadInvocation {
    environment: Arc<dyn Environment>,
    input: ReadInput,
}

#[async_trait]
impl ToolInvocation for ReadInvocation {
    fn describe(&self) -> String {
        format!("read {}", self.input.file_path)
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

        if self.environment.is_dir(&path).await.unwrap_or(false) {
            return Ok(ToolResult::error(format!("'{path}' is a directory")));
        }

        let content = match self.environment.read_file(&path).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolResult::error(format!("failed to read '{path}': {e}"))),
        };

        let total_lines = content.lines().count();
        let body = match (self.input.offset, self.input.limit) {
            (None, None) => content,
            (offset, limit) => {
                let start = offset.unwrap_or(1).saturating_sub(1);
                let take = limit.unwrap_or(usize::MAX);
                content
                    .lines()
                    .skip(start)
                    .take(take)
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };

        Ok(ToolResult::success_with_data(
            body,
            json!({ "path": path, "total_lines": total_lines }),
        ))
    }
}
