use crate::environment::Environment;
use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tool for finding files by glob pattern.
pub struct GlobTool {
    environment: Arc<dyn Environment>,
}

impl GlobTool {
    #[must_use]
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct GlobInput {
    pattern: String,
}

impl Tool for GlobTool {
    fn name(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files matching a glob pattern (supports * and **), relative to the working directory."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Search
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. src/**/*.rs"
                }
            },
            "required": ["pattern"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let input: GlobInput = serde_json::from_value(params)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        Ok(Box::new(GlobInvocation {
            environment: Arc::clone(&self.environment),
            input,
        }))
    }
}

struct GlobInvocation {
    environment: Arc<dyn Environment>,
    input: GlobInput,
}

#[async_trait]
impl ToolInvocation for GlobInvocation {
    fn describe(&self) -> String {
        format!("glob {}", self.input.pattern)
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        match self.environment.glob(&self.input.pattern).await {
            Ok(paths) if paths.is_empty() => Ok(ToolResult::success(format!(
                "no files match '{}'",
                self.input.pattern
            ))),
            Ok(paths) => {
                let count = paths.len();
                Ok(ToolResult::success_with_data(
                    paths.join("\n"),
                    json!({ "count": count }),
                ))
            }
            Err(e) => Ok(ToolResult::error(format!("glob failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::InMemoryFileSystem;

    #[tokio::test]
    async fn finds_matching_files() {
        let fs = Arc::new(InMemoryFileSystem::new("/workspace"));
        fs.write_file("src/a.rs", "").await.unwrap();
        fs.write_file("src/nested/b.rs", "").await.unwrap();
        fs.write_file("docs/c.md", "").await.unwrap();

        let tool = GlobTool::new(fs);
        let result = tool
            .build_invocation(json!({"pattern": "**/*.rs"}))
            .unwrap()
            .execute(CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "src/a.rs\nsrc/nested/b.rs");
        assert_eq!(result.data.unwrap()["count"], 2);
    }

    #[tokio::test]
    async fn empty_match_is_success() {
        let fs = Arc::new(InMemoryFileSystem::new("/workspace"));
        let tool = GlobTool::new(fs);
        let result = tool
            .build_invocation(json!({"pattern": "*.zig"}))
            .unwrap()
            .execute(CancellationToken::new(), None)
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.output.contains("no files match"));
    }
}
