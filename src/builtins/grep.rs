use crate::environment::Environment;
use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tool for searching file contents with a regex.
pub struct GrepTool {
    environment: Arc<dyn Environment>,
}

impl GrepTool {
    #[must_use]
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct GrepInput {
    pattern: String,
    #[serde(default)]
    path: Option<String>,
}

impl Tool for GrepTool {
    fn name(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search file contents for a regular expression. Returns matching lines as path:line:content."
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
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Restrict the search to this subdirectory"
                }
            },
            "required": ["pattern"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let input: GrepInput = serde_json::from_value(params)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        Ok(Box::new(GrepInvocation {
            environment: Arc::clone(&self.environment),
            input,
        }))
    }
}

struct GrepInvocation {
    environment: Arc<dyn Environment>,
    input: GrepInput,
}

#[async_trait]
impl ToolInvocation for GrepInvocation {
    fn describe(&self) -> String {
        format!("grep {}", self.input.pattern)
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let scope = self.input.path.as_deref().unwrap_or("");
        match self.environment.grep(&self.input.pattern, scope).await {
            Ok(matches) if matches.is_empty() => Ok(ToolResult::success(format!(
                "no matches for '{}'",
                self.input.pattern
            ))),
            Ok(matches) => {
                let mut out = String::new();
                for m in &matches {
                    let _ = writeln!(out, "{}:{}:{}", m.path, m.line_number, m.line_content);
                }
                let count = matches.len();
                Ok(ToolResult::success_with_data(
                    out.trim_end().to_string(),
                    json!({ "count": count }),
                ))
            }
            Err(e) => Ok(ToolResult::error(format!("grep failed: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::InMemoryFileSystem;

    #[tokio::test]
    async fn matches_report_path_and_line() {
        let fs = Arc::new(InMemoryFileSystem::new("/workspace"));
        fs.write_file("src/lib.rs", "fn alpha() {}\nfn beta() {}")
            .await
            .unwrap();

        let tool = GrepTool::new(fs);
        let result = tool
            .build_invocation(json!({"pattern": "fn beta"}))
            .unwrap()
            .execute(CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.output, "src/lib.rs:2:fn beta() {}");
    }

    #[tokio::test]
    async fn invalid_regex_is_a_tool_error() {
        let fs = Arc::new(InMemoryFileSystem::new("/workspace"));
        let tool = GrepTool::new(fs);
        let result = tool
            .build_invocation(json!({"pattern": "broken["}))
            .unwrap()
            .execute(CancellationToken::new(), None)
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn scope_restricts_search() {
        let fs = Arc::new(InMemoryFileSystem::new("/workspace"));
        fs.write_file("src/a.rs", "needle").await.unwrap();
        fs.write_file("docs/b.md", "needle").await.unwrap();

        let tool = GrepTool::new(fs);
        let result = tool
            .build_invocation(json!({"pattern": "needle", "path": "src"}))
            .unwrap()
            .execute(CancellationToken::new(), None)
            .await
            .unwrap();

        assert!(result.output.contains("src/a.rs"));
        assert!(!result.output.contains("docs/b.md"));
    }
}
