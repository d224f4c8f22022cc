use crate::environment::Environment;
use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolResult};
use crate::util::truncate;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Tool for editing files via exact string replacement. The old string
/// must match uniquely unless `replace_all` is set.
pub struct EditTool {
    environment: Arc<dyn Environment>,
}

impl EditTool {
    #[must_use]
    pub fn new(environment: Arc<dyn Environment>) -> Self {
        Self { environment }
    }
}

#[derive(Debug, Deserialize)]
struct EditInput {
    #[serde(alias = "path")]
    file_path: String,
    old_string: String,
    new_string: String,
    #[serde(default)]
    replace_all: bool,
}

impl Tool for EditTool {
    fn name(&self) -> &str {
        "edit"
    }

    fn display_name(&self) -> &str {
        "Edit file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing a string. The old_string must match exactly and uniquely unless replace_all is true."
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
                    "description": "Path to the file to edit"
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact string to find and replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The replacement string"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences instead of requiring a unique match. Default: false"
                }
            },
            "required": ["file_path", "old_string", "new_string"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let input: EditInput = serde_json::from_value(params)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        if input.old_string.is_empty() {
            return Err(EngineError::InvalidParams(
                "old_string must not be empty".to_string(),
            ));
        }
        Ok(Box::new(EditInvocation {
            environment: Arc::clone(&self.environment),
            input,
        }))
    }
}

struct EditInvocation {
    environment: Arc<dyn Environment>,
    input: EditInput,
}

#[async_trait]
impl ToolInvocation for EditInvocation {
    fn describe(&self) -> String {
        format!("edit {}", self.input.file_path)
    }

    fn needs_confirmation(&self) -> Option<String> {
        Some(format!(
            "Edit {} (replace '{}')?",
            self.input.file_path,
            truncate(&self.input.old_string, 60)
        ))
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

        if !self.environment.exists(&path).await.unwrap_or(false) {
            return Ok(ToolResult::error(format!("file not found: '{path}'")));
        }
        if self.environment.is_dir(&path).await.unwrap_or(false) {
            return Ok(ToolResult::error(format!("'{path}' is a directory")));
        }

        let content = match self.environment.read_file(&path).await {
            Ok(content) => content,
            Err(e) => return Ok(ToolResult::error(format!("failed to read '{path}': {e}"))),
        };

        let count = content.matches(&self.input.old_string).count();
        if count == 0 {
            return Ok(ToolResult::error(format!(
                "string not found in '{path}': '{}'",
                truncate(&self.input.old_string, 100)
            )));
        }
        if count > 1 && !self.input.replace_all {
            return Ok(ToolResult::error(format!(
                "found {count} occurrences in '{path}'; use replace_all or a more specific string"
            )));
        }

        let new_content = if self.input.replace_all {
            content.replace(&self.input.old_string, &self.input.new_string)
        } else {
            content.replacen(&self.input.old_string, &self.input.new_string, 1)
        };

        if let Err(e) = self.environment.write_file(&path, &new_content).await {
            return Ok(ToolResult::error(format!("failed to write '{path}': {e}")));
        }

        let replacements = if self.input.replace_all { count } else { 1 };
        Ok(ToolResult::success(format!(
            "replaced {replacements} occurrence(s) in '{path}'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::InMemoryFileSystem;

    async fn setup(content: &str) -> (Arc<InMemoryFileSystem>, EditTool) {
        let fs = Arc::new(InMemoryFileSystem::new("/workspace"));
        fs.write_file("test.txt", content).await.unwrap();
        let tool = EditTool::new(Arc::clone(&fs) as Arc<dyn Environment>);
        (fs, tool)
    }

    async fn run(tool: &EditTool, params: Value) -> ToolResult {
        tool.build_invocation(params)
            .unwrap()
            .execute(CancellationToken::new(), None)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn unique_replacement_changes_only_target() {
        let (fs, tool) = setup("line 1\nline 2 with target\nline 3").await;
        let result = run(
            &tool,
            json!({"file_path": "test.txt", "old_string": "target", "new_string": "replacement"}),
        )
        .await;

        assert!(result.success);
        assert_eq!(
            fs.read_file("test.txt").await.unwrap(),
            "line 1\nline 2 with replacement\nline 3"
        );
    }

    #[tokio::test]
    async fn ambiguous_match_without_replace_all_fails() {
        let (fs, tool) = setup("foo bar foo").await;
        let result = run(
            &tool,
            json!({"file_path": "test.txt", "old_string": "foo", "new_string": "qux"}),
        )
        .await;

        assert!(!result.success);
        assert!(result.output.contains("2 occurrences"));
        assert_eq!(fs.read_file("test.txt").await.unwrap(), "foo bar foo");
    }

    #[tokio::test]
    async fn replace_all_replaces_everywhere() {
        let (fs, tool) = setup("foo bar foo baz foo").await;
        let result = run(
            &tool,
            json!({"file_path": "test.txt", "old_string": "foo", "new_string": "qux", "replace_all": true}),
        )
        .await;

        assert!(result.success);
        assert!(result.output.contains("3 occurrence"));
        assert_eq!(fs.read_file("test.txt").await.unwrap(), "qux bar qux baz qux");
    }

    #[tokio::test]
    async fn string_not_found_reports_error() {
        let (_fs, tool) = setup("hello world").await;
        let result = run(
            &tool,
            json!({"file_path": "test.txt", "old_string": "absent", "new_string": "x"}),
        )
        .await;
        assert!(!result.success);
        assert!(result.output.contains("string not found"));
    }

    #[tokio::test]
    async fn empty_new_string_deletes() {
        let (fs, tool) = setup("Hello, World!").await;
        let result = run(
            &tool,
            json!({"file_path": "test.txt", "old_string": ", World", "new_string": ""}),
        )
        .await;
        assert!(result.success);
        assert_eq!(fs.read_file("test.txt").await.unwrap(), "Hello!");
    }

    #[tokio::test]
    async fn missing_file_reports_error() {
        let fs = Arc::new(InMemoryFileSystem::new("/workspace"));
        let tool = EditTool::new(fs);
        let result = run(
            &tool,
            json!({"file_path": "nope.txt", "old_string": "a", "new_string": "b"}),
        )
        .await;
        assert!(!result.success);
        assert!(result.output.contains("file not found"));
    }

    #[test]
    fn empty_old_string_rejected() {
        let fs = Arc::new(InMemoryFileSystem::new("/workspace"));
        let tool = EditTool::new(fs);
        assert!(matches!(
            tool.build_invocation(
                json!({"file_path": "x", "old_string": "", "new_string": "y"})
            ),
            Err(EngineError::InvalidParams(_))
        ));
    }

    #[tokio::test]
    async fn multiline_replacement() {
        let (fs, tool) = setup("fn main() {\n    old();\n}").await;
        let result = run(
            &tool,
            json!({
                "file_path": "test.txt",
                "old_string": "    old();",
                "new_string": "    new_one();\n    new_two();"
            }),
        )
        .await;
        assert!(result.success);
        let content = fs.read_file("test.txt").await.unwrap();
        assert!(content.contains("new_one"));
        assert!(content.contains("new_two"));
    }
}
