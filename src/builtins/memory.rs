//! User memory: facts the model chooses to persist across sessions. The
//! prompt builder appends the stored block to the system instruction.

use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

/// Stored memory facts, optionally persisted to a file.
pub struct MemoryStore {
    facts: RwLock<Vec<String>>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    /// Store that lives only for the process.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            facts: RwLock::new(Vec::new()),
            path: None,
        }
    }

    /// Store backed by a file of one fact per line. Missing file means an
    /// empty memory.
    #[must_use]
    pub fn at_path(path: PathBuf) -> Self {
        let facts = std::fs::read_to_string(&path)
            .map(|content| {
                content
                    .lines()
                    .filter(|l| !l.trim().is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            facts: RwLock::new(facts),
            path: Some(path),
        }
    }

    pub fn add(&self, fact: impl Into<String>) {
        self.facts.write().unwrap().push(fact.into());
        self.persist();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.facts.read().unwrap().is_empty()
    }

    /// Rendered memory block, or `None` when nothing is stored.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        let facts = self.facts.read().unwrap();
        if facts.is_empty() {
            None
        } else {
            Some(
                facts
                    .iter()
                    .map(|f| format!("- {f}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        }
    }

    fn persist(&self) {
        if let Some(path) = &self.path {
            let body = self.facts.read().unwrap().join("\n");
            if let Err(e) = std::fs::write(path, body) {
                tracing::warn!(path = %path.display(), error = %e, "failed to persist memory");
            }
        }
    }
}

/// Tool letting the model store a fact in user memory.
pub struct SaveMemoryTool {
    store: Arc<MemoryStore>,
}

impl SaveMemoryTool {
    #[must_use]
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
struct MemoryInput {
    fact: String,
}

impl Tool for SaveMemoryTool {
    fn name(&self) -> &str {
        "save_memory"
    }

    fn display_name(&self) -> &str {
        "Save memory"
    }

    fn description(&self) -> &str {
        "Store a fact about the user or project in long-term memory for future sessions."
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Think
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "fact": {
                    "type": "string",
                    "description": "The fact to remember, phrased as one sentence"
                }
            },
            "required": ["fact"]
        })
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        let input: MemoryInput = serde_json::from_value(params)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        if input.fact.trim().is_empty() {
            return Err(EngineError::InvalidParams(
                "fact must not be empty".to_string(),
            ));
        }
        Ok(Box::new(MemoryInvocation {
            store: Arc::clone(&self.store),
            input,
        }))
    }
}

struct MemoryInvocation {
    store: Arc<MemoryStore>,
    input: MemoryInput,
}

#[async_trait]
impl ToolInvocation for MemoryInvocation {
    fn describe(&self) -> String {
        format!("remember: {}", self.input.fact)
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        self.store.add(self.input.fact.clone());
        Ok(ToolResult::success("Saved."))
    }
}
