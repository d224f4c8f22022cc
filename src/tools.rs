//! Tool capability interface and registry.
//!
//! A [`Tool`] describes a callable capability: name, classification,
//! parameter schema, and a factory that binds concrete parameters into a
//! [`ToolInvocation`]. Origins (builtin, discovered-local,
//! discovered-remote) are tagged data, not subclasses.
//!
//! # Implementing a tool
//!
//! ```ignore
//! struct EchoTool;
//!
//! impl Tool for EchoTool {
//!     fn name(&self) -> &str { "echo" }
//!     fn description(&self) -> &str { "Echo the input" }
//!     fn kind(&self) -> ToolKind { ToolKind::Other }
//!     fn input_schema(&self) -> Value { json!({ "type": "object" }) }
//!     fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
//!         Ok(Box::new(EchoInvocation { params }))
//!     }
//! }
//! ```

pub mod discovery;
pub mod schema;

use crate::llm::FunctionDeclaration;
use crate::types::{EngineError, ToolKind, ToolOrigin, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Channel for a running invocation to stream incremental output.
pub type OutputSink = mpsc::Sender<String>;

/// A single pending or running tool call, bound to concrete parameters.
#[async_trait]
pub trait ToolInvocation: Send + Sync {
    /// Human-readable description of what this invocation will do,
    /// shown in approval prompts.
    fn describe(&self) -> String;

    /// If `Some`, the scheduler must obtain user approval before
    /// executing; the payload is the prompt shown to the user.
    fn needs_confirmation(&self) -> Option<String> {
        None
    }

    /// Run the invocation. Implementations are expected to honor the
    /// cancel token promptly and may stream chunks through `output`.
    async fn execute(
        &self,
        cancel: CancellationToken,
        output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError>;
}

/// A callable capability.
pub trait Tool: Send + Sync {
    /// Unique name used in model function calls.
    fn name(&self) -> &str;

    /// Human-readable display name.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// What the tool does, advertised to the model.
    fn description(&self) -> &str;

    /// Classification driving the default policy posture.
    fn kind(&self) -> ToolKind;

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::Builtin
    }

    /// JSON-shape declaration: object with `type`, `properties`, `required`.
    fn input_schema(&self) -> Value;

    /// Bind parameters into an invocation.
    ///
    /// # Errors
    /// Returns `InvalidParams` when the parameters fail the tool's own
    /// preconditions beyond schema shape.
    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError>;
}

/// Registry of callable tools.
///
/// Read-mostly after initialization; writes are confined to startup
/// registration and the one-time discovery phases.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    disabled: HashSet<String>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A duplicate name replaces the previous entry
    /// silently, with a warning.
    pub fn register<T: Tool + 'static>(&mut self, tool: T) -> &mut Self {
        self.register_arc(Arc::new(tool))
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> &mut Self {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "replacing previously registered tool");
        }
        self
    }

    /// Look up an enabled tool by name.
    ///
    /// # Errors
    /// Returns `ToolNotFound` for unknown or disabled names.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Tool>, EngineError> {
        if self.disabled.contains(name) {
            return Err(EngineError::ToolNotFound(format!("{name} (disabled)")));
        }
        self.tools
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::ToolNotFound(name.to_string()))
    }

    /// Disable a tool without removing it.
    pub fn disable(&mut self, name: &str) {
        self.disabled.insert(name.to_string());
    }

    pub fn enable(&mut self, name: &str) {
        self.disabled.remove(name);
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.tools.contains_key(name) && !self.disabled.contains(name)
    }

    /// Sorted names of all enabled tools.
    #[must_use]
    pub fn all_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tools
            .keys()
            .filter(|n| !self.disabled.contains(*n))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Declarations advertised to the model, disabled tools filtered out.
    #[must_use]
    pub fn function_declarations(&self) -> Vec<FunctionDeclaration> {
        let mut decls: Vec<FunctionDeclaration> = self
            .tools
            .values()
            .filter(|t| !self.disabled.contains(t.name()))
            .map(|t| FunctionDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect();
        decls.sort_by(|a, b| a.name.cmp(&b.name));
        decls
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run a discovery command and register every tool it declares.
    ///
    /// # Errors
    /// See [`discovery::discover_local`].
    pub async fn discover_local(&mut self, command: &str) -> Result<usize, EngineError> {
        discovery::discover_local(self, command).await
    }

    /// Connect to a protocol server and register every tool it lists.
    ///
    /// # Errors
    /// `ToolFailure` when the server cannot be spawned or the handshake
    /// fails.
    pub async fn discover_remote(
        &mut self,
        config: &crate::mcp::McpServerConfig,
    ) -> Result<usize, EngineError> {
        let tools = crate::mcp::connect_and_discover(config).await?;
        let count = tools.len();
        for tool in tools {
            self.register(tool);
        }
        Ok(count)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use serde_json::json;

    /// Minimal tool used across the crate's tests.
    pub struct StaticTool {
        pub name: &'static str,
        pub kind: ToolKind,
        pub output: &'static str,
        pub confirm: Option<&'static str>,
    }

    impl StaticTool {
        pub fn new(name: &'static str, kind: ToolKind, output: &'static str) -> Self {
            Self {
                name,
                kind,
                output,
                confirm: None,
            }
        }

        pub fn confirming(mut self, prompt: &'static str) -> Self {
            self.confirm = Some(prompt);
            self
        }
    }

    pub struct StaticInvocation {
        output: String,
        confirm: Option<String>,
    }

    #[async_trait]
    impl ToolInvocation for StaticInvocation {
        fn describe(&self) -> String {
            "static test invocation".to_string()
        }

        fn needs_confirmation(&self) -> Option<String> {
            self.confirm.clone()
        }

        async fn execute(
            &self,
            cancel: CancellationToken,
            _output: Option<OutputSink>,
        ) -> Result<ToolResult, EngineError> {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            Ok(ToolResult::success(self.output.clone()))
        }
    }

    impl Tool for StaticTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn kind(&self) -> ToolKind {
            self.kind
        }

        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string" }
                }
            })
        }

        fn build_invocation(
            &self,
            _params: Value,
        ) -> Result<Box<dyn ToolInvocation>, EngineError> {
            Ok(Box::new(StaticInvocation {
                output: self.output.to_string(),
                confirm: self.confirm.map(String::from),
            }))
        }
    }
}
