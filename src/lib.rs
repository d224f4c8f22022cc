//! agent-engine - conversation and tool-execution engine for an
//! interactive terminal agent.
//!
//! The crate provides the core that sits between a user interface and a
//! generative model backend:
//!
//! - Tool registry with builtin, locally-discovered, and remote tools
//! - Lifecycle hook pipeline (external commands, JSON over stdio)
//! - Policy engine answering allow / deny / ask-user per call
//! - Tool scheduler: validation → confirmation → execution, with
//!   parallel batches and serialized approvals
//! - Model router (fallback → override → classifier → default)
//! - Chat session with streaming, retry, and history compression
//! - Agent executor driving the turn loop, including sub-agents
//!
//! Terminal rendering, argument parsing, credentials, and model inference
//! itself are external collaborators; this crate only defines the
//! interfaces it needs from them.
//!
//! # Example
//!
//! ```ignore
//! use agent_engine::{AgentDefinition, AgentExecutor, AgentRuntime};
//!
//! let executor = AgentExecutor::new(definition, runtime);
//! let outcome = executor.run(&params, &cancel).await?;
//! ```

#![forbid(unsafe_code)]

pub mod builtins;
pub mod chat;
pub mod environment;
pub mod events;
pub mod executor;
pub mod filesystem;
pub mod hooks;
pub mod llm;
pub mod mcp;
pub mod policy;
pub mod prompt;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod settings;
pub mod tools;
pub mod types;
pub(crate) mod util;

pub use chat::{ChatConfig, ChatSession, ModelOutput};
pub use environment::{Environment, ExecResult, GrepMatch};
pub use events::AgentEvent;
pub use executor::{
    AgentDefinition, AgentExecutor, AgentRuntime, COMPLETE_TASK, ProviderSet, SubagentTool,
};
pub use filesystem::{InMemoryFileSystem, LocalFileSystem};
pub use hooks::{HookEngine, HookEvent, HookOutcome, HookRegistry};
pub use llm::{
    ChatRequest, FunctionDeclaration, Message, ModelProvider, Part, ProviderError, Role,
};
pub use policy::{PolicyDecision, PolicyEngine, PolicyMode, PolicyRule};
pub use prompt::{PromptBuilder, PromptContext, SandboxMode};
pub use router::{ModelRoute, ModelRouter, RouterConfig};
pub use scheduler::{
    BatchEntry, CallStatus, SchedulerEvent, ToolCallRecord, ToolCallRequest, ToolScheduler,
};
pub use session::{EndReason, Session, StartTrigger};
pub use settings::Settings;
pub use tools::{OutputSink, Tool, ToolInvocation, ToolRegistry};
pub use types::{
    AgentOutcome, EngineError, RetryConfig, SessionId, TerminateReason, TokenUsage, ToolKind,
    ToolOrigin, ToolResult,
};
