//! Built-in tools: file operations, search, shell, web fetch, memory.
//!
//! All file and shell access goes through the [`crate::environment::Environment`]
//! abstraction so tests run against the in-memory filesystem.

pub mod edit;
pub mod fetch;
pub mod glob;
pub mod grep;
pub mod memory;
pub mod read;
pub mod shell;
pub mod write;

pub use edit::EditTool;
pub use fetch::{FetchConfig, WebFetchTool};
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use memory::{MemoryStore, SaveMemoryTool};
pub use read::ReadFileTool;
pub use shell::ShellTool;
pub use write::WriteFileTool;

use crate::environment::Environment;
use crate::tools::ToolRegistry;
use std::sync::Arc;

/// Register the standard built-in set against one environment.
pub fn register_builtins(
    registry: &mut ToolRegistry,
    environment: Arc<dyn Environment>,
    memory: Arc<MemoryStore>,
) {
    registry.register(ReadFileTool::new(Arc::clone(&environment)));
    registry.register(WriteFileTool::new(Arc::clone(&environment)));
    registry.register(EditTool::new(Arc::clone(&environment)));
    registry.register(GlobTool::new(Arc::clone(&environment)));
    registry.register(GrepTool::new(Arc::clone(&environment)));
    registry.register(ShellTool::new(Arc::clone(&environment)));
    registry.register(WebFetchTool::new(FetchConfig::default()));
    registry.register(SaveMemoryTool::new(memory));
}
