//! Remote tool discovery over a JSON-RPC stdio channel.
//!
//! Protocol servers are spawned as subprocesses and speak newline-delimited
//! JSON-RPC. After `initialize`, `tools/list` enumerates their tools; each
//! is wrapped as a [`crate::tools::Tool`] that forwards `tools/call`.

pub mod protocol;
pub mod remote;
pub mod transport;

pub use remote::{RemoteTool, connect_and_discover};
pub use transport::{McpServerConfig, StdioTransport};
