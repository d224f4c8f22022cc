//! Remote tools: wrappers that forward execution to a protocol server.

use crate::tools::{OutputSink, Tool, ToolInvocation};
use crate::types::{EngineError, ToolKind, ToolOrigin, ToolResult};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::protocol::{
    ClientInfo, InitializeParams, JsonRpcRequest, PROTOCOL_VERSION, RemoteContent,
    RemoteToolDefinition, ToolCallParams, ToolCallResult, ToolsListResult,
};
use super::transport::{McpServerConfig, StdioTransport};

/// Connect to a protocol server, initialize, and list its tools.
///
/// # Errors
/// Returns `ToolFailure` when the server cannot be spawned or the
/// handshake fails.
pub async fn connect_and_discover(
    config: &McpServerConfig,
) -> Result<Vec<RemoteTool>, EngineError> {
    let transport = StdioTransport::spawn(config)
        .map_err(|e| EngineError::ToolFailure(format!("protocol server spawn failed: {e}")))?;

    let init = InitializeParams {
        protocol_version: PROTOCOL_VERSION.to_string(),
        capabilities: json!({}),
        client_info: ClientInfo {
            name: "agent-engine".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
    };
    transport
        .send(JsonRpcRequest::new(
            "initialize",
            Some(serde_json::to_value(init).unwrap_or_default()),
            0,
        ))
        .await
        .map_err(|e| EngineError::ToolFailure(format!("initialize failed: {e}")))?;

    let response = transport
        .send(JsonRpcRequest::new("tools/list", None, 0))
        .await
        .map_err(|e| EngineError::ToolFailure(format!("tools/list failed: {e}")))?;

    let listed: ToolsListResult = serde_json::from_value(response.result.unwrap_or_default())
        .map_err(|e| EngineError::ToolFailure(format!("invalid tools/list result: {e}")))?;

    tracing::debug!(
        command = %config.command,
        count = listed.tools.len(),
        "discovered remote tools"
    );

    Ok(listed
        .tools
        .into_iter()
        .map(|definition| RemoteTool {
            transport: Arc::clone(&transport),
            description: definition
                .description
                .clone()
                .unwrap_or_else(|| format!("Remote tool '{}'", definition.name)),
            definition,
        })
        .collect())
}

/// A tool served by a remote protocol server.
pub struct RemoteTool {
    transport: Arc<StdioTransport>,
    definition: RemoteToolDefinition,
    description: String,
}

impl Tool for RemoteTool {
    fn name(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Other
    }

    fn origin(&self) -> ToolOrigin {
        ToolOrigin::DiscoveredRemote
    }

    fn input_schema(&self) -> Value {
        self.definition.input_schema.clone()
    }

    fn build_invocation(&self, params: Value) -> Result<Box<dyn ToolInvocation>, EngineError> {
        Ok(Box::new(RemoteInvocation {
            transport: Arc::clone(&self.transport),
            tool_name: self.definition.name.clone(),
            params,
        }))
    }
}

struct RemoteInvocation {
    transport: Arc<StdioTransport>,
    tool_name: String,
    params: Value,
}

#[async_trait]
impl ToolInvocation for RemoteInvocation {
    fn describe(&self) -> String {
        format!("remote tool '{}'", self.tool_name)
    }

    fn needs_confirmation(&self) -> Option<String> {
        Some(format!("Call remote tool '{}'?", self.tool_name))
    }

    async fn execute(
        &self,
        cancel: CancellationToken,
        _output: Option<OutputSink>,
    ) -> Result<ToolResult, EngineError> {
        let params = ToolCallParams {
            name: self.tool_name.clone(),
            arguments: Some(self.params.clone()),
        };
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(serde_json::to_value(params).unwrap_or_default()),
            0,
        );

        let response = tokio::select! {
            result = self.transport.send(request) => {
                result.map_err(|e| EngineError::ToolFailure(format!("tools/call failed: {e}")))?
            }
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
        };

        let result: ToolCallResult = serde_json::from_value(response.result.unwrap_or_default())
            .map_err(|e| EngineError::ToolFailure(format!("invalid tools/call result: {e}")))?;

        let text = result
            .content
            .iter()
            .filter_map(|c| match c {
                RemoteContent::Text { text } => Some(text.as_str()),
                RemoteContent::Resource { text, .. } => text.as_deref(),
                RemoteContent::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error {
            Ok(ToolResult::error(text))
        } else {
            Ok(ToolResult::success(text))
        }
    }
}
