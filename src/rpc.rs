//! JSON-RPC request router
//!
//! Maps the MCP methods onto the tool registry. Every request is handled
//! independently; notifications produce no response.

use rmcp::model::{ErrorData, ServerCapabilities};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::errors::{AppError, method_not_found, parse_error};
use crate::registry::{ToolRegistry, parse_arguments};

/// Protocol revision announced in `initialize`
pub const PROTOCOL_VERSION: &str = "2024-11-05";
/// Name announced in `initialize`
pub const SERVER_NAME: &str = "gmail-mcp-rs";

const INSTRUCTIONS: &str = "Gmail MCP server. Use search_emails to find messages, \
     get_email_content to read one, and get_email_attachment to read its attachments.";

/// Incoming JSON-RPC request or notification
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    /// A missing method is answered with method-not-found, not a parse error
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// Outgoing JSON-RPC response; exactly one of `result` and `error` is set
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorData>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, error: ErrorData) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Value,
}

/// Handle a raw request body
///
/// A body that is not a JSON-RPC request yields a parse error with a null id.
pub async fn handle_body(registry: &ToolRegistry, body: &[u8]) -> Option<JsonRpcResponse> {
    match serde_json::from_slice::<JsonRpcRequest>(body) {
        Ok(request) => handle_request(registry, request).await,
        Err(e) => {
            warn!(error = %e, "rejecting malformed request body");
            Some(JsonRpcResponse::failure(
                Value::Null,
                parse_error(format!("Parse error: {e}")),
            ))
        }
    }
}

/// Route one request to its method handler
///
/// Returns `None` for notifications, which get no response.
pub async fn handle_request(
    registry: &ToolRegistry,
    request: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    let method = request.method.as_deref().unwrap_or_default();
    if method == "initialized" || method.starts_with("notifications/") {
        debug!(method, "notification received");
        return None;
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let outcome = match method {
        "initialize" => Ok(initialize_result()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(list_tools(registry)),
        "tools/call" => call_tool(registry, request.params).await,
        "" => {
            warn!("request without a method");
            Err(method_not_found("Unknown method: (missing)"))
        }
        other => {
            warn!(method = other, "unknown method");
            Err(method_not_found(format!("Unknown method: {other}")))
        }
    };

    Some(match outcome {
        Ok(result) => JsonRpcResponse::success(id, result),
        Err(error) => JsonRpcResponse::failure(id, error),
    })
}

fn initialize_result() -> Value {
    let capabilities = serde_json::to_value(ServerCapabilities::builder().enable_tools().build())
        .unwrap_or_else(|_| json!({ "tools": {} }));
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": capabilities,
        "serverInfo": {
            "name": SERVER_NAME,
            "version": env!("CARGO_PKG_VERSION"),
        },
        "instructions": INSTRUCTIONS,
    })
}

fn list_tools(registry: &ToolRegistry) -> Value {
    let tools: Vec<Value> = registry
        .descriptors()
        .iter()
        .map(|d| d.to_listing())
        .collect();
    json!({ "tools": tools })
}

async fn call_tool(registry: &ToolRegistry, params: Option<Value>) -> Result<Value, ErrorData> {
    let params: CallToolParams =
        parse_arguments(params.unwrap_or(Value::Null)).map_err(|e| e.to_error_data())?;
    let Some(name) = params.name.filter(|n| !n.is_empty()) else {
        return Err(AppError::invalid("tools/call requires a tool name").to_error_data());
    };

    let span = info_span!("tool_call", tool = %name, call_id = %Uuid::new_v4());
    let text = registry
        .dispatch(&name, params.arguments)
        .instrument(span)
        .await?;
    Ok(json!({ "content": [{ "type": "text", "text": text }] }))
}
