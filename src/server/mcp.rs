//! MCP-style JSON-RPC 2.0 server for the task-switching test.
//!
//! This module provides the core MCP server implementation including:
//! - JSON-RPC 2.0 request/response handling
//! - Tool definitions and schemas
//! - Stdio-based server communication

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error, info};

use super::{handle_tool_call, SharedState};
use crate::task_switching::MAX_RESPONSE_TIME_MS;

#[cfg(test)]
#[path = "mcp_tests.rs"]
mod mcp_tests;

/// JSON-RPC 2.0 request structure.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// JSON-RPC version (must be "2.0").
    pub jsonrpc: String,
    /// Request identifier (None for notifications).
    pub id: Option<Value>,
    /// The method name to invoke.
    pub method: String,
    /// Optional parameters for the method.
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response structure.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    /// JSON-RPC version (always "2.0").
    pub jsonrpc: String,
    /// Request identifier (null if notification, must always be present per spec).
    pub id: Value,
    /// The result on success (mutually exclusive with error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error on failure (mutually exclusive with result).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    /// Error code (negative for predefined errors).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// MCP server information returned during initialization.
#[derive(Debug, Serialize)]
pub struct ServerInfo {
    /// The server name identifier.
    pub name: String,
    /// The server version string.
    pub version: String,
}

/// MCP server capabilities advertised to clients.
#[derive(Debug, Serialize)]
pub struct Capabilities {
    /// Tool-related capabilities.
    pub tools: ToolCapabilities,
}

/// Tool-specific capabilities.
#[derive(Debug, Serialize)]
pub struct ToolCapabilities {
    /// Whether the tool list can change dynamically.
    #[serde(rename = "listChanged")]
    pub list_changed: bool,
}

/// Result of the MCP initialize handshake.
#[derive(Debug, Serialize)]
pub struct InitializeResult {
    /// The MCP protocol version supported.
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    /// Server capabilities.
    pub capabilities: Capabilities,
    /// Server identification information.
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// MCP tool definition with JSON Schema.
#[derive(Debug, Clone, Serialize)]
pub struct Tool {
    /// Unique tool name (used in tool calls).
    pub name: String,
    /// Human-readable description of the tool.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

/// Parameters for a tools/call request.
#[derive(Debug, Deserialize)]
pub struct ToolCallParams {
    /// The name of the tool to invoke.
    pub name: String,
    /// Optional arguments for the tool.
    #[serde(default)]
    pub arguments: Option<Value>,
}

/// Content item within a tool result.
#[derive(Debug, Serialize)]
pub struct ToolResultContent {
    /// The content type (e.g., "text").
    #[serde(rename = "type")]
    pub content_type: String,
    /// The text content of the result.
    pub text: String,
}

/// Result of a tool invocation.
#[derive(Debug, Serialize)]
pub struct ToolCallResult {
    /// The result content items.
    pub content: Vec<ToolResultContent>,
    /// Whether the result represents an error.
    #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// MCP Server running over stdio.
///
/// Handles JSON-RPC 2.0 messages over stdin/stdout for MCP protocol
/// communication with clients.
pub struct McpServer {
    /// Shared application state.
    state: SharedState,
}

impl McpServer {
    /// Create a new MCP server
    pub fn new(state: SharedState) -> Self {
        Self { state }
    }

    /// Run the server using async stdio
    pub async fn run(&self) -> std::io::Result<()> {
        info!("Task-switching test server starting...");

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut reader = BufReader::new(stdin);
        let mut line = String::new();

        loop {
            line.clear();
            let bytes_read = reader.read_line(&mut line).await?;

            // EOF reached
            if bytes_read == 0 {
                info!("EOF received, shutting down");
                break;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            debug!(request = %trimmed, "Received request");

            let response = match serde_json::from_str::<JsonRpcRequest>(trimmed) {
                Ok(request) => self.handle_request(request).await,
                Err(e) => {
                    error!(error = %e, "Failed to parse request");
                    Some(JsonRpcResponse::error(
                        None,
                        -32700,
                        format!("Parse error: {}", e),
                    ))
                }
            };

            // Only send response if not a notification (per JSON-RPC 2.0 spec)
            if let Some(response) = response {
                let response_json = serde_json::to_string(&response)?;
                debug!(response = %response_json, "Sending response");

                stdout.write_all(response_json.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
                stdout.flush().await?;
            }
        }

        Ok(())
    }

    /// Handle a single JSON-RPC request
    /// Returns None for notifications (requests without id) per JSON-RPC 2.0 spec
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        // Check if this is a notification (no id = no response required)
        let is_notification = request.id.is_none();

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request.id)),
            "initialized" => {
                // Notification - no response per JSON-RPC 2.0
                debug!("Received initialized notification");
                None
            }
            "notifications/cancelled" => {
                // Notification - no response
                debug!("Received cancelled notification");
                None
            }
            "tools/list" => Some(self.handle_tools_list(request.id)),
            "tools/call" => Some(self.handle_tool_call(request.id, request.params).await),
            "ping" => Some(JsonRpcResponse::success(
                request.id,
                Value::Object(Default::default()),
            )),
            method => {
                // For unknown methods, only respond if it's a request (has id)
                if is_notification {
                    debug!(method = %method, "Unknown notification, ignoring");
                    None
                } else {
                    error!(method = %method, "Unknown method");
                    Some(JsonRpcResponse::error(
                        request.id,
                        -32601,
                        format!("Method not found: {}", method),
                    ))
                }
            }
        }
    }

    /// Handle initialize request
    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling initialize request");

        let result = InitializeResult {
            protocol_version: "2024-11-05".to_string(),
            capabilities: Capabilities {
                tools: ToolCapabilities {
                    list_changed: false,
                },
            },
            server_info: ServerInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        match serde_json::to_value(result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize initialize result");
                JsonRpcResponse::error(id, -32603, format!("Internal error: {}", e))
            }
        }
    }

    /// Handle tools/list request
    fn handle_tools_list(&self, id: Option<Value>) -> JsonRpcResponse {
        info!("Handling tools/list request");

        let tools = tool_definitions();

        JsonRpcResponse::success(
            id,
            serde_json::json!({
                "tools": tools
            }),
        )
    }

    /// Handle tools/call request
    async fn handle_tool_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match params {
            Some(p) => match serde_json::from_value(p) {
                Ok(p) => p,
                Err(e) => {
                    return JsonRpcResponse::error(id, -32602, format!("Invalid params: {}", e));
                }
            },
            None => {
                return JsonRpcResponse::error(id, -32602, "Missing params");
            }
        };

        info!(tool = %params.name, "Handling tool call");

        let (content, is_error) =
            match handle_tool_call(&self.state, &params.name, params.arguments).await {
                Ok(result) => {
                    let text = serde_json::to_string_pretty(&result).unwrap_or_else(|e| {
                        error!(error = %e, "Failed to serialize tool result");
                        format!("{{\"error\": \"Serialization failed: {}\"}}", e)
                    });
                    (
                        ToolResultContent {
                            content_type: "text".to_string(),
                            text,
                        },
                        None,
                    )
                }
                Err(e) => (
                    ToolResultContent {
                        content_type: "text".to_string(),
                        text: format!("Error: {}", e),
                    },
                    Some(true),
                ),
            };

        let tool_result = ToolCallResult {
            content: vec![content],
            is_error,
        };

        match serde_json::to_value(tool_result) {
            Ok(val) => JsonRpcResponse::success(id, val),
            Err(e) => {
                error!(error = %e, "Failed to serialize tool call result");
                JsonRpcResponse::error(id.clone(), -32603, format!("Internal error: {}", e))
            }
        }
    }
}

fn session_id_schema(description: &str) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "session_id": {
                "type": "string",
                "description": description
            }
        },
        "required": ["session_id"],
        "additionalProperties": false
    })
}

fn user_id_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "user_id": {
                "type": "string",
                "description": "Identity provider subject ID"
            }
        },
        "required": ["user_id"],
        "additionalProperties": false
    })
}

fn no_arguments_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {},
        "additionalProperties": false
    })
}

fn tool(name: &str, description: &str, input_schema: Value) -> Tool {
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Every tool the server exposes, in catalogue order.
pub fn tool_definitions() -> Vec<Tool> {
    vec![
        // Session lifecycle
        get_session_create_tool(),
        tool(
            "session_start_training",
            "Generate the training block (fixed-length runs per task, 6 trials by default, alternating, starting with color). Only valid for a newly created session.",
            session_id_schema("Session to start training for"),
        ),
        tool(
            "session_start_test",
            "Generate the test block with exact switch and congruency quotas. Valid after creation or during training.",
            session_id_schema("Session to start the test block for"),
        ),
        tool(
            "session_current_trial",
            "Get the earliest unanswered trial across both blocks. Returns a null trial once every trial is answered.",
            session_id_schema("Session to inspect"),
        ),
        get_record_response_tool(),
        tool(
            "session_complete",
            "Compute and store performance metrics (accuracy, switch cost, task interference) and close the session.",
            session_id_schema("Session to complete"),
        ),
        // Session queries
        tool(
            "session_get",
            "Get a session's status and trial counters.",
            session_id_schema("Session to fetch"),
        ),
        tool(
            "session_trials",
            "List a session's trials in presentation order: training block first, then test block.",
            session_id_schema("Session whose trials to list"),
        ),
        tool(
            "session_results",
            "Get the stored results of a completed session, or null while it is in progress.",
            session_id_schema("Session whose results to fetch"),
        ),
        // Accounts
        get_user_login_tool(),
        get_user_sessions_tool(),
        tool(
            "user_results",
            "List results of a user's completed sessions, newest first.",
            user_id_schema(),
        ),
        // Administration
        tool(
            "admin_users_list",
            "List all user accounts.",
            no_arguments_schema(),
        ),
        get_admin_user_role_tool(),
        get_admin_user_status_tool(),
        get_admin_sessions_list_tool(),
        tool(
            "admin_session_delete",
            "Delete a session with its trials and results. Deleting a missing session succeeds.",
            session_id_schema("Session to delete"),
        ),
        tool(
            "admin_stats_overview",
            "Totals of users, active users, sessions and completed sessions, plus the completion rate (0-1).",
            no_arguments_schema(),
        ),
        get_admin_stats_activity_tool(),
        tool(
            "admin_stats_performance",
            "Accuracy (0-1) and mean correct response time of every completed session.",
            no_arguments_schema(),
        ),
        get_admin_cleanup_tool(),
        // Client configuration
        tool(
            "config_client",
            "Presentation timing for clients: cue display, cue delay, inter-trial interval and response timeout in milliseconds.",
            no_arguments_schema(),
        ),
    ]
}

fn get_session_create_tool() -> Tool {
    Tool {
        name: "session_create".to_string(),
        description: "Create a new task-switching test session. Omit user_id for an anonymous session.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "Owner of the session; must be an existing active user"
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_record_response_tool() -> Tool {
    Tool {
        name: "session_record_response".to_string(),
        description: "Score a response against the current trial. A null response is a timeout and scores incorrect. Returns recorded=false when no trial is pending.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "session_id": {
                    "type": "string",
                    "description": "Session being answered"
                },
                "response": {
                    "type": ["string", "null"],
                    "enum": ["left", "right", null],
                    "description": "Response key, null for a timeout"
                },
                "response_time_ms": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": MAX_RESPONSE_TIME_MS,
                    "description": "Reaction time in milliseconds"
                }
            },
            "required": ["session_id", "response_time_ms"],
            "additionalProperties": false
        }),
    }
}

fn get_user_login_tool() -> Tool {
    Tool {
        name: "user_login".to_string(),
        description: "Record a login: creates the account on first login and stamps the last login time.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "Identity provider subject ID"
                },
                "email": {
                    "type": "string",
                    "description": "Account email address"
                }
            },
            "required": ["user_id", "email"],
            "additionalProperties": false
        }),
    }
}

fn get_user_sessions_tool() -> Tool {
    Tool {
        name: "user_sessions".to_string(),
        description: "List a user's sessions, newest first.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "Identity provider subject ID"
                },
                "completed_only": {
                    "type": "boolean",
                    "default": false,
                    "description": "Only include completed sessions"
                }
            },
            "required": ["user_id"],
            "additionalProperties": false
        }),
    }
}

fn get_admin_user_role_tool() -> Tool {
    Tool {
        name: "admin_user_role".to_string(),
        description: "Change a user's role.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User to update"
                },
                "role": {
                    "type": "string",
                    "enum": ["user", "admin", "super_admin"],
                    "description": "New role"
                }
            },
            "required": ["user_id", "role"],
            "additionalProperties": false
        }),
    }
}

fn get_admin_user_status_tool() -> Tool {
    Tool {
        name: "admin_user_status".to_string(),
        description: "Activate or deactivate a user. Inactive users cannot start sessions.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "user_id": {
                    "type": "string",
                    "description": "User to update"
                },
                "is_active": {
                    "type": "boolean",
                    "description": "New active flag"
                }
            },
            "required": ["user_id", "is_active"],
            "additionalProperties": false
        }),
    }
}

fn get_admin_sessions_list_tool() -> Tool {
    Tool {
        name: "admin_sessions_list".to_string(),
        description: "List all sessions, newest first, optionally filtered by status.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "status": {
                    "type": "string",
                    "enum": ["created", "training", "testing", "completed", "abandoned"],
                    "description": "Only include sessions in this status"
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_admin_stats_activity_tool() -> Tool {
    Tool {
        name: "admin_stats_activity".to_string(),
        description: "Per-user activity: total completed tests, sessions started within the window, last login and active flag.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "days": {
                    "type": "integer",
                    "minimum": 0,
                    "default": 7,
                    "description": "Window length in days"
                }
            },
            "additionalProperties": false
        }),
    }
}

fn get_admin_cleanup_tool() -> Tool {
    Tool {
        name: "admin_cleanup".to_string(),
        description: "Mark unfinished sessions older than the threshold as abandoned and delete abandoned sessions past the retention period.".to_string(),
        input_schema: serde_json::json!({
            "type": "object",
            "properties": {
                "stale_after_days": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Age in days after which unfinished sessions are abandoned (default from configuration)"
                }
            },
            "additionalProperties": false
        }),
    }
}
