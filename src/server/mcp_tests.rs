//! Unit tests for the JSON-RPC server.
//!
//! Tests request/response handling, the tool catalogue, and dispatch through
//! `handle_request` against an in-memory database.

use super::*;
use crate::config::{Config, ProtocolConfig};
use crate::server::AppState;
use crate::storage::SqliteStorage;
use serde_json::json;
use std::sync::Arc;

async fn create_test_server() -> McpServer {
    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    let config = Config {
        protocol: ProtocolConfig {
            training_block_size: 4,
            test_block_size: 8,
            seed: Some(11),
            ..Default::default()
        },
        ..Default::default()
    };
    McpServer::new(Arc::new(AppState::new(config, storage)))
}

fn request(id: i64, method: &str, params: Value) -> JsonRpcRequest {
    JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: Some(json!(id)),
        method: method.to_string(),
        params: Some(params),
    }
}

/// Call a tool and return the parsed text payload and the isError flag.
async fn call_tool(server: &McpServer, name: &str, arguments: Value) -> (Value, bool) {
    let response = server
        .handle_request(request(1, "tools/call", json!({"name": name, "arguments": arguments})))
        .await
        .expect("tools/call must respond");
    let result = response.result.expect("tools/call returns a result");
    let text = result["content"][0]["text"].as_str().unwrap().to_string();
    let is_error = result["isError"].as_bool().unwrap_or(false);
    let payload = serde_json::from_str(&text).unwrap_or(Value::String(text));
    (payload, is_error)
}

// ============================================================================
// JsonRpcResponse tests
// ============================================================================

#[test]
fn test_jsonrpc_response_success_with_id() {
    let response = JsonRpcResponse::success(Some(json!(1)), json!({"result": "ok"}));

    assert_eq!(response.jsonrpc, "2.0");
    assert_eq!(response.id, json!(1));
    assert!(response.error.is_none());
    assert_eq!(response.result.unwrap()["result"], "ok");
}

#[test]
fn test_jsonrpc_response_error_without_id() {
    let response = JsonRpcResponse::error(None, -32700, "Parse error");

    assert_eq!(response.id, Value::Null);
    assert!(response.result.is_none());
    assert_eq!(response.error.unwrap().code, -32700);
}

#[test]
fn test_jsonrpc_error_serialization_omits_data() {
    let response = JsonRpcResponse::error(Some(json!("req-1")), -32601, "Method not found");
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["error"]["code"], -32601);
    assert!(json["error"].get("data").is_none());
    assert!(json.get("result").is_none());
}

// ============================================================================
// Request deserialization tests
// ============================================================================

#[test]
fn test_jsonrpc_request_deserialization() {
    let req: JsonRpcRequest = serde_json::from_value(json!({
        "jsonrpc": "2.0",
        "id": 7,
        "method": "tools/call",
        "params": {"name": "session_get", "arguments": {"session_id": "s"}}
    }))
    .unwrap();

    assert_eq!(req.method, "tools/call");
    assert_eq!(req.id, Some(json!(7)));

    let params: ToolCallParams = serde_json::from_value(req.params.unwrap()).unwrap();
    assert_eq!(params.name, "session_get");
    assert_eq!(params.arguments.unwrap()["session_id"], "s");
}

#[test]
fn test_jsonrpc_notification_no_id() {
    let req: JsonRpcRequest =
        serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
    assert!(req.id.is_none());
    assert!(req.params.is_none());
}

#[test]
fn test_jsonrpc_request_missing_method_field() {
    let result = serde_json::from_str::<JsonRpcRequest>(r#"{"jsonrpc":"2.0","id":1}"#);
    assert!(result.is_err());
}

// ============================================================================
// Tool catalogue tests
// ============================================================================

#[test]
fn test_tool_catalogue_count() {
    assert_eq!(tool_definitions().len(), 22);
}

#[test]
fn test_tool_names_are_unique() {
    let tools = tool_definitions();
    let mut names: Vec<&str> = tools.iter().map(|t| t.name.as_str()).collect();
    names.sort();
    let original_len = names.len();
    names.dedup();

    assert_eq!(names.len(), original_len, "All tool names should be unique");
}

#[test]
fn test_all_tools_have_object_schemas() {
    for tool in tool_definitions() {
        assert!(!tool.description.is_empty(), "{} has no description", tool.name);
        assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
        assert!(tool.input_schema["properties"].is_object(), "{}", tool.name);
        assert_eq!(
            tool.input_schema["additionalProperties"], false,
            "{} should reject unknown properties",
            tool.name
        );
    }
}

#[test]
fn test_record_response_schema() {
    let tool = tool_definitions()
        .into_iter()
        .find(|t| t.name == "session_record_response")
        .unwrap();
    let required = tool.input_schema["required"].as_array().unwrap();

    assert!(required.contains(&json!("session_id")));
    assert!(required.contains(&json!("response_time_ms")));
    assert!(!required.contains(&json!("response")));
    assert_eq!(tool.input_schema["properties"]["response_time_ms"]["minimum"], 0);
    assert_eq!(
        tool.input_schema["properties"]["response_time_ms"]["maximum"],
        MAX_RESPONSE_TIME_MS
    );
}

#[test]
fn test_training_description_names_default_run_length() {
    let tool = tool_definitions()
        .into_iter()
        .find(|t| t.name == "session_start_training")
        .unwrap();
    assert!(tool.description.contains("6 trials by default"));
}

#[test]
fn test_tool_serialization_uses_input_schema_name() {
    let json = serde_json::to_value(&tool_definitions()[0]).unwrap();
    assert!(json.get("inputSchema").is_some());
    assert!(json.get("input_schema").is_none());
}

#[test]
fn test_tool_call_result_serialization() {
    let result = ToolCallResult {
        content: vec![ToolResultContent {
            content_type: "text".to_string(),
            text: "done".to_string(),
        }],
        is_error: None,
    };

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["content"][0]["type"], "text");
    assert!(json.get("isError").is_none());
}

// ============================================================================
// Dispatch tests
// ============================================================================

#[tokio::test]
async fn test_initialize_reports_server_info() {
    let server = create_test_server().await;
    let response = server
        .handle_request(request(1, "initialize", json!({})))
        .await
        .unwrap();

    let result = response.result.unwrap();
    assert_eq!(result["protocolVersion"], "2024-11-05");
    assert_eq!(result["serverInfo"]["name"], env!("CARGO_PKG_NAME"));
}

#[tokio::test]
async fn test_notifications_get_no_response() {
    let server = create_test_server().await;
    let notification = JsonRpcRequest {
        jsonrpc: "2.0".to_string(),
        id: None,
        method: "initialized".to_string(),
        params: None,
    };
    assert!(server.handle_request(notification).await.is_none());
}

#[tokio::test]
async fn test_unknown_method() {
    let server = create_test_server().await;
    let response = server
        .handle_request(request(3, "resources/list", json!({})))
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32601);
}

#[tokio::test]
async fn test_tools_call_missing_params() {
    let server = create_test_server().await;
    let response = server
        .handle_request(JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(json!(4)),
            method: "tools/call".to_string(),
            params: None,
        })
        .await
        .unwrap();
    assert_eq!(response.error.unwrap().code, -32602);
}

#[tokio::test]
async fn test_unknown_tool_is_error_result() {
    let server = create_test_server().await;
    let (payload, is_error) = call_tool(&server, "session_pause", json!({})).await;

    assert!(is_error);
    assert!(payload.as_str().unwrap().contains("Unknown tool: session_pause"));
}

#[tokio::test]
async fn test_full_session_over_tools() {
    let server = create_test_server().await;

    let (session, is_error) = call_tool(&server, "session_create", json!({})).await;
    assert!(!is_error);
    let session_id = session["id"].as_str().unwrap().to_string();
    assert_eq!(session["session_number"], 0);

    let (started, _) = call_tool(
        &server,
        "session_start_training",
        json!({"session_id": session_id}),
    )
    .await;
    assert_eq!(started["trials"].as_array().unwrap().len(), 4);
    assert_eq!(started["session"]["status"], "training");

    for _ in 0..4 {
        let (current, _) = call_tool(
            &server,
            "session_current_trial",
            json!({"session_id": session_id}),
        )
        .await;
        let correct = current["trial"]["correct_response"].clone();
        let (recorded, is_error) = call_tool(
            &server,
            "session_record_response",
            json!({"session_id": session_id, "response": correct, "response_time_ms": 500}),
        )
        .await;
        assert!(!is_error);
        assert_eq!(recorded["recorded"], true);
        assert_eq!(recorded["trial"]["is_correct"], true);
    }

    let (current, _) = call_tool(
        &server,
        "session_current_trial",
        json!({"session_id": session_id}),
    )
    .await;
    assert!(current["trial"].is_null());

    let (results, _) = call_tool(&server, "session_complete", json!({"session_id": session_id})).await;
    assert_eq!(results["accuracy"], 100.0);
    assert_eq!(results["average_response_time"], 500.0);
    assert_eq!(results["error_count"], 0);
}

#[tokio::test]
async fn test_invalid_transition_surfaces_as_error_result() {
    let server = create_test_server().await;
    let (session, _) = call_tool(&server, "session_create", json!({})).await;
    let session_id = session["id"].as_str().unwrap();

    call_tool(&server, "session_complete", json!({"session_id": session_id})).await;
    let (payload, is_error) = call_tool(
        &server,
        "session_start_training",
        json!({"session_id": session_id}),
    )
    .await;

    assert!(is_error);
    assert!(payload.as_str().unwrap().contains("in status completed"));
}

#[tokio::test]
async fn test_config_client_returns_timing() {
    let server = create_test_server().await;
    let (timing, is_error) = call_tool(&server, "config_client", json!({})).await;

    assert!(!is_error);
    assert_eq!(timing["cue_display_ms"], 350);
    assert_eq!(timing["response_timeout_ms"], 2000);
}
