use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use super::SharedState;
use crate::error::{AppError, AppResult, McpError, McpResult};
use crate::storage::{SessionStatus, Trial, UserRole};
use crate::task_switching::Response;

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        // Session lifecycle
        "session_create" => handle_session_create(state, arguments).await,
        "session_start_training" => handle_start_training(state, arguments).await,
        "session_start_test" => handle_start_test(state, arguments).await,
        "session_current_trial" => handle_current_trial(state, arguments).await,
        "session_record_response" => handle_record_response(state, arguments).await,
        "session_complete" => handle_session_complete(state, arguments).await,
        // Session queries
        "session_get" => handle_session_get(state, arguments).await,
        "session_trials" => handle_session_trials(state, arguments).await,
        "session_results" => handle_session_results(state, arguments).await,
        // Accounts
        "user_login" => handle_user_login(state, arguments).await,
        "user_sessions" => handle_user_sessions(state, arguments).await,
        "user_results" => handle_user_results(state, arguments).await,
        // Administration
        "admin_users_list" => handle_admin_users_list(state).await,
        "admin_user_role" => handle_admin_user_role(state, arguments).await,
        "admin_user_status" => handle_admin_user_status(state, arguments).await,
        "admin_sessions_list" => handle_admin_sessions_list(state, arguments).await,
        "admin_session_delete" => handle_admin_session_delete(state, arguments).await,
        "admin_stats_overview" => handle_admin_stats_overview(state).await,
        "admin_stats_activity" => handle_admin_stats_activity(state, arguments).await,
        "admin_stats_performance" => handle_admin_stats_performance(state).await,
        "admin_cleanup" => handle_admin_cleanup(state, arguments).await,
        // Client configuration
        "config_client" => {
            serde_json::to_value(&state.config.timing).map_err(McpError::Json)
        }
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

// ============================================================================
// Parameter and response types
// ============================================================================

/// Arguments naming a single session.
#[derive(Debug, Deserialize)]
pub struct SessionIdParams {
    pub session_id: String,
}

/// Arguments naming a single user.
#[derive(Debug, Deserialize)]
pub struct UserIdParams {
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionParams {
    /// Owner of the session; anonymous when omitted.
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordResponseParams {
    pub session_id: String,
    /// Key pressed; `null` or omitted for a timeout.
    #[serde(default)]
    pub response: Option<Response>,
    pub response_time_ms: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginParams {
    pub user_id: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UserSessionsParams {
    pub user_id: String,
    #[serde(default)]
    pub completed_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct UserRoleParams {
    pub user_id: String,
    pub role: UserRole,
}

#[derive(Debug, Deserialize)]
pub struct UserStatusParams {
    pub user_id: String,
    pub is_active: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionsListParams {
    #[serde(default)]
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityParams {
    #[serde(default = "default_activity_days")]
    pub days: i64,
}

fn default_activity_days() -> i64 {
    7
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupParams {
    #[serde(default)]
    pub stale_after_days: Option<i64>,
}

/// Result of `session_current_trial`.
#[derive(Debug, Serialize)]
pub struct CurrentTrialResponse {
    pub session_id: String,
    /// `None` once every trial is answered.
    pub trial: Option<Trial>,
}

/// Result of `session_record_response`.
#[derive(Debug, Serialize)]
pub struct RecordResponseResult {
    /// False when no trial was pending.
    pub recorded: bool,
    pub trial: Option<Trial>,
}

// ============================================================================
// Session handlers
// ============================================================================

async fn handle_session_create(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: CreateSessionParams =
        parse_optional_arguments("session_create", arguments)?;
    execute("session_create", async {
        state
            .task_switching
            .create_session(params.user_id.as_deref())
            .await
    })
    .await
}

async fn handle_start_training(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "session_start_training",
        arguments,
        |params: SessionIdParams| async move {
            state.task_switching.start_training(&params.session_id).await
        },
    )
    .await
}

async fn handle_start_test(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "session_start_test",
        arguments,
        |params: SessionIdParams| async move {
            state.task_switching.start_test(&params.session_id).await
        },
    )
    .await
}

async fn handle_current_trial(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "session_current_trial",
        arguments,
        |params: SessionIdParams| async move {
            let trial = state
                .task_switching
                .get_current_trial(&params.session_id)
                .await?;
            Ok::<_, AppError>(CurrentTrialResponse {
                session_id: params.session_id,
                trial,
            })
        },
    )
    .await
}

async fn handle_record_response(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "session_record_response",
        arguments,
        |params: RecordResponseParams| async move {
            let trial = state
                .task_switching
                .record_response(&params.session_id, params.response, params.response_time_ms)
                .await?;
            Ok::<_, AppError>(RecordResponseResult {
                recorded: trial.is_some(),
                trial,
            })
        },
    )
    .await
}

async fn handle_session_complete(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "session_complete",
        arguments,
        |params: SessionIdParams| async move {
            state.task_switching.complete_session(&params.session_id).await
        },
    )
    .await
}

async fn handle_session_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("session_get", arguments, |params: SessionIdParams| async move {
        state.task_switching.get_session(&params.session_id).await
    })
    .await
}

async fn handle_session_trials(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("session_trials", arguments, |params: SessionIdParams| async move {
        state.task_switching.get_session_trials(&params.session_id).await
    })
    .await
}

async fn handle_session_results(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("session_results", arguments, |params: SessionIdParams| async move {
        state.task_switching.get_results(&params.session_id).await
    })
    .await
}

// ============================================================================
// Account handlers
// ============================================================================

async fn handle_user_login(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("user_login", arguments, |params: LoginParams| async move {
        state
            .accounts
            .record_login(&params.user_id, &params.email)
            .await
    })
    .await
}

async fn handle_user_sessions(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler(
        "user_sessions",
        arguments,
        |params: UserSessionsParams| async move {
            state
                .task_switching
                .get_user_sessions(&params.user_id, params.completed_only)
                .await
        },
    )
    .await
}

async fn handle_user_results(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("user_results", arguments, |params: UserIdParams| async move {
        state.task_switching.get_user_results(&params.user_id).await
    })
    .await
}

// ============================================================================
// Admin handlers
// ============================================================================

async fn handle_admin_users_list(state: &SharedState) -> McpResult<Value> {
    execute("admin_users_list", state.admin.list_users()).await
}

async fn handle_admin_user_role(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    execute_handler("admin_user_role", arguments, |params: UserRoleParams| async move {
        state
            .admin
            .update_user_role(&params.user_id, params.role)
            .await
    })
    .await
}

async fn handle_admin_user_status(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "admin_user_status",
        arguments,
        |params: UserStatusParams| async move {
            state
                .admin
                .update_user_status(&params.user_id, params.is_active)
                .await
        },
    )
    .await
}

async fn handle_admin_sessions_list(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: SessionsListParams = parse_optional_arguments("admin_sessions_list", arguments)?;
    execute("admin_sessions_list", state.admin.list_sessions(params.status)).await
}

async fn handle_admin_session_delete(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    execute_handler(
        "admin_session_delete",
        arguments,
        |params: SessionIdParams| async move {
            state.admin.delete_session(&params.session_id).await?;
            Ok::<_, AppError>(serde_json::json!({ "deleted": params.session_id }))
        },
    )
    .await
}

async fn handle_admin_stats_overview(state: &SharedState) -> McpResult<Value> {
    execute("admin_stats_overview", state.admin.overview_stats()).await
}

async fn handle_admin_stats_activity(
    state: &SharedState,
    arguments: Option<Value>,
) -> McpResult<Value> {
    let params: ActivityParams = match arguments {
        Some(args) => parse_arguments("admin_stats_activity", Some(args))?,
        None => ActivityParams {
            days: default_activity_days(),
        },
    };
    execute("admin_stats_activity", state.admin.user_activity(params.days)).await
}

async fn handle_admin_stats_performance(state: &SharedState) -> McpResult<Value> {
    execute("admin_stats_performance", state.admin.session_performance()).await
}

async fn handle_admin_cleanup(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: CleanupParams = parse_optional_arguments("admin_cleanup", arguments)?;
    execute("admin_cleanup", state.admin.cleanup(params.stale_after_days)).await
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Like [`parse_arguments`], for tools whose arguments are all optional.
fn parse_optional_arguments<T: serde::de::DeserializeOwned + Default>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => parse_arguments(tool_name, Some(args)),
        None => Ok(T::default()),
    }
}

/// Await a service operation, logging failures by origin and serializing the result.
async fn execute<R, Fut>(tool_name: &str, operation: Fut) -> McpResult<Value>
where
    R: Serialize,
    Fut: std::future::Future<Output = AppResult<R>>,
{
    let result = operation.await.map_err(|e| {
        if e.is_client_error() {
            warn!(tool = %tool_name, error = %e, "Tool call rejected");
        } else {
            error!(tool = %tool_name, error = %e, "Tool call failed");
        }
        McpError::ExecutionFailed {
            message: e.to_string(),
        }
    })?;

    serde_json::to_value(result).map_err(McpError::Json)
}

/// Generic handler that parses typed arguments and runs a service operation.
///
/// # Type Parameters
/// - `P`: Parameter type (must implement DeserializeOwned)
/// - `R`: Result type (must implement Serialize)
/// - `F`: Async operation that takes P and returns AppResult<R>
async fn execute_handler<P, R, F, Fut>(
    tool_name: &str,
    arguments: Option<Value>,
    operation: F,
) -> McpResult<Value>
where
    P: serde::de::DeserializeOwned,
    R: Serialize,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = AppResult<R>>,
{
    let params: P = parse_arguments(tool_name, arguments)?;
    execute(tool_name, operation(params)).await
}
