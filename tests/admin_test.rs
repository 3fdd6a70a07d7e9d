//! Integration tests for account bookkeeping and administration.

use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

use task_switching_lab::config::{Config, ProtocolConfig, RetentionConfig};
use task_switching_lab::server::AppState;
use task_switching_lab::storage::{Session, SessionStatus, SqliteStorage, Storage, UserRole};
use task_switching_lab::task_switching::Response;

async fn create_test_state() -> AppState {
    let storage = SqliteStorage::new_in_memory()
        .await
        .expect("Failed to create in-memory storage");
    let config = Config {
        protocol: ProtocolConfig {
            training_block_size: 4,
            test_block_size: 10,
            seed: Some(21),
            ..Default::default()
        },
        retention: RetentionConfig {
            stale_after_days: 30,
            purge_after_days: 90,
        },
        ..Default::default()
    };
    AppState::new(config, storage)
}

/// Insert a session that started `days_ago` days ago.
async fn aged_session(state: &AppState, status: SessionStatus, days_ago: i64) -> Session {
    let session = Session {
        status,
        start_time: Utc::now() - Duration::days(days_ago),
        ..Session::new(None, 0)
    };
    state.storage.create_session(&session).await.unwrap();
    session
}

async fn run_session(state: &AppState, user_id: Option<&str>, correct: bool) -> Session {
    let session = state.task_switching.create_session(user_id).await.unwrap();
    state.task_switching.start_training(&session.id).await.unwrap();
    while let Some(trial) = state
        .task_switching
        .get_current_trial(&session.id)
        .await
        .unwrap()
    {
        let response = if correct {
            trial.correct_response
        } else {
            trial.correct_response.opposite()
        };
        state
            .task_switching
            .record_response(&session.id, Some(response), 400)
            .await
            .unwrap();
    }
    state
        .task_switching
        .complete_session(&session.id)
        .await
        .unwrap();
    session
}

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn test_login_creates_then_updates_user() {
    let state = create_test_state().await;

    let created = state
        .accounts
        .record_login("sub-1", "first@example.com")
        .await
        .unwrap();
    assert_eq!(created.role, UserRole::User);
    assert!(created.is_active);
    assert!(created.last_login.is_some());

    let updated = state
        .accounts
        .record_login("sub-1", "second@example.com")
        .await
        .unwrap();
    assert_eq!(updated.email, "second@example.com");
    assert_eq!(updated.created_at.timestamp(), created.created_at.timestamp());

    assert_eq!(state.admin.list_users().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_login_rejects_bad_email() {
    let state = create_test_state().await;
    let err = state
        .accounts
        .record_login("sub-1", "not-an-email")
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_role_and_status_updates() {
    let state = create_test_state().await;
    state
        .accounts
        .record_login("sub-1", "p@example.com")
        .await
        .unwrap();

    let promoted = state
        .admin
        .update_user_role("sub-1", UserRole::Admin)
        .await
        .unwrap();
    assert_eq!(promoted.role, UserRole::Admin);

    state.admin.update_user_status("sub-1", false).await.unwrap();
    let stored = state.accounts.get_user("sub-1").await.unwrap();
    assert_eq!(stored.role, UserRole::Admin);
    assert!(!stored.is_active);

    // Deactivated users cannot start new sessions
    assert!(state
        .task_switching
        .create_session(Some("sub-1"))
        .await
        .is_err());
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn test_overview_stats() {
    let state = create_test_state().await;
    state
        .accounts
        .record_login("sub-1", "a@example.com")
        .await
        .unwrap();
    state
        .accounts
        .record_login("sub-2", "b@example.com")
        .await
        .unwrap();
    state.admin.update_user_status("sub-2", false).await.unwrap();

    run_session(&state, Some("sub-1"), true).await;
    state.task_switching.create_session(None).await.unwrap();

    let stats = state.admin.overview_stats().await.unwrap();
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.active_users, 1);
    assert_eq!(stats.total_sessions, 2);
    assert_eq!(stats.completed_sessions, 1);
    assert_eq!(stats.completion_rate, 0.5);
}

#[tokio::test]
async fn test_user_activity_window() {
    let state = create_test_state().await;
    state
        .accounts
        .record_login("sub-1", "a@example.com")
        .await
        .unwrap();
    run_session(&state, Some("sub-1"), true).await;

    let old = Session {
        start_time: Utc::now() - Duration::days(20),
        ..Session::new(Some("sub-1".to_string()), 2)
    };
    state.storage.create_session(&old).await.unwrap();

    let activity = state.admin.user_activity(7).await.unwrap();
    assert_eq!(activity.len(), 1);
    assert_eq!(activity[0].user_id, "sub-1");
    assert_eq!(activity[0].total_tests, 1);
    assert_eq!(activity[0].recent_tests, 1);
    assert!(activity[0].last_login.is_some());

    assert!(state.admin.user_activity(-1).await.is_err());
}

#[tokio::test]
async fn test_session_performance() {
    let state = create_test_state().await;
    let good = run_session(&state, None, true).await;
    let bad = run_session(&state, None, false).await;
    state.task_switching.create_session(None).await.unwrap();

    let performance = state.admin.session_performance().await.unwrap();
    assert_eq!(performance.len(), 2);

    let good_stats = performance.iter().find(|p| p.session_id == good.id).unwrap();
    assert_eq!(good_stats.total_trials, 4);
    assert_eq!(good_stats.accuracy, 1.0);
    assert_eq!(good_stats.average_response_time, 400.0);

    let bad_stats = performance.iter().find(|p| p.session_id == bad.id).unwrap();
    assert_eq!(bad_stats.correct_trials, 0);
    assert_eq!(bad_stats.accuracy, 0.0);
    assert_eq!(bad_stats.average_response_time, 0.0);
}

// ============================================================================
// Session management
// ============================================================================

#[tokio::test]
async fn test_list_sessions_by_status() {
    let state = create_test_state().await;
    run_session(&state, None, true).await;
    state.task_switching.create_session(None).await.unwrap();

    assert_eq!(state.admin.list_sessions(None).await.unwrap().len(), 2);
    let completed = state
        .admin
        .list_sessions(Some(SessionStatus::Completed))
        .await
        .unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_delete_session_removes_everything() {
    let state = create_test_state().await;
    let session = run_session(&state, None, true).await;

    state.admin.delete_session(&session.id).await.unwrap();

    assert!(state.storage.get_session(&session.id).await.unwrap().is_none());
    assert!(state
        .storage
        .get_session_trials(&session.id)
        .await
        .unwrap()
        .is_empty());
    assert!(state.storage.get_results(&session.id).await.unwrap().is_none());

    // Missing session is a no-op
    state.admin.delete_session(&session.id).await.unwrap();
}

// ============================================================================
// Cleanup
// ============================================================================

#[tokio::test]
async fn test_cleanup_abandons_stale_sessions() {
    let state = create_test_state().await;
    let stale_training = aged_session(&state, SessionStatus::Training, 45).await;
    let stale_created = aged_session(&state, SessionStatus::Created, 31).await;
    let fresh = aged_session(&state, SessionStatus::Testing, 2).await;
    let old_completed = aged_session(&state, SessionStatus::Completed, 200).await;

    let result = state.admin.cleanup(None).await.unwrap();
    assert_eq!(result.abandoned_sessions, 2);
    assert_eq!(result.deleted_sessions, 0);
    assert!(result.cutoff_date > result.purge_cutoff_date);

    let status = |id: String| {
        let storage = state.storage.clone();
        async move { storage.get_session(&id).await.unwrap().unwrap().status }
    };
    assert_eq!(status(stale_training.id).await, SessionStatus::Abandoned);
    assert_eq!(status(stale_created.id).await, SessionStatus::Abandoned);
    assert_eq!(status(fresh.id).await, SessionStatus::Testing);
    assert_eq!(status(old_completed.id).await, SessionStatus::Completed);
}

#[tokio::test]
async fn test_cleanup_purges_old_abandoned_sessions() {
    let state = create_test_state().await;
    let ancient = aged_session(&state, SessionStatus::Abandoned, 120).await;
    let recent = aged_session(&state, SessionStatus::Abandoned, 40).await;

    let result = state.admin.cleanup(None).await.unwrap();
    assert_eq!(result.abandoned_sessions, 0);
    assert_eq!(result.deleted_sessions, 1);

    assert!(state.storage.get_session(&ancient.id).await.unwrap().is_none());
    assert!(state.storage.get_session(&recent.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cleanup_custom_window() {
    let state = create_test_state().await;
    let session = aged_session(&state, SessionStatus::Testing, 3).await;

    let result = state.admin.cleanup(Some(1)).await.unwrap();
    assert_eq!(result.abandoned_sessions, 1);

    // Abandoned sessions reject further responses
    let err = state
        .task_switching
        .record_response(&session.id, Some(Response::Left), 100)
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}

#[tokio::test]
async fn test_out_of_range_windows_are_validation_errors() {
    let state = create_test_state().await;

    let err = state.admin.cleanup(Some(1_000_000_000)).await.unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().contains("stale_after_days"));

    let err = state.admin.user_activity(9_000_000_000_000_000_000).await.unwrap_err();
    assert!(err.is_client_error());
    assert!(err.to_string().contains("days"));
}
