//! Administrative operations over users and sessions.
//!
//! Authorization is the caller's concern; nothing here checks roles.

mod accounts;

pub use accounts::AccountService;

use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::error::{AppResult, StorageError, ToolError};
use crate::storage::{Session, SessionStatus, Storage, TrialStatus, User, UserRole};
use crate::task_switching::SessionLocks;

/// Platform-wide counts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_users: u64,
    pub active_users: u64,
    pub total_sessions: u64,
    pub completed_sessions: u64,
    /// Completed over total sessions, 0-1.
    pub completion_rate: f64,
}

/// Per-user activity over a trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserActivityStats {
    pub user_id: String,
    pub email: String,
    pub total_tests: u32,
    /// Sessions started within the window.
    pub recent_tests: u32,
    pub last_login: Option<DateTime<Utc>>,
    pub is_active: bool,
}

/// Performance summary of one completed session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPerformanceStats {
    pub session_id: String,
    pub user_id: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_trials: u32,
    pub correct_trials: u32,
    /// Fraction correct, 0-1.
    pub accuracy: f64,
    /// Mean response time of correct trials in milliseconds.
    pub average_response_time: f64,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    /// Unfinished sessions marked abandoned.
    pub abandoned_sessions: u32,
    /// Abandoned sessions deleted.
    pub deleted_sessions: u32,
    /// Sessions started before this were considered stale.
    pub cutoff_date: DateTime<Utc>,
    /// Abandoned sessions started before this were deleted.
    pub purge_cutoff_date: DateTime<Utc>,
}

/// User and session management.
#[derive(Clone)]
pub struct AdminService {
    storage: Arc<dyn Storage>,
    locks: Arc<SessionLocks>,
    retention: RetentionConfig,
}

impl AdminService {
    /// Create an admin service. `locks` must be shared with the session service.
    pub fn new(
        storage: Arc<dyn Storage>,
        locks: Arc<SessionLocks>,
        retention: RetentionConfig,
    ) -> Self {
        Self {
            storage,
            locks,
            retention,
        }
    }

    pub async fn list_users(&self) -> AppResult<Vec<User>> {
        Ok(self.storage.list_users().await?)
    }

    /// Change a user's role.
    pub async fn update_user_role(&self, user_id: &str, role: UserRole) -> AppResult<User> {
        let user = self.load_user(user_id).await?;
        let user = User {
            role,
            updated_at: Some(Utc::now()),
            ..user
        };
        self.storage.update_user(&user).await?;

        info!(user_id = %user.id, role = %role, "User role updated");
        Ok(user)
    }

    /// Activate or deactivate a user.
    pub async fn update_user_status(&self, user_id: &str, is_active: bool) -> AppResult<User> {
        let user = self.load_user(user_id).await?;
        let user = User {
            is_active,
            updated_at: Some(Utc::now()),
            ..user
        };
        self.storage.update_user(&user).await?;

        info!(user_id = %user.id, is_active, "User status updated");
        Ok(user)
    }

    /// All sessions, newest first, optionally restricted to one status.
    pub async fn list_sessions(&self, status: Option<SessionStatus>) -> AppResult<Vec<Session>> {
        let sessions = self.storage.list_sessions().await?;
        Ok(match status {
            Some(status) => sessions.into_iter().filter(|s| s.status == status).collect(),
            None => sessions,
        })
    }

    /// Delete a session with its trials and results. Deleting a missing session is a no-op.
    pub async fn delete_session(&self, session_id: &str) -> AppResult<()> {
        let _guard = self.locks.acquire(session_id).await;
        self.storage.delete_session(session_id).await?;
        info!(session_id, "Session deleted");
        Ok(())
    }

    pub async fn overview_stats(&self) -> AppResult<AdminStats> {
        let users = self.storage.list_users().await?;
        let sessions = self.storage.list_sessions().await?;

        let total_sessions = sessions.len() as u64;
        let completed_sessions = sessions.iter().filter(|s| s.is_completed()).count() as u64;

        Ok(AdminStats {
            total_users: users.len() as u64,
            active_users: users.iter().filter(|u| u.is_active).count() as u64,
            total_sessions,
            completed_sessions,
            completion_rate: if total_sessions > 0 {
                completed_sessions as f64 / total_sessions as f64
            } else {
                0.0
            },
        })
    }

    /// Activity per user over the last `days` days.
    pub async fn user_activity(&self, days: i64) -> AppResult<Vec<UserActivityStats>> {
        let cutoff = days_before(Utc::now(), days, "days")?;
        let mut stats = Vec::new();

        for user in self.storage.list_users().await? {
            let sessions = self.storage.get_user_sessions(&user.id, false).await?;
            let recent = sessions.iter().filter(|s| s.start_time > cutoff).count();

            stats.push(UserActivityStats {
                recent_tests: recent as u32,
                total_tests: user.total_tests_completed,
                last_login: user.last_login,
                is_active: user.is_active,
                email: user.email,
                user_id: user.id,
            });
        }

        Ok(stats)
    }

    /// Accuracy and speed of every completed session.
    pub async fn session_performance(&self) -> AppResult<Vec<SessionPerformanceStats>> {
        let mut stats = Vec::new();

        for session in self.storage.list_sessions().await? {
            if !session.is_completed() {
                continue;
            }

            let trials = self.storage.get_session_trials(&session.id).await?;
            let answered: Vec<_> = trials
                .iter()
                .filter(|t| t.status == TrialStatus::Completed)
                .collect();
            let correct_rts: Vec<i64> = answered
                .iter()
                .filter(|t| t.is_correct == Some(true))
                .filter_map(|t| t.response_time_ms)
                .collect();
            let correct = answered
                .iter()
                .filter(|t| t.is_correct == Some(true))
                .count();

            stats.push(SessionPerformanceStats {
                session_id: session.id,
                user_id: session.user_id,
                start_time: session.start_time,
                end_time: session.end_time,
                total_trials: answered.len() as u32,
                correct_trials: correct as u32,
                accuracy: if answered.is_empty() {
                    0.0
                } else {
                    correct as f64 / answered.len() as f64
                },
                average_response_time: if correct_rts.is_empty() {
                    0.0
                } else {
                    correct_rts.iter().map(|&rt| rt as f64).sum::<f64>() / correct_rts.len() as f64
                },
            });
        }

        Ok(stats)
    }

    /// Retire stale sessions.
    ///
    /// Unfinished sessions started more than `stale_after_days` ago (configured default when
    /// `None`) are marked abandoned; abandoned sessions older than the purge threshold are
    /// deleted.
    pub async fn cleanup(&self, stale_after_days: Option<i64>) -> AppResult<CleanupResult> {
        let stale_after_days = stale_after_days.unwrap_or(self.retention.stale_after_days);

        let now = Utc::now();
        let cutoff_date = days_before(now, stale_after_days, "stale_after_days")?;
        let purge_cutoff_date =
            days_before(now, self.retention.purge_after_days, "purge_after_days")?;

        let mut abandoned = 0u32;
        let mut deleted = 0u32;

        for session in self.storage.list_sessions().await? {
            let _guard = self.locks.acquire(&session.id).await;

            // Re-read under the lock; the listing may be stale.
            let Some(session) = self.storage.get_session(&session.id).await? else {
                continue;
            };

            if !session.status.is_terminal() && session.start_time < cutoff_date {
                let session = Session {
                    status: SessionStatus::Abandoned,
                    ..session
                };
                self.storage.update_session(&session).await?;
                warn!(session_id = %session.id, "Stale session abandoned");
                abandoned += 1;
            } else if session.status == SessionStatus::Abandoned
                && session.start_time < purge_cutoff_date
            {
                self.storage.delete_session(&session.id).await?;
                warn!(session_id = %session.id, "Abandoned session purged");
                deleted += 1;
            }
        }

        info!(
            abandoned,
            deleted,
            cutoff = %cutoff_date,
            "Cleanup finished"
        );
        Ok(CleanupResult {
            abandoned_sessions: abandoned,
            deleted_sessions: deleted,
            cutoff_date,
            purge_cutoff_date,
        })
    }

    async fn load_user(&self, user_id: &str) -> AppResult<User> {
        self.storage.get_user(user_id).await?.ok_or_else(|| {
            StorageError::UserNotFound {
                user_id: user_id.to_string(),
            }
            .into()
        })
    }
}

/// The instant `days` days before `now`. Negative or unrepresentable windows are rejected.
fn days_before(now: DateTime<Utc>, days: i64, field: &str) -> AppResult<DateTime<Utc>> {
    let reason = if days < 0 {
        "must not be negative".to_string()
    } else {
        match TimeDelta::try_days(days).and_then(|window| now.checked_sub_signed(window)) {
            Some(cutoff) => return Ok(cutoff),
            None => format!("{} days is out of range", days),
        }
    };

    Err(ToolError::Validation {
        field: field.to_string(),
        reason,
    }
    .into())
}
