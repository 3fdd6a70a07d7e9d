//! Storage layer for test session persistence.
//!
//! This module provides SQLite-based storage for users, test sessions, trials,
//! and computed results.

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageResult;
use crate::task_switching::{
    BlockKind, Color, Congruency, PerformanceMetrics, Response, Shape, TaskType, TrialSpec,
};

/// A single run of the task-switching test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning user, `None` for anonymous sessions.
    pub user_id: Option<String>,
    /// Ordinal of this session among the user's sessions (0 when anonymous).
    pub session_number: u32,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// When the session was created.
    pub start_time: DateTime<Utc>,
    /// When the session was completed.
    pub end_time: Option<DateTime<Utc>>,
    /// Trials generated so far across all blocks.
    pub total_trials: u32,
    /// Trials answered so far.
    pub completed_trials: u32,
}

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created, no trials yet.
    #[default]
    Created,
    /// Training block in progress.
    Training,
    /// Test block in progress.
    Testing,
    /// Results computed.
    Completed,
    /// Left unfinished and retired by cleanup.
    Abandoned,
}

impl SessionStatus {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Created => write!(f, "created"),
            SessionStatus::Training => write!(f, "training"),
            SessionStatus::Testing => write!(f, "testing"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Abandoned => write!(f, "abandoned"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(SessionStatus::Created),
            "training" => Ok(SessionStatus::Training),
            "testing" => Ok(SessionStatus::Testing),
            "completed" => Ok(SessionStatus::Completed),
            "abandoned" => Ok(SessionStatus::Abandoned),
            _ => Err(format!("Unknown session status: {}", s)),
        }
    }
}

impl Session {
    /// Create a new session in the `Created` state.
    pub fn new(user_id: Option<String>, session_number: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            session_number,
            status: SessionStatus::Created,
            start_time: Utc::now(),
            end_time: None,
            total_trials: 0,
            completed_trials: 0,
        }
    }

    /// Whether the session has finished normally.
    pub fn is_completed(&self) -> bool {
        self.status == SessionStatus::Completed
    }
}

/// Status of a single trial.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    /// Awaiting a response.
    #[default]
    Pending,
    /// Response recorded and scored.
    Completed,
}

impl std::fmt::Display for TrialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrialStatus::Pending => write!(f, "pending"),
            TrialStatus::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for TrialStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TrialStatus::Pending),
            "completed" => Ok(TrialStatus::Completed),
            _ => Err(format!("Unknown trial status: {}", s)),
        }
    }
}

/// One stimulus presentation and, once answered, its response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Unique trial identifier.
    pub id: String,
    /// Parent session ID.
    pub session_id: String,
    /// Block the trial belongs to.
    pub block: BlockKind,
    /// 1-based position within the block.
    pub trial_number: u32,
    /// Cued task.
    pub task_type: TaskType,
    /// Stimulus shape.
    pub stimulus_shape: Shape,
    /// Stimulus color.
    pub stimulus_color: Color,
    /// Response required by the cued task.
    pub correct_response: Response,
    /// Congruency of the stimulus pair.
    pub congruency: Congruency,
    /// Task differs from the preceding trial.
    pub is_switch_trial: bool,
    /// Pending or completed.
    pub status: TrialStatus,
    /// Response given, `None` for a timeout or while pending.
    pub user_response: Option<Response>,
    /// Reaction time in milliseconds.
    pub response_time_ms: Option<i64>,
    /// Whether the response matched `correct_response`.
    pub is_correct: Option<bool>,
    /// When the trial was generated.
    pub stimulus_onset_time: DateTime<Utc>,
    /// When the response was recorded.
    pub responded_at: Option<DateTime<Utc>>,
}

impl Trial {
    /// Create a pending trial from a generated specification.
    pub fn from_spec(
        session_id: impl Into<String>,
        block: BlockKind,
        trial_number: u32,
        spec: &TrialSpec,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            block,
            trial_number,
            task_type: spec.task_type,
            stimulus_shape: spec.shape,
            stimulus_color: spec.color,
            correct_response: spec.correct_response,
            congruency: spec.congruency,
            is_switch_trial: spec.is_switch_trial,
            status: TrialStatus::Pending,
            user_response: None,
            response_time_ms: None,
            is_correct: None,
            stimulus_onset_time: Utc::now(),
            responded_at: None,
        }
    }

    /// Copy of this trial with a scored response. A missing response is always incorrect.
    pub fn answered(&self, response: Option<Response>, response_time_ms: i64) -> Self {
        Self {
            user_response: response,
            response_time_ms: Some(response_time_ms),
            is_correct: Some(response == Some(self.correct_response)),
            status: TrialStatus::Completed,
            responded_at: Some(Utc::now()),
            ..self.clone()
        }
    }

    /// Whether the trial is still waiting for a response.
    pub fn is_pending(&self) -> bool {
        self.status == TrialStatus::Pending
    }
}

/// Results computed when a session completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    /// Unique results identifier.
    pub id: String,
    /// Session the results belong to.
    pub session_id: String,
    /// Computed metrics.
    #[serde(flatten)]
    pub metrics: PerformanceMetrics,
    /// When the results were computed.
    pub created_at: DateTime<Utc>,
}

impl TestResults {
    /// Wrap computed metrics for a session.
    pub fn new(session_id: impl Into<String>, metrics: PerformanceMetrics) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            metrics,
            created_at: Utc::now(),
        }
    }
}

/// Account role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Regular participant.
    #[default]
    User,
    /// Can manage users and sessions.
    Admin,
    /// Administrator with unrestricted access.
    SuperAdmin,
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::User => write!(f, "user"),
            UserRole::Admin => write!(f, "admin"),
            UserRole::SuperAdmin => write!(f, "super_admin"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(UserRole::User),
            "admin" => Ok(UserRole::Admin),
            "super_admin" => Ok(UserRole::SuperAdmin),
            _ => Err(format!("Unknown user role: {}", s)),
        }
    }
}

/// A participant account, keyed by the identity provider's subject ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Identity provider subject ID.
    pub id: String,
    /// Email address.
    pub email: String,
    /// Account role.
    pub role: UserRole,
    /// Whether the account may take tests.
    pub is_active: bool,
    /// Completed test sessions.
    pub total_tests_completed: u32,
    /// Last recorded login.
    pub last_login: Option<DateTime<Utc>>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last modified.
    pub updated_at: Option<DateTime<Utc>>,
}

impl User {
    /// Create a new active user with the default role.
    pub fn new(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: email.into(),
            role: UserRole::User,
            is_active: true,
            total_tests_completed: 0,
            last_login: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Set the role.
    pub fn with_role(mut self, role: UserRole) -> Self {
        self.role = role;
        self
    }
}

/// Storage trait for database operations.
///
/// This trait defines all persistence operations for users, test sessions,
/// trials, and results.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Storage: Send + Sync {
    // Session operations

    /// Create a new session.
    async fn create_session(&self, session: &Session) -> StorageResult<()>;
    /// Get a session by ID.
    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>>;
    /// Update an existing session.
    async fn update_session(&self, session: &Session) -> StorageResult<()>;
    /// Delete a session and its trials and results.
    async fn delete_session(&self, id: &str) -> StorageResult<()>;
    /// List all sessions, newest first.
    async fn list_sessions(&self) -> StorageResult<Vec<Session>>;
    /// List a user's sessions, newest first.
    async fn get_user_sessions(
        &self,
        user_id: &str,
        completed_only: bool,
    ) -> StorageResult<Vec<Session>>;
    /// Count all sessions owned by a user.
    async fn count_user_sessions(&self, user_id: &str) -> StorageResult<u32>;

    // Trial operations

    /// Persist a generated block of trials atomically.
    async fn create_trials(&self, trials: &[Trial]) -> StorageResult<()>;
    /// Update an existing trial.
    async fn update_trial(&self, trial: &Trial) -> StorageResult<()>;
    /// Get all trials of a session in presentation order.
    async fn get_session_trials(&self, session_id: &str) -> StorageResult<Vec<Trial>>;

    // Results operations

    /// Persist computed results.
    async fn create_results(&self, results: &TestResults) -> StorageResult<()>;
    /// Get the results of a session.
    async fn get_results(&self, session_id: &str) -> StorageResult<Option<TestResults>>;

    // Atomic transitions

    /// Persist a newly generated block and the session that now references it, in one
    /// transaction.
    async fn start_block(&self, trials: &[Trial], session: &Session) -> StorageResult<()>;
    /// Persist an answered trial and the session's updated counters, in one transaction.
    async fn save_response(&self, trial: &Trial, session: &Session) -> StorageResult<()>;
    /// Persist results and the completed session, in one transaction.
    async fn complete_session(
        &self,
        results: &TestResults,
        session: &Session,
    ) -> StorageResult<()>;

    // User operations

    /// Create a new user.
    async fn create_user(&self, user: &User) -> StorageResult<()>;
    /// Get a user by ID.
    async fn get_user(&self, id: &str) -> StorageResult<Option<User>>;
    /// Update an existing user.
    async fn update_user(&self, user: &User) -> StorageResult<()>;
    /// List all users.
    async fn list_users(&self) -> StorageResult<Vec<User>>;
}
