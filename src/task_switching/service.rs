//! Session lifecycle and trial state machine.
//!
//! Sessions move CREATED → TRAINING → TESTING → COMPLETED. Every mutating operation runs
//! inside the session's critical section and follows load → build new value → persist.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::generator::{BlockKind, SequenceGenerator};
use super::locks::SessionLocks;
use super::metrics::PerformanceMetrics;
use super::stimulus::{Response, TaskType};
use crate::config::ProtocolConfig;
use crate::error::{AppResult, SessionError, StorageError, ToolError};
use crate::storage::{Session, SessionStatus, Storage, TestResults, Trial, User};

/// Longest accepted reaction time in milliseconds.
pub const MAX_RESPONSE_TIME_MS: i64 = 600_000;

/// A session together with the block of trials just generated for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseStart {
    /// Session after the transition.
    pub session: Session,
    /// Newly generated trials in presentation order.
    pub trials: Vec<Trial>,
}

/// Drives test sessions through their lifecycle.
#[derive(Clone)]
pub struct TaskSwitchingService {
    storage: Arc<dyn Storage>,
    generator: SequenceGenerator,
    rng: Arc<Mutex<StdRng>>,
    locks: Arc<SessionLocks>,
    training_block_size: usize,
    test_block_size: usize,
}

impl TaskSwitchingService {
    /// Create a service over `storage` using the given protocol parameters.
    pub fn new(storage: Arc<dyn Storage>, config: &ProtocolConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            storage,
            generator: SequenceGenerator::new(config),
            rng: Arc::new(Mutex::new(rng)),
            locks: Arc::new(SessionLocks::new()),
            training_block_size: config.training_block_size,
            test_block_size: config.test_block_size,
        }
    }

    /// Replace the random source.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Arc::new(Mutex::new(rng));
        self
    }

    /// Session locks, for other services that mutate sessions.
    pub fn locks(&self) -> Arc<SessionLocks> {
        Arc::clone(&self.locks)
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Create a session in the CREATED state.
    ///
    /// A given `user_id` must name an existing, active user. Its session number counts the
    /// user's prior sessions; anonymous sessions are numbered 0.
    pub async fn create_session(&self, user_id: Option<&str>) -> AppResult<Session> {
        let session_number = match user_id {
            Some(id) => {
                let user = self.load_user(id).await?;
                if !user.is_active {
                    return Err(ToolError::Validation {
                        field: "user_id".to_string(),
                        reason: format!("User {} is inactive", id),
                    }
                    .into());
                }
                self.storage.count_user_sessions(id).await? + 1
            }
            None => 0,
        };

        let session = Session::new(user_id.map(str::to_string), session_number);
        self.storage.create_session(&session).await?;

        info!(
            session_id = %session.id,
            user_id = ?session.user_id,
            session_number,
            "Session created"
        );
        Ok(session)
    }

    /// Generate and persist the training block.
    pub async fn start_training(&self, session_id: &str) -> AppResult<PhaseStart> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.load_session(session_id).await?;

        if session.status != SessionStatus::Created {
            return Err(invalid_transition(&session, "start training for"));
        }

        let trials = self.build_block(&session.id, BlockKind::Training, None);
        let session = Session {
            status: SessionStatus::Training,
            total_trials: trials.len() as u32,
            ..session
        };
        self.storage.start_block(&trials, &session).await?;

        info!(
            session_id = %session.id,
            trials = trials.len(),
            "Training block started"
        );
        Ok(PhaseStart { session, trials })
    }

    /// Generate and persist the test block.
    ///
    /// Allowed straight from CREATED, in which case there is no preceding trial.
    pub async fn start_test(&self, session_id: &str) -> AppResult<PhaseStart> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.load_session(session_id).await?;

        if !matches!(
            session.status,
            SessionStatus::Created | SessionStatus::Training
        ) {
            return Err(invalid_transition(&session, "start test for"));
        }

        let previous = self
            .storage
            .get_session_trials(&session.id)
            .await?
            .iter()
            .rev()
            .find(|t| t.block == BlockKind::Training)
            .map(|t| t.task_type);

        let trials = self.build_block(&session.id, BlockKind::Test, previous);
        let session = Session {
            status: SessionStatus::Testing,
            total_trials: session.total_trials + trials.len() as u32,
            ..session
        };
        self.storage.start_block(&trials, &session).await?;

        info!(
            session_id = %session.id,
            trials = trials.len(),
            previous_task = ?previous,
            "Test block started"
        );
        Ok(PhaseStart { session, trials })
    }

    fn build_block(
        &self,
        session_id: &str,
        kind: BlockKind,
        previous: Option<TaskType>,
    ) -> Vec<Trial> {
        let (size, specs) = {
            let mut rng = self.rng();
            let size = match kind {
                BlockKind::Training => self.training_block_size,
                BlockKind::Test => self.test_block_size,
            };
            (size, self.generator.generate(size, kind, previous, &mut *rng))
        };
        debug!(session_id, block = %kind, size, "Generated trial block");

        specs
            .iter()
            .enumerate()
            .map(|(i, spec)| Trial::from_spec(session_id, kind, i as u32 + 1, spec))
            .collect()
    }

    /// The earliest pending trial across both blocks, if any.
    pub async fn get_current_trial(&self, session_id: &str) -> AppResult<Option<Trial>> {
        let session = self.load_session(session_id).await?;
        let trials = self.storage.get_session_trials(&session.id).await?;
        Ok(trials.into_iter().find(Trial::is_pending))
    }

    /// Score a response against the current pending trial.
    ///
    /// Returns `None` without changing anything when no trial is pending. A `None`
    /// response is a timeout and always scores incorrect.
    pub async fn record_response(
        &self,
        session_id: &str,
        response: Option<Response>,
        response_time_ms: i64,
    ) -> AppResult<Option<Trial>> {
        if !(0..=MAX_RESPONSE_TIME_MS).contains(&response_time_ms) {
            return Err(ToolError::Validation {
                field: "response_time_ms".to_string(),
                reason: format!("must be between 0 and {}", MAX_RESPONSE_TIME_MS),
            }
            .into());
        }

        let _guard = self.locks.acquire(session_id).await;
        let session = self.load_session(session_id).await?;

        if session.status.is_terminal() {
            return Err(invalid_transition(&session, "record a response for"));
        }

        let trials = self.storage.get_session_trials(&session.id).await?;
        let Some(current) = trials.iter().find(|t| t.is_pending()) else {
            warn!(session_id = %session.id, "Response received with no pending trial, ignoring");
            return Ok(None);
        };

        let answered = current.answered(response, response_time_ms);
        let session = Session {
            completed_trials: session.completed_trials + 1,
            ..session
        };
        self.storage.save_response(&answered, &session).await?;

        debug!(
            session_id = %session.id,
            block = %answered.block,
            trial_number = answered.trial_number,
            is_correct = ?answered.is_correct,
            response_time_ms,
            "Response recorded"
        );
        Ok(Some(answered))
    }

    /// Compute and persist results, then close the session.
    pub async fn complete_session(&self, session_id: &str) -> AppResult<TestResults> {
        let _guard = self.locks.acquire(session_id).await;
        let session = self.load_session(session_id).await?;

        if session.status.is_terminal() {
            return Err(invalid_transition(&session, "complete"));
        }

        let trials = self.storage.get_session_trials(&session.id).await?;
        let results = TestResults::new(&session.id, PerformanceMetrics::from_trials(&trials));
        let session = Session {
            status: SessionStatus::Completed,
            end_time: Some(Utc::now()),
            ..session
        };
        self.storage.complete_session(&results, &session).await?;

        if let Some(user_id) = &session.user_id {
            match self.storage.get_user(user_id).await? {
                Some(user) => {
                    let user = User {
                        total_tests_completed: user.total_tests_completed + 1,
                        updated_at: Some(Utc::now()),
                        ..user
                    };
                    self.storage.update_user(&user).await?;
                }
                None => warn!(session_id = %session.id, user_id = %user_id, "Owner no longer exists"),
            }
        }

        info!(
            session_id = %session.id,
            answered = results.metrics.total_trials,
            accuracy = results.metrics.accuracy,
            switch_cost = results.metrics.switch_cost,
            "Session completed"
        );
        Ok(results)
    }

    /// Get a session by ID.
    pub async fn get_session(&self, session_id: &str) -> AppResult<Session> {
        self.load_session(session_id).await
    }

    /// All trials of a session in presentation order.
    pub async fn get_session_trials(&self, session_id: &str) -> AppResult<Vec<Trial>> {
        let session = self.load_session(session_id).await?;
        Ok(self.storage.get_session_trials(&session.id).await?)
    }

    /// Results of a session, `None` until it is completed.
    pub async fn get_results(&self, session_id: &str) -> AppResult<Option<TestResults>> {
        let session = self.load_session(session_id).await?;
        Ok(self.storage.get_results(&session.id).await?)
    }

    /// A user's sessions, newest first.
    pub async fn get_user_sessions(
        &self,
        user_id: &str,
        completed_only: bool,
    ) -> AppResult<Vec<Session>> {
        self.load_user(user_id).await?;
        Ok(self
            .storage
            .get_user_sessions(user_id, completed_only)
            .await?)
    }

    /// Results of a user's completed sessions, newest first.
    pub async fn get_user_results(&self, user_id: &str) -> AppResult<Vec<TestResults>> {
        let sessions = self.get_user_sessions(user_id, true).await?;

        let mut results = Vec::with_capacity(sessions.len());
        for session in &sessions {
            if let Some(r) = self.storage.get_results(&session.id).await? {
                results.push(r);
            }
        }
        Ok(results)
    }

    async fn load_session(&self, session_id: &str) -> AppResult<Session> {
        self.storage
            .get_session(session_id)
            .await?
            .ok_or_else(|| {
                StorageError::SessionNotFound {
                    session_id: session_id.to_string(),
                }
                .into()
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

fn invalid_transition(session: &Session, action: &'static str) -> crate::error::AppError {
    SessionError::InvalidTransition {
        session_id: session.id.clone(),
        status: session.status,
        action,
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::storage::MockStorage;

    fn service(mock: MockStorage) -> TaskSwitchingService {
        TaskSwitchingService::new(Arc::new(mock), &ProtocolConfig::default())
            .with_rng(StdRng::seed_from_u64(7))
    }

    fn session_in(status: SessionStatus) -> Session {
        Session {
            status,
            ..Session::new(None, 0)
        }
    }

    #[tokio::test]
    async fn test_create_session_unknown_user() {
        let mut mock = MockStorage::new();
        mock.expect_get_user().returning(|_| Ok(None));
        mock.expect_create_session().never();

        let err = service(mock).create_session(Some("ghost")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Storage(StorageError::UserNotFound { ref user_id }) if user_id == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_create_session_numbers_after_prior_sessions() {
        let mut mock = MockStorage::new();
        mock.expect_get_user()
            .returning(|id| Ok(Some(User::new(id, "p@example.com"))));
        mock.expect_count_user_sessions().returning(|_| Ok(3));
        mock.expect_create_session().times(1).returning(|_| Ok(()));

        let session = service(mock).create_session(Some("u1")).await.unwrap();
        assert_eq!(session.session_number, 4);
        assert_eq!(session.status, SessionStatus::Created);
    }

    #[tokio::test]
    async fn test_create_session_inactive_user_rejected() {
        let mut mock = MockStorage::new();
        mock.expect_get_user().returning(|id| {
            Ok(Some(User {
                is_active: false,
                ..User::new(id, "p@example.com")
            }))
        });
        mock.expect_create_session().never();

        let err = service(mock).create_session(Some("u1")).await.unwrap_err();
        assert!(matches!(err, AppError::Tool(ToolError::Validation { .. })));
    }

    #[tokio::test]
    async fn test_start_training_missing_session() {
        let mut mock = MockStorage::new();
        mock.expect_get_session().returning(|_| Ok(None));

        let err = service(mock).start_training("nope").await.unwrap_err();
        assert!(err.to_string().contains("Session not found: nope"));
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_start_training_twice_rejected() {
        let session = session_in(SessionStatus::Training);
        let mut mock = MockStorage::new();
        mock.expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        mock.expect_start_block().never();

        let err = service(mock).start_training("s").await.unwrap_err();
        assert!(matches!(err, AppError::Session(_)));
    }

    #[tokio::test]
    async fn test_start_training_persistence_failure_propagates() {
        let session = session_in(SessionStatus::Created);
        let mut mock = MockStorage::new();
        mock.expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        mock.expect_start_block().returning(|_, _| {
            Err(StorageError::Query {
                message: "disk full".to_string(),
            })
        });

        let err = service(mock).start_training("s").await.unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert!(!err.is_client_error());
    }

    #[tokio::test]
    async fn test_negative_response_time_rejected_before_storage() {
        let mock = MockStorage::new();
        let err = service(mock)
            .record_response("s", Some(Response::Left), -1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("response_time_ms"));
    }

    #[tokio::test]
    async fn test_oversized_response_time_rejected_before_storage() {
        let mock = MockStorage::new();
        let err = service(mock)
            .record_response("s", Some(Response::Left), i64::MAX)
            .await
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(err.to_string().contains("response_time_ms"));
    }

    #[tokio::test]
    async fn test_completion_failure_leaves_nothing_half_written() {
        let session = session_in(SessionStatus::Testing);
        let mut mock = MockStorage::new();
        mock.expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        mock.expect_get_session_trials().returning(|_| Ok(vec![]));
        mock.expect_complete_session().times(1).returning(|_, _| {
            Err(StorageError::Query {
                message: "busy".to_string(),
            })
        });
        mock.expect_create_results().never();
        mock.expect_update_session().never();
        mock.expect_update_user().never();

        let err = service(mock).complete_session("s").await.unwrap_err();
        assert!(err.to_string().contains("busy"));
    }

    #[tokio::test]
    async fn test_record_response_without_pending_is_noop() {
        let session = session_in(SessionStatus::Testing);
        let mut mock = MockStorage::new();
        mock.expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        mock.expect_get_session_trials().returning(|_| Ok(vec![]));
        mock.expect_save_response().never();

        let result = service(mock)
            .record_response("s", Some(Response::Right), 420)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_complete_anonymous_session_skips_user_update() {
        let session = session_in(SessionStatus::Created);
        let mut mock = MockStorage::new();
        mock.expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        mock.expect_get_session_trials().returning(|_| Ok(vec![]));
        mock.expect_complete_session()
            .withf(|r, s| {
                r.session_id == s.id && s.status == SessionStatus::Completed && s.end_time.is_some()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_get_user().never();
        mock.expect_update_user().never();

        let results = service(mock).complete_session("s").await.unwrap();
        assert_eq!(results.metrics, PerformanceMetrics::default());
    }

    #[tokio::test]
    async fn test_complete_terminal_session_rejected() {
        let session = session_in(SessionStatus::Abandoned);
        let mut mock = MockStorage::new();
        mock.expect_get_session()
            .returning(move |_| Ok(Some(session.clone())));
        mock.expect_complete_session().never();

        let err = service(mock).complete_session("s").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            format!(
                "Session error: Cannot complete session {} in status abandoned",
                err_session_id(&err)
            )
        );
    }

    fn err_session_id(err: &AppError) -> String {
        match err {
            AppError::Session(SessionError::InvalidTransition { session_id, .. }) => {
                session_id.clone()
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
