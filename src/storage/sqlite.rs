use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use super::{Session, Storage, TestResults, Trial, User};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::task_switching::PerformanceMetrics;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Presentation order: training block first, then test block, each by trial number.
const TRIAL_ORDER: &str =
    "CASE block WHEN 'training' THEN 0 ELSE 1 END ASC, trial_number ASC";

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database, mainly for tests.
    ///
    /// Uses a single connection since every SQLite in-memory connection is its own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn create_session(&self, session: &Session) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, session_number, status, start_time, end_time, total_trials, completed_trials)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(session.session_number as i64)
        .bind(session.status.to_string())
        .bind(session.start_time.to_rfc3339())
        .bind(session.end_time.map(|t| t.to_rfc3339()))
        .bind(session.total_trials as i64)
        .bind(session.completed_trials as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, id: &str) -> StorageResult<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, session_number, status, start_time, end_time, total_trials, completed_trials
            FROM sessions
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    async fn update_session(&self, session: &Session) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        write_session(&mut *conn, session).await
    }

    async fn delete_session(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_sessions(&self) -> StorageResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, session_number, status, start_time, end_time, total_trials, completed_trials
            FROM sessions
            ORDER BY start_time DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Session::try_from).collect()
    }

    async fn get_user_sessions(
        &self,
        user_id: &str,
        completed_only: bool,
    ) -> StorageResult<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, session_number, status, start_time, end_time, total_trials, completed_trials
            FROM sessions
            WHERE user_id = ? AND (? = 0 OR status = 'completed')
            ORDER BY start_time DESC
            "#,
        )
        .bind(user_id)
        .bind(completed_only)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Session::try_from).collect()
    }

    async fn count_user_sessions(&self, user_id: &str) -> StorageResult<u32> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(count as u32)
    }

    async fn create_trials(&self, trials: &[Trial]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_trials(&mut *tx, trials).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_trial(&self, trial: &Trial) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        write_trial(&mut *conn, trial).await
    }

    async fn get_session_trials(&self, session_id: &str) -> StorageResult<Vec<Trial>> {
        let query = format!(
            r#"
            SELECT id, session_id, block, trial_number, task_type, stimulus_shape, stimulus_color,
                   correct_response, congruency, is_switch_trial, status, user_response,
                   response_time_ms, is_correct, stimulus_onset_time, responded_at
            FROM trials
            WHERE session_id = ?
            ORDER BY {}
            "#,
            TRIAL_ORDER
        );

        let rows: Vec<TrialRow> = sqlx::query_as(&query)
            .bind(session_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Trial::try_from).collect()
    }

    async fn create_results(&self, results: &TestResults) -> StorageResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_results(&mut *conn, results).await
    }

    async fn start_block(&self, trials: &[Trial], session: &Session) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_trials(&mut *tx, trials).await?;
        write_session(&mut *tx, session).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn save_response(&self, trial: &Trial, session: &Session) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        write_trial(&mut *tx, trial).await?;
        write_session(&mut *tx, session).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn complete_session(
        &self,
        results: &TestResults,
        session: &Session,
    ) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        insert_results(&mut *tx, results).await?;
        write_session(&mut *tx, session).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_results(&self, session_id: &str) -> StorageResult<Option<TestResults>> {
        let row: Option<ResultsRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, total_trials, correct_trials, accuracy, average_response_time,
                   switch_cost, task_interference, error_count, color_task_accuracy,
                   shape_task_accuracy, color_task_avg_rt, shape_task_avg_rt, congruent_avg_rt,
                   incongruent_avg_rt, switch_avg_rt, repeat_avg_rt, created_at
            FROM test_results
            WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn create_user(&self, user: &User) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, role, is_active, total_tests_completed, last_login, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.is_active)
        .bind(user.total_tests_completed as i64)
        .bind(user.last_login.map(|t| t.to_rfc3339()))
        .bind(user.created_at.to_rfc3339())
        .bind(user.updated_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_user(&self, id: &str) -> StorageResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, role, is_active, total_tests_completed, last_login, created_at, updated_at
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(User::try_from).transpose()
    }

    async fn update_user(&self, user: &User) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = ?, role = ?, is_active = ?, total_tests_completed = ?, last_login = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&user.email)
        .bind(user.role.to_string())
        .bind(user.is_active)
        .bind(user.total_tests_completed as i64)
        .bind(user.last_login.map(|t| t.to_rfc3339()))
        .bind(user.updated_at.map(|t| t.to_rfc3339()))
        .bind(&user.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::UserNotFound {
                user_id: user.id.clone(),
            });
        }

        Ok(())
    }

    async fn list_users(&self) -> StorageResult<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            r#"
            SELECT id, email, role, is_active, total_tests_completed, last_login, created_at, updated_at
            FROM users
            ORDER BY created_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(User::try_from).collect()
    }
}

// ============================================================================
// Statement helpers shared by single writes and transactions
// ============================================================================

async fn write_session(conn: &mut SqliteConnection, session: &Session) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE sessions
        SET status = ?, end_time = ?, total_trials = ?, completed_trials = ?
        WHERE id = ?
        "#,
    )
    .bind(session.status.to_string())
    .bind(session.end_time.map(|t| t.to_rfc3339()))
    .bind(session.total_trials as i64)
    .bind(session.completed_trials as i64)
    .bind(&session.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::SessionNotFound {
            session_id: session.id.clone(),
        });
    }

    Ok(())
}

async fn insert_trials(conn: &mut SqliteConnection, trials: &[Trial]) -> StorageResult<()> {
    for trial in trials {
        sqlx::query(
            r#"
            INSERT INTO trials (id, session_id, block, trial_number, task_type, stimulus_shape, stimulus_color,
                                correct_response, congruency, is_switch_trial, status, user_response,
                                response_time_ms, is_correct, stimulus_onset_time, responded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trial.id)
        .bind(&trial.session_id)
        .bind(trial.block.to_string())
        .bind(trial.trial_number as i64)
        .bind(trial.task_type.to_string())
        .bind(trial.stimulus_shape.to_string())
        .bind(trial.stimulus_color.to_string())
        .bind(trial.correct_response.to_string())
        .bind(trial.congruency.to_string())
        .bind(trial.is_switch_trial)
        .bind(trial.status.to_string())
        .bind(trial.user_response.map(|r| r.to_string()))
        .bind(trial.response_time_ms)
        .bind(trial.is_correct)
        .bind(trial.stimulus_onset_time.to_rfc3339())
        .bind(trial.responded_at.map(|t| t.to_rfc3339()))
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn write_trial(conn: &mut SqliteConnection, trial: &Trial) -> StorageResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE trials
        SET status = ?, user_response = ?, response_time_ms = ?, is_correct = ?, responded_at = ?
        WHERE id = ?
        "#,
    )
    .bind(trial.status.to_string())
    .bind(trial.user_response.map(|r| r.to_string()))
    .bind(trial.response_time_ms)
    .bind(trial.is_correct)
    .bind(trial.responded_at.map(|t| t.to_rfc3339()))
    .bind(&trial.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(StorageError::Query {
            message: format!("Trial not found: {}", trial.id),
        });
    }

    Ok(())
}

async fn insert_results(conn: &mut SqliteConnection, results: &TestResults) -> StorageResult<()> {
    let m = &results.metrics;

    sqlx::query(
        r#"
        INSERT INTO test_results (id, session_id, total_trials, correct_trials, accuracy, average_response_time,
                                  switch_cost, task_interference, error_count, color_task_accuracy,
                                  shape_task_accuracy, color_task_avg_rt, shape_task_avg_rt, congruent_avg_rt,
                                  incongruent_avg_rt, switch_avg_rt, repeat_avg_rt, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&results.id)
    .bind(&results.session_id)
    .bind(m.total_trials as i64)
    .bind(m.correct_trials as i64)
    .bind(m.accuracy)
    .bind(m.average_response_time)
    .bind(m.switch_cost)
    .bind(m.task_interference)
    .bind(m.error_count as i64)
    .bind(m.color_task_accuracy)
    .bind(m.shape_task_accuracy)
    .bind(m.color_task_avg_rt)
    .bind(m.shape_task_avg_rt)
    .bind(m.congruent_avg_rt)
    .bind(m.incongruent_avg_rt)
    .bind(m.switch_avg_rt)
    .bind(m.repeat_avg_rt)
    .bind(results.created_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

// Internal row types for SQLx mapping

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_column<T: FromStr<Err = String>>(value: &str) -> StorageResult<T> {
    value
        .parse()
        .map_err(|message| StorageError::Query { message })
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    user_id: Option<String>,
    session_number: i64,
    status: String,
    start_time: String,
    end_time: Option<String>,
    total_trials: i64,
    completed_trials: i64,
}

impl TryFrom<SessionRow> for Session {
    type Error = StorageError;

    fn try_from(row: SessionRow) -> StorageResult<Self> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            session_number: row.session_number as u32,
            status: parse_column(&row.status)?,
            start_time: parse_timestamp(&row.start_time),
            end_time: row.end_time.as_deref().map(parse_timestamp),
            total_trials: row.total_trials as u32,
            completed_trials: row.completed_trials as u32,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TrialRow {
    id: String,
    session_id: String,
    block: String,
    trial_number: i64,
    task_type: String,
    stimulus_shape: String,
    stimulus_color: String,
    correct_response: String,
    congruency: String,
    is_switch_trial: bool,
    status: String,
    user_response: Option<String>,
    response_time_ms: Option<i64>,
    is_correct: Option<bool>,
    stimulus_onset_time: String,
    responded_at: Option<String>,
}

impl TryFrom<TrialRow> for Trial {
    type Error = StorageError;

    fn try_from(row: TrialRow) -> StorageResult<Self> {
        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            block: parse_column(&row.block)?,
            trial_number: row.trial_number as u32,
            task_type: parse_column(&row.task_type)?,
            stimulus_shape: parse_column(&row.stimulus_shape)?,
            stimulus_color: parse_column(&row.stimulus_color)?,
            correct_response: parse_column(&row.correct_response)?,
            congruency: parse_column(&row.congruency)?,
            is_switch_trial: row.is_switch_trial,
            status: parse_column(&row.status)?,
            user_response: row.user_response.as_deref().map(parse_column).transpose()?,
            response_time_ms: row.response_time_ms,
            is_correct: row.is_correct,
            stimulus_onset_time: parse_timestamp(&row.stimulus_onset_time),
            responded_at: row.responded_at.as_deref().map(parse_timestamp),
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultsRow {
    id: String,
    session_id: String,
    total_trials: i64,
    correct_trials: i64,
    accuracy: f64,
    average_response_time: f64,
    switch_cost: f64,
    task_interference: f64,
    error_count: i64,
    color_task_accuracy: f64,
    shape_task_accuracy: f64,
    color_task_avg_rt: f64,
    shape_task_avg_rt: f64,
    congruent_avg_rt: f64,
    incongruent_avg_rt: f64,
    switch_avg_rt: f64,
    repeat_avg_rt: f64,
    created_at: String,
}

impl From<ResultsRow> for TestResults {
    fn from(row: ResultsRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            metrics: PerformanceMetrics {
                total_trials: row.total_trials as u32,
                correct_trials: row.correct_trials as u32,
                accuracy: row.accuracy,
                average_response_time: row.average_response_time,
                switch_cost: row.switch_cost,
                task_interference: row.task_interference,
                error_count: row.error_count as u32,
                color_task_accuracy: row.color_task_accuracy,
                shape_task_accuracy: row.shape_task_accuracy,
                color_task_avg_rt: row.color_task_avg_rt,
                shape_task_avg_rt: row.shape_task_avg_rt,
                congruent_avg_rt: row.congruent_avg_rt,
                incongruent_avg_rt: row.incongruent_avg_rt,
                switch_avg_rt: row.switch_avg_rt,
                repeat_avg_rt: row.repeat_avg_rt,
            },
            created_at: parse_timestamp(&row.created_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    role: String,
    is_active: bool,
    total_tests_completed: i64,
    last_login: Option<String>,
    created_at: String,
    updated_at: Option<String>,
}

impl TryFrom<UserRow> for User {
    type Error = StorageError;

    fn try_from(row: UserRow) -> StorageResult<Self> {
        Ok(Self {
            id: row.id,
            email: row.email,
            role: parse_column(&row.role)?,
            is_active: row.is_active,
            total_tests_completed: row.total_tests_completed as u32,
            last_login: row.last_login.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&row.created_at),
            updated_at: row.updated_at.as_deref().map(parse_timestamp),
        })
    }
}
