use std::env;
use std::path::PathBuf;

use chrono::{TimeDelta, Utc};
use serde::Serialize;

use crate::error::AppError;
use crate::task_switching::generator::{
    DEFAULT_CONGRUENT_PROBABILITY, DEFAULT_SWITCH_PROBABILITY, TEST_BLOCK_SIZE,
    TRAINING_BLOCK_SIZE, TRAINING_RUN_LENGTH,
};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub protocol: ProtocolConfig,
    pub timing: TimingConfig,
    pub retention: RetentionConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Test protocol parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolConfig {
    /// Trials in the training block.
    pub training_block_size: usize,
    /// Trials in the test block.
    pub test_block_size: usize,
    /// Consecutive training trials per task before alternating.
    pub training_run_length: usize,
    /// Fraction of test trials that switch task.
    pub switch_probability: f64,
    /// Fraction of test trials with a congruent stimulus.
    pub congruent_probability: f64,
    /// Fixed RNG seed for reproducible sequences. Entropy-seeded when unset.
    pub seed: Option<u64>,
}

/// Client-side presentation timing, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingConfig {
    pub cue_display_ms: u64,
    pub cue_delay_ms: u64,
    pub inter_trial_interval_ms: u64,
    pub response_timeout_ms: u64,
}

/// Session retention thresholds used by cleanup
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionConfig {
    /// Unfinished sessions older than this are marked abandoned.
    pub stale_after_days: i64,
    /// Abandoned sessions older than this are deleted.
    pub purge_after_days: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                env::var("DATABASE_PATH")
                    .unwrap_or_else(|_| "./data/task_switching.db".to_string()),
            ),
            max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
        };

        let logging = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let protocol = ProtocolConfig {
            training_block_size: parse_var("TRAINING_BLOCK_SIZE", TRAINING_BLOCK_SIZE)?,
            test_block_size: parse_var("TEST_BLOCK_SIZE", TEST_BLOCK_SIZE)?,
            training_run_length: parse_var("TRAINING_RUN_LENGTH", TRAINING_RUN_LENGTH)?,
            switch_probability: parse_var("SWITCH_PROBABILITY", DEFAULT_SWITCH_PROBABILITY)?,
            congruent_probability: parse_var(
                "CONGRUENT_PROBABILITY",
                DEFAULT_CONGRUENT_PROBABILITY,
            )?,
            seed: match env::var("PROTOCOL_SEED") {
                Ok(raw) => Some(raw.trim().parse().map_err(|_| AppError::Config {
                    message: format!("PROTOCOL_SEED must be an unsigned integer, got '{}'", raw),
                })?),
                Err(_) => None,
            },
        };
        protocol.validate()?;

        let defaults = TimingConfig::default();
        let timing = TimingConfig {
            cue_display_ms: parse_var("CUE_DISPLAY_MS", defaults.cue_display_ms)?,
            cue_delay_ms: parse_var("CUE_DELAY_MS", defaults.cue_delay_ms)?,
            inter_trial_interval_ms: parse_var(
                "INTER_TRIAL_INTERVAL_MS",
                defaults.inter_trial_interval_ms,
            )?,
            response_timeout_ms: parse_var("RESPONSE_TIMEOUT_MS", defaults.response_timeout_ms)?,
        };

        let defaults = RetentionConfig::default();
        let retention = RetentionConfig {
            stale_after_days: parse_var("CLEANUP_STALE_AFTER_DAYS", defaults.stale_after_days)?,
            purge_after_days: parse_var("CLEANUP_PURGE_AFTER_DAYS", defaults.purge_after_days)?,
        };
        retention.validate()?;

        Ok(Config {
            database,
            logging,
            protocol,
            timing,
            retention,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| AppError::Config {
            message: format!("{} has an invalid value: '{}'", key, raw),
        }),
        Err(_) => Ok(default),
    }
}

impl ProtocolConfig {
    /// Reject parameters the generator cannot honor.
    pub fn validate(&self) -> Result<(), AppError> {
        let fail = |message: String| Err(AppError::Config { message });

        if self.training_block_size == 0 || self.test_block_size == 0 {
            return fail("Block sizes must be at least 1".to_string());
        }
        if self.training_run_length == 0 {
            return fail("TRAINING_RUN_LENGTH must be at least 1".to_string());
        }
        for (name, p) in [
            ("SWITCH_PROBABILITY", self.switch_probability),
            ("CONGRUENT_PROBABILITY", self.congruent_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return fail(format!("{} must be within [0, 1], got {}", name, p));
            }
        }
        Ok(())
    }
}

impl RetentionConfig {
    fn validate(&self) -> Result<(), AppError> {
        let now = Utc::now();
        for (name, days) in [
            ("CLEANUP_STALE_AFTER_DAYS", self.stale_after_days),
            ("CLEANUP_PURGE_AFTER_DAYS", self.purge_after_days),
        ] {
            if days < 0 {
                return Err(AppError::Config {
                    message: format!("{} must not be negative, got {}", name, days),
                });
            }
            if TimeDelta::try_days(days)
                .and_then(|window| now.checked_sub_signed(window))
                .is_none()
            {
                return Err(AppError::Config {
                    message: format!("{} is out of range: {}", name, days),
                });
            }
        }
        Ok(())
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/task_switching.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            training_block_size: TRAINING_BLOCK_SIZE,
            test_block_size: TEST_BLOCK_SIZE,
            training_run_length: TRAINING_RUN_LENGTH,
            switch_probability: DEFAULT_SWITCH_PROBABILITY,
            congruent_probability: DEFAULT_CONGRUENT_PROBABILITY,
            seed: None,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            cue_display_ms: 350,
            cue_delay_ms: 750,
            inter_trial_interval_ms: 1000,
            response_timeout_ms: 2000,
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            stale_after_days: 30,
            purge_after_days: 90,
        }
    }
}
