//! # Task-Switching Lab
//!
//! A cognitive test service for the cued task-switching paradigm. Participants classify a
//! colored shape by either its color or its shape, as cued per trial; the service generates
//! balanced trial sequences, scores responses, and computes switch cost and congruency
//! interference.
//!
//! ## Features
//!
//! - **Sequence Generation**: Training runs plus test blocks with exact switch and
//!   congruency quotas
//! - **Session State Machine**: Created → Training → Testing → Completed, serialized per
//!   session
//! - **Metrics**: Accuracy, switch cost, task interference, per-task breakdowns
//! - **Administration**: Account bookkeeping, statistics, stale-session cleanup
//!
//! ## Architecture
//!
//! ```text
//! Client → JSON-RPC (stdio) → TaskSwitchingService → SQLite
//!                           → AccountService / AdminService ↗
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use task_switching_lab::{Config, AppState, McpServer};
//! use task_switching_lab::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::new(config, storage));
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

/// Account bookkeeping and administrative operations.
pub mod admin;
/// Command-line interface.
pub mod cli;
/// Configuration management.
pub mod config;
/// Error types and result aliases for the application.
pub mod error;
/// JSON-RPC server implementation and request handling.
pub mod server;
/// SQLite storage layer for persistence.
pub mod storage;
/// Trial generation, session state machine, and metrics.
pub mod task_switching;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
