//! Server module for JSON-RPC tool handling.
//!
//! This module provides:
//! - MCP-style JSON-RPC server implementation over stdio
//! - Tool call handlers and routing
//! - Shared application state management

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use crate::admin::{AccountService, AdminService};
use crate::config::Config;
use crate::storage::{SqliteStorage, Storage};
use crate::task_switching::TaskSwitchingService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// Session lifecycle and scoring.
    pub task_switching: TaskSwitchingService,
    /// Login bookkeeping.
    pub accounts: AccountService,
    /// User and session administration.
    pub admin: AdminService,
}

impl AppState {
    /// Create new application state
    pub fn new(config: Config, storage: SqliteStorage) -> Self {
        tracing::info!(
            training_block_size = config.protocol.training_block_size,
            test_block_size = config.protocol.test_block_size,
            switch_probability = config.protocol.switch_probability,
            congruent_probability = config.protocol.congruent_probability,
            seeded = config.protocol.seed.is_some(),
            "AppState initializing with protocol configuration"
        );

        let shared: Arc<dyn Storage> = Arc::new(storage.clone());
        let task_switching = TaskSwitchingService::new(Arc::clone(&shared), &config.protocol);
        let accounts = AccountService::new(Arc::clone(&shared));
        let admin = AdminService::new(shared, task_switching.locks(), config.retention.clone());

        Self {
            config,
            storage,
            task_switching,
            accounts,
            admin,
        }
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;

    fn create_test_config() -> Config {
        Config {
            protocol: ProtocolConfig {
                seed: Some(42),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_app_state_new() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(), storage);

        assert_eq!(state.config.protocol.seed, Some(42));
        assert_eq!(state.config.database.max_connections, 5);
    }

    #[tokio::test]
    async fn test_shared_state_type() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let shared: SharedState = Arc::new(AppState::new(create_test_config(), storage));

        let shared2 = Arc::clone(&shared);
        assert_eq!(Arc::strong_count(&shared), 2);
        drop(shared2);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[tokio::test]
    async fn test_services_share_storage() {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let state = AppState::new(create_test_config(), storage);

        state
            .accounts
            .record_login("sub-1", "p@example.com")
            .await
            .unwrap();
        let session = state
            .task_switching
            .create_session(Some("sub-1"))
            .await
            .unwrap();

        let listed = state.admin.list_sessions(None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session.id);
        assert!(state.storage.get_session(&session.id).await.unwrap().is_some());
    }
}
