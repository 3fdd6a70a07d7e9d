//! Login bookkeeping for participant accounts.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::error::{AppResult, StorageError, ToolError};
use crate::storage::{Storage, User};

/// Creates accounts on first login and tracks login times.
///
/// Identity is asserted by the caller; tokens are never validated here.
#[derive(Clone)]
pub struct AccountService {
    storage: Arc<dyn Storage>,
}

impl AccountService {
    /// Create an account service over `storage`.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Find or create the user and stamp the login time.
    ///
    /// An existing account picks up a changed email address.
    pub async fn record_login(&self, user_id: &str, email: &str) -> AppResult<User> {
        if user_id.trim().is_empty() {
            return Err(ToolError::Validation {
                field: "user_id".to_string(),
                reason: "cannot be empty".to_string(),
            }
            .into());
        }
        if !email.contains('@') {
            return Err(ToolError::Validation {
                field: "email".to_string(),
                reason: format!("'{}' is not an email address", email),
            }
            .into());
        }

        let now = Utc::now();
        match self.storage.get_user(user_id).await? {
            Some(user) => {
                let user = User {
                    email: email.to_string(),
                    last_login: Some(now),
                    updated_at: Some(now),
                    ..user
                };
                self.storage.update_user(&user).await?;
                info!(user_id = %user.id, "User logged in");
                Ok(user)
            }
            None => {
                let user = User {
                    last_login: Some(now),
                    ..User::new(user_id, email)
                };
                self.storage.create_user(&user).await?;
                info!(user_id = %user.id, "User created on first login");
                Ok(user)
            }
        }
    }

    /// Get a user by ID.
    pub async fn get_user(&self, user_id: &str) -> AppResult<User> {
        self.storage.get_user(user_id).await?.ok_or_else(|| {
            StorageError::UserNotFound {
                user_id: user_id.to_string(),
            }
            .into()
        })
    }
}
