//! User store.
//!
//! The `users` table is owned by the request/response layer; the pipeline
//! reads users by identity or id and writes only the credential columns.
//! Soft-deleted rows (`deleted_at IS NOT NULL`) are treated as absent.

use crate::errors::PipelineError;
use crate::models::{Credential, User, UserId};
use common::secret::ExposeSecret;
use sqlx::PgPool;

/// Collaborator interface to the user record store.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Look up a live user by identity (email).
    async fn find_by_identity(&self, identity: &str) -> Result<Option<User>, PipelineError>;

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, PipelineError>;

    /// Overwrite the stored credential of one user.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user no longer exists, `TransientIo` on store failure.
    async fn save_credential(
        &self,
        user_id: UserId,
        credential: &Credential,
    ) -> Result<(), PipelineError>;
}

/// Postgres-backed [`UserStore`].
#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserStore for PgUserStore {
    async fn find_by_identity(&self, identity: &str) -> Result<Option<User>, PipelineError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT
                id AS user_id, email, jwt_token, jwt_token_expires_at,
                created_at, updated_at
            FROM users
            WHERE email = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(identity)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::TransientIo(format!("Failed to fetch user by email: {e}")))?;

        Ok(user)
    }

    async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, PipelineError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT
                id AS user_id, email, jwt_token, jwt_token_expires_at,
                created_at, updated_at
            FROM users
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PipelineError::TransientIo(format!("Failed to fetch user by id: {e}")))?;

        Ok(user)
    }

    async fn save_credential(
        &self,
        user_id: UserId,
        credential: &Credential,
    ) -> Result<(), PipelineError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET jwt_token = $2, jwt_token_expires_at = $3, updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(user_id)
        .bind(credential.issued_token.expose_secret())
        .bind(credential.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::TransientIo(format!("Failed to save credential: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::NotFound(format!("user {user_id}")));
        }
        Ok(())
    }
}

/// In-memory [`UserStore`] for tests.
pub mod mock {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Inner {
        users: BTreeMap<i64, User>,
        next_id: i64,
        fail_next_saves: u32,
        fail_next_lookups: u32,
        save_attempts: u64,
        saves: u64,
    }

    /// Shared, cloneable store. Clones see the same users.
    #[derive(Clone, Default)]
    pub struct MockUserStore {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockUserStore {
        pub fn new() -> Self {
            Self::default()
        }

        fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, PipelineError> {
            self.inner
                .lock()
                .map_err(|_| PipelineError::TransientIo("mock store lock poisoned".to_string()))
        }

        /// Insert a user with the next id. Returns that id.
        pub fn insert_user(&self, email: &str) -> Result<UserId, PipelineError> {
            let mut inner = self.lock()?;
            inner.next_id += 1;
            let user_id = UserId(inner.next_id);
            let now = Utc::now();
            inner.users.insert(
                user_id.0,
                User {
                    user_id,
                    email: email.to_string(),
                    jwt_token: None,
                    jwt_token_expires_at: None,
                    created_at: now,
                    updated_at: now,
                },
            );
            Ok(user_id)
        }

        /// Remove a user, as a soft delete would.
        pub fn delete_user(&self, user_id: UserId) -> Result<(), PipelineError> {
            self.lock()?.users.remove(&user_id.0);
            Ok(())
        }

        pub fn user(&self, user_id: UserId) -> Option<User> {
            self.lock().ok()?.users.get(&user_id.0).cloned()
        }

        /// Make the next `n` `save_credential` calls fail with `TransientIo`.
        pub fn fail_next_saves(&self, n: u32) {
            if let Ok(mut inner) = self.lock() {
                inner.fail_next_saves = n;
            }
        }

        /// Make the next `n` lookups fail with `TransientIo`.
        pub fn fail_next_lookups(&self, n: u32) {
            if let Ok(mut inner) = self.lock() {
                inner.fail_next_lookups = n;
            }
        }

        /// Successful credential writes.
        pub fn save_count(&self) -> u64 {
            self.lock().map(|inner| inner.saves).unwrap_or(0)
        }

        /// All credential write attempts, failed ones included.
        pub fn save_attempts(&self) -> u64 {
            self.lock().map(|inner| inner.save_attempts).unwrap_or(0)
        }

        fn take_lookup_failure(inner: &mut Inner) -> Result<(), PipelineError> {
            if inner.fail_next_lookups > 0 {
                inner.fail_next_lookups -= 1;
                return Err(PipelineError::TransientIo("injected lookup failure".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl UserStore for MockUserStore {
        async fn find_by_identity(&self, identity: &str) -> Result<Option<User>, PipelineError> {
            let mut inner = self.lock()?;
            Self::take_lookup_failure(&mut inner)?;
            Ok(inner
                .users
                .values()
                .find(|user| user.email == identity)
                .cloned())
        }

        async fn find_by_id(&self, user_id: UserId) -> Result<Option<User>, PipelineError> {
            let mut inner = self.lock()?;
            Self::take_lookup_failure(&mut inner)?;
            Ok(inner.users.get(&user_id.0).cloned())
        }

        async fn save_credential(
            &self,
            user_id: UserId,
            credential: &Credential,
        ) -> Result<(), PipelineError> {
            let mut inner = self.lock()?;
            inner.save_attempts += 1;
            if inner.fail_next_saves > 0 {
                inner.fail_next_saves -= 1;
                return Err(PipelineError::TransientIo("injected save failure".to_string()));
            }

            let user = inner
                .users
                .get_mut(&user_id.0)
                .ok_or_else(|| PipelineError::NotFound(format!("user {user_id}")))?;
            user.jwt_token = Some(credential.issued_token.expose_secret().to_string());
            user.jwt_token_expires_at = Some(credential.expires_at);
            user.updated_at = Utc::now();
            inner.saves += 1;
            Ok(())
        }
    }

}
