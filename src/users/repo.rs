use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::users::repo_types::User;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already exists")]
    DuplicateUsername,
    #[error("user not found")]
    UserNotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence of user credentials, keyed by username.
///
/// Implementations enforce username uniqueness themselves: `insert` must fail
/// with [`StoreError::DuplicateUsername`] when the name is taken, even if a
/// concurrent request checked for it first.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn insert(&self, username: &str, password_hash: &str) -> Result<User, StoreError>;

    async fn update_password_hash(&self, user_id: Uuid, password_hash: &str)
        -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct PgCredentialStore {
    db: PgPool,
}

impl PgCredentialStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, password_hash, created_at
            FROM users
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn insert(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        let res = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash)
            VALUES ($1, $2)
            RETURNING id, username, password_hash, created_at
            "#,
        )
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await;

        match res {
            Ok(user) => Ok(user),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::DuplicateUsername)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let res = sqlx::query(r#"UPDATE users SET password_hash = $1 WHERE id = $2"#)
            .bind(password_hash)
            .bind(user_id)
            .execute(&self.db)
            .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    }
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<String, User>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops a user record. Not reachable over HTTP.
    pub async fn remove(&self, username: &str) -> Option<User> {
        self.users.write().await.remove(username)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.read().await.get(username).cloned())
    }

    async fn insert(&self, username: &str, password_hash: &str) -> Result<User, StoreError> {
        // check and insert under the same write guard
        let mut users = self.users.write().await;
        if users.contains_key(username) {
            return Err(StoreError::DuplicateUsername);
        }
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash: password_hash.to_string(),
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(user.username.clone(), user.clone());
        Ok(user)
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let user = users
            .values_mut()
            .find(|u| u.id == user_id)
            .ok_or(StoreError::UserNotFound)?;
        user.password_hash = password_hash.to_string();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn insert_then_find() {
        let store = InMemoryCredentialStore::new();
        let created = store.insert("alice", "hash-1").await.expect("insert");
        let found = store
            .find_by_username("alice")
            .await
            .expect("find")
            .expect("present");
        assert_eq!(found.id, created.id);
        assert_eq!(found.password_hash, "hash-1");
        assert!(store.find_by_username("bob").await.expect("find").is_none());
    }

    #[tokio::test]
    async fn insert_rejects_duplicate_username() {
        let store = InMemoryCredentialStore::new();
        store.insert("alice", "hash-1").await.expect("first insert");
        let err = store.insert("alice", "hash-2").await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateUsername));
        let kept = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(kept.password_hash, "hash-1");
    }

    #[tokio::test]
    async fn concurrent_inserts_admit_exactly_one() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.insert("racer", &format!("hash-{i}")).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.expect("join") {
                Ok(_) => ok += 1,
                Err(StoreError::DuplicateUsername) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn update_password_hash_replaces_only_the_hash() {
        let store = InMemoryCredentialStore::new();
        let user = store.insert("alice", "old").await.unwrap();
        store.update_password_hash(user.id, "new").await.unwrap();
        let after = store.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(after.password_hash, "new");
        assert_eq!(after.id, user.id);
        assert_eq!(after.created_at, user.created_at);
    }

    #[tokio::test]
    async fn update_password_hash_for_unknown_id_fails() {
        let store = InMemoryCredentialStore::new();
        let err = store
            .update_password_hash(Uuid::new_v4(), "new")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound));
    }
}
