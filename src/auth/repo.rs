use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::repo_types::{User, UserChanges};
use crate::error::{AppError, AppResult};

/// Persistence for user records.
///
/// `insert` and `update` must check email uniqueness and write in one atomic
/// step, reporting a clash as [`AppError::DuplicateIdentity`].
#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn insert(&self, email: &str, password_hash: &str) -> AppResult<User>;
    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>>;
    async fn update(&self, id: Uuid, changes: UserChanges) -> AppResult<User>;
}

fn map_unique_violation(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::DuplicateIdentity,
        _ => AppError::Database(e),
    }
}

#[derive(Clone)]
pub struct PgUserRepo {
    db: PgPool,
}

impl PgUserRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserRepo for PgUserRepo {
    async fn insert(&self, email: &str, password_hash: &str) -> AppResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, password_hash, is_active, is_verified)
            VALUES ($1, $2, $3, TRUE, FALSE)
            RETURNING id, email, password_hash, is_active, is_verified, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(email)
        .bind(password_hash)
        .fetch_one(&self.db)
        .await
        .map_err(map_unique_violation)?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_active, is_verified, created_at, updated_at
            FROM users
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, email, password_hash, is_active, is_verified, created_at, updated_at
            FROM users
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> AppResult<User> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
               SET email         = COALESCE($2, email),
                   password_hash = COALESCE($3, password_hash),
                   is_active     = COALESCE($4, is_active),
                   is_verified   = COALESCE($5, is_verified),
                   updated_at    = now()
             WHERE id = $1
               AND ($6::text IS NULL OR password_hash = $6)
            RETURNING id, email, password_hash, is_active, is_verified, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(changes.email)
        .bind(changes.password_hash)
        .bind(changes.is_active)
        .bind(changes.is_verified)
        .bind(changes.expected_password_hash)
        .fetch_optional(&self.db)
        .await
        .map_err(map_unique_violation)?;
        user.ok_or(AppError::NotFound)
    }
}

/// Process-local user table. Every mutation runs under one write guard.
#[derive(Default)]
pub struct MemoryUserRepo {
    users: RwLock<HashMap<Uuid, User>>,
}

impl MemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryUserRepo {
    async fn insert(&self, email: &str, password_hash: &str) -> AppResult<User> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.email == email) {
            return Err(AppError::DuplicateIdentity);
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            is_active: true,
            is_verified: false,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn update(&self, id: Uuid, changes: UserChanges) -> AppResult<User> {
        let mut users = self.users.write().await;
        if let Some(email) = &changes.email {
            if users.values().any(|u| u.id != id && &u.email == email) {
                return Err(AppError::DuplicateIdentity);
            }
        }
        let user = users.get_mut(&id).ok_or(AppError::NotFound)?;
        if let Some(expected) = &changes.expected_password_hash {
            if &user.password_hash != expected {
                return Err(AppError::NotFound);
            }
        }
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(active) = changes.is_active {
            user.is_active = active;
        }
        if let Some(verified) = changes.is_verified {
            user.is_verified = verified;
        }
        user.updated_at = OffsetDateTime::now_utc();
        Ok(user.clone())
    }
}
