use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::repo_types::{FeedRow, NewPost, PostRow};
use crate::auth::repo::UserRepo;
use crate::error::{AppError, AppResult};

/// Persistence for posts.
///
/// `update_caption` and `delete_owned` check ownership and write in one atomic
/// step: of two racing deletes of the same post exactly one succeeds and the
/// other sees [`AppError::NotFound`].
#[async_trait]
pub trait PostRepo: Send + Sync {
    async fn insert(&self, new: NewPost) -> AppResult<PostRow>;
    /// Every post, newest first.
    async fn list_feed(&self) -> AppResult<Vec<FeedRow>>;
    async fn find(&self, id: Uuid) -> AppResult<Option<FeedRow>>;
    async fn update_caption(&self, id: Uuid, owner: Uuid, caption: &str) -> AppResult<PostRow>;
    async fn delete_owned(&self, id: Uuid, owner: Uuid) -> AppResult<PostRow>;
}

fn check_owner(found: Option<Uuid>, caller: Uuid) -> AppResult<()> {
    match found {
        None => Err(AppError::NotFound),
        Some(owner) if owner != caller => Err(AppError::Forbidden),
        Some(_) => Ok(()),
    }
}

#[derive(Clone)]
pub struct PgPostRepo {
    db: PgPool,
}

impl PgPostRepo {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PostRepo for PgPostRepo {
    async fn insert(&self, new: NewPost) -> AppResult<PostRow> {
        let row = sqlx::query_as::<_, PostRow>(
            r#"
            INSERT INTO posts (id, user_id, caption, asset_handle, media_kind, file_name)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, user_id, caption, asset_handle, media_kind, file_name, created_at, updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(new.user_id)
        .bind(&new.caption)
        .bind(&new.asset_handle)
        .bind(new.media_kind.as_str())
        .bind(&new.file_name)
        .fetch_one(&self.db)
        .await?;
        Ok(row)
    }

    async fn list_feed(&self) -> AppResult<Vec<FeedRow>> {
        let rows = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT p.id, p.user_id, p.caption, p.asset_handle, p.media_kind, p.file_name,
                   p.created_at, p.updated_at, u.email AS owner_email
              FROM posts p
              JOIN users u ON u.id = p.user_id
             ORDER BY p.created_at DESC, p.id DESC
            "#,
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<FeedRow>> {
        let row = sqlx::query_as::<_, FeedRow>(
            r#"
            SELECT p.id, p.user_id, p.caption, p.asset_handle, p.media_kind, p.file_name,
                   p.created_at, p.updated_at, u.email AS owner_email
              FROM posts p
              JOIN users u ON u.id = p.user_id
             WHERE p.id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(row)
    }

    async fn update_caption(&self, id: Uuid, owner: Uuid, caption: &str) -> AppResult<PostRow> {
        let mut tx = self.db.begin().await?;
        let found: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM posts WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        check_owner(found, owner)?;

        let row = sqlx::query_as::<_, PostRow>(
            r#"
            UPDATE posts
               SET caption = $2, updated_at = now()
             WHERE id = $1
            RETURNING id, user_id, caption, asset_handle, media_kind, file_name, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(caption)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn delete_owned(&self, id: Uuid, owner: Uuid) -> AppResult<PostRow> {
        let mut tx = self.db.begin().await?;
        // The row lock makes a concurrent delete wait, then find nothing.
        let found: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM posts WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        check_owner(found, owner)?;

        let row = sqlx::query_as::<_, PostRow>(
            r#"
            DELETE FROM posts
             WHERE id = $1
            RETURNING id, user_id, caption, asset_handle, media_kind, file_name, created_at, updated_at
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(row)
    }
}

/// Process-local post table; owner emails are resolved through the user repo.
pub struct MemoryPostRepo {
    posts: RwLock<HashMap<Uuid, PostRow>>,
    users: Arc<dyn UserRepo>,
}

impl MemoryPostRepo {
    pub fn new(users: Arc<dyn UserRepo>) -> Self {
        Self {
            posts: RwLock::new(HashMap::new()),
            users,
        }
    }

    async fn with_owner(&self, post: PostRow) -> AppResult<FeedRow> {
        let owner_email = self
            .users
            .find_by_id(post.user_id)
            .await?
            .map(|u| u.email)
            .unwrap_or_default();
        Ok(FeedRow { post, owner_email })
    }
}

#[async_trait]
impl PostRepo for MemoryPostRepo {
    async fn insert(&self, new: NewPost) -> AppResult<PostRow> {
        if self.users.find_by_id(new.user_id).await?.is_none() {
            return Err(AppError::NotFound);
        }
        let now = OffsetDateTime::now_utc();
        let row = PostRow {
            id: Uuid::now_v7(),
            user_id: new.user_id,
            caption: new.caption,
            asset_handle: new.asset_handle,
            media_kind: new.media_kind,
            file_name: new.file_name,
            created_at: now,
            updated_at: now,
        };
        self.posts.write().await.insert(row.id, row.clone());
        Ok(row)
    }

    async fn list_feed(&self) -> AppResult<Vec<FeedRow>> {
        let mut posts: Vec<PostRow> = self.posts.read().await.values().cloned().collect();
        posts.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        let mut rows = Vec::with_capacity(posts.len());
        for post in posts {
            rows.push(self.with_owner(post).await?);
        }
        Ok(rows)
    }

    async fn find(&self, id: Uuid) -> AppResult<Option<FeedRow>> {
        let post = self.posts.read().await.get(&id).cloned();
        match post {
            Some(post) => self.with_owner(post).await.map(Some),
            None => Ok(None),
        }
    }

    async fn update_caption(&self, id: Uuid, owner: Uuid, caption: &str) -> AppResult<PostRow> {
        let mut posts = self.posts.write().await;
        check_owner(posts.get(&id).map(|p| p.user_id), owner)?;
        let post = posts.get_mut(&id).ok_or(AppError::NotFound)?;
        post.caption = caption.to_string();
        post.updated_at = OffsetDateTime::now_utc();
        Ok(post.clone())
    }

    async fn delete_owned(&self, id: Uuid, owner: Uuid) -> AppResult<PostRow> {
        let mut posts = self.posts.write().await;
        check_owner(posts.get(&id).map(|p| p.user_id), owner)?;
        posts.remove(&id).ok_or(AppError::NotFound)
    }
}
