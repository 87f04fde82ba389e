use std::sync::Arc;

use anyhow::Context;
use axum::extract::FromRef;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::info;

use crate::auth::extractors::SessionGuard;
use crate::auth::jwt::TokenService;
use crate::auth::repo::{MemoryUserRepo, PgUserRepo, UserRepo};
use crate::auth::services::{AccountFlows, CredentialStore};
use crate::config::{AppConfig, MediaBackend};
use crate::media::MediaReferenceBuilder;
use crate::posts::repo::{MemoryPostRepo, PgPostRepo, PostRepo};
use crate::posts::services::PostService;
use crate::storage::{MediaStore, MemoryMediaStore, S3MediaStore};

/// Everything a request needs; built once at startup, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Option<PgPool>,
    pub tokens: Arc<TokenService>,
    pub credentials: CredentialStore,
    pub accounts: AccountFlows,
    pub guard: SessionGuard,
    pub posts: PostService,
}

impl FromRef<AppState> for SessionGuard {
    fn from_ref(state: &AppState) -> Self {
        state.guard.clone()
    }
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = AppConfig::from_env()?;

        let (db, users, posts): (Option<PgPool>, Arc<dyn UserRepo>, Arc<dyn PostRepo>) =
            match &config.database_url {
                Some(url) => {
                    let db = PgPoolOptions::new()
                        .max_connections(10)
                        .connect(url)
                        .await
                        .context("connect to database")?;
                    info!("using postgres store");
                    let users: Arc<dyn UserRepo> = Arc::new(PgUserRepo::new(db.clone()));
                    let posts: Arc<dyn PostRepo> = Arc::new(PgPostRepo::new(db.clone()));
                    (Some(db), users, posts)
                }
                None => {
                    info!("DATABASE_URL not set; using in-memory store");
                    let users: Arc<dyn UserRepo> = Arc::new(MemoryUserRepo::new());
                    let posts: Arc<dyn PostRepo> = Arc::new(MemoryPostRepo::new(users.clone()));
                    (None, users, posts)
                }
            };

        let media: Arc<dyn MediaStore> = match config.media.backend {
            MediaBackend::S3 => Arc::new(
                S3MediaStore::new(&config.media)
                    .await
                    .context("init s3 media store")?,
            ),
            MediaBackend::Memory => Arc::new(MemoryMediaStore::new(config.media.public_url.clone())),
        };

        Ok(Self::from_parts(config, db, users, posts, media))
    }

    pub fn from_parts(
        config: AppConfig,
        db: Option<PgPool>,
        users: Arc<dyn UserRepo>,
        posts: Arc<dyn PostRepo>,
        media: Arc<dyn MediaStore>,
    ) -> Self {
        let tokens = Arc::new(TokenService::new(&config.jwt));
        let credentials = CredentialStore::new(users.clone());
        let accounts = AccountFlows::new(credentials.clone(), tokens.clone());
        let guard = SessionGuard::new(tokens.clone(), users);
        let refs = Arc::new(MediaReferenceBuilder::new(media.base_url()));
        let posts = PostService::new(
            posts,
            media,
            refs,
            config.posts.caption_max_len,
            config.posts.upload_max_bytes,
        );
        Self {
            config: Arc::new(config),
            db,
            tokens,
            credentials,
            accounts,
            guard,
            posts,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::{JwtConfig, MediaConfig, PostsConfig};

        let config = AppConfig {
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test-issuer".into(),
                audience: "test-aud".into(),
                ttl_minutes: 5,
                action_ttl_minutes: 60,
            },
            media: MediaConfig {
                backend: MediaBackend::Memory,
                endpoint: "fake".into(),
                bucket: "fake".into(),
                access_key: "fake".into(),
                secret_key: "fake".into(),
                region: "us-east-1".into(),
                public_url: "https://fake.local/media".into(),
            },
            posts: PostsConfig {
                caption_max_len: 2200,
                upload_max_bytes: 1024 * 1024,
            },
        };

        let users: Arc<dyn UserRepo> = Arc::new(MemoryUserRepo::new());
        let posts = Arc::new(MemoryPostRepo::new(users.clone()));
        let media = Arc::new(MemoryMediaStore::new(config.media.public_url.clone()));
        Self::from_parts(config, None, users, posts, media)
    }
}
