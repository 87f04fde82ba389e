use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    /// Lifetime of verification and password-reset tokens.
    pub action_ttl_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaBackend {
    S3,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub backend: MediaBackend,
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    /// Public CDN prefix that delivery URLs are built from.
    pub public_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostsConfig {
    pub caption_max_len: usize,
    pub upload_max_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// `None` keeps users and posts in process memory.
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub media: MediaConfig,
    pub posts: PostsConfig,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?,
            issuer: env_or("JWT_ISSUER", "snapfeed"),
            audience: env_or("JWT_AUDIENCE", "snapfeed-users"),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60),
            action_ttl_minutes: env_parse("JWT_ACTION_TTL_MINUTES", 60),
        };
        anyhow::ensure!(jwt.ttl_minutes > 0, "JWT_TTL_MINUTES must be positive");

        let backend = match env_or("MEDIA_BACKEND", "s3").to_lowercase().as_str() {
            "s3" | "minio" => MediaBackend::S3,
            "memory" => MediaBackend::Memory,
            other => anyhow::bail!("unknown MEDIA_BACKEND {other:?}"),
        };
        let endpoint = env_or("MINIO_ENDPOINT", "http://localhost:9000");
        let bucket = env_or("MINIO_BUCKET", "snapfeed");
        let media = MediaConfig {
            backend,
            public_url: std::env::var("MEDIA_PUBLIC_URL")
                .unwrap_or_else(|_| format!("{}/{}", endpoint.trim_end_matches('/'), bucket)),
            endpoint,
            bucket,
            access_key: env_or("MINIO_ACCESS_KEY", "minioadmin"),
            secret_key: env_or("MINIO_SECRET_KEY", "minioadmin"),
            region: env_or("MINIO_REGION", "us-east-1"),
        };

        let posts = PostsConfig {
            caption_max_len: env_parse("CAPTION_MAX_LEN", 2200),
            upload_max_bytes: env_parse("UPLOAD_MAX_BYTES", 50 * 1024 * 1024),
        };

        Ok(Self {
            database_url,
            jwt,
            media,
            posts,
        })
    }
}
