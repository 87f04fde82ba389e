use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use aws_config::{defaults, BehaviorVersion};
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{Builder as S3ConfigBuilder, Region},
    Client,
};
use aws_smithy_types::byte_stream::ByteStream;
use bytes::Bytes;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::config::MediaConfig;
use crate::media::MediaKind;

/// External blob store holding the uploaded originals.
///
/// A handle returned by `put` is stable; `base_url` is the public prefix the
/// delivery URLs are composed from.
#[async_trait]
pub trait MediaStore: Send + Sync {
    async fn put(&self, body: Bytes, content_type: &str, kind: MediaKind) -> anyhow::Result<String>;
    async fn delete(&self, handle: &str) -> anyhow::Result<()>;
    fn base_url(&self) -> &str;
}

pub(crate) fn ext_from_mime(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/heic" => Some("heic"),
        "video/mp4" => Some("mp4"),
        "video/quicktime" => Some("mov"),
        "video/webm" => Some("webm"),
        _ => None,
    }
}

/// Fresh, collision-free object key.
fn new_key(content_type: &str, kind: MediaKind) -> String {
    let ext = ext_from_mime(content_type).unwrap_or("bin");
    format!("{}s/{}.{}", kind.as_str(), Uuid::new_v4(), ext)
}

#[derive(Clone)]
pub struct S3MediaStore {
    client: Client,
    bucket: String,
    public_url: String,
}

impl S3MediaStore {
    pub async fn new(cfg: &MediaConfig) -> anyhow::Result<Self> {
        let shared = defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .credentials_provider(Credentials::new(
                &cfg.access_key,
                &cfg.secret_key,
                None,
                None,
                "static",
            ))
            .endpoint_url(&cfg.endpoint)
            .load()
            .await;

        let conf = S3ConfigBuilder::from(&shared)
            .endpoint_url(&cfg.endpoint)
            .force_path_style(true)
            .build();

        Ok(Self {
            client: Client::from_conf(conf),
            bucket: cfg.bucket.clone(),
            public_url: cfg.public_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl MediaStore for S3MediaStore {
    async fn put(&self, body: Bytes, content_type: &str, kind: MediaKind) -> anyhow::Result<String> {
        let key = new_key(content_type, kind);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .with_context(|| format!("s3 put_object {key}"))?;
        Ok(key)
    }

    async fn delete(&self, handle: &str) -> anyhow::Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(handle)
            .send()
            .await
            .context("s3 delete_object")?;
        Ok(())
    }

    fn base_url(&self) -> &str {
        &self.public_url
    }
}

/// Keeps objects in process memory; for tests and local runs.
pub struct MemoryMediaStore {
    objects: RwLock<HashMap<String, (Bytes, String)>>,
    public_url: String,
}

impl MemoryMediaStore {
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            public_url: public_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn contains(&self, handle: &str) -> bool {
        self.objects.read().await.contains_key(handle)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn put(&self, body: Bytes, content_type: &str, kind: MediaKind) -> anyhow::Result<String> {
        let key = new_key(content_type, kind);
        self.objects
            .write()
            .await
            .insert(key.clone(), (body, content_type.to_string()));
        Ok(key)
    }

    async fn delete(&self, handle: &str) -> anyhow::Result<()> {
        self.objects.write().await.remove(handle);
        Ok(())
    }

    fn base_url(&self) -> &str {
        &self.public_url
    }
}
