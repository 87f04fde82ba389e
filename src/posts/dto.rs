use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::media::MediaKind;
use super::services::{FeedPost, Post};

#[derive(Debug, Serialize, Deserialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub caption: String,
    pub url: String,
    pub file_type: MediaKind,
    pub file_name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<Post> for PostResponse {
    fn from(p: Post) -> Self {
        Self {
            id: p.id,
            user_id: p.user_id,
            caption: p.caption,
            url: p.url,
            file_type: p.media_kind,
            file_name: p.file_name,
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub post: PostResponse,
    pub email: String,
    pub is_owner: bool,
}

impl From<FeedPost> for FeedItem {
    fn from(f: FeedPost) -> Self {
        Self {
            post: f.post.into(),
            email: f.owner_email,
            is_owner: f.is_owner,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FeedResponse {
    pub posts: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
pub struct CaptionRequest {
    pub caption: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
    pub post_id: Uuid,
}
