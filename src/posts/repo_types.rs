use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::media::MediaKind;

/// Post record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct PostRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub caption: String,
    pub asset_handle: String,
    #[sqlx(try_from = "String")]
    pub media_kind: MediaKind,
    pub file_name: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Post joined with its owner's email, as read for the feed.
#[derive(Debug, Clone, FromRow)]
pub struct FeedRow {
    #[sqlx(flatten)]
    pub post: PostRow,
    pub owner_email: String,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: Uuid,
    pub caption: String,
    pub asset_handle: String,
    pub media_kind: MediaKind,
    pub file_name: String,
}
