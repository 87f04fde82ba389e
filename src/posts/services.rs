use std::sync::Arc;

use bytes::Bytes;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::repo::PostRepo;
use super::repo_types::{FeedRow, NewPost, PostRow};
use crate::error::{AppError, AppResult};
use crate::media::{MediaKind, MediaReferenceBuilder, TransformSet};
use crate::storage::MediaStore;

pub struct UploadItem {
    pub body: Bytes,
    pub content_type: String,
    pub file_name: String,
}

/// Post as handed to callers, with its display URL rendered for this request.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: Uuid,
    pub user_id: Uuid,
    pub caption: String,
    pub asset_handle: String,
    pub media_kind: MediaKind,
    pub file_name: String,
    pub url: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct FeedPost {
    pub post: Post,
    pub owner_email: String,
    pub is_owner: bool,
}

#[derive(Clone)]
pub struct PostService {
    posts: Arc<dyn PostRepo>,
    media: Arc<dyn MediaStore>,
    refs: Arc<MediaReferenceBuilder>,
    caption_max_len: usize,
    upload_max_bytes: usize,
}

impl PostService {
    pub fn new(
        posts: Arc<dyn PostRepo>,
        media: Arc<dyn MediaStore>,
        refs: Arc<MediaReferenceBuilder>,
        caption_max_len: usize,
        upload_max_bytes: usize,
    ) -> Self {
        Self {
            posts,
            media,
            refs,
            caption_max_len,
            upload_max_bytes,
        }
    }

    fn validated_caption(&self, caption: &str) -> AppResult<String> {
        let caption = caption.trim();
        let len = caption.chars().count();
        if len == 0 || len > self.caption_max_len {
            return Err(AppError::validation(format!(
                "caption must be 1 to {} characters",
                self.caption_max_len
            )));
        }
        Ok(caption.to_string())
    }

    fn render(&self, row: PostRow, transforms: Option<&TransformSet>) -> Post {
        let url = match transforms {
            Some(t) => self.refs.render(&row.asset_handle, t),
            None => self
                .refs
                .render(&row.asset_handle, &TransformSet::default_for(row.media_kind)),
        };
        Post {
            id: row.id,
            user_id: row.user_id,
            caption: row.caption,
            asset_handle: row.asset_handle,
            media_kind: row.media_kind,
            file_name: row.file_name,
            url,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    /// Stores the upload, then records the post. The object is removed again if
    /// the record cannot be written.
    pub async fn create(
        &self,
        caller: Uuid,
        caption: &str,
        upload: UploadItem,
        media_kind: Option<MediaKind>,
    ) -> AppResult<Post> {
        let caption = self.validated_caption(caption)?;
        if upload.body.is_empty() {
            return Err(AppError::validation("file is empty"));
        }
        if upload.body.len() > self.upload_max_bytes {
            return Err(AppError::validation(format!(
                "file exceeds {} bytes",
                self.upload_max_bytes
            )));
        }
        if !(upload.content_type.starts_with("image/") || upload.content_type.starts_with("video/"))
        {
            return Err(AppError::validation("file must be an image or a video"));
        }
        let inferred = MediaKind::from_content_type(&upload.content_type);
        let media_kind = match media_kind {
            Some(kind) if kind != inferred => {
                return Err(AppError::validation(format!(
                    "media_kind {} does not match content type {}",
                    kind.as_str(),
                    upload.content_type
                )));
            }
            Some(kind) => kind,
            None => inferred,
        };

        let handle = self
            .media
            .put(upload.body, &upload.content_type, media_kind)
            .await
            .map_err(AppError::MediaStoreUnavailable)?;

        let new = NewPost {
            user_id: caller,
            caption,
            asset_handle: handle.clone(),
            media_kind,
            file_name: sanitize_file_name(&upload.file_name),
        };
        let row = match self.posts.insert(new).await {
            Ok(row) => row,
            Err(e) => {
                if let Err(cleanup) = self.media.delete(&handle).await {
                    warn!(error = %cleanup, %handle, "orphaned upload left in media store");
                }
                return Err(e);
            }
        };

        info!(post_id = %row.id, user_id = %caller, kind = row.media_kind.as_str(), "post created");
        Ok(self.render(row, None))
    }

    /// Reads the whole feed. The options are validated before the read; URLs are
    /// rendered while the returned feed is iterated.
    pub async fn list_feed<K: AsRef<str>, V: AsRef<str>>(
        &self,
        caller: Uuid,
        options: &[(K, V)],
    ) -> AppResult<Feed> {
        let transforms = parse_options(options)?;
        let rows = self.posts.list_feed().await?;
        Ok(Feed {
            rows,
            caller,
            transforms,
            service: self.clone(),
        })
    }

    pub async fn get<K: AsRef<str>, V: AsRef<str>>(
        &self,
        caller: Uuid,
        post_id: Uuid,
        options: &[(K, V)],
    ) -> AppResult<FeedPost> {
        let transforms = parse_options(options)?;
        let row = self.posts.find(post_id).await?.ok_or(AppError::NotFound)?;
        Ok(self.feed_post(row, caller, transforms.as_ref()))
    }

    pub async fn update_caption(&self, caller: Uuid, post_id: Uuid, caption: &str) -> AppResult<Post> {
        let caption = self.validated_caption(caption)?;
        let row = self.posts.update_caption(post_id, caller, &caption).await?;
        info!(post_id = %post_id, user_id = %caller, "caption updated");
        Ok(self.render(row, None))
    }

    /// Only the owner may delete; deleting a missing post is `NotFound`, never a no-op.
    pub async fn delete(&self, caller: Uuid, post_id: Uuid) -> AppResult<()> {
        match self.posts.delete_owned(post_id, caller).await {
            Ok(row) => {
                info!(post_id = %row.id, user_id = %caller, "post deleted");
                Ok(())
            }
            Err(AppError::Forbidden) => {
                warn!(post_id = %post_id, user_id = %caller, "delete of foreign post refused");
                Err(AppError::Forbidden)
            }
            Err(e) => Err(e),
        }
    }

    fn feed_post(&self, row: FeedRow, caller: Uuid, transforms: Option<&TransformSet>) -> FeedPost {
        let is_owner = row.post.user_id == caller;
        FeedPost {
            post: self.render(row.post, transforms),
            owner_email: row.owner_email,
            is_owner,
        }
    }
}

/// No options means per-kind defaults.
fn parse_options<K: AsRef<str>, V: AsRef<str>>(options: &[(K, V)]) -> AppResult<Option<TransformSet>> {
    if options.is_empty() {
        return Ok(None);
    }
    TransformSet::parse(options).map(Some)
}

fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base.chars().filter(|c| !c.is_control()).take(255).collect();
    if cleaned.trim().is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

/// One read of the feed; iterating renders each post's URL on demand.
pub struct Feed {
    rows: Vec<FeedRow>,
    caller: Uuid,
    transforms: Option<TransformSet>,
    service: PostService,
}

impl Feed {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for Feed {
    type Item = FeedPost;
    type IntoIter = FeedIter;

    fn into_iter(self) -> FeedIter {
        FeedIter {
            rows: self.rows.into_iter(),
            caller: self.caller,
            transforms: self.transforms,
            service: self.service,
        }
    }
}

pub struct FeedIter {
    rows: std::vec::IntoIter<FeedRow>,
    caller: Uuid,
    transforms: Option<TransformSet>,
    service: PostService,
}

impl Iterator for FeedIter {
    type Item = FeedPost;

    fn next(&mut self) -> Option<FeedPost> {
        let row = self.rows.next()?;
        Some(self.service.feed_post(row, self.caller, self.transforms.as_ref()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}
