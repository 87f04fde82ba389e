use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::dto::{CaptionRequest, DeleteResponse, FeedItem, FeedResponse, PostResponse};
use crate::media::MediaKind;
use super::services::UploadItem;
use crate::{
    auth::extractors::AuthUser,
    error::{AppError, AppResult},
    extract::{ApiJson, ApiPath, ApiQuery},
    state::AppState,
};

/// Ordered `key=value` pairs from the query string.
type TransformQuery = ApiQuery<Vec<(String, String)>>;

// Room for the caption and multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/feed", get(list_feed))
        .route("/posts/:id", get(get_post).patch(edit_caption).delete(delete_post))
}

pub fn write_routes(upload_max_bytes: usize) -> Router<AppState> {
    Router::new()
        .route("/upload", post(create_post))
        .layer(DefaultBodyLimit::max(upload_max_bytes + MULTIPART_OVERHEAD))
}

fn bad_multipart(e: impl std::fmt::Display) -> AppError {
    AppError::validation(format!("malformed multipart body: {e}"))
}

/// POST /upload (multipart: `file`, `caption`, optional `media_kind`)
#[instrument(skip(state, mp))]
pub async fn create_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mp: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<PostResponse>)> {
    let mut mp = mp?;
    let mut upload: Option<UploadItem> = None;
    let mut caption: Option<String> = None;
    let mut media_kind: Option<MediaKind> = None;

    while let Some(field) = mp.next_field().await.map_err(bad_multipart)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field.bytes().await.map_err(bad_multipart)?;
                upload = Some(UploadItem {
                    body,
                    content_type,
                    file_name,
                });
            }
            Some("caption") => caption = Some(field.text().await.map_err(bad_multipart)?),
            Some("media_kind") => {
                let raw = field.text().await.map_err(bad_multipart)?;
                let kind = MediaKind::try_from(raw.trim().to_lowercase())
                    .map_err(|e| AppError::validation(e.to_string()))?;
                media_kind = Some(kind);
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| AppError::validation("file is required"))?;
    let caption = caption.ok_or_else(|| AppError::validation("caption is required"))?;

    let post = state
        .posts
        .create(user_id, &caption, upload, media_kind)
        .await?;
    Ok((StatusCode::CREATED, Json(post.into())))
}

#[instrument(skip(state))]
pub async fn list_feed(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiQuery(options): TransformQuery,
) -> AppResult<Json<FeedResponse>> {
    let feed = state.posts.list_feed(user_id, &options).await?;
    let posts = feed.into_iter().map(FeedItem::from).collect();
    Ok(Json(FeedResponse { posts }))
}

#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiQuery(options): TransformQuery,
) -> AppResult<Json<FeedItem>> {
    let post = state.posts.get(user_id, id, &options).await?;
    Ok(Json(post.into()))
}

#[instrument(skip(state, body))]
pub async fn edit_caption(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(body): ApiJson<CaptionRequest>,
) -> AppResult<Json<PostResponse>> {
    let post = state.posts.update_caption(user_id, id, &body.caption).await?;
    Ok(Json(post.into()))
}

#[instrument(skip(state))]
pub async fn delete_post(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ApiPath(id): ApiPath<Uuid>,
) -> AppResult<Json<DeleteResponse>> {
    state.posts.delete(user_id, id).await?;
    Ok(Json(DeleteResponse {
        success: true,
        message: "Post deleted".into(),
        post_id: id,
    }))
}
