use axum::Json;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::instrument;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppJson;
use crate::feed::{intake, posts};
use crate::models::feed::*;
use crate::models::shared::{ApiResponse, ok};
use crate::state::AppState;

/// Most files a single post form may carry.
pub const MAX_POST_FILES: usize = 10;

pub fn post_body_limit(per_file: u64) -> DefaultBodyLimit {
    let per_file = usize::try_from(per_file).unwrap_or(usize::MAX);
    DefaultBodyLimit::max(per_file.saturating_mul(MAX_POST_FILES).saturating_add(64 * 1024))
}

#[utoipa::path(
    post,
    path = "/api/v1/feed/post",
    tag = "Feed",
    operation_id = "createPost",
    summary = "Create a feed post",
    description = "Multipart form with `type` (text, image, video, audio, blog, merchandise), \
        optional `text`, `title`, `description`, `tags`, and files in `images[]`, `video` or \
        `audio` depending on the type. Video is transcoded to a resolution ladder with a poster, \
        audio to AAC with subtitle stubs, images get a thumbnail. Identical uploads reuse the \
        stored assets.",
    responses(
        (status = 201, description = "Post created", body = FeedPostResponse),
        (status = 400, description = "Validation error (invalid_input, invalid_extension, no_media_uploaded)", body = ErrorBody),
        (status = 413, description = "File too large (file_too_large)", body = ErrorBody),
        (status = 415, description = "Content type not allowed (invalid_mime)", body = ErrorBody),
        (status = 422, description = "Undecodable or malicious media (decode_failed, virus_signature_matched)", body = ErrorBody),
        (status = 500, description = "Transcoding failed (transcode_failed)", body = ErrorBody),
        (status = 504, description = "Transcoder timed out (upstream_timeout)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, multipart), fields(user = %auth_user.user_id))]
pub async fn create_post(
    auth_user: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let form = intake::read_post_form(
        multipart,
        &state.store,
        state.config.storage.max_upload_size,
        MAX_POST_FILES,
    )
    .await?;
    let post = posts::create(&state, &auth_user, form).await?;
    Ok((StatusCode::CREATED, ok(post)))
}

#[utoipa::path(
    get,
    path = "/api/v1/feed/post/{postid}",
    tag = "Feed",
    operation_id = "getPost",
    summary = "Get a feed post",
    params(("postid" = String, Path, description = "Post ID")),
    responses(
        (status = 200, description = "Post", body = FeedPostResponse),
        (status = 404, description = "Post not found (not_found)", body = ErrorBody),
    ),
)]
#[instrument(skip(state))]
pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<Json<ApiResponse<FeedPostResponse>>, AppError> {
    let post = posts::get(&state.db, &post_id).await?;
    Ok(ok(FeedPostResponse::from(post)))
}

#[utoipa::path(
    patch,
    path = "/api/v1/feed/post/{postid}",
    tag = "Feed",
    operation_id = "updatePost",
    summary = "Edit a feed post",
    description = "Updates text fields and tags. Media cannot be replaced. Author only.",
    params(("postid" = String, Path, description = "Post ID")),
    request_body = UpdatePostRequest,
    responses(
        (status = 200, description = "Post updated", body = FeedPostResponse),
        (status = 400, description = "Validation error (invalid_input)", body = ErrorBody),
        (status = 403, description = "Not the author (forbidden)", body = ErrorBody),
        (status = 404, description = "Post not found (not_found)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload), fields(user = %auth_user.user_id))]
pub async fn update_post(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    AppJson(payload): AppJson<UpdatePostRequest>,
) -> Result<Json<ApiResponse<FeedPostResponse>>, AppError> {
    let post = posts::edit(&state, &auth_user.user_id, &post_id, payload).await?;
    Ok(ok(post))
}

#[utoipa::path(
    delete,
    path = "/api/v1/feed/post/{postid}",
    tag = "Feed",
    operation_id = "deletePost",
    summary = "Delete a feed post",
    description = "Removes the post. Stored assets are deleted once no other post references them.",
    params(("postid" = String, Path, description = "Post ID")),
    responses(
        (status = 204, description = "Post deleted"),
        (status = 403, description = "Not the author (forbidden)", body = ErrorBody),
        (status = 404, description = "Post not found (not_found)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user), fields(user = %auth_user.user_id))]
pub async fn delete_post(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(post_id): Path<String>,
) -> Result<StatusCode, AppError> {
    posts::delete(&state, &auth_user.user_id, &post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
