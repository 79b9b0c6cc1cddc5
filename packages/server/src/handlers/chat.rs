use axum::Json;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header::ORIGIN};
use axum::response::{IntoResponse, Response};
use common::storage::UploadStore;
use common::{EntityKind, EventMethod};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, ErrorBody};
use crate::extractors::auth::AuthUser;
use crate::extractors::json::AppJson;
use crate::hub::protocol::{Attachment, FrameAction, OutboundFrame};
use crate::hub::{session, store};
use crate::models::chat::*;
use crate::models::shared::{ApiResponse, PageQuery, ok};
use crate::state::AppState;
use crate::upload::{IncomingFile, stage_field};
use crate::utils::filename::stored_name;

/// Most attachments per upload request.
pub const MAX_ATTACHMENTS: usize = 10;

/// Body limit for `/newchat/upload`: every attachment at its cap plus form overhead.
pub fn chat_upload_body_limit(per_file: u64) -> DefaultBodyLimit {
    let per_file = usize::try_from(per_file).unwrap_or(usize::MAX);
    DefaultBodyLimit::max(per_file.saturating_mul(MAX_ATTACHMENTS).saturating_add(64 * 1024))
}

#[utoipa::path(
    get,
    path = "/ws/{room}",
    tag = "Chat",
    operation_id = "openChatSocket",
    summary = "Open a chat WebSocket",
    description = "Upgrades to a WebSocket bound to `room`. The token may be passed as `?token=`. \
        On connect the latest messages are pushed oldest-first with action `history`. \
        Clients send `{action: chat|edit|delete, id?, content?, reply_to?}`.",
    params(("room" = String, Path, description = "Chat ID")),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 401, description = "Unauthorized (unauthorized)", body = ErrorBody),
        (status = 403, description = "Origin not allowed or not a participant (forbidden)", body = ErrorBody),
        (status = 404, description = "Chat not found (not_found)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(ws, headers, state, auth_user), fields(user = %auth_user.user_id))]
pub async fn open_socket(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Response, AppError> {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if !session::origin_allowed(origin, &state.config.server.allowed_origins) {
        return Err(AppError::Forbidden("Origin not allowed".into()));
    }
    store::require_participant(&state.db, &room, &auth_user.user_id).await?;

    let user_id = auth_user.user_id;
    Ok(ws.on_upgrade(move |socket| session::run(socket, state, room, user_id)))
}

/// Remove stored attachments of a message that was never written.
async fn remove_attachments(state: &AppState, attachments: &[Attachment]) {
    for attachment in attachments {
        if let Err(e) = state.store.delete(&attachment.path).await {
            warn!(path = %attachment.path, error = %e, "Orphaned attachment not removed");
        }
    }
}

#[utoipa::path(
    post,
    path = "/newchat/upload",
    tag = "Chat",
    operation_id = "uploadChatAttachments",
    summary = "Send a message with attachments",
    description = "Multipart form with one or more `file[]` parts, `chat` and optional `content`. \
        Files are stored under `uploads/chat/<kind>/`, the message is persisted and broadcast to the room.",
    responses(
        (status = 200, description = "Message stored and broadcast", body = OutboundFrame),
        (status = 400, description = "Validation error (invalid_input, invalid_extension)", body = ErrorBody),
        (status = 403, description = "Not a participant (forbidden)", body = ErrorBody),
        (status = 413, description = "File too large (file_too_large)", body = ErrorBody),
        (status = 415, description = "Content type not allowed (invalid_mime)", body = ErrorBody),
        (status = 422, description = "Malware signature (virus_signature_matched)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, multipart), fields(user = %auth_user.user_id))]
pub async fn upload_attachments(
    auth_user: AuthUser,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ApiResponse<OutboundFrame>>, AppError> {
    let max_size = state.config.storage.chat_max_upload_size;
    let mut room = None;
    let mut content = String::new();
    let mut files: Vec<IncomingFile> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_some() {
            if files.len() >= MAX_ATTACHMENTS {
                return Err(AppError::Validation(format!(
                    "At most {MAX_ATTACHMENTS} attachments per message"
                )));
            }
            files.push(stage_field(field, &state.store, max_size).await?);
            continue;
        }
        let text = field
            .text()
            .await
            .map_err(|e| AppError::Validation(format!("Failed to read '{name}': {e}")))?;
        match name.as_str() {
            "chat" => room = Some(text.trim().to_string()),
            "content" => content = text,
            _ => {}
        }
    }

    let room = room
        .filter(|r| !r.is_empty())
        .ok_or_else(|| AppError::Validation("Missing field 'chat'".into()))?;
    if files.is_empty() {
        return Err(AppError::Validation("No files uploaded".into()));
    }
    store::require_participant(&state.db, &room, &auth_user.user_id).await?;

    // Every file is checked before any of them is stored.
    let mut checked = Vec::with_capacity(files.len());
    for file in files {
        let kind = file.check(None)?.kind;
        checked.push((file, kind));
    }

    let mut attachments = Vec::with_capacity(checked.len());
    for (file, kind) in checked {
        let uid = Uuid::now_v7().simple().to_string();
        let path = format!(
            "{}/{}",
            EntityKind::Chat.upload_dir(kind),
            stored_name(&uid, &file.ext)
        );
        match state.store.persist(file.staged, &path).await {
            Ok(stored) => attachments.push(Attachment {
                filename: file.filename,
                path: stored.path,
            }),
            Err(e) => {
                remove_attachments(&state, &attachments).await;
                return Err(e.into());
            }
        }
    }

    let model = match store::insert_message(
        &state.db,
        &room,
        &auth_user.user_id,
        content,
        attachments.clone(),
        None,
    )
    .await
    {
        Ok(model) => model,
        Err(e) => {
            remove_attachments(&state, &attachments).await;
            return Err(e);
        }
    };
    state
        .events
        .chat_message(EventMethod::Post, &room, &model.id);
    let frame = OutboundFrame::from_message(FrameAction::Chat, &model);
    state.hub.broadcast(&room, frame.to_text()?);

    info!(room, files = frame.files.len(), "Attachments sent");
    Ok(ok(frame))
}

#[utoipa::path(
    get,
    path = "/newchat/{room}",
    tag = "Chat",
    operation_id = "getChatHistory",
    summary = "Paginated chat history",
    description = "Messages of `room`, newest first. Participants only.",
    params(("room" = String, Path, description = "Chat ID"), PageQuery),
    responses(
        (status = 200, description = "History page", body = HistoryResponse),
        (status = 403, description = "Not a participant (forbidden)", body = ErrorBody),
        (status = 404, description = "Chat not found (not_found)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, query))]
pub async fn history(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(room): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<ApiResponse<HistoryResponse>>, AppError> {
    store::require_participant(&state.db, &room, &auth_user.user_id).await?;
    let (page, per_page) = query.resolve();
    let (messages, pagination) = store::page_history(&state.db, &room, page, per_page).await?;

    Ok(ok(HistoryResponse {
        messages: messages
            .iter()
            .map(|m| OutboundFrame::from_message(FrameAction::History, m))
            .collect(),
        pagination,
    }))
}

#[utoipa::path(
    post,
    path = "/newchat/direct",
    tag = "Chat",
    operation_id = "getOrCreateDirectChat",
    summary = "Get or create a direct chat",
    description = "Returns the two-person chat between the caller and `user_id`, creating it if needed.",
    request_body = DirectChatRequest,
    responses(
        (status = 200, description = "Existing chat", body = DirectChatResponse),
        (status = 201, description = "Chat created", body = DirectChatResponse),
        (status = 400, description = "Same user twice (invalid_input)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user, payload))]
pub async fn direct_chat(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<DirectChatRequest>,
) -> Result<impl IntoResponse, AppError> {
    let other = payload.user_id.trim();
    if other.is_empty() {
        return Err(AppError::Validation("user_id is required".into()));
    }
    let (chat, created) = store::get_or_create_direct(&state.db, &auth_user.user_id, other).await?;
    let members = store::participants(&state.db, &chat.id).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        ok(DirectChatResponse {
            chat: ChatSummary::new(chat, &members, &auth_user.user_id),
            created,
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/newchat",
    tag = "Chat",
    operation_id = "listChats",
    summary = "List my chats",
    description = "Chats the caller takes part in, most recently active first.",
    responses(
        (status = 200, description = "Chats", body = Vec<ChatSummary>),
        (status = 401, description = "Unauthorized (unauthorized)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn list_chats(
    auth_user: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ChatSummary>>>, AppError> {
    let chats = store::list_chats(&state.db, &auth_user.user_id).await?;
    Ok(ok(chats
        .into_iter()
        .map(|(chat, members)| ChatSummary::new(chat, &members, &auth_user.user_id))
        .collect()))
}

#[utoipa::path(
    post,
    path = "/newchat/{room}/read",
    tag = "Chat",
    operation_id = "markChatRead",
    summary = "Mark a chat as read",
    params(("room" = String, Path, description = "Chat ID")),
    responses(
        (status = 204, description = "Marked as read"),
        (status = 403, description = "Not a participant (forbidden)", body = ErrorBody),
        (status = 404, description = "Chat not found (not_found)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn mark_read(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<StatusCode, AppError> {
    store::mark_read(&state.db, &room, &auth_user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/newchat/{room}/presence",
    tag = "Chat",
    operation_id = "getChatPresence",
    summary = "Online participants of a chat",
    params(("room" = String, Path, description = "Chat ID")),
    responses(
        (status = 200, description = "Online participants", body = PresenceResponse),
        (status = 403, description = "Not a participant (forbidden)", body = ErrorBody),
    ),
    security(("jwt" = [])),
)]
#[instrument(skip(state, auth_user))]
pub async fn presence(
    auth_user: AuthUser,
    State(state): State<AppState>,
    Path(room): Path<String>,
) -> Result<Json<ApiResponse<PresenceResponse>>, AppError> {
    store::require_participant(&state.db, &room, &auth_user.user_id).await?;
    let online = store::participants(&state.db, &room)
        .await?
        .into_iter()
        .map(|m| m.user_id)
        .filter(|id| state.cache.is_online(id))
        .collect();
    Ok(ok(PresenceResponse { room, online }))
}
