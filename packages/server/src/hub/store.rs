//! Persistence for rooms and messages.

use chrono::Utc;
use common::EntityKind;
use sea_orm::prelude::Expr;
use sea_orm::sea_query::{Alias, OnConflict};
use sea_orm::*;
use tracing::instrument;
use uuid::Uuid;

use super::protocol::{Attachment, ReplyRef, encode_files};
use crate::entity::{chat, chat_participant, message};
use crate::error::AppError;
use crate::models::shared::Pagination;

/// Canonical key of a participant set: sorted ids joined with `:`.
pub fn participant_key(ids: &[&str]) -> String {
    let mut ids: Vec<&str> = ids.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids.join(":")
}

pub async fn find_chat<C: ConnectionTrait>(db: &C, room: &str) -> Result<chat::Model, AppError> {
    chat::Entity::find_by_id(room)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Chat {room} not found")))
}

/// Participants of `room`, sorted by user id.
pub async fn participants<C: ConnectionTrait>(
    db: &C,
    room: &str,
) -> Result<Vec<chat_participant::Model>, DbErr> {
    chat_participant::Entity::find()
        .filter(chat_participant::Column::ChatId.eq(room))
        .order_by_asc(chat_participant::Column::UserId)
        .all(db)
        .await
}

/// Fails with `not_found` for an unknown room and `forbidden` for outsiders.
pub async fn require_participant<C: ConnectionTrait>(
    db: &C,
    room: &str,
    user_id: &str,
) -> Result<chat::Model, AppError> {
    let chat = find_chat(db, room).await?;
    let member = chat_participant::Entity::find_by_id((room.to_string(), user_id.to_string()))
        .one(db)
        .await?;
    if member.is_none() {
        return Err(AppError::Forbidden(format!(
            "User is not a participant of chat {room}"
        )));
    }
    Ok(chat)
}

/// The latest `limit` messages of `room`, oldest first.
pub async fn recent_messages<C: ConnectionTrait>(
    db: &C,
    room: &str,
    limit: u64,
) -> Result<Vec<message::Model>, DbErr> {
    let mut messages = message::Entity::find()
        .filter(message::Column::ChatId.eq(room))
        .order_by_desc(message::Column::CreatedAt)
        .order_by_desc(message::Column::Id)
        .limit(limit)
        .all(db)
        .await?;
    messages.reverse();
    Ok(messages)
}

/// Page `page` of the room history, newest first.
pub async fn page_history<C: ConnectionTrait>(
    db: &C,
    room: &str,
    page: u64,
    per_page: u64,
) -> Result<(Vec<message::Model>, Pagination), AppError> {
    let select = message::Entity::find().filter(message::Column::ChatId.eq(room));
    let total = select.clone().paginate(db, per_page).num_items().await?;
    let messages = select
        .order_by_desc(message::Column::CreatedAt)
        .order_by_desc(message::Column::Id)
        .offset(Some((page - 1) * per_page))
        .limit(Some(per_page))
        .all(db)
        .await?;
    Ok((messages, Pagination::new(page, per_page, total)))
}

fn preview_text(content: &str, files: &[Attachment]) -> String {
    if !content.trim().is_empty() {
        return content.chars().take(200).collect();
    }
    match files.len() {
        1 => format!("Sent {}", files[0].filename),
        n => format!("Sent {n} attachments"),
    }
}

/// Store a new message and refresh the room preview and read flags.
///
/// The sender must be a participant; a reply target must live in the same
/// room.
#[instrument(skip(db, content, files))]
pub async fn insert_message(
    db: &DatabaseConnection,
    room: &str,
    sender: &str,
    content: String,
    files: Vec<Attachment>,
    reply_to: Option<&str>,
) -> Result<message::Model, AppError> {
    if content.trim().is_empty() && files.is_empty() {
        return Err(AppError::Validation(
            "Message must carry text or attachments".into(),
        ));
    }

    let txn = db.begin().await?;
    require_participant(&txn, room, sender).await?;

    let reply = match reply_to {
        Some(target_id) => {
            let target = message::Entity::find_by_id(target_id)
                .filter(message::Column::ChatId.eq(room))
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("Reply target {target_id} not found"))
                })?;
            let snapshot = ReplyRef {
                id: target.id,
                user: target.sender_id,
                text: target.content,
            };
            Some(
                serde_json::to_string(&snapshot)
                    .map_err(|e| AppError::Internal(format!("encode reply: {e}")))?,
            )
        }
        None => None,
    };

    let now = Utc::now();
    let preview = preview_text(&content, &files);
    let model = message::ActiveModel {
        id: Set(Uuid::now_v7().to_string()),
        chat_id: Set(room.to_string()),
        sender_id: Set(sender.to_string()),
        content: Set(content),
        files: Set(encode_files(&files)),
        reply_to: Set(reply),
        created_at: Set(now),
        edited_at: Set(None),
    }
    .insert(&txn)
    .await?;

    chat::Entity::update_many()
        .col_expr(chat::Column::LastText, Expr::value(Some(preview)))
        .col_expr(chat::Column::LastSender, Expr::value(Some(sender.to_string())))
        .col_expr(chat::Column::LastAt, Expr::value(Some(now)))
        .col_expr(chat::Column::UpdatedAt, Expr::value(now))
        .filter(chat::Column::Id.eq(room))
        .exec(&txn)
        .await?;

    chat_participant::Entity::update_many()
        .col_expr(chat_participant::Column::Read, Expr::value(false))
        .filter(chat_participant::Column::ChatId.eq(room))
        .filter(chat_participant::Column::UserId.ne(sender))
        .exec(&txn)
        .await?;
    chat_participant::Entity::update_many()
        .col_expr(chat_participant::Column::Read, Expr::value(true))
        .filter(chat_participant::Column::ChatId.eq(room))
        .filter(chat_participant::Column::UserId.eq(sender))
        .exec(&txn)
        .await?;

    txn.commit().await?;
    Ok(model)
}

async fn find_own_message<C: ConnectionTrait>(
    db: &C,
    id: &str,
    user_id: &str,
) -> Result<message::Model, AppError> {
    let existing = message::Entity::find_by_id(id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Message {id} not found")))?;
    if existing.sender_id != user_id {
        return Err(AppError::Forbidden(
            "Only the sender can change this message".into(),
        ));
    }
    Ok(existing)
}

/// Replace the text of a message. Id and creation time are kept.
#[instrument(skip(db, content))]
pub async fn edit_message(
    db: &DatabaseConnection,
    id: &str,
    user_id: &str,
    content: String,
) -> Result<message::Model, AppError> {
    let txn = db.begin().await?;
    let existing = find_own_message(&txn, id, user_id).await?;
    if content.trim().is_empty() && existing.files == "[]" {
        return Err(AppError::Validation("Message must not become empty".into()));
    }

    let mut active: message::ActiveModel = existing.into();
    active.content = Set(content);
    active.edited_at = Set(Some(Utc::now()));
    let model = active.update(&txn).await?;
    txn.commit().await?;
    Ok(model)
}

/// Delete a message and return what was removed.
#[instrument(skip(db))]
pub async fn delete_message(
    db: &DatabaseConnection,
    id: &str,
    user_id: &str,
) -> Result<message::Model, AppError> {
    let existing = find_own_message(db, id, user_id).await?;
    let res = message::Entity::delete_many()
        .filter(message::Column::Id.eq(id))
        .filter(Expr::col(Alias::new(EntityKind::Chat.owner_field_name())).eq(user_id))
        .exec(db)
        .await?;
    if res.rows_affected == 0 {
        return Err(AppError::NotFound(format!("Message {id} not found")));
    }
    Ok(existing)
}

/// Find the direct chat between two users or create it.
///
/// Returns the chat and whether it was created by this call.
#[instrument(skip(db))]
pub async fn get_or_create_direct(
    db: &DatabaseConnection,
    user_a: &str,
    user_b: &str,
) -> Result<(chat::Model, bool), AppError> {
    if user_a == user_b {
        return Err(AppError::Validation(
            "A direct chat needs two different users".into(),
        ));
    }
    let key = participant_key(&[user_a, user_b]);

    if let Some(existing) = find_by_key(db, &key).await? {
        return Ok((existing, false));
    }

    let now = Utc::now();
    let id = Uuid::now_v7().to_string();
    let txn = db.begin().await?;
    let inserted = chat::Entity::insert(chat::ActiveModel {
        id: Set(id.clone()),
        participant_key: Set(key.clone()),
        last_text: Set(None),
        last_sender: Set(None),
        last_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    })
    .on_conflict(
        OnConflict::column(chat::Column::ParticipantKey)
            .do_nothing()
            .to_owned(),
    )
    .exec_without_returning(&txn)
    .await;

    match inserted {
        Ok(rows) if rows > 0 => {}
        // Lost the race; the winner's chat is the canonical one.
        Ok(_) | Err(DbErr::RecordNotInserted) => {
            txn.rollback().await?;
            let existing = find_by_key(db, &key)
                .await?
                .ok_or_else(|| AppError::Internal("direct chat missing after conflict".into()))?;
            return Ok((existing, false));
        }
        Err(e) => return Err(e.into()),
    }

    let mut members = [user_a, user_b];
    members.sort_unstable();
    chat_participant::Entity::insert_many(members.iter().map(|user| {
        chat_participant::ActiveModel {
            chat_id: Set(id.clone()),
            user_id: Set(String::from(*user)),
            read: Set(true),
        }
    }))
    .exec_without_returning(&txn)
    .await?;
    txn.commit().await?;

    let created = find_chat(db, &id).await?;
    Ok((created, true))
}

async fn find_by_key<C: ConnectionTrait>(db: &C, key: &str) -> Result<Option<chat::Model>, DbErr> {
    chat::Entity::find()
        .filter(chat::Column::ParticipantKey.eq(key))
        .one(db)
        .await
}

/// Chats `user_id` takes part in, most recently active first, each with its
/// sorted participant rows.
pub async fn list_chats<C: ConnectionTrait>(
    db: &C,
    user_id: &str,
) -> Result<Vec<(chat::Model, Vec<chat_participant::Model>)>, AppError> {
    let memberships = chat_participant::Entity::find()
        .filter(chat_participant::Column::UserId.eq(user_id))
        .all(db)
        .await?;
    let ids: Vec<String> = memberships.into_iter().map(|m| m.chat_id).collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let chats = chat::Entity::find()
        .filter(chat::Column::Id.is_in(ids.clone()))
        .order_by_desc(chat::Column::UpdatedAt)
        .all(db)
        .await?;
    let mut members = chat_participant::Entity::find()
        .filter(chat_participant::Column::ChatId.is_in(ids))
        .order_by_asc(chat_participant::Column::UserId)
        .all(db)
        .await?;

    Ok(chats
        .into_iter()
        .map(|chat| {
            let (mine, rest): (Vec<_>, Vec<_>) =
                members.drain(..).partition(|m| m.chat_id == chat.id);
            members = rest;
            (chat, mine)
        })
        .collect())
}

/// Mark the room as read for `user_id`.
pub async fn mark_read(db: &DatabaseConnection, room: &str, user_id: &str) -> Result<(), AppError> {
    require_participant(db, room, user_id).await?;
    chat_participant::Entity::update_many()
        .col_expr(chat_participant::Column::Read, Expr::value(true))
        .filter(chat_participant::Column::ChatId.eq(room))
        .filter(chat_participant::Column::UserId.eq(user_id))
        .exec(db)
        .await?;
    Ok(())
}

/// The other member of a two-person room.
pub fn counterpart<'a>(participants: &'a [chat_participant::Model], user_id: &str) -> Option<&'a str> {
    if participants.len() != 2 {
        return None;
    }
    participants
        .iter()
        .map(|p| p.user_id.as_str())
        .find(|id| *id != user_id)
}
