//! Feed post lifecycle: create with media, text edits, delete with dedup
//! release.

use chrono::Utc;
use common::{EntityKind, EventMethod, MediaKind};
use sea_orm::prelude::Expr;
use sea_orm::sea_query::Alias;
use sea_orm::*;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::dedup;
use super::intake::PostForm;
use super::tags;
use super::variants::{self, AssetManifest};
use crate::entity::{feed_post, user_data};
use crate::error::AppError;
use crate::extractors::auth::AuthUser;
use crate::models::feed::{
    FeedPostResponse, MAX_DESCRIPTION_LEN, MAX_TEXT_LEN, MAX_TITLE_LEN, PostType,
    UpdatePostRequest, validate_len,
};
use crate::state::AppState;
use crate::upload::IncomingFile;
use crate::utils::user_data as index;

fn encode<T: serde::Serialize>(value: &T) -> Result<String, AppError> {
    serde_json::to_string(value).map_err(|e| AppError::Internal(format!("encode: {e}")))
}

/// One uploaded file resolved to its stored renditions.
struct Asset {
    hash: String,
    manifest: AssetManifest,
    /// The record was created by this request rather than reused.
    fresh: bool,
}

/// Generate the renditions for one file, or reuse them when its bytes were
/// uploaded before.
async fn acquire(state: &AppState, kind: MediaKind, file: &IncomingFile) -> Result<Asset, AppError> {
    let hash = file.staged.hash().to_hex();
    if let Some(manifest) = dedup::lookup(&state.db, &hash).await? {
        info!(hash, "Reusing stored asset");
        return Ok(Asset {
            hash,
            manifest,
            fresh: false,
        });
    }

    let uid = Uuid::now_v7().simple().to_string();
    let input = file.staged.path();
    let store = state.store.as_ref();
    let manifest = match kind {
        MediaKind::Photo => {
            variants::build_image(
                store,
                input,
                &uid,
                &file.ext,
                state.config.media.thumbnail_width,
            )
            .await?
        }
        MediaKind::Video => {
            variants::build_video(state.transcoder.as_ref(), store, input, &uid).await?
        }
        MediaKind::Audio => {
            variants::build_audio(
                state.transcoder.as_ref(),
                store,
                &state.config.media,
                input,
                &uid,
            )
            .await?
        }
        MediaKind::Document => {
            return Err(AppError::InvalidExtension(
                "Documents cannot be attached to posts".into(),
            ));
        }
    };

    let (manifest, fresh) =
        dedup::register(&state.db, store, &hash, file.staged.size(), manifest).await?;
    Ok(Asset {
        hash,
        manifest,
        fresh,
    })
}

/// Remove records this request created and never attached.
async fn release_fresh(state: &AppState, assets: &[Asset], post_id: &str) {
    for asset in assets.iter().filter(|a| a.fresh) {
        if let Err(e) = dedup::release(&state.db, &state.store, &asset.hash, post_id).await {
            warn!(hash = %asset.hash, error = %e, "Cleanup of unattached asset failed");
        }
    }
}

/// Text part of a new post.
struct Draft<'a> {
    post_id: &'a str,
    author: &'a AuthUser,
    post_type: PostType,
    text: &'a str,
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
}

fn post_model(draft: &Draft<'_>, assets: &[Asset]) -> Result<feed_post::ActiveModel, AppError> {
    let now = Utc::now();
    let mut media = Vec::new();
    let mut media_urls = Vec::new();
    let mut resolutions = Vec::new();
    let mut subtitles = std::collections::BTreeMap::new();
    for asset in assets {
        let manifest = &asset.manifest;
        media.extend(manifest.media.iter().cloned());
        media_urls.extend(manifest.file_names());
        resolutions.extend(manifest.resolutions.iter().cloned());
        subtitles.extend(manifest.subtitles.clone());
    }
    let thumbnail = assets.iter().find_map(|a| a.manifest.thumbnail.clone());

    Ok(feed_post::ActiveModel {
        id: Set(draft.post_id.to_string()),
        user_id: Set(draft.author.user_id.clone()),
        username: Set(draft.author.username.clone()),
        post_type: Set(draft.post_type.as_str().to_string()),
        text: Set(draft.text.to_string()),
        title: Set(draft.title.to_string()),
        description: Set(draft.description.to_string()),
        tags: Set(encode(&draft.tags)?),
        media: Set(encode(&media)?),
        media_urls: Set(encode(&media_urls)?),
        resolutions: Set(encode(&resolutions)?),
        subtitles: Set(encode(&subtitles)?),
        thumbnail: Set(thumbnail),
        created_at: Set(now),
        timestamp: Set(now.timestamp()),
        likes: Set(0),
    })
}

/// Times a post is re-persisted after an asset disappears under it.
const STALE_ASSET_RETRIES: usize = 2;

/// Validate, transcode, persist, index and announce a new post.
#[instrument(skip(state, author, form), fields(user_id = %author.user_id))]
pub async fn create(
    state: &AppState,
    author: &AuthUser,
    form: PostForm,
) -> Result<FeedPostResponse, AppError> {
    let post_type: PostType = form
        .get("type")
        .ok_or_else(|| AppError::Validation("Missing field 'type'".into()))?
        .parse()?;
    let text = form.get("text").unwrap_or_default().to_string();
    let title = form.get("title").unwrap_or_default().to_string();
    let description = form.get("description").unwrap_or_default().to_string();
    validate_len("text", &text, MAX_TEXT_LEN)?;
    validate_len("title", &title, MAX_TITLE_LEN)?;
    validate_len("description", &description, MAX_DESCRIPTION_LEN)?;
    let tags = form.get("tags").map(tags::parse_field).unwrap_or_default();

    if let Some(unexpected) = form
        .files
        .iter()
        .find(|f| Some(f.field.as_str()) != post_type.file_field())
    {
        return Err(AppError::Validation(format!(
            "Field '{}' is not accepted for {post_type} posts",
            unexpected.field
        )));
    }
    if form.files.len() > post_type.max_files() {
        return Err(AppError::Validation(format!(
            "{post_type} posts take at most {} files",
            post_type.max_files()
        )));
    }
    if post_type.requires_media() && form.files.is_empty() {
        return Err(AppError::NoMediaUploaded);
    }

    // Every file is checked before any transcoding starts.
    let kind = post_type.media_kind();
    for f in &form.files {
        f.file.check(kind)?;
    }

    let post_id = Uuid::now_v7().to_string();

    // `assets[i]` belongs to `form.files[i]`.
    let mut assets: Vec<Asset> = Vec::with_capacity(form.files.len());
    if let Some(kind) = kind {
        for f in &form.files {
            match acquire(state, kind, &f.file).await {
                Ok(asset) => assets.push(asset),
                Err(e) => {
                    release_fresh(state, &assets, &post_id).await;
                    return Err(e);
                }
            }
        }
    }

    let draft = Draft {
        post_id: &post_id,
        author,
        post_type,
        text: &text,
        title: &title,
        description: &description,
        tags: &tags,
    };

    let mut retries = 0;
    let model = loop {
        let persisted = match post_model(&draft, &assets) {
            Ok(post) => persist(state, post, &assets, &author.user_id, &post_id).await,
            Err(e) => Err(e),
        };
        let stale = match persisted {
            Ok(Persisted::Created(model)) => break model,
            Ok(Persisted::Stale(hash)) if retries < STALE_ASSET_RETRIES => hash,
            Ok(Persisted::Stale(hash)) => {
                release_fresh(state, &assets, &post_id).await;
                return Err(AppError::Conflict(format!(
                    "Asset {hash} keeps being removed, retry"
                )));
            }
            Err(e) => {
                release_fresh(state, &assets, &post_id).await;
                return Err(e);
            }
        };

        retries += 1;
        warn!(hash = %stale, "Asset removed before attach, acquiring again");
        let (Some(kind), Some(index)) = (kind, assets.iter().position(|a| a.hash == stale))
        else {
            release_fresh(state, &assets, &post_id).await;
            return Err(AppError::Internal(format!("unknown stale asset {stale}")));
        };
        match acquire(state, kind, &form.files[index].file).await {
            Ok(asset) => {
                for slot in assets.iter_mut().filter(|a| a.hash == stale) {
                    slot.manifest = asset.manifest.clone();
                    slot.fresh = asset.fresh;
                }
            }
            Err(e) => {
                release_fresh(state, &assets, &post_id).await;
                return Err(e);
            }
        }
    };

    state.events.hashtags(&post_id, &author.user_id, &tags);
    state
        .events
        .feed_post(EventMethod::Post, &author.user_id, &post_id);

    info!(post_id, post_type = %post_type, assets = assets.len(), "Post created");
    Ok(model.into())
}

enum Persisted {
    Created(feed_post::Model),
    /// The record for this hash was removed after it was acquired.
    Stale(String),
}

async fn persist(
    state: &AppState,
    post: feed_post::ActiveModel,
    assets: &[Asset],
    user_id: &str,
    post_id: &str,
) -> Result<Persisted, AppError> {
    let txn = state.db.begin().await?;
    let model = post.insert(&txn).await?;

    // Sorted so concurrent posts sharing assets lock them in the same order.
    let mut hashes: Vec<&str> = assets.iter().map(|a| a.hash.as_str()).collect();
    hashes.sort_unstable();
    hashes.dedup();
    for hash in hashes {
        if !dedup::lock_record(&txn, hash).await? {
            txn.rollback().await?;
            return Ok(Persisted::Stale(hash.to_string()));
        }
    }

    for asset in assets {
        dedup::attach(&txn, &asset.hash, post_id, user_id, &asset.manifest.primary).await?;
    }
    index::insert_entries(
        &txn,
        vec![index::entry(
            user_id,
            user_data::FEED_POST,
            post_id,
            user_data::FEED_POST,
            post_id,
        )],
    )
    .await?;
    txn.commit().await?;
    Ok(Persisted::Created(model))
}

pub async fn get(db: &DatabaseConnection, post_id: &str) -> Result<feed_post::Model, AppError> {
    feed_post::Entity::find_by_id(post_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Post {post_id} not found")))
}

async fn owned_or_forbidden(
    db: &DatabaseConnection,
    post_id: &str,
    user_id: &str,
) -> Result<feed_post::Model, AppError> {
    let post = get(db, post_id).await?;
    if post.user_id != user_id {
        return Err(AppError::Forbidden("Only the author can change this post".into()));
    }
    Ok(post)
}

/// Update text fields in one statement and return the updated row.
#[instrument(skip(state, req))]
pub async fn edit(
    state: &AppState,
    user_id: &str,
    post_id: &str,
    req: UpdatePostRequest,
) -> Result<FeedPostResponse, AppError> {
    req.validate()?;

    let mut update = feed_post::Entity::update_many();
    if let Some(text) = req.text {
        update = update.col_expr(feed_post::Column::Text, Expr::value(text.trim().to_string()));
    }
    if let Some(title) = req.title {
        update = update.col_expr(feed_post::Column::Title, Expr::value(title.trim().to_string()));
    }
    if let Some(description) = req.description {
        update = update.col_expr(
            feed_post::Column::Description,
            Expr::value(description.trim().to_string()),
        );
    }
    if let Some(raw) = &req.tags {
        let tags = tags::sanitize(raw.iter().map(String::as_str));
        update = update.col_expr(feed_post::Column::Tags, Expr::value(encode(&tags)?));
    }

    let updated = update
        .filter(feed_post::Column::Id.eq(post_id))
        .filter(Expr::col(Alias::new(EntityKind::Feed.owner_field_name())).eq(user_id))
        .exec_with_returning(&state.db)
        .await?;

    let Some(model) = updated.into_iter().next() else {
        owned_or_forbidden(&state.db, post_id, user_id).await?;
        return Err(AppError::NotFound(format!("Post {post_id} not found")));
    };

    state.events.feed_post(EventMethod::Put, user_id, post_id);
    Ok(model.into())
}

/// Delete the post, then release its assets and index entry. Only the
/// post delete is authoritative; later steps log their failures.
#[instrument(skip(state))]
pub async fn delete(state: &AppState, user_id: &str, post_id: &str) -> Result<(), AppError> {
    owned_or_forbidden(&state.db, post_id, user_id).await?;

    let res = feed_post::Entity::delete_many()
        .filter(feed_post::Column::Id.eq(post_id))
        .filter(Expr::col(Alias::new(EntityKind::Feed.owner_field_name())).eq(user_id))
        .exec(&state.db)
        .await?;
    if res.rows_affected == 0 {
        return Err(AppError::NotFound(format!("Post {post_id} not found")));
    }

    match dedup::hashes_of_post(&state.db, post_id).await {
        Ok(hashes) => {
            for hash in hashes {
                if let Err(e) = dedup::release(&state.db, &state.store, &hash, post_id).await {
                    warn!(hash, error = %e, "Asset release failed");
                }
            }
        }
        Err(e) => warn!(error = %e, "Could not list post assets"),
    }

    if let Err(e) = index::remove_entry(&state.db, user_id, user_data::FEED_POST, post_id).await {
        warn!(error = %e, "Index entry not removed");
    }

    state.events.feed_post(EventMethod::Delete, user_id, post_id);
    info!("Post deleted");
    Ok(())
}
