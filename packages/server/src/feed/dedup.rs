//! Content-hash deduplication of feed assets.
//!
//! One `file_record` per hash owns the generated files; `file_record_ref`
//! rows tie it to the posts using it. The last reference going away removes
//! the record and its directory.

use chrono::Utc;
use common::storage::{FilesystemUploadStore, UploadStore};
use sea_orm::sea_query::{LockType, OnConflict};
use sea_orm::*;
use tracing::{info, instrument, warn};

use super::variants::AssetManifest;
use crate::entity::{file_record, file_record_ref};
use crate::error::AppError;

fn decode(record: &file_record::Model) -> Result<AssetManifest, AppError> {
    serde_json::from_str(&record.manifest).map_err(|e| {
        AppError::Internal(format!(
            "corrupt manifest for {}: {e}",
            record.content_hash
        ))
    })
}

/// Manifest already stored for `hash`.
pub async fn lookup<C: ConnectionTrait>(
    db: &C,
    hash: &str,
) -> Result<Option<AssetManifest>, AppError> {
    match file_record::Entity::find_by_id(hash).one(db).await? {
        Some(record) => decode(&record).map(Some),
        None => Ok(None),
    }
}

/// Store a freshly generated asset under `hash`. The flag is `true` when this
/// call created the record.
///
/// If another upload of the same bytes won the race, this upload's files are
/// removed and the winner's manifest is returned.
#[instrument(skip(db, store, manifest))]
pub async fn register(
    db: &DatabaseConnection,
    store: &FilesystemUploadStore,
    hash: &str,
    size: u64,
    manifest: AssetManifest,
) -> Result<(AssetManifest, bool), AppError> {
    let encoded = serde_json::to_string(&manifest)
        .map_err(|e| AppError::Internal(format!("manifest encode: {e}")))?;
    let record = file_record::ActiveModel {
        content_hash: Set(hash.to_string()),
        kind: Set(manifest.kind.as_str().to_string()),
        root_path: Set(manifest.root.clone()),
        manifest: Set(encoded),
        size: Set(i64::try_from(size).unwrap_or(i64::MAX)),
        created_at: Set(Utc::now()),
    };

    let inserted = match file_record::Entity::insert(record)
        .on_conflict(
            OnConflict::column(file_record::Column::ContentHash)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await
    {
        Ok(rows) => rows > 0,
        Err(DbErr::RecordNotInserted) => false,
        Err(e) => return Err(e.into()),
    };
    if inserted {
        return Ok((manifest, true));
    }

    if let Err(e) = store.delete_dir(&manifest.root).await {
        warn!(root = %manifest.root, error = %e, "Failed to remove duplicate asset");
    }
    let winner = lookup(db, hash)
        .await?
        .ok_or_else(|| AppError::Conflict("Asset was removed concurrently, retry".into()))?;
    Ok((winner, false))
}

/// Lock the record for `hash` until the transaction ends. Returns `false`
/// when the record was removed after it was looked up.
///
/// `release` takes the same lock, so a reference attached while it is held
/// cannot be lost to a concurrent removal.
pub async fn lock_record<C: ConnectionTrait>(db: &C, hash: &str) -> Result<bool, DbErr> {
    Ok(file_record::Entity::find_by_id(hash)
        .lock(LockType::Update)
        .one(db)
        .await?
        .is_some())
}

/// Reference `hash` from `post_id`. Repeated attaches are no-ops.
pub async fn attach<C: ConnectionTrait>(
    db: &C,
    hash: &str,
    post_id: &str,
    user_id: &str,
    path: &str,
) -> Result<(), DbErr> {
    let reference = file_record_ref::ActiveModel {
        content_hash: Set(hash.to_string()),
        post_id: Set(post_id.to_string()),
        user_id: Set(user_id.to_string()),
        path: Set(path.to_string()),
        created_at: Set(Utc::now()),
    };
    match file_record_ref::Entity::insert(reference)
        .on_conflict(
            OnConflict::columns([
                file_record_ref::Column::ContentHash,
                file_record_ref::Column::PostId,
            ])
            .do_nothing()
            .to_owned(),
        )
        .exec_without_returning(db)
        .await
    {
        Ok(_) | Err(DbErr::RecordNotInserted) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Hashes a post references.
pub async fn hashes_of_post<C: ConnectionTrait>(db: &C, post_id: &str) -> Result<Vec<String>, DbErr> {
    Ok(file_record_ref::Entity::find()
        .filter(file_record_ref::Column::PostId.eq(post_id))
        .all(db)
        .await?
        .into_iter()
        .map(|r| r.content_hash)
        .collect())
}

/// Drop `post_id`'s reference to `hash`; remove the record and its files
/// once nothing references it. Returns whether the files were removed.
#[instrument(skip(db, store))]
pub async fn release(
    db: &DatabaseConnection,
    store: &FilesystemUploadStore,
    hash: &str,
    post_id: &str,
) -> Result<bool, AppError> {
    let txn = db.begin().await?;
    let record = file_record::Entity::find_by_id(hash)
        .lock(LockType::Update)
        .one(&txn)
        .await?;
    file_record_ref::Entity::delete_many()
        .filter(file_record_ref::Column::ContentHash.eq(hash))
        .filter(file_record_ref::Column::PostId.eq(post_id))
        .exec(&txn)
        .await?;
    let remaining = file_record_ref::Entity::find()
        .filter(file_record_ref::Column::ContentHash.eq(hash))
        .count(&txn)
        .await?;
    let Some(record) = record.filter(|_| remaining == 0) else {
        txn.commit().await?;
        return Ok(false);
    };
    file_record::Entity::delete_by_id(hash).exec(&txn).await?;
    txn.commit().await?;

    store.delete_dir(&record.root_path).await?;
    info!(root = %record.root_path, "Unreferenced asset removed");
    Ok(true)
}
