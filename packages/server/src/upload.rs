use axum::extract::multipart::Field;
use common::MediaKind;
use common::storage::{FilesystemUploadStore, StagedFile, StorageError};
use media::sniff::{effective_mime, has_malware_signature};
use tracing::warn;

use crate::error::AppError;
use crate::utils::filename::{extension_of, validate_upload_filename};

/// One multipart file part written to the staging area.
pub struct IncomingFile {
    pub filename: String,
    /// Lowercased, without the dot.
    pub ext: String,
    pub declared_mime: Option<String>,
    pub staged: StagedFile,
}

/// Result of checking an [`IncomingFile`] against the allow-lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckedFile {
    pub kind: MediaKind,
    pub mime: String,
}

/// Stream a multipart file field into a staged temp file capped at `max_size`.
///
/// An oversized part fails with `file_too_large`; the partial file is removed
/// when the stager is dropped.
pub async fn stage_field(
    mut field: Field<'_>,
    store: &FilesystemUploadStore,
    max_size: u64,
) -> Result<IncomingFile, AppError> {
    let raw_name = field
        .file_name()
        .map(str::to_string)
        .ok_or_else(|| AppError::Validation("File field must have a filename".into()))?;
    let filename = validate_upload_filename(&raw_name)
        .map_err(|e| AppError::Validation(e.message().into()))?
        .to_string();
    let ext = extension_of(&filename).map_err(|e| AppError::InvalidExtension(e.message().into()))?;
    let declared_mime = field.content_type().map(str::to_string);

    let mut stager = store.stager(max_size).await?;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| AppError::Validation(format!("Upload read error: {e}")))?
    {
        if let Err(e) = stager.write(&chunk).await {
            if matches!(e, StorageError::SizeLimitExceeded { .. }) {
                warn!(filename, max_size, "Upload exceeds size cap");
            }
            return Err(e.into());
        }
    }
    let staged = stager.finish().await?;

    Ok(IncomingFile {
        filename,
        ext,
        declared_mime,
        staged,
    })
}

impl IncomingFile {
    /// Validate against `expected` (or the kind implied by the extension).
    ///
    /// Order: extension, malware signature, sniffed MIME.
    pub fn check(&self, expected: Option<MediaKind>) -> Result<CheckedFile, AppError> {
        let kind = match expected {
            Some(kind) => kind,
            None => MediaKind::from_extension(&self.ext).ok_or_else(|| {
                AppError::InvalidExtension(format!("Extension '.{}' is not allowed", self.ext))
            })?,
        };
        if !kind.accepts_extension(&self.ext) {
            return Err(AppError::InvalidExtension(format!(
                "Extension '.{}' is not allowed for {kind} uploads",
                self.ext
            )));
        }

        let head = self.staged.head();
        if has_malware_signature(head) {
            warn!(filename = %self.filename, "Upload matched a malware signature");
            return Err(AppError::VirusDetected(format!(
                "File '{}' matched a known malware signature",
                self.filename
            )));
        }

        let mime = effective_mime(head, self.declared_mime.as_deref());
        if !kind.accepts_mime(&mime) {
            return Err(AppError::InvalidMime(format!(
                "Content type '{mime}' is not allowed for {kind} uploads"
            )));
        }
        Ok(CheckedFile { kind, mime })
    }
}
