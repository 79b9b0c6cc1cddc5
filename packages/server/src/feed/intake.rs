//! Multipart intake for new posts.

use std::collections::HashMap;

use axum::extract::Multipart;
use common::storage::FilesystemUploadStore;

use crate::error::AppError;
use crate::upload::{IncomingFile, stage_field};

/// A staged file and the field it arrived in (`images`, `video`, `audio`).
pub struct PostFile {
    pub field: String,
    pub file: IncomingFile,
}

pub struct PostForm {
    pub fields: HashMap<String, String>,
    pub files: Vec<PostFile>,
}

impl PostForm {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|v| v.trim()).filter(|v| !v.is_empty())
    }
}

/// `images[]` and `images` name the same field.
fn normalize_field(name: &str) -> &str {
    name.strip_suffix("[]").unwrap_or(name)
}

/// Read every part: text fields into a map, files staged to disk under the
/// per-file cap. At most `max_files` files are accepted.
pub async fn read_post_form(
    mut multipart: Multipart,
    store: &FilesystemUploadStore,
    max_file_size: u64,
    max_files: usize,
) -> Result<PostForm, AppError> {
    let mut fields = HashMap::new();
    let mut files = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(format!("Multipart error: {e}")))?
    {
        let Some(name) = field.name().map(|n| normalize_field(n).to_string()) else {
            continue;
        };

        if field.file_name().is_some() {
            if files.len() >= max_files {
                return Err(AppError::Validation(format!(
                    "At most {max_files} files per post"
                )));
            }
            let file = stage_field(field, store, max_file_size).await?;
            files.push(PostFile { field: name, file });
        } else {
            let text = field
                .text()
                .await
                .map_err(|e| AppError::Validation(format!("Failed to read '{name}': {e}")))?;
            fields.insert(name, text);
        }
    }

    Ok(PostForm { fields, files })
}
