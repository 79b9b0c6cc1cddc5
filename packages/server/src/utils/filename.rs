use std::path::Path;

/// Why an uploaded filename was refused.
#[derive(Debug, PartialEq, Eq)]
pub enum FilenameError {
    Empty,
    ContainsPathSeparator,
    PathTraversal,
    NullByte,
    ControlCharacter,
    MissingExtension,
}

impl FilenameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "Filename cannot be empty",
            Self::ContainsPathSeparator => "Invalid filename: path separators are not allowed",
            Self::PathTraversal => "Invalid filename: '..' is not allowed",
            Self::NullByte => "Invalid filename: null bytes are not allowed",
            Self::ControlCharacter => "Invalid filename: control characters are not allowed",
            Self::MissingExtension => "Filename must carry an extension",
        }
    }
}

/// Validate a client-supplied filename and return the trimmed name.
///
/// The name is only ever used for display and to pick an extension; stored
/// files are always renamed to a generated id.
pub fn validate_upload_filename(filename: &str) -> Result<&str, FilenameError> {
    let trimmed = filename.trim();

    if trimmed.is_empty() {
        return Err(FilenameError::Empty);
    }
    if trimmed.contains('\0') {
        return Err(FilenameError::NullByte);
    }
    // CRLF would leak into Content-Disposition.
    if trimmed.chars().any(|c| c.is_ascii_control()) {
        return Err(FilenameError::ControlCharacter);
    }
    if trimmed.contains('/') || trimmed.contains('\\') {
        return Err(FilenameError::ContainsPathSeparator);
    }
    if trimmed == ".." || trimmed == "." {
        return Err(FilenameError::PathTraversal);
    }
    Ok(trimmed)
}

/// Lowercased extension of `filename`, without the dot.
pub fn extension_of(filename: &str) -> Result<String, FilenameError> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .ok_or(FilenameError::MissingExtension)?;
    Ok(ext.to_ascii_lowercase())
}

/// Storage name for an upload: `<uid>.<ext>`.
pub fn stored_name(uid: &str, ext: &str) -> String {
    format!("{uid}.{ext}")
}
