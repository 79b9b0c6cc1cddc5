use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::MediaKind;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entity::feed_post;
use crate::error::AppError;

pub const MAX_TEXT_LEN: usize = 5000;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_DESCRIPTION_LEN: usize = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Text,
    Image,
    Video,
    Audio,
    Blog,
    Merchandise,
}

impl PostType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Blog => "blog",
            Self::Merchandise => "merchandise",
        }
    }

    /// Media kind accepted by this post type.
    pub fn media_kind(self) -> Option<MediaKind> {
        match self {
            Self::Text => None,
            Self::Image | Self::Blog | Self::Merchandise => Some(MediaKind::Photo),
            Self::Video => Some(MediaKind::Video),
            Self::Audio => Some(MediaKind::Audio),
        }
    }

    /// Whether a post of this type must carry at least one file.
    pub fn requires_media(self) -> bool {
        matches!(self, Self::Image | Self::Video | Self::Audio)
    }

    /// Multipart field carrying this type's files.
    pub fn file_field(self) -> Option<&'static str> {
        match self.media_kind()? {
            MediaKind::Photo => Some("images"),
            MediaKind::Video => Some("video"),
            MediaKind::Audio => Some("audio"),
            MediaKind::Document => None,
        }
    }

    /// Most files one post of this type accepts.
    pub fn max_files(self) -> usize {
        match self {
            Self::Text => 0,
            Self::Image | Self::Blog | Self::Merchandise => 10,
            Self::Video | Self::Audio => 1,
        }
    }
}

impl fmt::Display for PostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "audio" => Ok(Self::Audio),
            "blog" => Ok(Self::Blog),
            "merchandise" => Ok(Self::Merchandise),
            other => Err(AppError::Validation(format!("Unknown post type '{other}'"))),
        }
    }
}

pub fn validate_len(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    if value.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

/// Text-only edit of a post. Media cannot be changed after creation.
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct UpdatePostRequest {
    pub text: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl UpdatePostRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.text.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.tags.is_none()
        {
            return Err(AppError::Validation("Nothing to update".into()));
        }
        if let Some(text) = &self.text {
            validate_len("text", text, MAX_TEXT_LEN)?;
        }
        if let Some(title) = &self.title {
            validate_len("title", title, MAX_TITLE_LEN)?;
        }
        if let Some(description) = &self.description {
            validate_len("description", description, MAX_DESCRIPTION_LEN)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FeedPostResponse {
    pub id: String,
    pub user_id: String,
    pub username: String,
    pub post_type: String,
    pub text: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    /// Storage paths under `/static`, highest variant first.
    pub media: Vec<String>,
    pub media_urls: Vec<String>,
    /// Index-aligned with `media`.
    pub resolutions: Vec<String>,
    pub subtitles: BTreeMap<String, String>,
    pub thumbnail: Option<String>,
    pub created_at: DateTime<Utc>,
    pub timestamp: i64,
    pub likes: i64,
}

fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

impl From<feed_post::Model> for FeedPostResponse {
    fn from(m: feed_post::Model) -> Self {
        Self {
            tags: decode_list(&m.tags),
            media: decode_list(&m.media),
            media_urls: decode_list(&m.media_urls),
            resolutions: decode_list(&m.resolutions),
            subtitles: serde_json::from_str(&m.subtitles).unwrap_or_default(),
            id: m.id,
            user_id: m.user_id,
            username: m.username,
            post_type: m.post_type,
            text: m.text,
            title: m.title,
            description: m.description,
            thumbnail: m.thumbnail,
            created_at: m.created_at,
            timestamp: m.timestamp,
            likes: m.likes,
        }
    }
}
