use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Entities that own uploads, cache entries and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Artist,
    User,
    Baito,
    Song,
    Post,
    Chat,
    Event,
    Farm,
    Crop,
    Place,
    Media,
    Feed,
    Product,
}

impl EntityKind {
    pub const ALL: [EntityKind; 13] = [
        Self::Artist,
        Self::User,
        Self::Baito,
        Self::Song,
        Self::Post,
        Self::Chat,
        Self::Event,
        Self::Farm,
        Self::Crop,
        Self::Place,
        Self::Media,
        Self::Feed,
        Self::Product,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Artist => "artist",
            Self::User => "user",
            Self::Baito => "baito",
            Self::Song => "song",
            Self::Post => "post",
            Self::Chat => "chat",
            Self::Event => "event",
            Self::Farm => "farm",
            Self::Crop => "crop",
            Self::Place => "place",
            Self::Media => "media",
            Self::Feed => "feed",
            Self::Product => "product",
        }
    }

    /// Column naming the owning user on this entity's table. Owner-only
    /// updates and deletes filter on it.
    pub fn owner_field_name(self) -> &'static str {
        match self {
            Self::User => "user_id",
            Self::Chat => "sender_id",
            Self::Feed | Self::Post => "user_id",
            Self::Event | Self::Place | Self::Farm | Self::Artist => "creator_id",
            Self::Baito | Self::Song | Self::Crop | Self::Media | Self::Product => "creator_id",
        }
    }

    /// Key prefix for cached lookups, e.g. `event:`.
    pub fn cache_prefix(self) -> String {
        format!("{}:", self.as_str())
    }

    /// Relative directory under the static root for this entity's uploads.
    pub fn upload_dir(self, media: MediaKind) -> String {
        format!("uploads/{}/{}", self.as_str(), media.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown entity kind: {s}"))
    }
}

/// Upload categories with their extension and MIME allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Audio,
    Video,
    Document,
}

impl MediaKind {
    pub const ALL: [MediaKind; 4] = [Self::Photo, Self::Audio, Self::Video, Self::Document];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
        }
    }

    pub fn extensions(self) -> &'static [&'static str] {
        match self {
            Self::Photo => &["jpg", "jpeg", "png", "gif", "webp"],
            Self::Audio => &["mp3", "wav", "aac"],
            Self::Video => &["mp4", "mov", "avi", "webm"],
            Self::Document => &["pdf", "doc", "docx", "txt"],
        }
    }

    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            Self::Photo => &["image/*"],
            Self::Audio => &["audio/mpeg", "audio/wav", "audio/aac"],
            Self::Video => &[
                "video/mp4",
                "video/quicktime",
                "video/x-msvideo",
                "video/webm",
            ],
            Self::Document => &[
                "application/pdf",
                "application/msword",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "text/plain",
            ],
        }
    }

    pub fn accepts_extension(self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.extensions().contains(&ext.as_str())
    }

    /// Whether `mime` matches the allow-list; `type/*` entries match a prefix.
    pub fn accepts_mime(self, mime: &str) -> bool {
        let mime = mime
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        self.mime_types().iter().any(|allowed| {
            match allowed.strip_suffix('*') {
                Some(prefix) => mime.starts_with(prefix),
                None => mime == *allowed,
            }
        })
    }

    /// Kind whose extension list contains `ext`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.accepts_extension(ext))
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
