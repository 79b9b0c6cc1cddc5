//! Generated renditions of one uploaded asset.

use std::collections::BTreeMap;
use std::path::Path;

use common::storage::{FilesystemUploadStore, UploadStore};
use common::{EntityKind, MediaKind};
use media::subtitle::{VTT_STUB, subtitle_file_name};
use media::transcoder::extract_poster_with_fallback;
use media::{MediaConfig, Transcoder, plan_variants};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::error::AppError;

/// Everything produced for one asset. Stored as the file record manifest
/// and reused when the same bytes are uploaded again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifest {
    pub kind: MediaKind,
    /// Directory holding every file below, relative to the static root.
    pub root: String,
    /// Variant paths, highest first.
    pub media: Vec<String>,
    /// Index-aligned with `media`: fitted height, bitrate tier, or image height.
    pub resolutions: Vec<String>,
    /// Highest retained variant.
    pub primary: String,
    /// Video poster or image thumbnail.
    pub thumbnail: Option<String>,
    /// Language to WebVTT path.
    #[serde(default)]
    pub subtitles: BTreeMap<String, String>,
}

impl AssetManifest {
    /// Short names of the variants, as shown to clients.
    pub fn file_names(&self) -> Vec<String> {
        self.media
            .iter()
            .map(|p| p.rsplit('/').next().unwrap_or(p).to_string())
            .collect()
    }
}

fn asset_root(kind: MediaKind, uid: &str) -> String {
    format!("{}/{uid}", EntityKind::Feed.upload_dir(kind))
}

async fn prepare_dir(store: &FilesystemUploadStore, root: &str) -> Result<(), AppError> {
    let dir = store.resolve(root)?;
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| AppError::Internal(format!("create {root}: {e}")))
}

async fn discard(store: &FilesystemUploadStore, root: &str) {
    if let Err(e) = store.delete_dir(root).await {
        warn!(root, error = %e, "Failed to remove generated media");
    }
}

/// Probe, transcode every rung of the ladder the source can fill, and take a
/// poster. Failed rungs are skipped; no successful rung fails the asset.
#[instrument(skip(transcoder, store, input))]
pub async fn build_video(
    transcoder: &dyn Transcoder,
    store: &FilesystemUploadStore,
    input: &Path,
    uid: &str,
) -> Result<AssetManifest, AppError> {
    let probe = transcoder.probe(input).await?;
    let root = asset_root(MediaKind::Video, uid);
    prepare_dir(store, &root).await?;

    let mut media = Vec::new();
    let mut resolutions = Vec::new();
    let mut last_err = None;
    for variant in plan_variants(probe.width, probe.height) {
        let path = format!("{root}/{uid}-{}.mp4", variant.label);
        let output = store.resolve(&path)?;
        match transcoder
            .encode_video(input, &output, variant.width, variant.height)
            .await
        {
            Ok(()) => {
                media.push(path);
                resolutions.push(variant.height.to_string());
            }
            Err(e) => {
                warn!(label = %variant.label, error = %e, "Variant failed, skipping");
                last_err = Some(e);
            }
        }
    }

    let Some(primary) = media.first().cloned() else {
        discard(store, &root).await;
        return Err(match last_err {
            Some(e) => AppError::TranscodeFailed(format!("no variant could be produced: {e}")),
            None => AppError::TranscodeFailed("no variant could be produced".into()),
        });
    };

    let poster = format!("{root}/{uid}.jpg");
    let thumbnail = match extract_poster_with_fallback(
        transcoder,
        input,
        &store.resolve(&poster)?,
        probe.duration,
    )
    .await
    {
        Ok(()) => Some(poster),
        Err(e) => {
            warn!(error = %e, "Poster extraction failed");
            None
        }
    };

    info!(variants = media.len(), "Video transcoded");
    Ok(AssetManifest {
        kind: MediaKind::Video,
        root,
        media,
        resolutions,
        primary,
        thumbnail,
        subtitles: BTreeMap::new(),
    })
}

/// Single AAC rendition plus an empty WebVTT track per configured language.
#[instrument(skip(transcoder, store, config, input))]
pub async fn build_audio(
    transcoder: &dyn Transcoder,
    store: &FilesystemUploadStore,
    config: &MediaConfig,
    input: &Path,
    uid: &str,
) -> Result<AssetManifest, AppError> {
    let root = asset_root(MediaKind::Audio, uid);
    prepare_dir(store, &root).await?;

    let path = format!("{root}/{uid}.m4a");
    let output = store.resolve(&path)?;
    if let Err(e) = transcoder
        .encode_audio(input, &output, config.audio_bitrate_kbps)
        .await
    {
        discard(store, &root).await;
        return Err(e.into());
    }

    let mut subtitles = BTreeMap::new();
    for lang in &config.subtitle_languages {
        let vtt = format!("{root}/{}", subtitle_file_name(uid, lang));
        match store.put(&vtt, VTT_STUB.as_bytes()).await {
            Ok(_) => {
                subtitles.insert(lang.clone(), vtt);
            }
            Err(e) => warn!(lang, error = %e, "Subtitle stub not written"),
        }
    }

    Ok(AssetManifest {
        kind: MediaKind::Audio,
        root,
        media: vec![path.clone()],
        resolutions: vec![format!("{}k", config.audio_bitrate_kbps)],
        primary: path,
        thumbnail: None,
        subtitles,
    })
}

/// Re-encode an image without metadata and add a thumbnail under `thumb/`.
#[instrument(skip(store, input))]
pub async fn build_image(
    store: &FilesystemUploadStore,
    input: &Path,
    uid: &str,
    ext: &str,
    thumb_width: u32,
) -> Result<AssetManifest, AppError> {
    let root = asset_root(MediaKind::Photo, uid);
    prepare_dir(store, &root).await?;

    let path = format!("{root}/{uid}.{ext}");
    let thumb = format!("{root}/thumb/{uid}.{ext}");
    let full_out = store.resolve(&path)?;
    let thumb_out = store.resolve(&thumb)?;
    let input = input.to_path_buf();

    let result = tokio::task::spawn_blocking(move || {
        media::images::process_image(&input, &full_out, &thumb_out, thumb_width)
    })
    .await
    .map_err(|e| AppError::Internal(format!("image task failed: {e}")))?;

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            discard(store, &root).await;
            return Err(e.into());
        }
    };

    Ok(AssetManifest {
        kind: MediaKind::Photo,
        root,
        media: vec![path.clone()],
        resolutions: vec![output.height.to_string()],
        primary: path,
        thumbnail: Some(thumb),
        subtitles: BTreeMap::new(),
    })
}
