//! Still image re-encoding and thumbnails.
//!
//! These functions are CPU bound; call them from `spawn_blocking`.

use std::path::Path;

use image::ImageReader;
use image::imageops::FilterType;

use crate::error::MediaError;

/// Dimensions of a processed image and its thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageOutput {
    pub width: u32,
    pub height: u32,
    pub thumb_width: u32,
    pub thumb_height: u32,
}

/// Decode `input`, write a metadata-free copy to `full_out` and a thumbnail
/// at most `thumb_width` wide to `thumb_out`. Output formats follow the
/// destination extensions.
pub fn process_image(
    input: &Path,
    full_out: &Path,
    thumb_out: &Path,
    thumb_width: u32,
) -> Result<ImageOutput, MediaError> {
    let img = ImageReader::open(input)?
        .with_guessed_format()?
        .decode()
        .map_err(|e| MediaError::Decode(e.to_string()))?;

    let (width, height) = (img.width(), img.height());
    if width == 0 || height == 0 {
        return Err(MediaError::Decode("empty image".into()));
    }

    img.save(full_out)
        .map_err(|e| MediaError::Encode(e.to_string()))?;

    let tw = thumb_width.min(width).max(1);
    let th = u32::try_from((u64::from(height) * u64::from(tw) / u64::from(width)).max(1))
        .unwrap_or(u32::MAX);
    let thumb = img.resize_exact(tw, th, FilterType::Lanczos3);
    if let Some(parent) = thumb_out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    thumb
        .save(thumb_out)
        .map_err(|e| MediaError::Encode(e.to_string()))?;

    Ok(ImageOutput {
        width,
        height,
        thumb_width: tw,
        thumb_height: th,
    })
}
