use serde::Deserialize;

use crate::error::MediaError;

/// Stream geometry and duration of a media file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeInfo {
    pub width: u32,
    pub height: u32,
    /// Seconds, when the container reports it.
    pub duration: Option<f64>,
}

#[derive(Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

fn parse_duration(raw: Option<&str>) -> Option<f64> {
    raw.and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
}

/// Parse `ffprobe -print_format json -show_streams -show_format` output.
///
/// Audio-only input yields zero width and height.
pub fn parse_ffprobe_json(raw: &str) -> Result<ProbeInfo, MediaError> {
    let output: FfprobeOutput =
        serde_json::from_str(raw).map_err(|e| MediaError::Probe(format!("bad ffprobe json: {e}")))?;

    if output.streams.is_empty() {
        return Err(MediaError::Probe("no streams found".into()));
    }

    let video = output
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    let duration = parse_duration(
        output
            .format
            .as_ref()
            .and_then(|f| f.duration.as_deref()),
    )
    .or_else(|| {
        output
            .streams
            .iter()
            .find_map(|s| parse_duration(s.duration.as_deref()))
    });

    Ok(ProbeInfo {
        width: video.and_then(|v| v.width).unwrap_or(0),
        height: video.and_then(|v| v.height).unwrap_or(0),
        duration,
    })
}
