use serde::Deserialize;

/// Media worker configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct MediaConfig {
    /// ffmpeg executable path. Default: "ffmpeg".
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// ffprobe executable path. Default: "ffprobe".
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
    /// Deadline for a single transcoder invocation in seconds. Default: 600.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// x264 preset. Default: "veryfast".
    #[serde(default = "default_preset")]
    pub preset: String,
    /// Width of generated image thumbnails. Default: 300.
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,
    /// Nominal AAC bitrate for audio posts in kbit/s. Default: 192.
    #[serde(default = "default_audio_bitrate_kbps")]
    pub audio_bitrate_kbps: u32,
    /// Languages that receive an empty WebVTT track. Default: ["en"].
    #[serde(default = "default_subtitle_languages")]
    pub subtitle_languages: Vec<String>,
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".into()
}
fn default_ffprobe_bin() -> String {
    "ffprobe".into()
}
fn default_timeout_secs() -> u64 {
    600
}
fn default_preset() -> String {
    "veryfast".into()
}
fn default_thumbnail_width() -> u32 {
    300
}
fn default_audio_bitrate_kbps() -> u32 {
    192
}
fn default_subtitle_languages() -> Vec<String> {
    vec!["en".into()]
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
            timeout_secs: default_timeout_secs(),
            preset: default_preset(),
            thumbnail_width: default_thumbnail_width(),
            audio_bitrate_kbps: default_audio_bitrate_kbps(),
            subtitle_languages: default_subtitle_languages(),
        }
    }
}
