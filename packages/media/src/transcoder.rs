use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::probe::{ProbeInfo, parse_ffprobe_json};

/// External media tooling used by the feed pipeline.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<ProbeInfo, MediaError>;

    /// H.264/AAC MP4 scaled to exactly `width`x`height`, faststart.
    async fn encode_video(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
    ) -> Result<(), MediaError>;

    /// Single JPEG frame taken at `at_secs`.
    async fn extract_poster(&self, input: &Path, output: &Path, at_secs: f64)
    -> Result<(), MediaError>;

    /// AAC in an MP4 container at `bitrate_kbps`.
    async fn encode_audio(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
    ) -> Result<(), MediaError>;
}

/// Try the poster at half the duration, then 0.5s, then the first frame.
pub async fn extract_poster_with_fallback(
    transcoder: &dyn Transcoder,
    input: &Path,
    output: &Path,
    duration: Option<f64>,
) -> Result<(), MediaError> {
    let mut offsets = Vec::with_capacity(3);
    if let Some(d) = duration {
        offsets.push(d / 2.0);
    }
    offsets.push(0.5);
    offsets.push(0.0);

    let mut last_err = None;
    for at in offsets {
        match transcoder.extract_poster(input, output, at).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(at, error = %e, "Poster extraction attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| MediaError::Encode("no poster offsets".into())))
}

/// [`Transcoder`] backed by the `ffmpeg` and `ffprobe` binaries.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    config: MediaConfig,
}

impl FfmpegTranscoder {
    pub fn new(config: MediaConfig) -> Self {
        Self { config }
    }

    async fn run(&self, tool: &str, mut command: Command) -> Result<Vec<u8>, MediaError> {
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().map_err(|err| MediaError::Spawn {
            tool: tool.to_string(),
            message: err.to_string(),
        })?;

        let secs = self.config.timeout_secs;
        let output = tokio::time::timeout(Duration::from_secs(secs), child.wait_with_output())
            .await
            .map_err(|_| MediaError::Timeout {
                tool: tool.to_string(),
                secs,
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // ffmpeg prints the banner first; the tail carries the error.
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            warn!(tool, status = %output.status, "Media tool failed");
            return Err(MediaError::Failed {
                tool: tool.to_string(),
                status: output.status.to_string(),
                stderr: tail,
            });
        }
        Ok(output.stdout)
    }

    fn ffmpeg(&self) -> Command {
        let mut command = Command::new(&self.config.ffmpeg_bin);
        command.arg("-hide_banner").arg("-nostdin").arg("-y");
        command
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn probe(&self, input: &Path) -> Result<ProbeInfo, MediaError> {
        let mut command = Command::new(&self.config.ffprobe_bin);
        command
            .args(["-v", "error", "-print_format", "json"])
            .args(["-show_streams", "-show_format"])
            .arg(input);
        let stdout = self.run("ffprobe", command).await?;
        parse_ffprobe_json(&String::from_utf8_lossy(&stdout))
    }

    async fn encode_video(
        &self,
        input: &Path,
        output: &Path,
        width: u32,
        height: u32,
    ) -> Result<(), MediaError> {
        let mut command = self.ffmpeg();
        command
            .arg("-i")
            .arg(input)
            .args(["-vf", &format!("scale={width}:{height}")])
            .args(["-c:v", "libx264", "-preset", &self.config.preset])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-c:a", "aac", "-b:a", "128k"])
            .args(["-movflags", "+faststart"])
            .arg(output);
        self.run("ffmpeg", command).await.map(|_| ())
    }

    async fn extract_poster(
        &self,
        input: &Path,
        output: &Path,
        at_secs: f64,
    ) -> Result<(), MediaError> {
        let mut command = self.ffmpeg();
        command
            .args(["-ss", &format!("{at_secs:.3}")])
            .arg("-i")
            .arg(input)
            .args(["-frames:v", "1", "-q:v", "2"])
            .arg(output);
        self.run("ffmpeg", command).await?;
        // ffmpeg exits 0 without writing when seeking past the end.
        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(MediaError::Encode(format!("no frame at {at_secs:.3}s"))),
        }
    }

    async fn encode_audio(
        &self,
        input: &Path,
        output: &Path,
        bitrate_kbps: u32,
    ) -> Result<(), MediaError> {
        let mut command = self.ffmpeg();
        command
            .arg("-i")
            .arg(input)
            .arg("-vn")
            .args(["-c:a", "aac", "-b:a", &format!("{bitrate_kbps}k")])
            .args(["-movflags", "+faststart"])
            .arg(output);
        self.run("ffmpeg", command).await.map(|_| ())
    }
}
