//! ffmpeg producers writing MPEG-TS into a hand-off slot.
//!
//! A producer is started per playlist item. The caller receives a
//! [`ProducerTask`] that resolves when the process exits; nothing else flows
//! back from the transcoder, its only output is the byte stream in the slot.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::Result;

/// Output container. Must stay a streamable format that can be cut into
/// 188-byte aligned datagrams.
pub const OUTPUT_FORMAT: &str = "mpegts";

/// Kind of media a playlist entry refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Video,
    Audio,
}

/// Fixed output profile applied to every item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeProfile {
    /// Output width; sources are scaled down and letterboxed to fit.
    pub width: u32,
    /// Output height.
    pub height: u32,
    pub video_codec: String,
    pub preset: String,
    /// Encoder tune, `None` to omit.
    pub tune: Option<String>,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub audio_channels: u32,
    /// Read input at native frame rate (`-re`). Required for live playout.
    pub realtime: bool,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            tune: Some("zerolatency".to_string()),
            audio_codec: "ac3".to_string(),
            audio_bitrate: "192k".to_string(),
            audio_channels: 2,
            realtime: true,
        }
    }
}

/// One producer launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    /// Source path or URI handed to ffmpeg.
    pub media: String,
    pub media_type: MediaType,
    /// Hand-off slot the muxed stream is written into.
    pub sink: PathBuf,
    /// Start offset as `HH:MM:SS.ff`, see [`format_seek`].
    pub seek: Option<String>,
}

/// How a producer process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerExit {
    pub success: bool,
    /// Exit code, `None` when killed by a signal or never spawned.
    pub code: Option<i32>,
    /// Spawn or wait error, if any.
    pub detail: Option<String>,
}

impl ProducerExit {
    /// Exit record for a producer that never started.
    pub fn not_started(detail: impl Into<String>) -> Self {
        Self {
            success: false,
            code: None,
            detail: Some(detail.into()),
        }
    }
}

/// Resolves when the producer process has exited.
pub type ProducerTask = BoxFuture<'static, ProducerExit>;

/// Starts producers for playlist items.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Start producing `request.media` into `request.sink`.
    ///
    /// Returning `Ok` means the slot has been handed over; a producer that
    /// dies right away still resolves its task with a failed [`ProducerExit`].
    async fn start(&self, request: &LaunchRequest) -> Result<ProducerTask>;
}

/// Format a seek offset in seconds as `HH:MM:SS.ff` (hundredths).
///
/// ```
/// assert_eq!(channelcast_av::format_seek(125.5), "00:02:05.50");
/// ```
pub fn format_seek(secs: f64) -> String {
    let centis = (secs.max(0.0) * 100.0).round() as u64;
    let hours = centis / 360_000;
    let minutes = (centis / 6_000) % 60;
    let seconds = (centis / 100) % 60;
    let fraction = centis % 100;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{fraction:02}")
}

/// ffmpeg-backed [`Transcoder`].
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    profile: TranscodeProfile,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: PathBuf, profile: TranscodeProfile) -> Self {
        Self {
            ffmpeg_path,
            profile,
        }
    }

    pub fn profile(&self) -> &TranscodeProfile {
        &self.profile
    }
}

/// Build the ffmpeg argument list for one launch.
pub fn build_args(profile: &TranscodeProfile, request: &LaunchRequest) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if profile.realtime {
        args.push("-re".to_string());
    }
    // The slot already exists as a pipe; never prompt.
    args.push("-y".to_string());

    // Input seeking: -ss before -i jumps straight to the offset.
    if let Some(ref seek) = request.seek {
        args.extend(["-ss".to_string(), seek.clone()]);
    }
    args.extend(["-i".to_string(), request.media.clone()]);

    match request.media_type {
        MediaType::Video => {
            let (w, h) = (profile.width, profile.height);
            args.extend([
                "-vf".to_string(),
                format!(
                    "scale=w={w}:h={h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black"
                ),
                "-c:v".to_string(),
                profile.video_codec.clone(),
                "-preset".to_string(),
                profile.preset.clone(),
            ]);
            if let Some(ref tune) = profile.tune {
                args.extend(["-tune".to_string(), tune.clone()]);
            }
        }
        MediaType::Audio => args.push("-vn".to_string()),
    }

    args.extend([
        "-c:a".to_string(),
        profile.audio_codec.clone(),
        "-b:a".to_string(),
        profile.audio_bitrate.clone(),
        "-ac".to_string(),
        profile.audio_channels.to_string(),
        "-f".to_string(),
        OUTPUT_FORMAT.to_string(),
        sink_url(&request.sink),
    ]);

    args
}

/// ffmpeg would otherwise guess a protocol from a path containing ':'.
fn sink_url(sink: &Path) -> String {
    format!("file:{}", sink.display())
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn start(&self, request: &LaunchRequest) -> Result<ProducerTask> {
        let args = build_args(&self.profile, request);
        tracing::debug!("FFmpeg args: {:?}", args);
        tracing::info!(
            "Starting ffmpeg for {} -> {}",
            request.media,
            request.sink.display()
        );

        let spawned = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Producers must not outlive the channel.
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!("Failed to spawn ffmpeg for {}: {}", request.media, e);
                let exit = ProducerExit::not_started(format!("failed to spawn ffmpeg: {e}"));
                return Ok(futures::future::ready(exit).boxed());
            }
        };

        Ok(async move {
            match child.wait().await {
                Ok(status) => ProducerExit {
                    success: status.success(),
                    code: status.code(),
                    detail: None,
                },
                Err(e) => ProducerExit {
                    success: false,
                    code: None,
                    detail: Some(format!("failed to wait for ffmpeg: {e}")),
                },
            }
        }
        .boxed())
    }
}
