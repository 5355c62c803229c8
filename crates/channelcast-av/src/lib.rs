//! # channelcast-av
//!
//! The external tool seam of channelcast.
//!
//! - **Tool discovery** ([`tools`]) -- locate ffmpeg/ffprobe and report versions.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout
//!   support for short-lived tools.
//! - **Duration oracle** ([`DurationOracle`], [`FfprobeOracle`]) -- item length
//!   in seconds with a fixed fallback.
//! - **Producers** ([`Transcoder`], [`FfmpegTranscoder`]) -- start ffmpeg
//!   writing MPEG-TS into a hand-off slot.

mod error;

pub mod command;
pub mod probe;
pub mod tools;
pub mod transcode;

pub use command::{ToolCommand, ToolOutput};
pub use error::{Error, Result};
pub use probe::{parse_duration, DurationOracle, FfprobeOracle, DEFAULT_DURATION_SECS};
pub use tools::{check_tool, check_tools, get_tool_path, require_tool, resolve_tool_path, ToolInfo};
pub use transcode::{
    build_args, format_seek, FfmpegTranscoder, LaunchRequest, MediaType, ProducerExit,
    ProducerTask, TranscodeProfile, Transcoder,
};
