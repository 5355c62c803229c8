use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use crate::relay::NetworkTarget;
pub use channelcast_av::TranscodeProfile;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Multicast destination.
    #[serde(default)]
    pub output: NetworkTarget,

    #[serde(default)]
    pub handoff: HandoffConfig,

    #[serde(default)]
    pub transcode: TranscodeProfile,

    #[serde(default)]
    pub tools: ToolsConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HandoffConfig {
    /// Directory holding the two named pipes.
    #[serde(default = "default_handoff_dir")]
    pub dir: PathBuf,
}

fn default_handoff_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            dir: default_handoff_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ToolsConfig {
    #[serde(default)]
    pub ffmpeg_path: Option<PathBuf>,

    #[serde(default)]
    pub ffprobe_path: Option<PathBuf>,
}
